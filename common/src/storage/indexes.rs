use tracing::{debug, info};

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::types::{chunk::StoredChunk, StoredObject};

pub const CHUNK_FTS_INDEX: &str = "idx_chunk_content_fts";
pub const CHUNK_HNSW_INDEX: &str = "idx_chunk_embedding_hnsw";

pub(crate) fn analyzer_name(language: &str) -> String {
    format!("chunk_{}_analyzer", sanitize_language(language))
}

/// Snowball stemmers are keyed by lowercase language name; anything else collapses to english.
fn sanitize_language(language: &str) -> String {
    let cleaned: String = language
        .chars()
        .filter(char::is_ascii_alphabetic)
        .collect::<String>()
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        "english".to_string()
    } else {
        cleaned
    }
}

fn analyzer_definition(language: &str) -> String {
    let language = sanitize_language(language);
    format!(
        "DEFINE ANALYZER IF NOT EXISTS {analyzer}
            TOKENIZERS class
            FILTERS lowercase, ascii, snowball({language});",
        analyzer = analyzer_name(&language),
    )
}

fn fts_definition(language: &str) -> String {
    format!(
        "DEFINE INDEX IF NOT EXISTS {index} ON TABLE {table} \
         FIELDS content SEARCH ANALYZER {analyzer} BM25 HIGHLIGHTS;",
        index = CHUNK_FTS_INDEX,
        table = StoredChunk::table_name(),
        analyzer = analyzer_name(language),
    )
}

/// Overwrites so a changed embedding dimension takes effect on restart.
fn hnsw_definition(dimension: usize) -> String {
    format!(
        "DEFINE INDEX OVERWRITE {index} ON TABLE {table} \
         FIELDS embedding HNSW DIMENSION {dimension} DIST COSINE TYPE F32 EFC 100 M 8;",
        index = CHUNK_HNSW_INDEX,
        table = StoredChunk::table_name(),
    )
}

pub async fn ensure_chunk_indexes(
    db: &SurrealDbClient,
    embedding_dimension: usize,
    fts_language: &str,
) -> Result<(), AppError> {
    let statements = [
        analyzer_definition(fts_language),
        fts_definition(fts_language),
        hnsw_definition(embedding_dimension),
        format!(
            "DEFINE INDEX IF NOT EXISTS idx_chunk_user ON TABLE {} FIELDS user_id;",
            StoredChunk::table_name()
        ),
    ];

    for statement in statements {
        debug!(statement = %statement, "applying chunk schema statement");
        db.client.query(statement).await?.check()?;
    }

    info!(
        dimension = embedding_dimension,
        language = %sanitize_language(fts_language),
        "chunk indexes ready"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analyzer_language_is_sanitized() {
        assert_eq!(analyzer_name("Portuguese"), "chunk_portuguese_analyzer");
        assert_eq!(analyzer_name("en; DROP"), "chunk_endrop_analyzer");
        assert_eq!(analyzer_name(""), "chunk_english_analyzer");
    }

    #[test]
    fn hnsw_definition_carries_dimension() {
        assert!(hnsw_definition(768).contains("DIMENSION 768"));
    }
}
