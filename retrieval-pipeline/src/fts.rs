use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{chunk::ChunkMetadata, chunk::StoredChunk, StoredObject},
    },
};

use crate::index::{KeywordIndex, RetrievalCandidate};

#[derive(Debug, Deserialize)]
struct KeywordRow {
    id: String,
    document_id: String,
    content: String,
    metadata: ChunkMetadata,
    fts_score: Option<f32>,
}

/// BM25 full-text search over the chunk table, scoped per tenant.
#[derive(Clone)]
pub struct SurrealKeywordIndex {
    db: SurrealDbClient,
}

impl SurrealKeywordIndex {
    pub const fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl KeywordIndex for SurrealKeywordIndex {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalCandidate>, AppError> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let sql = format!(
            "SELECT record::id(id) AS id, document_id, content, metadata, \
             (IF search::score(0) != NONE THEN search::score(0) ELSE 0 END) AS fts_score \
             FROM {table} \
             WHERE content @0@ $terms \
               AND user_id = $user_id \
             ORDER BY fts_score DESC \
             LIMIT $limit",
            table = StoredChunk::table_name(),
        );

        debug!(limit = top_k, "executing chunk FTS query");

        let mut response = self
            .db
            .query(sql)
            .bind(("terms", query.to_owned()))
            .bind(("user_id", tenant_id.to_owned()))
            .bind(("limit", i64::try_from(top_k).unwrap_or(i64::MAX)))
            .await?;

        let rows: Vec<KeywordRow> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| RetrievalCandidate {
                id: row.id,
                score: row.fts_score.unwrap_or_default(),
                document_id: row.document_id,
                metadata: row.metadata,
                content: Some(row.content),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::storage::types::chunk::Chunk;
    use uuid::Uuid;

    async fn seeded_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("fts_test_ns", &database)
            .await
            .expect("failed to create in-memory surreal");
        db.ensure_initialized(3, "english")
            .await
            .expect("failed to build chunk indexes");

        let rows = [
            ("c1", "user-a", "Quarterly revenue increased by twelve percent."),
            ("c2", "user-a", "The office moved to a new building."),
            ("c3", "user-b", "Revenue figures for another tenant."),
        ];
        for (id, user, content) in rows {
            let chunk = Chunk {
                id: id.into(),
                document_id: format!("doc-{id}"),
                content: content.into(),
                metadata: ChunkMetadata::text("report.pdf"),
            };
            StoredChunk::new(chunk, user, vec![0.1, 0.2, 0.3])
                .store(&db)
                .await
                .expect("store chunk");
        }
        db
    }

    #[tokio::test]
    async fn finds_matching_chunks_for_tenant_only() {
        let index = SurrealKeywordIndex::new(seeded_db().await);

        let results = index
            .search("revenue", "user-a", 10)
            .await
            .expect("fts search");

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "c1");
        assert!(results[0].has_content());
        assert!(results[0].score > 0.0);
    }

    #[tokio::test]
    async fn blank_query_returns_nothing() {
        let index = SurrealKeywordIndex::new(seeded_db().await);
        let results = index.search("   ", "user-a", 10).await.expect("fts search");
        assert!(results.is_empty());
    }
}
