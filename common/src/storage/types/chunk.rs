use serde::{Deserialize, Serialize};
use surrealdb::sql::Thing;

use crate::{error::AppError, storage::db::SurrealDbClient};

use super::StoredObject;

/// Structural kind of a chunk, carrying only the fields relevant to that kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkKind {
    #[default]
    Text,
    Table {
        #[serde(default)]
        columns: Vec<String>,
        #[serde(default)]
        row_count: Option<u32>,
    },
    List {
        #[serde(default)]
        item_count: Option<u32>,
    },
    Financial {
        #[serde(default)]
        period: Option<String>,
        #[serde(default)]
        currency: Option<String>,
    },
}

impl ChunkKind {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Table { .. } => "table",
            Self::List { .. } => "list",
            Self::Financial { .. } => "financial",
        }
    }

    /// Tables and financial statements get data-analysis guidance in prompts.
    pub const fn is_tabular(&self) -> bool {
        matches!(self, Self::Table { .. } | Self::Financial { .. })
    }

    fn populated_fields(&self) -> usize {
        match self {
            Self::Text => 0,
            Self::Table { columns, row_count } => {
                usize::from(!columns.is_empty()).saturating_add(usize::from(row_count.is_some()))
            }
            Self::List { item_count } => usize::from(item_count.is_some()),
            Self::Financial { period, currency } => {
                usize::from(period.is_some()).saturating_add(usize::from(currency.is_some()))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ChunkMetadata {
    pub filename: String,
    #[serde(default)]
    pub section: Option<String>,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default)]
    pub micro_summary: Option<String>,
    #[serde(default)]
    pub kind: ChunkKind,
}

impl ChunkMetadata {
    pub fn text(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_section(mut self, section: impl Into<String>) -> Self {
        self.section = Some(section.into());
        self
    }

    #[must_use]
    pub const fn with_page(mut self, page_number: u32) -> Self {
        self.page_number = Some(page_number);
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ChunkKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_micro_summary(mut self, summary: impl Into<String>) -> Self {
        self.micro_summary = Some(summary.into());
        self
    }

    /// Number of populated fields; used to prefer the richer of two records for the same chunk.
    pub fn richness(&self) -> usize {
        [
            !self.filename.is_empty(),
            self.section.is_some(),
            self.page_number.is_some(),
            self.micro_summary.is_some(),
        ]
        .into_iter()
        .map(usize::from)
        .fold(self.kind.populated_fields(), usize::saturating_add)
    }
}

/// A bounded unit of document text, produced upstream by ingestion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
}

/// Persisted form of a chunk, scoped to its owner and carrying its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredChunk {
    pub id: String,
    pub user_id: String,
    pub document_id: String,
    pub content: String,
    pub metadata: ChunkMetadata,
    pub embedding: Vec<f32>,
}

impl StoredObject for StoredChunk {
    fn table_name() -> &'static str {
        "chunk"
    }
}

/// Row shape returned by chunk projections (`record::id(id) AS id`).
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ChunkRow {
    pub id: String,
    pub document_id: String,
    #[serde(default)]
    pub content: String,
    pub metadata: ChunkMetadata,
}

impl From<ChunkRow> for Chunk {
    fn from(row: ChunkRow) -> Self {
        Self {
            id: row.id,
            document_id: row.document_id,
            content: row.content,
            metadata: row.metadata,
        }
    }
}

#[derive(Serialize)]
struct StoredChunkContent<'a> {
    user_id: &'a str,
    document_id: &'a str,
    content: &'a str,
    metadata: &'a ChunkMetadata,
    embedding: &'a [f32],
}

impl StoredChunk {
    pub fn new(chunk: Chunk, user_id: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: chunk.id,
            user_id: user_id.into(),
            document_id: chunk.document_id,
            content: chunk.content,
            metadata: chunk.metadata,
            embedding,
        }
    }

    pub async fn store(&self, db: &SurrealDbClient) -> Result<(), AppError> {
        let content = StoredChunkContent {
            user_id: &self.user_id,
            document_id: &self.document_id,
            content: &self.content,
            metadata: &self.metadata,
            embedding: &self.embedding,
        };
        db.query("CREATE type::thing($table, $id) CONTENT $content")
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("content", serde_json::to_value(content)?))
            .await?
            .check()?;
        Ok(())
    }

    /// Batch fetch of chunks by id, restricted to one tenant.
    pub async fn get_by_ids(
        db: &SurrealDbClient,
        user_id: &str,
        ids: &[String],
    ) -> Result<Vec<Chunk>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let things: Vec<Thing> = ids
            .iter()
            .map(|id| Thing::from((Self::table_name(), id.as_str())))
            .collect();

        let mut response = db
            .query(
                "SELECT record::id(id) AS id, document_id, content, metadata \
                 FROM type::table($table) \
                 WHERE id IN $things AND user_id = $user_id",
            )
            .bind(("table", Self::table_name()))
            .bind(("things", things))
            .bind(("user_id", user_id.to_owned()))
            .await?;

        let rows: Vec<ChunkRow> = response.take(0)?;
        Ok(rows.into_iter().map(Chunk::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metadata_round_trips_tagged_kind() {
        let metadata = ChunkMetadata::text("report.xlsx")
            .with_section("Q3")
            .with_kind(ChunkKind::Financial {
                period: Some("2024-Q3".into()),
                currency: Some("BRL".into()),
            });

        let json = serde_json::to_value(&metadata).expect("serialize");
        assert_eq!(json["kind"]["type"], "financial");
        assert_eq!(json["kind"]["currency"], "BRL");

        let parsed: ChunkMetadata = serde_json::from_value(json).expect("deserialize");
        assert_eq!(parsed, metadata);
    }

    #[test]
    fn missing_kind_defaults_to_text() {
        let parsed: ChunkMetadata =
            serde_json::from_str(r#"{"filename":"notes.md"}"#).expect("deserialize");
        assert_eq!(parsed.kind, ChunkKind::Text);
        assert_eq!(parsed.richness(), 1);
    }

    #[test]
    fn richness_counts_kind_specific_fields() {
        let bare = ChunkMetadata::text("a.pdf");
        let rich = ChunkMetadata::text("a.pdf")
            .with_page(4)
            .with_kind(ChunkKind::Table {
                columns: vec!["year".into()],
                row_count: Some(12),
            });
        assert_eq!(bare.richness(), 1);
        assert_eq!(rich.richness(), 4);
    }
}
