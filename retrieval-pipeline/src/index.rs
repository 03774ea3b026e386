//! Narrow interfaces to the retrieval backends.

use async_trait::async_trait;
use common::{
    error::AppError,
    storage::types::chunk::{Chunk, ChunkMetadata},
};
use serde::{Deserialize, Serialize};

/// A single hit from either the vector or the keyword backend.
///
/// Vector hits frequently arrive without `content`; it is backfilled before fusion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    pub id: String,
    pub score: f32,
    pub document_id: String,
    pub metadata: ChunkMetadata,
    #[serde(default)]
    pub content: Option<String>,
}

impl RetrievalCandidate {
    pub fn has_content(&self) -> bool {
        self.content.as_deref().is_some_and(|text| !text.trim().is_empty())
    }

    pub fn fill_from(&mut self, chunk: &Chunk) {
        if !self.has_content() {
            self.content = Some(chunk.content.clone());
        }
        if chunk.metadata.richness() > self.metadata.richness() {
            self.metadata = chunk.metadata.clone();
        }
        if self.document_id.is_empty() {
            self.document_id.clone_from(&chunk.document_id);
        }
    }
}

/// Scope of a retrieval call. `document_ids` narrows to attached documents when non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalFilter {
    pub tenant_id: String,
    pub document_ids: Vec<String>,
}

impl RetrievalFilter {
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            document_ids: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_documents(mut self, document_ids: Vec<String>) -> Self {
        self.document_ids = document_ids;
        self
    }

    pub fn admits(&self, document_id: &str) -> bool {
        self.document_ids.is_empty() || self.document_ids.iter().any(|id| id == document_id)
    }
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<RetrievalCandidate>, AppError>;
}

#[async_trait]
pub trait KeywordIndex: Send + Sync {
    async fn search(
        &self,
        query: &str,
        tenant_id: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievalCandidate>, AppError>;
}

/// Batch lookup of full chunk records, used to backfill content-less hits.
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn fetch(&self, tenant_id: &str, ids: &[String]) -> Result<Vec<Chunk>, AppError>;
}
