use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::chunk::{Chunk, StoredChunk},
    },
};

use crate::index::ChunkStore;

#[derive(Clone)]
pub struct SurrealChunkStore {
    db: SurrealDbClient,
}

impl SurrealChunkStore {
    pub const fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ChunkStore for SurrealChunkStore {
    async fn fetch(&self, tenant_id: &str, ids: &[String]) -> Result<Vec<Chunk>, AppError> {
        StoredChunk::get_by_ids(&self.db, tenant_id, ids).await
    }
}
