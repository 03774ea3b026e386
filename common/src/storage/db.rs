use std::ops::Deref;

use surrealdb::{
    engine::any::{connect, Any},
    opt::auth::Root,
    Error, Surreal,
};

use crate::error::AppError;

use super::indexes::ensure_chunk_indexes;

#[derive(Clone)]
pub struct SurrealDbClient {
    pub client: Surreal<Any>,
}

impl SurrealDbClient {
    /// Connects, signs in as root and selects the namespace and database.
    pub async fn new(
        address: &str,
        username: &str,
        password: &str,
        namespace: &str,
        database: &str,
    ) -> Result<Self, Error> {
        let db = connect(address).await?;

        db.signin(Root { username, password }).await?;
        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }

    /// Defines the analyzer plus the keyword and vector indexes over the chunk table.
    pub async fn ensure_initialized(
        &self,
        embedding_dimension: usize,
        fts_language: &str,
    ) -> Result<(), AppError> {
        ensure_chunk_indexes(self, embedding_dimension, fts_language).await
    }

    /// Cheap round trip used by readiness probes.
    pub async fn ping(&self) -> Result<(), Error> {
        self.client.query("RETURN true").await?.check()?;
        Ok(())
    }
}

impl Deref for SurrealDbClient {
    type Target = Surreal<Any>;

    fn deref(&self) -> &Self::Target {
        &self.client
    }
}

#[cfg(any(test, feature = "test-utils"))]
impl SurrealDbClient {
    /// Create an in-memory SurrealDB client for testing.
    pub async fn memory(namespace: &str, database: &str) -> Result<Self, Error> {
        let db = connect("mem://").await?;

        db.use_ns(namespace).use_db(database).await?;

        Ok(SurrealDbClient { client: db })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::chunk::{Chunk, ChunkMetadata, StoredChunk};
    use uuid::Uuid;

    #[tokio::test]
    async fn stores_and_fetches_chunks_per_tenant() {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb");
        db.ensure_initialized(3, "english")
            .await
            .expect("Failed to initialize schema");

        let chunk = Chunk {
            id: "c1".into(),
            document_id: "doc-1".into(),
            content: "Revenue grew twelve percent".into(),
            metadata: ChunkMetadata::text("report.pdf").with_page(2),
        };
        StoredChunk::new(chunk.clone(), "user-a", vec![0.1, 0.2, 0.3])
            .store(&db)
            .await
            .expect("store chunk");

        let own = StoredChunk::get_by_ids(&db, "user-a", &["c1".into()])
            .await
            .expect("fetch own");
        assert_eq!(own, vec![chunk]);

        let foreign = StoredChunk::get_by_ids(&db, "user-b", &["c1".into()])
            .await
            .expect("fetch foreign");
        assert!(foreign.is_empty());

        db.ping().await.expect("ping");
    }
}
