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

use crate::{
    index::{RetrievalCandidate, RetrievalFilter, VectorIndex},
    scoring::distance_to_similarity,
};

/// HNSW candidate list size used by the KNN operator.
const KNN_EF: usize = 40;

#[derive(Debug, Deserialize)]
struct VectorRow {
    id: String,
    document_id: String,
    metadata: ChunkMetadata,
    distance: Option<f32>,
}

/// Approximate nearest-neighbour search over chunk embeddings.
///
/// Returns metadata only; chunk text is backfilled by the caller.
#[derive(Clone)]
pub struct SurrealVectorIndex {
    db: SurrealDbClient,
}

impl SurrealVectorIndex {
    pub const fn new(db: SurrealDbClient) -> Self {
        Self { db }
    }
}

#[async_trait]
impl VectorIndex for SurrealVectorIndex {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: &RetrievalFilter,
    ) -> Result<Vec<RetrievalCandidate>, AppError> {
        if vector.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let document_clause = if filter.document_ids.is_empty() {
            ""
        } else {
            "AND document_id IN $document_ids "
        };
        let sql = format!(
            "SELECT record::id(id) AS id, document_id, metadata, \
             vector::distance::knn() AS distance \
             FROM {table} \
             WHERE user_id = $user_id {document_clause}\
               AND embedding <|{top_k},{KNN_EF}|> $embedding \
             ORDER BY distance",
            table = StoredChunk::table_name(),
        );

        debug!(
            top_k,
            scoped_documents = filter.document_ids.len(),
            "executing chunk KNN query"
        );

        let mut response = self
            .db
            .query(sql)
            .bind(("user_id", filter.tenant_id.clone()))
            .bind(("document_ids", filter.document_ids.clone()))
            .bind(("embedding", vector.to_vec()))
            .await?;

        let rows: Vec<VectorRow> = response.take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| RetrievalCandidate {
                id: row.id,
                score: row.distance.map_or(0.0, distance_to_similarity),
                document_id: row.document_id,
                metadata: row.metadata,
                content: None,
            })
            .collect())
    }
}
