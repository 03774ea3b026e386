use std::{collections::HashMap, sync::Arc, time::Duration, time::Instant};

use common::{error::AppError, utils::deadline::with_deadline};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    index::{ChunkStore, KeywordIndex, RetrievalCandidate, RetrievalFilter, VectorIndex},
    scoring::{reciprocal_rank_fusion, MergedChunk, RrfConfig},
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HybridStats {
    pub vector_count: usize,
    pub bm25_count: usize,
    pub merged_count: usize,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct HybridRetrieval {
    pub chunks: Vec<MergedChunk>,
    pub stats: HybridStats,
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub top_k: usize,
    pub filter: RetrievalFilter,
}

/// Vector and keyword retrieval fanned out concurrently and fused with RRF.
pub struct HybridRetriever {
    vector: Arc<dyn VectorIndex>,
    keyword: Arc<dyn KeywordIndex>,
    store: Option<Arc<dyn ChunkStore>>,
    rrf: RrfConfig,
    overfetch_factor: usize,
    timeout: Duration,
}

impl HybridRetriever {
    pub fn new(
        vector: Arc<dyn VectorIndex>,
        keyword: Arc<dyn KeywordIndex>,
        store: Option<Arc<dyn ChunkStore>>,
        rrf: RrfConfig,
        overfetch_factor: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            vector,
            keyword,
            store,
            rrf,
            overfetch_factor: overfetch_factor.max(1),
            timeout,
        }
    }

    /// Never fails. A branch that errors or times out contributes nothing;
    /// when both do, the result is empty with zeroed stats.
    #[instrument(level = "trace", skip_all, fields(top_k = options.top_k))]
    pub async fn retrieve(
        &self,
        query: &str,
        embedding: &[f32],
        options: &RetrievalOptions,
        cancel: &CancellationToken,
    ) -> HybridRetrieval {
        if options.top_k == 0 {
            return HybridRetrieval::default();
        }

        let started = Instant::now();
        let fetch = options.top_k.saturating_mul(self.overfetch_factor);
        let filter = &options.filter;

        let (vector_outcome, keyword_outcome) = tokio::join!(
            with_deadline(
                "vector_search",
                self.timeout,
                cancel,
                self.vector.query(embedding, fetch, filter),
            ),
            with_deadline(
                "keyword_search",
                self.timeout,
                cancel,
                self.keyword.search(query, &filter.tenant_id, fetch),
            ),
        );

        if vector_outcome.is_err() && keyword_outcome.is_err() {
            log_branch_failure("vector", vector_outcome.as_ref().err());
            log_branch_failure("keyword", keyword_outcome.as_ref().err());
            return HybridRetrieval::default();
        }

        let mut vector_results = degrade("vector", vector_outcome);
        let keyword_results: Vec<RetrievalCandidate> = degrade("keyword", keyword_outcome)
            .into_iter()
            .filter(|candidate| filter.admits(&candidate.document_id))
            .collect();

        self.backfill(&mut vector_results, &keyword_results, &filter.tenant_id, cancel)
            .await;

        let mut chunks = reciprocal_rank_fusion(&vector_results, &keyword_results, self.rrf);
        chunks.truncate(options.top_k);

        let stats = HybridStats {
            vector_count: vector_results.len(),
            bm25_count: keyword_results.len(),
            merged_count: chunks.len(),
            execution_time_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            vector_count = stats.vector_count,
            bm25_count = stats.bm25_count,
            merged_count = stats.merged_count,
            elapsed_ms = stats.execution_time_ms,
            "hybrid retrieval completed"
        );

        HybridRetrieval { chunks, stats }
    }

    /// Fills content-less vector hits, first from keyword hits for the same id,
    /// then from the chunk store.
    async fn backfill(
        &self,
        vector_results: &mut [RetrievalCandidate],
        keyword_results: &[RetrievalCandidate],
        tenant_id: &str,
        cancel: &CancellationToken,
    ) {
        let by_id: HashMap<&str, &RetrievalCandidate> = keyword_results
            .iter()
            .map(|candidate| (candidate.id.as_str(), candidate))
            .collect();

        let mut missing = Vec::new();
        for candidate in vector_results.iter_mut().filter(|c| !c.has_content()) {
            match by_id.get(candidate.id.as_str()) {
                Some(keyword_hit) if keyword_hit.has_content() => {
                    candidate.content.clone_from(&keyword_hit.content);
                }
                _ => missing.push(candidate.id.clone()),
            }
        }

        let Some(store) = &self.store else {
            return;
        };
        if missing.is_empty() {
            return;
        }

        match with_deadline(
            "chunk_backfill",
            self.timeout,
            cancel,
            store.fetch(tenant_id, &missing),
        )
        .await
        {
            Ok(chunks) => {
                debug!(requested = missing.len(), found = chunks.len(), "backfilled chunk content");
                let fetched: HashMap<&str, _> =
                    chunks.iter().map(|chunk| (chunk.id.as_str(), chunk)).collect();
                for candidate in vector_results.iter_mut() {
                    if let Some(chunk) = fetched.get(candidate.id.as_str()) {
                        candidate.fill_from(chunk);
                    }
                }
            }
            Err(err) => warn!(error = %err, "chunk backfill failed; keeping metadata-only hits"),
        }
    }
}

fn degrade(
    branch: &'static str,
    outcome: Result<Vec<RetrievalCandidate>, AppError>,
) -> Vec<RetrievalCandidate> {
    outcome.unwrap_or_else(|err| {
        log_branch_failure(branch, Some(&err));
        Vec::new()
    })
}

fn log_branch_failure(branch: &'static str, err: Option<&AppError>) {
    if let Some(err) = err {
        warn!(
            branch,
            timed_out = err.is_timeout_or_cancel(),
            error = %err,
            "retrieval branch degraded to empty"
        );
    }
}
