use std::sync::Arc;

use common::{cache::CacheManager, storage::db::SurrealDbClient, utils::config::AppConfig};
use retrieval_pipeline::AnswerPipeline;

#[derive(Clone)]
pub struct ApiState {
    pub db: Arc<SurrealDbClient>,
    pub pipeline: Arc<AnswerPipeline>,
    pub cache: Arc<CacheManager>,
    pub config: AppConfig,
}

impl ApiState {
    pub fn new(
        db: Arc<SurrealDbClient>,
        pipeline: Arc<AnswerPipeline>,
        cache: Arc<CacheManager>,
        config: AppConfig,
    ) -> Self {
        Self {
            db,
            pipeline,
            cache,
            config,
        }
    }
}
