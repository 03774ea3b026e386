use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    cache::{redis::RedisCache, CacheManager, CachePrimary},
    storage::db::SurrealDbClient,
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use retrieval_pipeline::{
    analysis::{HeuristicIntentClassifier, IntentClassifier, OpenAiIntentClassifier},
    fts::SurrealKeywordIndex,
    scoring::RrfConfig,
    store::SurrealChunkStore,
    vector::SurrealVectorIndex,
    AnswerGenerator, AnswerPipeline, HybridRetriever, OpenAiGenerationModel, PipelineConfig,
    PipelineDependencies, QueryAnalyzer,
};
use tracing::{info, warn};

const CACHE_KEY_PREFIX: &str = "tiered-rag";

/// Long-lived clients shared by every request.
pub struct Services {
    pub db: Arc<SurrealDbClient>,
    pub cache: Arc<CacheManager>,
    pub pipeline: Arc<AnswerPipeline>,
}

impl Services {
    pub async fn build(config: &AppConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let db = Arc::new(
            SurrealDbClient::new(
                &config.surrealdb_address,
                &config.surrealdb_username,
                &config.surrealdb_password,
                &config.surrealdb_namespace,
                &config.surrealdb_database,
            )
            .await?,
        );

        let openai_client = Arc::new(Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.openai_api_key)
                .with_api_base(&config.openai_base_url),
        ));

        let embedding_provider = Arc::new(
            EmbeddingProvider::from_config(config, Some(Arc::clone(&openai_client))).await?,
        );
        info!(
            embedding_backend = ?config.embedding_backend,
            embedding_dimension = embedding_provider.dimension(),
            "Embedding provider initialized"
        );

        // Schema follows the provider's dimension.
        db.ensure_initialized(embedding_provider.dimension(), &config.fts_language)
            .await?;

        let cache = Arc::new(build_cache(config));
        let pipeline_config = PipelineConfig::from_app_config(config);

        let mut classifiers: Vec<Arc<dyn IntentClassifier>> =
            vec![Arc::new(HeuristicIntentClassifier)];
        if let Some(model) = &config.intent_model {
            classifiers.push(Arc::new(OpenAiIntentClassifier::new(
                Arc::clone(&openai_client),
                model.clone(),
            )));
        }
        let analyzer = QueryAnalyzer::new(
            classifiers,
            Some(Arc::clone(&cache)),
            Duration::from_secs(config.analysis_cache_ttl_secs),
            pipeline_config.external_timeout,
        );

        let retriever = HybridRetriever::new(
            Arc::new(SurrealVectorIndex::new((*db).clone())),
            Arc::new(SurrealKeywordIndex::new((*db).clone())),
            Some(Arc::new(SurrealChunkStore::new((*db).clone()))),
            RrfConfig::new(pipeline_config.rrf_k),
            pipeline_config.overfetch_factor,
            pipeline_config.external_timeout,
        );

        let generator = AnswerGenerator::new(
            Arc::new(OpenAiGenerationModel::new(openai_client)),
            pipeline_config.generation_timeout,
        );

        let pipeline = AnswerPipeline::new(PipelineDependencies {
            analyzer,
            embedder: embedding_provider,
            retriever,
            generator,
            config: pipeline_config,
        });

        Ok(Self {
            db,
            cache,
            pipeline: Arc::new(pipeline),
        })
    }
}

fn build_cache(config: &AppConfig) -> CacheManager {
    let sweep_interval = Duration::from_secs(config.cache_sweep_interval_secs.max(1));
    let primary_timeout = Duration::from_millis(config.cache_timeout_ms.max(1));
    let Some(url) = config.redis_url.as_deref() else {
        info!("No redis_url configured; using in-process cache");
        return CacheManager::local_only(sweep_interval);
    };

    match RedisCache::connect(url, CACHE_KEY_PREFIX, primary_timeout) {
        Ok(primary) => {
            info!("Redis cache primary configured");
            CacheManager::new(Some(primary as Arc<dyn CachePrimary>), sweep_interval)
                .with_primary_timeout(primary_timeout)
        }
        Err(err) => {
            warn!(error = %err, "Invalid redis_url; using in-process cache");
            CacheManager::local_only(sweep_interval)
        }
    }
}
