use api_state::ApiState;
use axum::{
    extract::FromRef,
    routing::{get, post},
    Router,
};
use routes::{
    ask::{ask, ask_stream},
    liveness::live,
    readiness::ready,
};

pub mod api_state;
pub mod error;
mod routes;

/// Router for API functionality, version 1
pub fn api_routes_v1<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Probes for k8s/systemd
    let probes = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    let answering = Router::new()
        .route("/ask", post(ask))
        .route("/ask/stream", post(ask_stream));

    probes.merge(answering)
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use common::{
        cache::CacheManager,
        error::AppError,
        storage::db::SurrealDbClient,
        utils::{config::AppConfig, embedding::EmbeddingProvider},
    };
    use retrieval_pipeline::{
        answer_generation::{Generation, GenerationConfig, GenerationModel},
        fts::SurrealKeywordIndex,
        prompt::Prompt,
        scoring::RrfConfig,
        store::SurrealChunkStore,
        vector::SurrealVectorIndex,
        AnswerGenerator, AnswerPipeline, HybridRetriever, PipelineConfig, PipelineDependencies,
        QueryAnalyzer,
    };
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;

    struct EchoModel;

    #[async_trait]
    impl GenerationModel for EchoModel {
        async fn generate(
            &self,
            prompt: &Prompt,
            config: &GenerationConfig,
        ) -> Result<Generation, AppError> {
            Ok(Generation {
                content: format!("You said: {}", prompt.user),
                model_used: config.model.clone(),
                finish_reason: Some("stop".into()),
            })
        }
    }

    fn test_config() -> AppConfig {
        serde_json::from_value(serde_json::json!({
            "openai_api_key": "sk-test",
            "surrealdb_address": "mem://",
            "surrealdb_username": "root",
            "surrealdb_password": "root",
            "surrealdb_namespace": "api_test_ns",
            "surrealdb_database": "api_test_db",
            "embedding_backend": "hashed",
            "embedding_dimensions": 8
        }))
        .expect("test config")
    }

    async fn app() -> Router {
        let database = Uuid::new_v4().to_string();
        let db = SurrealDbClient::memory("api_test_ns", &database)
            .await
            .expect("in-memory surrealdb");
        db.ensure_initialized(8, "english")
            .await
            .expect("chunk schema");
        let db = Arc::new(db);

        let config = test_config();
        let pipeline_config = PipelineConfig::from_app_config(&config);
        let retriever = HybridRetriever::new(
            Arc::new(SurrealVectorIndex::new((*db).clone())),
            Arc::new(SurrealKeywordIndex::new((*db).clone())),
            Some(Arc::new(SurrealChunkStore::new((*db).clone()))),
            RrfConfig::new(pipeline_config.rrf_k),
            pipeline_config.overfetch_factor,
            pipeline_config.external_timeout,
        );
        let pipeline = AnswerPipeline::new(PipelineDependencies {
            analyzer: QueryAnalyzer::heuristic(),
            embedder: Arc::new(EmbeddingProvider::new_hashed(8)),
            retriever,
            generator: AnswerGenerator::new(Arc::new(EchoModel), Duration::from_secs(5)),
            config: pipeline_config,
        });

        let cache = Arc::new(CacheManager::local_only(Duration::from_secs(60)));
        let state = ApiState::new(db, Arc::new(pipeline), cache, config);
        api_routes_v1().with_state(state)
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        String::from_utf8(bytes.to_vec()).expect("utf8 body")
    }

    #[tokio::test]
    async fn probes_report_status_and_cache_mode() {
        let app = app().await;

        let live = app
            .clone()
            .oneshot(Request::get("/live").body(Body::empty()).expect("request"))
            .await
            .expect("live response");
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .oneshot(Request::get("/ready").body(Body::empty()).expect("request"))
            .await
            .expect("ready response");
        assert_eq!(ready.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(ready).await).expect("json");
        assert_eq!(body["checks"]["db"], "ok");
        assert_eq!(body["checks"]["cache"], "local");
    }

    #[tokio::test]
    async fn ask_returns_a_complete_answer() {
        let app = app().await;
        let response = app
            .oneshot(post_json(
                "/ask",
                &serde_json::json!({ "user_id": "user-1", "query": "hello" }),
            ))
            .await
            .expect("ask response");

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(body["content"], "You said: hello");
        assert_eq!(body["query_analysis"]["tier"], "trivial");
        assert_eq!(body["quality"]["fallback"], false);
    }

    #[tokio::test]
    async fn ask_without_matching_chunks_falls_back() {
        let app = app().await;
        let response = app
            .oneshot(post_json(
                "/ask",
                &serde_json::json!({
                    "user_id": "user-1",
                    "query": "What does the lease say about early termination?"
                }),
            ))
            .await
            .expect("ask response");

        assert_eq!(response.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_text(response).await).expect("json");
        assert_eq!(body["quality"]["fallback"], true);
        assert_eq!(body["sources"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn ask_rejects_empty_queries() {
        let app = app().await;
        let response = app
            .oneshot(post_json(
                "/ask",
                &serde_json::json!({ "user_id": "user-1", "query": "  " }),
            ))
            .await
            .expect("ask response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_emits_chunks_then_the_answer() {
        let app = app().await;
        let response = app
            .oneshot(post_json(
                "/ask/stream",
                &serde_json::json!({ "user_id": "user-1", "query": "hello" }),
            ))
            .await
            .expect("stream response");

        assert_eq!(response.status(), StatusCode::OK);
        let text = body_text(response).await;
        let chunk_at = text.find("event: chunk").expect("chunk event");
        let answer_at = text.find("event: answer").expect("answer event");
        assert!(chunk_at < answer_at);
        assert!(text.contains("You said: hello"));
    }
}
