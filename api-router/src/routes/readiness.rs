use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api_state::ApiState;

/// Readiness probe: 200 when the database answers, else 503.
/// The cache never fails readiness; its mode is reported for visibility.
pub async fn ready(State(state): State<ApiState>) -> impl IntoResponse {
    let cache = state.cache.mode();
    match state.db.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "checks": { "db": "ok", "cache": cache }
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "error",
                "checks": { "db": "fail", "cache": cache },
                "reason": e.to_string()
            })),
        ),
    }
}
