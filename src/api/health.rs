//! Health check endpoint.

use super::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use tracing::error;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

/// GET /health — 200 when the installation store is reachable, 500 otherwise.
async fn health(State(state): State<Arc<AppState>>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(json!({
            "status": "healthy",
            "database": "connected",
            "timestamp": Utc::now().to_rfc3339(),
        }))
        .into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "unhealthy",
                    "database": "disconnected",
                    "timestamp": Utc::now().to_rfc3339(),
                    "error": e.to_string(),
                })),
            )
                .into_response()
        }
    }
}
