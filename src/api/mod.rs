//! HTTP API.
//!
//! Route surfaces: OAuth flow (`/oauth/*`), the forwarding proxy
//! (`/proxy/hl/*`), and health. Handlers are backend-agnostic — they talk to
//! the broker and forwarder, never to the store or cipher directly (health's
//! reachability probe excepted).

pub mod health;
pub mod oauth;
pub mod proxy;

use crate::broker::{BrokerError, TokenBroker};
use crate::config::TenantIdSource;
use crate::proxy::Forwarder;
use crate::store::InstallationStore;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Shared application state, built once at startup and injected explicitly.
#[derive(Clone)]
pub struct AppState {
    pub broker: TokenBroker,
    pub forwarder: Arc<Forwarder>,
    pub store: Arc<dyn InstallationStore>,
    pub redirect_uri: String,
    pub oauth_scope: String,
    pub tenant_id_source: TenantIdSource,
}

/// Error response body: `{error, details?}`
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

/// Application error carrying its HTTP status and structured body.
pub struct AppError {
    status: StatusCode,
    error: String,
    details: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, error: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status,
            error: error.into(),
            details,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error, None)
    }

    pub fn unauthorized(error: impl Into<String>, details: Option<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error, details)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error, None)
    }

    pub fn server_error(error: impl Into<String>, details: Option<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error, details)
    }

    pub fn bad_gateway(error: impl Into<String>, details: Option<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, error, details)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.error,
            details: self.details,
        });
        (self.status, body).into_response()
    }
}

impl From<BrokerError> for AppError {
    fn from(e: BrokerError) -> Self {
        match e {
            BrokerError::NoInstallation => {
                AppError::not_found("Installation not found for this location")
            }
            // Unusable credential is indistinguishable from not-connected to
            // the caller; the integrity incident is logged at the broker.
            BrokerError::CorruptCredential => {
                AppError::not_found("Installation not found for this location")
            }
            BrokerError::ReauthRequired => AppError::unauthorized(
                "Re-authorization required for this location",
                None,
            ),
            BrokerError::RefreshFailed(detail) => {
                AppError::unauthorized("Token refresh failed", Some(detail))
            }
            // A rejected code is an exchange failure, not a gateway fault;
            // 502 is reserved for getting no response at all
            BrokerError::Exchange { status, body } => AppError::server_error(
                "Failed to exchange authorization code",
                Some(format!("provider returned status {}: {}", status, body)),
            ),
            BrokerError::MissingLocation => {
                AppError::bad_request("Location ID not found in token or state")
            }
            BrokerError::Gateway(detail) => {
                AppError::bad_gateway("Provider unreachable", Some(detail))
            }
            BrokerError::Internal(err) => {
                AppError::server_error("Internal server error", Some(err.to_string()))
            }
        }
    }
}

/// GET / — service banner.
async fn index() -> Json<serde_json::Value> {
    Json(json!({
        "message": "hlproxy OAuth server",
        "status": "running",
        "endpoints": {
            "oauth_authorize": "/oauth/authorize",
            "oauth_callback": "/oauth/callback",
            "proxy": "/proxy/hl/*",
            "disconnect": "/oauth/disconnect/:locationId",
            "health": "/health"
        }
    }))
}

/// Assembles the full application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .merge(oauth::router())
        .merge(proxy::router())
        .merge(health::router())
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}
