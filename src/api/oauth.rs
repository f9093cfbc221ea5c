//! OAuth flow endpoints: authorize redirect, callback, disconnect.

use super::{AppError, AppState};
use crate::oauth::AuthState;
use axum::{
    extract::{Path, Query, State},
    http::{header::LOCATION, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// GET /oauth/authorize query parameters
#[derive(Deserialize)]
pub struct AuthorizeQuery {
    #[serde(rename = "locationId")]
    location_id: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

/// GET /oauth/callback query parameters
#[derive(Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Callback success response
#[derive(Serialize)]
pub struct CallbackResponse {
    success: bool,
    #[serde(rename = "locationId")]
    location_id: String,
    #[serde(rename = "agencyId", skip_serializing_if = "Option::is_none")]
    agency_id: Option<String>,
    #[serde(rename = "expiresAt")]
    expires_at: String,
}

/// Disconnect response
#[derive(Serialize)]
pub struct DisconnectResponse {
    success: bool,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/oauth/authorize", get(oauth_authorize))
        .route("/oauth/callback", get(oauth_callback))
        .route("/oauth/disconnect/:location_id", delete(oauth_disconnect))
}

/// GET /oauth/authorize?locationId=&userId=
///
/// Redirects to the provider's consent page. The `state` parameter carries
/// `{locationId, userId}` through the round trip.
async fn oauth_authorize(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AuthorizeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let location_id = query
        .location_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::bad_request("locationId query parameter is required"))?;

    let auth_state = AuthState::new(location_id.clone(), query.user_id);
    let url = state.broker.authorize_redirect_url(
        &auth_state.encode(),
        &state.redirect_uri,
        &state.oauth_scope,
    );

    info!(location_id = %location_id, "Redirecting to provider consent page");

    // 302, not axum's 307 `Redirect::temporary`
    Ok((StatusCode::FOUND, [(LOCATION, url)]))
}

/// GET /oauth/callback?code=&state=
///
/// Exchanges the authorization code and stores the encrypted token set.
async fn oauth_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Response, AppError> {
    if let Some(error) = query.error {
        let description = query
            .error_description
            .unwrap_or_else(|| "Unknown error".to_string());
        warn!(error = %error, description = %description, "Provider reported authorization failure");
        return Err(AppError::bad_request(format!(
            "OAuth authorization failed: {} - {}",
            error, description
        )));
    }

    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::bad_request("Authorization code is required"))?;

    // The state is client-supplied; decode defensively. A missing state is
    // tolerated when the provider reports the location in the token response.
    let auth_state = match query.state.as_deref() {
        Some(raw) => Some(
            AuthState::decode(raw)
                .map_err(|e| AppError::bad_request(format!("Invalid state parameter: {}", e)))?,
        ),
        None => None,
    };
    let location_hint = auth_state.as_ref().map(|s| s.location_id.as_str());

    let code_prefix: String = code.chars().take(10).collect();
    debug!(code_prefix = %code_prefix, "OAuth callback received");

    let authorized = state
        .broker
        .authorize(
            &code,
            &state.redirect_uri,
            &state.oauth_scope,
            location_hint,
            None,
        )
        .await?;

    Ok(Json(CallbackResponse {
        success: true,
        location_id: authorized.location_id,
        agency_id: authorized.agency_id,
        expires_at: authorized.expires_at.to_rfc3339(),
    })
    .into_response())
}

/// DELETE /oauth/disconnect/:location_id
///
/// Idempotent: responds 200 whether or not the installation existed.
async fn oauth_disconnect(
    State(state): State<Arc<AppState>>,
    Path(location_id): Path<String>,
) -> Result<Json<DisconnectResponse>, AppError> {
    state.broker.disconnect(&location_id).await?;
    Ok(Json(DisconnectResponse { success: true }))
}
