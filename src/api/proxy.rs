//! Forwarding proxy endpoint: `ANY /proxy/hl/*path`.

use super::{AppError, AppState};
use crate::config::TenantIdSource;
use crate::proxy::ForwardError;
use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use std::sync::Arc;
use tracing::debug;

/// Header carrying the tenant id in header-mode deployments
const TENANT_HEADER: &str = "x-location-id";

/// Query parameter carrying the tenant id in query-mode deployments
const TENANT_QUERY_PARAM: &str = "locationId";

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/proxy/hl/*path", any(proxy_request))
}

/// Resolves the tenant id per the deployment's configured convention.
fn resolve_tenant_id(
    source: TenantIdSource,
    headers: &HeaderMap,
    query: &[(String, String)],
) -> Option<String> {
    match source {
        TenantIdSource::Header => headers
            .get(TENANT_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string),
        TenantIdSource::Query => query
            .iter()
            .find(|(key, value)| key == TENANT_QUERY_PARAM && !value.is_empty())
            .map(|(_, value)| value.clone()),
    }
}

/// ANY /proxy/hl/*path
///
/// Resolves the tenant's live access token and forwards the request to the
/// upstream API, returning its status and body verbatim.
async fn proxy_request(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Query(query): Query<Vec<(String, String)>>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let location_id = resolve_tenant_id(state.tenant_id_source, &headers, &query)
        .ok_or_else(|| AppError::bad_request("Location ID is required"))?;

    debug!(location_id = %location_id, method = %method, path = %path, "Proxy request");

    // Token resolution never trusts anything the caller supplied beyond the id
    let access_token = state.broker.get_live_token(&location_id).await?;

    let upstream = state
        .forwarder
        .forward(
            &access_token,
            method.as_str(),
            &format!("/{}", path),
            &query,
            body.to_vec(),
        )
        .await
        .map_err(|e| match e {
            ForwardError::Gateway(detail) => {
                AppError::bad_gateway("Upstream API unreachable", Some(detail))
            }
            ForwardError::BadRequest(detail) => AppError::bad_request(detail),
        })?;

    // Pass the upstream reply through untouched
    let status =
        StatusCode::from_u16(upstream.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = Response::builder().status(status);
    if let Some(content_type) = upstream.content_type {
        response = response.header("content-type", content_type);
    }
    response
        .body(Body::from(upstream.body))
        .map_err(|e| AppError::server_error("Failed to build response", Some(e.to_string())))
}
