//! Upstream request forwarding.
//!
//! Forwards an inbound request to the provider API with the tenant's live
//! bearer token injected. This is not a general-purpose reverse proxy: it
//! forwards exactly one upstream's API shape and injects exactly one kind of
//! credential.

use tracing::debug;

/// Fixed API version header the provider requires on every call.
const PROVIDER_API_VERSION: &str = "2021-07-28";

/// Query parameter that identifies the tenant; never forwarded upstream.
const TENANT_QUERY_PARAM: &str = "locationId";

/// Upstream reply, passed back to the caller verbatim.
#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// Forwarding failures. Upstream *error statuses* are not failures — they
/// come back as an [`UpstreamResponse`] and pass through untouched.
#[derive(Debug)]
pub enum ForwardError {
    /// No response from the upstream (network-level failure)
    Gateway(String),
    /// Request could not be constructed (unsupported method)
    BadRequest(String),
}

impl std::fmt::Display for ForwardError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ForwardError::Gateway(detail) => write!(f, "upstream unreachable: {}", detail),
            ForwardError::BadRequest(detail) => write!(f, "cannot forward request: {}", detail),
        }
    }
}

impl std::error::Error for ForwardError {}

/// Forwards requests to the provider API on a tenant's behalf.
pub struct Forwarder {
    http: reqwest::Client,
    base_url: String,
}

impl Forwarder {
    pub fn new(base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
        }
    }

    /// Issues one upstream call with the access token injected.
    ///
    /// Method and body pass through unchanged; the tenant-identifying query
    /// parameter is stripped; no retry on upstream failure.
    pub async fn forward(
        &self,
        access_token: &str,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Vec<u8>,
    ) -> Result<UpstreamResponse, ForwardError> {
        let method = reqwest::Method::from_bytes(method.as_bytes())
            .map_err(|_| ForwardError::BadRequest(format!("unsupported method: {}", method)))?;
        let url = format!("{}{}", self.base_url, path);
        let query = strip_tenant_param(query);

        debug!(method = %method, path = %path, "Forwarding request upstream");

        let mut request = self
            .http
            .request(method, &url)
            .query(&query)
            .header("Authorization", format!("Bearer {}", access_token))
            .header("Version", PROVIDER_API_VERSION);

        if !body.is_empty() {
            request = request.header("Content-Type", "application/json").body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ForwardError::Gateway(e.to_string()))?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::Gateway(e.to_string()))?
            .to_vec();

        Ok(UpstreamResponse {
            status,
            content_type,
            body,
        })
    }
}

/// Drops the tenant-identifying parameter from the forwarded query.
fn strip_tenant_param(query: &[(String, String)]) -> Vec<(String, String)> {
    query
        .iter()
        .filter(|(key, _)| key != TENANT_QUERY_PARAM)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_strip_tenant_param() {
        let query = pairs(&[("locationId", "loc1"), ("limit", "5"), ("page", "2")]);
        let stripped = strip_tenant_param(&query);
        assert_eq!(stripped, pairs(&[("limit", "5"), ("page", "2")]));
    }

    #[tokio::test]
    async fn test_forward_injects_credentials_and_version() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/contacts")
            .match_header("authorization", "Bearer live-token")
            .match_header("version", PROVIDER_API_VERSION)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"contacts":[]}"#)
            .create_async()
            .await;

        let forwarder = Forwarder::new(server.url());
        let response = forwarder
            .forward("live-token", "GET", "/contacts", &[], Vec::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.content_type.as_deref(), Some("application/json"));
        assert_eq!(response.body, br#"{"contacts":[]}"#);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forward_never_leaks_tenant_param() {
        let mut server = Server::new_async().await;
        // Exact query match proves locationId is gone
        let mock = server
            .mock("GET", "/contacts")
            .match_query(Matcher::Exact("limit=5".to_string()))
            .with_status(200)
            .create_async()
            .await;

        let forwarder = Forwarder::new(server.url());
        forwarder
            .forward(
                "tok",
                "GET",
                "/contacts",
                &pairs(&[("locationId", "loc1"), ("limit", "5")]),
                Vec::new(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_forward_passes_body_through() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/contacts")
            .match_header("content-type", "application/json")
            .match_body(Matcher::Exact(r#"{"name":"Ada"}"#.to_string()))
            .with_status(201)
            .with_body(r#"{"id":"c1"}"#)
            .create_async()
            .await;

        let forwarder = Forwarder::new(server.url());
        let response = forwarder
            .forward("tok", "POST", "/contacts", &[], br#"{"name":"Ada"}"#.to_vec())
            .await
            .unwrap();

        assert_eq!(response.status, 201);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_upstream_error_status_passes_through() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/contacts")
            .with_status(429)
            .with_body(r#"{"error":"rate limited"}"#)
            .create_async()
            .await;

        let forwarder = Forwarder::new(server.url());
        let response = forwarder
            .forward("tok", "GET", "/contacts", &[], Vec::new())
            .await
            .unwrap();

        // Upstream-reported errors are not gateway errors
        assert_eq!(response.status, 429);
        assert_eq!(response.body, br#"{"error":"rate limited"}"#);
    }

    #[tokio::test]
    async fn test_network_failure_is_gateway_error() {
        let forwarder = Forwarder::new("http://127.0.0.1:9".to_string());
        let result = forwarder
            .forward("tok", "GET", "/contacts", &[], Vec::new())
            .await;
        assert!(matches!(result, Err(ForwardError::Gateway(_))));
    }
}
