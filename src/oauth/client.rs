//! OAuth token endpoint client.
//!
//! Exchanges authorization codes and refresh tokens for token sets against
//! the provider's token endpoint.

use serde::Deserialize;

/// OAuth token response (standard OAuth 2.0 plus the provider's extensions).
#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    /// Provider extension: the location the grant was issued for
    #[serde(default, rename = "locationId")]
    location_id: Option<String>,
    /// Provider extension: the owning agency/company
    #[serde(default, rename = "companyId")]
    company_id: Option<String>,
}

/// A token set as returned by the provider.
///
/// `expires_in` is relative to the moment the response was received; the
/// broker converts it to an absolute `expires_at` immediately.
#[derive(Clone, Debug)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: String,
    pub scope: Option<String>,
    pub location_id: Option<String>,
    pub company_id: Option<String>,
}

impl From<TokenResponse> for TokenSet {
    fn from(response: TokenResponse) -> Self {
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_in: response.expires_in,
            token_type: response.token_type.unwrap_or_else(|| "Bearer".to_string()),
            scope: response.scope,
            location_id: response.location_id,
            company_id: response.company_id,
        }
    }
}

/// Errors from the provider's token endpoint.
#[derive(Debug)]
pub enum OAuthError {
    /// Provider rejected the authorization code (invalid, expired, redirect mismatch)
    Exchange { status: u16, body: String },
    /// Provider rejected the refresh token (revoked, expired, already rotated)
    Refresh { status: u16, body: String },
    /// No usable response from the provider (network-level failure)
    Transport(String),
    /// Response received but not parseable as a token set
    Malformed(String),
}

impl std::fmt::Display for OAuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OAuthError::Exchange { status, body } => {
                write!(f, "code exchange rejected with status {}: {}", status, body)
            }
            OAuthError::Refresh { status, body } => {
                write!(f, "token refresh rejected with status {}: {}", status, body)
            }
            OAuthError::Transport(detail) => write!(f, "provider unreachable: {}", detail),
            OAuthError::Malformed(detail) => write!(f, "unparseable token response: {}", detail),
        }
    }
}

impl std::error::Error for OAuthError {}

/// Client for one OAuth provider's authorize and token endpoints.
#[derive(Clone)]
pub struct OAuthClient {
    http: reqwest::Client,
    authorize_url: String,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthClient {
    pub fn new(
        authorize_url: String,
        token_url: String,
        client_id: String,
        client_secret: String,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            authorize_url,
            token_url,
            client_id,
            client_secret,
        }
    }

    /// Builds the provider consent URL the user is redirected to.
    pub fn authorize_redirect_url(&self, state: &str, redirect_uri: &str, scope: &str) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}",
            self.authorize_url,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(scope),
            urlencoding::encode(state)
        )
    }

    /// Exchanges an authorization code for a token set.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        scope: &str,
    ) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("scope", scope),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];

        tracing::debug!(token_url = %self.token_url, "Exchanging authorization code for token");

        let response = self.post_token_form(&form).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            return Err(OAuthError::Exchange { status, body });
        }

        parse_token_response(response).await
    }

    /// Exchanges a refresh token for a new token set.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenSet, OAuthError> {
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];

        tracing::debug!(token_url = %self.token_url, "Refreshing access token");

        let response = self.post_token_form(&form).await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = read_error_body(response).await;
            return Err(OAuthError::Refresh { status, body });
        }

        parse_token_response(response).await
    }

    async fn post_token_form(
        &self,
        form: &[(&str, &str)],
    ) -> Result<reqwest::Response, OAuthError> {
        self.http
            .post(&self.token_url)
            .header("Accept", "application/json")
            .form(form)
            .send()
            .await
            .map_err(|e| OAuthError::Transport(e.to_string()))
    }
}

async fn read_error_body(response: reqwest::Response) -> String {
    response
        .text()
        .await
        .unwrap_or_else(|_| "<failed to read body>".to_string())
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenSet, OAuthError> {
    let token_response: TokenResponse = response
        .json()
        .await
        .map_err(|e| OAuthError::Malformed(e.to_string()))?;

    tracing::debug!(
        has_refresh_token = token_response.refresh_token.is_some(),
        expires_in = ?token_response.expires_in,
        "Token endpoint call successful"
    );

    Ok(token_response.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client(server_url: &str) -> OAuthClient {
        OAuthClient::new(
            format!("{}/oauth/chooselocation", server_url),
            format!("{}/oauth/token", server_url),
            "client-id".to_string(),
            "client-secret".to_string(),
        )
    }

    #[test]
    fn test_token_response_deserialization() {
        let json = r#"{
            "access_token": "at_123",
            "refresh_token": "rt_456",
            "expires_in": 3600,
            "token_type": "Bearer",
            "scope": "contacts.readonly locations.readonly",
            "locationId": "loc1",
            "companyId": "agency1"
        }"#;

        let set: TokenSet = serde_json::from_str::<TokenResponse>(json).unwrap().into();
        assert_eq!(set.access_token, "at_123");
        assert_eq!(set.refresh_token, Some("rt_456".to_string()));
        assert_eq!(set.expires_in, Some(3600));
        assert_eq!(set.token_type, "Bearer");
        assert_eq!(set.location_id, Some("loc1".to_string()));
        assert_eq!(set.company_id, Some("agency1".to_string()));
    }

    #[test]
    fn test_token_response_minimal_defaults() {
        let set: TokenSet = serde_json::from_str::<TokenResponse>(r#"{"access_token":"at"}"#)
            .unwrap()
            .into();
        assert_eq!(set.access_token, "at");
        assert!(set.refresh_token.is_none());
        assert_eq!(set.token_type, "Bearer");
        assert!(set.location_id.is_none());
    }

    #[test]
    fn test_authorize_redirect_url() {
        let client = test_client("https://provider.example.com");

        let url = client.authorize_redirect_url(
            "state123",
            "http://localhost:3000/oauth/callback",
            "contacts.readonly calendars.read",
        );

        assert!(url.starts_with("https://provider.example.com/oauth/chooselocation?"));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Foauth%2Fcallback"));
        assert!(url.contains("scope=contacts.readonly%20calendars.read"));
        assert!(url.contains("state=state123"));
    }

    #[tokio::test]
    async fn test_exchange_code_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/oauth/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "code123".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"at","refresh_token":"rt","expires_in":86400,"locationId":"loc1"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let set = client
            .exchange_code("code123", "https://cb", "read write")
            .await
            .expect("exchange should succeed");

        assert_eq!(set.access_token, "at");
        assert_eq!(set.location_id, Some("loc1".to_string()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_exchange_code_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .with_status(400)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let result = client.exchange_code("bad", "https://cb", "read").await;

        match result {
            Err(OAuthError::Exchange { status, body }) => {
                assert_eq!(status, 400);
                assert!(body.contains("invalid_grant"));
            }
            other => panic!("expected Exchange error, got {:?}", other.map(|s| s.access_token)),
        }
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/oauth/token")
            .match_body(mockito::Matcher::UrlEncoded(
                "grant_type".into(),
                "refresh_token".into(),
            ))
            .with_status(401)
            .with_body(r#"{"error":"invalid_grant"}"#)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let result = client.refresh("revoked").await;
        assert!(matches!(result, Err(OAuthError::Refresh { status: 401, .. })));
    }

    #[tokio::test]
    async fn test_transport_failure_is_distinct() {
        // Nothing listening on this port
        let client = test_client("http://127.0.0.1:9");
        let result = client.refresh("rt").await;
        assert!(matches!(result, Err(OAuthError::Transport(_))));
    }
}
