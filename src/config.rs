//! Runtime configuration, loaded once from the environment at startup.

use anyhow::{Context, Result};

/// Default scope requested during the code exchange.
const DEFAULT_SCOPE: &str =
    "contacts.readonly calendars.read campaign.readonly locations.readonly users.readonly";

/// Provider endpoints (overridable for tests and staging).
const DEFAULT_PROVIDER_BASE: &str = "https://services.leadconnectorhq.com";

/// Where the proxy reads the tenant id from on `/proxy/hl/*` requests.
///
/// One convention per deployment; the handlers never consult both.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TenantIdSource {
    /// `x-location-id` header (default)
    Header,
    /// `locationId` query parameter
    Query,
}

#[derive(Clone, Debug)]
pub struct Config {
    /// Provider OAuth app credentials
    pub client_id: String,
    pub client_secret: String,
    /// Secret the token-cipher key is derived from
    pub encryption_secret: String,
    /// Redirect URI registered with the provider
    pub redirect_uri: String,
    /// SQLite database path
    pub database_path: String,
    /// Listen address
    pub bind_addr: String,
    /// Tenant id convention for proxy requests
    pub tenant_id_source: TenantIdSource,
    /// Margin before `expires_at` at which a token counts as stale
    pub refresh_skew_seconds: i64,
    /// Scope requested on authorization
    pub oauth_scope: String,
    /// Provider consent page URL
    pub authorize_url: String,
    /// Provider token endpoint URL
    pub token_url: String,
    /// Upstream API base URL for forwarded calls
    pub upstream_base_url: String,
}

impl Config {
    /// Loads configuration from the environment.
    ///
    /// `HL_CLIENT_ID`, `HL_CLIENT_SECRET` and `HLPROXY_ENCRYPTION_SECRET` are
    /// required; there is deliberately no fallback encryption secret.
    pub fn from_env() -> Result<Self> {
        let provider_base =
            env_or("HLPROXY_PROVIDER_BASE_URL", DEFAULT_PROVIDER_BASE);

        Ok(Self {
            client_id: required("HL_CLIENT_ID")?,
            client_secret: required("HL_CLIENT_SECRET")?,
            encryption_secret: required("HLPROXY_ENCRYPTION_SECRET")?,
            redirect_uri: env_or(
                "HLPROXY_REDIRECT_URI",
                "http://localhost:3000/oauth/callback",
            ),
            database_path: env_or("HLPROXY_DATABASE_PATH", "./oauth.db"),
            bind_addr: env_or("HLPROXY_BIND_ADDR", "0.0.0.0:3000"),
            tenant_id_source: tenant_id_source_from_env()?,
            refresh_skew_seconds: skew_from_env()?,
            oauth_scope: env_or("HLPROXY_OAUTH_SCOPE", DEFAULT_SCOPE),
            authorize_url: format!("{}/oauth/chooselocation", provider_base),
            token_url: format!("{}/oauth/token", provider_base),
            upstream_base_url: provider_base,
        })
    }
}

fn required(name: &str) -> Result<String> {
    std::env::var(name).with_context(|| format!("Missing required environment variable {}", name))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn tenant_id_source_from_env() -> Result<TenantIdSource> {
    match env_or("HLPROXY_TENANT_ID_SOURCE", "header").as_str() {
        "header" => Ok(TenantIdSource::Header),
        "query" => Ok(TenantIdSource::Query),
        other => anyhow::bail!(
            "HLPROXY_TENANT_ID_SOURCE must be 'header' or 'query', got '{}'",
            other
        ),
    }
}

fn skew_from_env() -> Result<i64> {
    let raw = env_or("HLPROXY_REFRESH_SKEW_SECONDS", "60");
    raw.parse()
        .with_context(|| format!("HLPROXY_REFRESH_SKEW_SECONDS is not a number: '{}'", raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_scope_matches_provider_grant() {
        assert!(DEFAULT_SCOPE.contains("contacts.readonly"));
        assert!(DEFAULT_SCOPE.contains("locations.readonly"));
    }

    #[test]
    fn test_tenant_id_source_parsing() {
        // Default applies when unset; explicit values parse
        std::env::remove_var("HLPROXY_TENANT_ID_SOURCE");
        assert_eq!(tenant_id_source_from_env().unwrap(), TenantIdSource::Header);
    }
}
