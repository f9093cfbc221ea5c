use anyhow::{Context, Result};
use hlproxy::api::{create_router, AppState};
use hlproxy::broker::TokenBroker;
use hlproxy::config::Config;
use hlproxy::credentials::TokenCipher;
use hlproxy::oauth::OAuthClient;
use hlproxy::proxy::Forwarder;
use hlproxy::store::{InstallationStore, SqliteStore};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hlproxy=info".into()),
        )
        .init();

    let config = Config::from_env()?;

    // One store, cipher, and client per process, injected explicitly
    let store: Arc<dyn InstallationStore> =
        Arc::new(SqliteStore::open(&config.database_path).context("Failed to open store")?);
    let cipher = TokenCipher::new(&config.encryption_secret);
    let oauth = OAuthClient::new(
        config.authorize_url.clone(),
        config.token_url.clone(),
        config.client_id.clone(),
        config.client_secret.clone(),
    );

    let broker = TokenBroker::new(
        Arc::clone(&store),
        cipher,
        oauth,
        config.refresh_skew_seconds,
    );
    let forwarder = Arc::new(Forwarder::new(config.upstream_base_url.clone()));

    let app = create_router(AppState {
        broker,
        forwarder,
        store,
        redirect_uri: config.redirect_uri.clone(),
        oauth_scope: config.oauth_scope.clone(),
        tenant_id_source: config.tenant_id_source,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "hlproxy listening");
    info!(callback = %config.redirect_uri, "OAuth callback URL");
    info!(upstream = %config.upstream_base_url, "Forwarding to upstream");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
