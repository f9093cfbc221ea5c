//! Token lifecycle manager.
//!
//! Owns expiry policy and the refresh protocol, composing the cipher, the
//! installation store, and the OAuth client. Per tenant the lifecycle is:
//! unauthorized (no row) → authorized (row, token fresh or stale) →
//! refreshing (transient) → authorized, or → reauth-required when the
//! provider rejects the refresh token. Disconnect returns any state to
//! unauthorized by deleting the row.
//!
//! # Concurrency
//!
//! Refresh is single-flighted per `location_id`: the first caller to observe
//! a stale token performs the provider call while holding a per-tenant async
//! mutex; concurrent callers for the same tenant wait and then pick up the
//! persisted result instead of issuing a duplicate provider call. Providers
//! rotate refresh tokens on use, so a duplicate refresh with the now-stale
//! token could invalidate the grant. Tenants never contend with each other.
//!
//! The refresh itself runs on a spawned task: an inbound request aborted
//! mid-flight must not cancel a refresh other waiters depend on.

use crate::credentials::{NewInstallation, TokenCipher};
use crate::oauth::{OAuthClient, OAuthError};
use crate::store::InstallationStore;
use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Fallback when the provider omits `expires_in` from a token response.
/// The provider's access tokens are day-long.
const DEFAULT_EXPIRES_IN_SECS: i64 = 86_400;

/// Failures surfaced by the broker. The API layer maps these onto the HTTP
/// error taxonomy.
#[derive(Debug)]
pub enum BrokerError {
    /// No installation row for this tenant
    NoInstallation,
    /// Stored credential failed decryption; unusable until re-authorization
    CorruptCredential,
    /// Tenant was flagged after a failed refresh and must redo authorization
    ReauthRequired,
    /// Provider rejected the refresh token just now
    RefreshFailed(String),
    /// Provider rejected the authorization code
    Exchange { status: u16, body: String },
    /// No location id in either the token response or the state parameter
    MissingLocation,
    /// Provider unreachable (network-level failure, not a rejection)
    Gateway(String),
    /// Store or cipher failure unrelated to a specific tenant's grant
    Internal(anyhow::Error),
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::NoInstallation => write!(f, "no installation for this location"),
            BrokerError::CorruptCredential => {
                write!(f, "stored credential is corrupt; re-authorization required")
            }
            BrokerError::ReauthRequired => {
                write!(f, "re-authorization required for this location")
            }
            BrokerError::RefreshFailed(detail) => write!(f, "token refresh failed: {}", detail),
            BrokerError::Exchange { status, body } => {
                write!(f, "code exchange rejected with status {}: {}", status, body)
            }
            BrokerError::MissingLocation => {
                write!(f, "location id not found in token response or state")
            }
            BrokerError::Gateway(detail) => write!(f, "provider unreachable: {}", detail),
            BrokerError::Internal(e) => write!(f, "internal error: {}", e),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<anyhow::Error> for BrokerError {
    fn from(e: anyhow::Error) -> Self {
        BrokerError::Internal(e)
    }
}

/// Result of a successful code exchange.
#[derive(Clone, Debug)]
pub struct AuthorizedInstallation {
    pub location_id: String,
    pub agency_id: Option<String>,
    pub expires_at: DateTime<Utc>,
}

/// Token lifecycle manager. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct TokenBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    store: Arc<dyn InstallationStore>,
    cipher: TokenCipher,
    oauth: OAuthClient,
    /// Margin subtracted from `expires_at` so a token cannot expire mid-flight
    skew: Duration,
    /// Per-tenant refresh locks (single-flight)
    refresh_locks: DashMap<String, Arc<Mutex<()>>>,
    /// Tenants whose refresh token was rejected; terminal until re-authorized
    reauth_required: DashMap<String, ()>,
}

impl TokenBroker {
    pub fn new(
        store: Arc<dyn InstallationStore>,
        cipher: TokenCipher,
        oauth: OAuthClient,
        skew_seconds: i64,
    ) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                store,
                cipher,
                oauth,
                skew: Duration::seconds(skew_seconds),
                refresh_locks: DashMap::new(),
                reauth_required: DashMap::new(),
            }),
        }
    }

    /// Builds the provider consent URL for the authorization redirect.
    pub fn authorize_redirect_url(&self, state: &str, redirect_uri: &str, scope: &str) -> String {
        self.inner
            .oauth
            .authorize_redirect_url(state, redirect_uri, scope)
    }

    /// Returns a live plaintext access token for the tenant, refreshing it
    /// against the provider first if it is within the skew margin of expiry.
    pub async fn get_live_token(&self, location_id: &str) -> Result<String, BrokerError> {
        let inner = &self.inner;

        if inner.reauth_required.contains_key(location_id) {
            return Err(BrokerError::ReauthRequired);
        }

        let installation = inner
            .store
            .lookup(location_id)
            .await?
            .ok_or(BrokerError::NoInstallation)?;

        let access_token = inner.decrypt_credential(location_id, &installation.access_token)?;
        inner.decrypt_credential(location_id, &installation.refresh_token)?;

        if inner.is_fresh(installation.expires_at) {
            return Ok(access_token);
        }

        debug!(location_id = %location_id, "Access token stale, entering refresh");

        // Spawned so an aborted inbound request cannot cancel the refresh;
        // the per-tenant lock is acquired and released inside the task.
        let inner = Arc::clone(&self.inner);
        let location = location_id.to_string();
        tokio::spawn(async move { inner.refresh_single_flight(&location).await })
            .await
            .map_err(|e| BrokerError::Internal(anyhow!("refresh task panicked: {}", e)))?
    }

    /// Exchanges an authorization code and persists the encrypted token set.
    ///
    /// Idempotent: re-authorizing an already-connected tenant overwrites the
    /// existing row. Location/agency ids reported by the provider in the
    /// token response win over the caller-supplied hints.
    pub async fn authorize(
        &self,
        code: &str,
        redirect_uri: &str,
        scope: &str,
        location_hint: Option<&str>,
        agency_hint: Option<&str>,
    ) -> Result<AuthorizedInstallation, BrokerError> {
        let inner = &self.inner;

        let token_set = match inner.oauth.exchange_code(code, redirect_uri, scope).await {
            Ok(set) => set,
            Err(OAuthError::Transport(detail)) => return Err(BrokerError::Gateway(detail)),
            Err(OAuthError::Exchange { status, body }) => {
                return Err(BrokerError::Exchange { status, body })
            }
            Err(e) => return Err(BrokerError::Internal(anyhow!(e))),
        };

        let location_id = token_set
            .location_id
            .clone()
            .or_else(|| location_hint.map(str::to_string))
            .ok_or(BrokerError::MissingLocation)?;
        let agency_id = token_set
            .company_id
            .clone()
            .or_else(|| agency_hint.map(str::to_string));

        let refresh_token = token_set
            .refresh_token
            .clone()
            .ok_or_else(|| BrokerError::Internal(anyhow!("provider returned no refresh token")))?;

        // expires_in is relative to response receipt
        let expires_at = Utc::now()
            + Duration::seconds(token_set.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));

        let installation = NewInstallation {
            location_id: location_id.clone(),
            agency_id: agency_id.clone(),
            access_token: inner.cipher.encrypt(&token_set.access_token)?,
            refresh_token: inner.cipher.encrypt(&refresh_token)?,
            token_type: token_set.token_type.clone(),
            expires_at,
            scope: token_set.scope.clone().unwrap_or_else(|| scope.to_string()),
        };

        inner.store.upsert(&installation).await?;

        // A fresh grant supersedes any earlier refresh failure
        inner.reauth_required.remove(&location_id);

        info!(location_id = %location_id, expires_at = %expires_at, "Authorization complete");

        Ok(AuthorizedInstallation {
            location_id,
            agency_id,
            expires_at,
        })
    }

    /// Removes a tenant's installation. Returns `false` if none existed;
    /// disconnecting an unknown tenant is treated as already-disconnected.
    pub async fn disconnect(&self, location_id: &str) -> Result<bool, BrokerError> {
        // Serialize behind any in-flight refresh: a refresh that is already
        // awaiting the provider holds this lock across its upsert, and that
        // upsert must not resurrect the row after the delete
        let lock = {
            let entry = self
                .inner
                .refresh_locks
                .entry(location_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        let removed = self.inner.store.delete(location_id).await?;

        self.inner.reauth_required.remove(location_id);
        self.inner.refresh_locks.remove(location_id);

        if removed {
            info!(location_id = %location_id, "Installation disconnected");
        } else {
            debug!(location_id = %location_id, "Disconnect for unknown location (no-op)");
        }

        Ok(removed)
    }
}

impl BrokerInner {
    fn is_fresh(&self, expires_at: DateTime<Utc>) -> bool {
        Utc::now() < expires_at - self.skew
    }

    fn decrypt_credential(&self, location_id: &str, blob: &str) -> Result<String, BrokerError> {
        self.cipher.decrypt(blob).map_err(|e| {
            // Data-integrity incident: the row exists but its blobs are unusable
            error!(location_id = %location_id, error = %e, "Stored credential failed decryption");
            BrokerError::CorruptCredential
        })
    }

    /// Refreshes the tenant's token set while holding the per-tenant lock.
    ///
    /// Waiters that blocked on the lock re-check freshness after acquiring
    /// it — the winner has already persisted the new token set by then, so
    /// they return it without touching the provider.
    async fn refresh_single_flight(self: Arc<Self>, location_id: &str) -> Result<String, BrokerError> {
        let lock = {
            let entry = self
                .refresh_locks
                .entry(location_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())));
            Arc::clone(entry.value())
        };
        let _guard = lock.lock().await;

        if self.reauth_required.contains_key(location_id) {
            return Err(BrokerError::ReauthRequired);
        }

        let installation = self
            .store
            .lookup(location_id)
            .await?
            .ok_or(BrokerError::NoInstallation)?;

        let access_token = self.decrypt_credential(location_id, &installation.access_token)?;
        if self.is_fresh(installation.expires_at) {
            return Ok(access_token);
        }

        let refresh_token = self.decrypt_credential(location_id, &installation.refresh_token)?;

        let token_set = match self.oauth.refresh(&refresh_token).await {
            Ok(set) => set,
            Err(OAuthError::Transport(detail)) => {
                // Provider never saw the request; the grant itself is intact
                warn!(location_id = %location_id, error = %detail, "Provider unreachable during refresh");
                return Err(BrokerError::Gateway(detail));
            }
            Err(OAuthError::Malformed(detail)) => {
                // A garbled success says nothing about the grant
                warn!(location_id = %location_id, error = %detail, "Unparseable token response during refresh");
                return Err(BrokerError::Gateway(detail));
            }
            Err(e) => {
                // Rejection: stored credentials stay untouched, tenant must
                // redo authorization. Retrying would burn the rotated token.
                warn!(location_id = %location_id, error = %e, "Token refresh rejected, flagging for re-authorization");
                self.reauth_required.insert(location_id.to_string(), ());
                return Err(BrokerError::RefreshFailed(e.to_string()));
            }
        };

        // Providers may omit the refresh token when they did not rotate it
        let new_refresh_token = token_set.refresh_token.unwrap_or(refresh_token);
        let expires_at = Utc::now()
            + Duration::seconds(token_set.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS));

        let updated = NewInstallation {
            location_id: installation.location_id.clone(),
            agency_id: installation.agency_id.clone(),
            access_token: self.cipher.encrypt(&token_set.access_token)?,
            refresh_token: self.cipher.encrypt(&new_refresh_token)?,
            token_type: token_set.token_type,
            expires_at,
            scope: token_set.scope.unwrap_or(installation.scope),
        };

        self.store.upsert(&updated).await?;

        info!(location_id = %location_id, expires_at = %expires_at, "Access token refreshed");

        Ok(token_set.access_token)
    }
}
