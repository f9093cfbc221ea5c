//! Installation model and token encryption at rest.
//!
//! An [`Installation`] is one tenant's stored OAuth grant: encrypted token
//! blobs plus grant metadata. Token plaintext exists only in memory, between a
//! [`TokenCipher`] decrypt and the outbound request that uses it.
//!
//! # Security
//!
//! - Access and refresh tokens are AES-256-GCM blobs, unique nonce per encrypt
//! - The cipher key is derived from `HLPROXY_ENCRYPTION_SECRET` at startup
//! - Authenticated encryption: tampering is detected and fails closed
//! - Token plaintext is never persisted and never logged

use chrono::{DateTime, Utc};

mod cipher;

pub use cipher::{CipherError, TokenCipher};

/// A tenant's stored OAuth grant, as read from the installation store.
///
/// `access_token` and `refresh_token` are ciphertext blobs; decryption is the
/// broker's job, not the store's.
#[derive(Clone, Debug)]
pub struct Installation {
    /// Tenant key, unique and immutable after creation
    pub location_id: String,
    /// Owning agency/company, when the provider reports one
    pub agency_id: Option<String>,
    /// Encrypted access token blob
    pub access_token: String,
    /// Encrypted refresh token blob
    pub refresh_token: String,
    /// Token scheme, "Bearer" unless the provider says otherwise
    pub token_type: String,
    /// Authoritative refresh boundary for the access token
    pub expires_at: DateTime<Utc>,
    /// Space-delimited granted scopes
    pub scope: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field set written on insert or overwrite. Timestamps are server-assigned
/// by the store (`created_at` only on first insert).
#[derive(Clone, Debug)]
pub struct NewInstallation {
    pub location_id: String,
    pub agency_id: Option<String>,
    /// Encrypted access token blob
    pub access_token: String,
    /// Encrypted refresh token blob
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub scope: String,
}
