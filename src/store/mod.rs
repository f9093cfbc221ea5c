//! Installation persistence.
//!
//! One record per tenant, keyed by `location_id`. The backend is swappable
//! behind [`InstallationStore`]; the broker and handlers never branch on which
//! implementation is in use — the store is chosen once at process startup.

use crate::credentials::{Installation, NewInstallation};
use anyhow::Result;
use async_trait::async_trait;

mod sqlite;

pub use sqlite::SqliteStore;

/// Persistence contract for installations.
///
/// All operations are atomic with respect to a single `location_id`.
#[async_trait]
pub trait InstallationStore: Send + Sync {
    /// Fetches a tenant's installation, or `None` if not connected.
    async fn lookup(&self, location_id: &str) -> Result<Option<Installation>>;

    /// Inserts a new installation, or overwrites token fields and `updated_at`
    /// for an existing one. `created_at` is preserved across overwrites.
    async fn upsert(&self, installation: &NewInstallation) -> Result<()>;

    /// Removes a tenant's installation. Returns `false` if none existed —
    /// deleting a missing tenant is a no-op, not an error.
    async fn delete(&self, location_id: &str) -> Result<bool>;

    /// Reachability probe for the health endpoint.
    async fn ping(&self) -> Result<()>;
}
