//! SQLite-backed installation store.
//!
//! The single-node backend. Token columns hold ciphertext blobs; this module
//! never sees plaintext.

use super::InstallationStore;
use crate::credentials::{Installation, NewInstallation};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::Mutex;

/// Installation storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE installations (
///     id INTEGER PRIMARY KEY,
///     location_id TEXT NOT NULL UNIQUE,
///     agency_id TEXT,
///     access_token TEXT NOT NULL,   -- Encrypted blob
///     refresh_token TEXT NOT NULL,  -- Encrypted blob
///     token_type TEXT NOT NULL DEFAULT 'Bearer',
///     expires_at TEXT NOT NULL,     -- ISO 8601 timestamp
///     scope TEXT NOT NULL,
///     created_at TEXT NOT NULL,     -- ISO 8601 timestamp
///     updated_at TEXT NOT NULL      -- ISO 8601 timestamp
/// );
/// ```
///
/// # Thread safety
/// - Connection is wrapped in Mutex for safe concurrent access
/// - SQLite itself is thread-safe with serialized mode
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Creates or opens the installation database at `db_path`.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path).context("Failed to open database")?;

        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS installations (
                id INTEGER PRIMARY KEY,
                location_id TEXT NOT NULL UNIQUE,
                agency_id TEXT,
                access_token TEXT NOT NULL,
                refresh_token TEXT NOT NULL,
                token_type TEXT NOT NULL DEFAULT 'Bearer',
                expires_at TEXT NOT NULL,
                scope TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
            [],
        )
        .context("Failed to create installations table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_location_id ON installations(location_id)",
            [],
        )
        .context("Failed to create index")?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawRow> {
        Ok(RawRow {
            location_id: row.get(0)?,
            agency_id: row.get(1)?,
            access_token: row.get(2)?,
            refresh_token: row.get(3)?,
            token_type: row.get(4)?,
            expires_at: row.get(5)?,
            scope: row.get(6)?,
            created_at: row.get(7)?,
            updated_at: row.get(8)?,
        })
    }
}

/// Row image with timestamps still in their stored text form.
struct RawRow {
    location_id: String,
    agency_id: Option<String>,
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_at: String,
    scope: String,
    created_at: String,
    updated_at: String,
}

impl RawRow {
    fn into_installation(self) -> Result<Installation> {
        Ok(Installation {
            location_id: self.location_id,
            agency_id: self.agency_id,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            token_type: self.token_type,
            expires_at: parse_timestamp(&self.expires_at, "expires_at")?,
            scope: self.scope,
            created_at: parse_timestamp(&self.created_at, "created_at")?,
            updated_at: parse_timestamp(&self.updated_at, "updated_at")?,
        })
    }
}

fn parse_timestamp(raw: &str, column: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Failed to parse {} timestamp", column))
}

#[async_trait]
impl InstallationStore for SqliteStore {
    async fn lookup(&self, location_id: &str) -> Result<Option<Installation>> {
        let conn = self.conn.lock().unwrap();

        let found = conn
            .query_row(
                r#"
                SELECT location_id, agency_id, access_token, refresh_token,
                       token_type, expires_at, scope, created_at, updated_at
                FROM installations
                WHERE location_id = ?1
                "#,
                params![location_id],
                Self::read_raw,
            )
            .optional()
            .context("Failed to query installation")?;

        found.map(RawRow::into_installation).transpose()
    }

    async fn upsert(&self, installation: &NewInstallation) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        self.conn
            .lock()
            .unwrap()
            .execute(
                r#"
                INSERT INTO installations (
                    location_id, agency_id, access_token, refresh_token,
                    token_type, expires_at, scope, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(location_id) DO UPDATE SET
                    agency_id = excluded.agency_id,
                    access_token = excluded.access_token,
                    refresh_token = excluded.refresh_token,
                    token_type = excluded.token_type,
                    expires_at = excluded.expires_at,
                    scope = excluded.scope,
                    updated_at = excluded.updated_at
                "#,
                params![
                    installation.location_id,
                    installation.agency_id,
                    installation.access_token,
                    installation.refresh_token,
                    installation.token_type,
                    installation.expires_at.to_rfc3339(),
                    installation.scope,
                    now,
                ],
            )
            .context("Failed to upsert installation")?;

        Ok(())
    }

    async fn delete(&self, location_id: &str) -> Result<bool> {
        let rows_affected = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM installations WHERE location_id = ?1",
                params![location_id],
            )
            .context("Failed to delete installation")?;

        Ok(rows_affected > 0)
    }

    async fn ping(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .query_row("SELECT 1", [], |_| Ok(()))
            .context("Database unreachable")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> SqliteStore {
        SqliteStore::open(":memory:").expect("Failed to create test store")
    }

    fn sample_installation(location_id: &str) -> NewInstallation {
        NewInstallation {
            location_id: location_id.to_string(),
            agency_id: Some("agency-1".to_string()),
            access_token: "blob:access".to_string(),
            refresh_token: "blob:refresh".to_string(),
            token_type: "Bearer".to_string(),
            expires_at: Utc::now() + Duration::hours(1),
            scope: "contacts.readonly".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_and_lookup() {
        let store = create_test_store();
        let new = sample_installation("loc1");

        store.upsert(&new).await.expect("Failed to upsert");

        let found = store
            .lookup("loc1")
            .await
            .expect("Failed to lookup")
            .expect("Installation not found");

        assert_eq!(found.location_id, "loc1");
        assert_eq!(found.agency_id, Some("agency-1".to_string()));
        assert_eq!(found.access_token, "blob:access");
        assert_eq!(found.token_type, "Bearer");
        assert_eq!(found.scope, "contacts.readonly");
        // Round-trip through RFC 3339 keeps the instant (sub-second precision preserved)
        assert!((found.expires_at - new.expires_at).num_milliseconds().abs() < 1000);
    }

    #[tokio::test]
    async fn test_lookup_nonexistent() {
        let store = create_test_store();

        let result = store.lookup("loc1").await.expect("Failed to lookup");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_upsert_overwrites_single_row() {
        let store = create_test_store();

        store.upsert(&sample_installation("loc1")).await.unwrap();
        let first = store.lookup("loc1").await.unwrap().unwrap();

        let mut update = sample_installation("loc1");
        update.access_token = "blob:access-v2".to_string();
        update.refresh_token = "blob:refresh-v2".to_string();
        store.upsert(&update).await.unwrap();

        let second = store.lookup("loc1").await.unwrap().unwrap();
        assert_eq!(second.access_token, "blob:access-v2");
        assert_eq!(second.refresh_token, "blob:refresh-v2");
        // created_at survives the overwrite
        assert_eq!(second.created_at, first.created_at);

        // Still exactly one row
        let conn = store.conn.lock().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM installations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = create_test_store();
        store.upsert(&sample_installation("loc1")).await.unwrap();

        assert!(store.delete("loc1").await.unwrap());
        assert!(store.lookup("loc1").await.unwrap().is_none());

        // Deleting again is a no-op signaled by false
        assert!(!store.delete("loc1").await.unwrap());
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let store = create_test_store();
        store.upsert(&sample_installation("loc1")).await.unwrap();
        store.upsert(&sample_installation("loc2")).await.unwrap();

        assert!(store.delete("loc1").await.unwrap());
        assert!(store.lookup("loc2").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_ping() {
        let store = create_test_store();
        store.ping().await.expect("ping should succeed");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("installations.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.upsert(&sample_installation("loc1")).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let found = store.lookup("loc1").await.unwrap().unwrap();
        assert_eq!(found.access_token, "blob:access");
    }

    #[tokio::test]
    async fn test_missing_agency_id() {
        let store = create_test_store();
        let mut new = sample_installation("loc1");
        new.agency_id = None;

        store.upsert(&new).await.unwrap();
        let found = store.lookup("loc1").await.unwrap().unwrap();
        assert!(found.agency_id.is_none());
    }
}
