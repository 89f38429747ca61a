//! libSQL storage layer for autopress (local, embedded).
//!
//! The [`Storage`] struct wraps a single libSQL connection holding entity
//! fingerprints, the article ledger, publish attempts, and scheduler state.
//! Every mutation is a typed operation that runs in its own transaction; the
//! connection is behind an async mutex so concurrent callers never interleave
//! statements of two transactions.
//!
//! **Access rules:**
//! - daemon and mutating CLI commands: read-write via [`Storage::open`]
//! - inspection commands: read-only via [`Storage::open_readonly`]

mod articles;
mod attempts;
mod fingerprints;
mod helpers;
mod jobs;
mod migrations;

use std::path::Path;

use autopress_shared::{AutopressError, Result};
use libsql::{Connection, Database, params};
use tokio::sync::{Mutex, MutexGuard};

pub use articles::Transition;
pub use attempts::AttemptUpdate;
pub use jobs::ClaimOutcome;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Mutex<Connection>,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AutopressError::io(parent, e))?;
        }

        let storage = Self::connect(path, false).await?;
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AutopressError::StoreUnavailable(format!(
                "database not found at {}",
                path.display()
            )));
        }
        Self::connect(path, true).await
    }

    async fn connect(path: &Path, readonly: bool) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AutopressError::StoreUnavailable(e.to_string()))?;

        let conn = db
            .connect()
            .map_err(|e| AutopressError::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            db,
            conn: Mutex::new(conn),
            readonly,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;
        let conn = self.conn().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                conn.execute_batch(migration.sql).await.map_err(|e| {
                    AutopressError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    pub async fn get_schema_version(&self) -> u32 {
        let conn = self.conn().await;
        let result = conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row
                    .get::<Option<i64>>(0)
                    .ok()
                    .flatten()
                    .and_then(|v| u32::try_from(v).ok())
                    .unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(AutopressError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    /// Exclusive access to the connection for one operation.
    async fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn reopen_is_idempotent() {
        let tmp = temp_db_path();
        let first = Storage::open(&tmp).await.expect("first open");
        drop(first);
        let second = Storage::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 2);
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = temp_db_path();
        let rw = Storage::open(&tmp).await.unwrap();
        rw.observe_fingerprint("sku-1", "h1", Utc::now())
            .await
            .unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert!(ro.get_fingerprint("sku-1").await.unwrap().is_some());
        let result = ro.observe_fingerprint("sku-2", "h2", Utc::now()).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[tokio::test]
    async fn readonly_requires_existing_file() {
        let result = Storage::open_readonly(&temp_db_path()).await;
        assert!(matches!(result, Err(AutopressError::StoreUnavailable(_))));
    }
}
