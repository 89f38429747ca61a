//! Entity fingerprints and their hash audit trail.

use autopress_shared::{
    AutopressError, Fingerprint, FingerprintAuditEntry, FingerprintStatus, ObservationResult,
    Result,
};
use chrono::{DateTime, Utc};
use libsql::{Connection, params};

use crate::Storage;
use crate::helpers::{db_err, get_opt_string, get_parsed, get_string, get_ts, ts};

const SELECT_COLS: &str =
    "identity_key, content_hash, first_seen, last_seen, status, generated_hash";

fn row_to_fingerprint(row: &libsql::Row) -> Result<Fingerprint> {
    Ok(Fingerprint {
        identity_key: get_string(row, 0)?,
        content_hash: get_string(row, 1)?,
        first_seen: get_ts(row, 2)?,
        last_seen: get_ts(row, 3)?,
        status: get_parsed(row, 4)?,
        generated_hash: get_opt_string(row, 5)?,
    })
}

async fn load(conn: &Connection, identity_key: &str) -> Result<Option<Fingerprint>> {
    let mut rows = conn
        .query(
            &format!("SELECT {SELECT_COLS} FROM fingerprints WHERE identity_key = ?1"),
            params![identity_key],
        )
        .await
        .map_err(db_err)?;

    match rows.next().await.map_err(db_err)? {
        Some(row) => Ok(Some(row_to_fingerprint(&row)?)),
        None => Ok(None),
    }
}

impl Storage {
    // -----------------------------------------------------------------------
    // Fingerprint operations
    // -----------------------------------------------------------------------

    /// Record one observation of `identity_key` with `content_hash`.
    ///
    /// Creates the fingerprint on first sight, replaces the hash (and appends
    /// the old one to the audit trail) when it differs, and otherwise only
    /// moves `last_seen`.
    pub async fn observe_fingerprint(
        &self,
        identity_key: &str,
        content_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<ObservationResult> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let previous = load(&tx, identity_key).await?;
        let status =
            FingerprintStatus::classify(previous.as_ref().map(|f| f.content_hash.as_str()), content_hash);
        let now_s = ts(now);

        match &previous {
            None => {
                tx.execute(
                    "INSERT INTO fingerprints
                         (identity_key, content_hash, first_seen, last_seen, status)
                     VALUES (?1, ?2, ?3, ?3, ?4)",
                    params![identity_key, content_hash, now_s.as_str(), status.as_str()],
                )
                .await
                .map_err(db_err)?;
            }
            Some(prev) if status == FingerprintStatus::Changed => {
                tx.execute(
                    "UPDATE fingerprints
                     SET content_hash = ?1, last_seen = ?2, status = ?3
                     WHERE identity_key = ?4",
                    params![content_hash, now_s.as_str(), status.as_str(), identity_key],
                )
                .await
                .map_err(db_err)?;
                tx.execute(
                    "INSERT INTO fingerprint_audit (identity_key, previous_hash, new_hash, observed_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        identity_key,
                        prev.content_hash.as_str(),
                        content_hash,
                        now_s.as_str()
                    ],
                )
                .await
                .map_err(db_err)?;
            }
            Some(_) => {
                tx.execute(
                    "UPDATE fingerprints SET last_seen = ?1, status = ?2 WHERE identity_key = ?3",
                    params![now_s.as_str(), status.as_str(), identity_key],
                )
                .await
                .map_err(db_err)?;
            }
        }

        tx.commit().await.map_err(db_err)?;

        Ok(ObservationResult {
            identity_key: identity_key.to_string(),
            status,
            previous_hash: previous.as_ref().map(|f| f.content_hash.clone()),
            new_hash: content_hash.to_string(),
            generated_hash: previous.and_then(|f| f.generated_hash),
        })
    }

    /// Get a fingerprint by identity key.
    pub async fn get_fingerprint(&self, identity_key: &str) -> Result<Option<Fingerprint>> {
        let conn = self.conn().await;
        load(&conn, identity_key).await
    }

    /// Record that an article was submitted for `content_hash`.
    pub async fn mark_fingerprint_generated(
        &self,
        identity_key: &str,
        content_hash: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE fingerprints SET generated_hash = ?1 WHERE identity_key = ?2",
                params![content_hash, identity_key],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(AutopressError::not_found("fingerprint", identity_key));
        }
        Ok(())
    }

    /// Prior hashes of an entity, oldest first.
    pub async fn fingerprint_audit(&self, identity_key: &str) -> Result<Vec<FingerprintAuditEntry>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT identity_key, previous_hash, new_hash, observed_at
                 FROM fingerprint_audit WHERE identity_key = ?1 ORDER BY id",
                params![identity_key],
            )
            .await
            .map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(FingerprintAuditEntry {
                identity_key: get_string(&row, 0)?,
                previous_hash: get_string(&row, 1)?,
                new_hash: get_string(&row, 2)?,
                observed_at: get_ts(&row, 3)?,
            });
        }
        Ok(out)
    }

    /// Delete fingerprints not seen since `older_than`, with their audit rows.
    /// Returns the number of fingerprints removed.
    pub async fn purge_fingerprints(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let cutoff = ts(older_than);
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        tx.execute(
            "DELETE FROM fingerprint_audit WHERE identity_key IN
                 (SELECT identity_key FROM fingerprints WHERE last_seen < ?1)",
            params![cutoff.as_str()],
        )
        .await
        .map_err(db_err)?;
        let removed = tx
            .execute(
                "DELETE FROM fingerprints WHERE last_seen < ?1",
                params![cutoff.as_str()],
            )
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    /// Number of tracked entities.
    pub async fn fingerprint_count(&self) -> Result<u64> {
        let conn = self.conn().await;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM fingerprints", params![])
            .await
            .map_err(db_err)?;
        match rows.next().await.map_err(db_err)? {
            Some(row) => crate::helpers::get_u64(&row, 0),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_storage;
    use autopress_shared::FingerprintStatus;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn observe_sequence_new_unchanged_changed() {
        let storage = test_storage().await;
        let t0 = Utc::now();

        let first = storage.observe_fingerprint("sku-1", "h1", t0).await.unwrap();
        assert_eq!(first.status, FingerprintStatus::New);
        assert!(first.previous_hash.is_none());

        let second = storage
            .observe_fingerprint("sku-1", "h1", t0 + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(second.status, FingerprintStatus::Unchanged);
        assert_eq!(second.previous_hash.as_deref(), Some("h1"));

        let third = storage
            .observe_fingerprint("sku-1", "h2", t0 + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(third.status, FingerprintStatus::Changed);
        assert_eq!(third.previous_hash.as_deref(), Some("h1"));

        let fp = storage.get_fingerprint("sku-1").await.unwrap().unwrap();
        assert_eq!(fp.content_hash, "h2");
        assert_eq!(fp.status, FingerprintStatus::Changed);
        assert!(fp.last_seen > fp.first_seen);

        let audit = storage.fingerprint_audit("sku-1").await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].previous_hash, "h1");
        assert_eq!(audit[0].new_hash, "h2");
    }

    #[tokio::test]
    async fn generated_hash_is_reported_on_next_observation() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage.observe_fingerprint("sku-1", "h1", now).await.unwrap();
        storage.mark_fingerprint_generated("sku-1", "h1").await.unwrap();

        let obs = storage.observe_fingerprint("sku-1", "h1", now).await.unwrap();
        assert_eq!(obs.generated_hash.as_deref(), Some("h1"));

        let missing = storage.mark_fingerprint_generated("nope", "h").await;
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn purge_removes_only_old_fingerprints() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage
            .observe_fingerprint("old", "h1", now - Duration::days(100))
            .await
            .unwrap();
        storage
            .observe_fingerprint("old", "h2", now - Duration::days(95))
            .await
            .unwrap();
        storage.observe_fingerprint("fresh", "h3", now).await.unwrap();

        let removed = storage
            .purge_fingerprints(now - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_fingerprint("old").await.unwrap().is_none());
        assert!(storage.fingerprint_audit("old").await.unwrap().is_empty());
        assert!(storage.get_fingerprint("fresh").await.unwrap().is_some());
        assert_eq!(storage.fingerprint_count().await.unwrap(), 1);
    }
}
