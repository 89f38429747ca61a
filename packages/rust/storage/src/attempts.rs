//! Append-only publish attempt log.

use autopress_shared::{
    Article, ArticleId, ArticleState, AttemptStatistics, AttemptStatus, AutopressError,
    FailureKind, PublishAttempt, Result,
};
use chrono::{DateTime, Utc};
use libsql::params;

use crate::Storage;
use crate::articles::{Transition, load, write_transition};
use crate::helpers::{
    db_err, get_i64, get_opt_parsed, get_opt_string, get_opt_ts, get_parsed, get_ts, get_u64, ts,
};

/// Terminal values written when a pending attempt is finalized.
#[derive(Debug, Clone)]
pub struct AttemptUpdate {
    pub status: AttemptStatus,
    pub external_post_id: Option<String>,
    pub error_kind: Option<FailureKind>,
    pub error_message: Option<String>,
}

impl AttemptUpdate {
    pub fn success(external_post_id: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Success,
            external_post_id: Some(external_post_id.into()),
            error_kind: None,
            error_message: None,
        }
    }

    pub fn failed(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            status: AttemptStatus::Failed,
            external_post_id: None,
            error_kind: Some(kind),
            error_message: Some(message.into()),
        }
    }

    /// Keep the id of a post that was created before the attempt failed.
    pub fn with_post_id(mut self, external_post_id: Option<String>) -> Self {
        if external_post_id.is_some() {
            self.external_post_id = external_post_id;
        }
        self
    }
}

fn row_to_attempt(article_id: &ArticleId, row: &libsql::Row) -> Result<PublishAttempt> {
    let n = get_i64(row, 0)?;
    Ok(PublishAttempt {
        article_id: article_id.clone(),
        attempt_number: u32::try_from(n)
            .map_err(|e| AutopressError::Storage(format!("attempt number {n}: {e}")))?,
        external_post_id: get_opt_string(row, 1)?,
        status: get_parsed(row, 2)?,
        error_kind: get_opt_parsed(row, 3)?,
        error_message: get_opt_string(row, 4)?,
        attempted_at: get_ts(row, 5)?,
        finished_at: get_opt_ts(row, 6)?,
    })
}

impl Storage {
    // -----------------------------------------------------------------------
    // Publish attempt operations
    // -----------------------------------------------------------------------

    /// Claim an approved article for publishing and open its next attempt.
    ///
    /// The `approved → publishing` move and the `pending` attempt row commit
    /// together. Returns the claimed article and the attempt number.
    pub async fn begin_publish_attempt(
        &self,
        article_id: &ArticleId,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(Article, u32)> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let current = load(&tx, article_id).await?;
        let claimed = write_transition(
            &tx,
            &current,
            &Transition::new(ArticleState::Publishing, actor, at),
        )
        .await?;

        let id = article_id.to_string();
        let mut rows = tx
            .query(
                "SELECT COALESCE(MAX(attempt_number), 0) + 1
                 FROM publish_attempts WHERE article_id = ?1",
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;
        let next = match rows.next().await.map_err(db_err)? {
            Some(row) => get_i64(&row, 0)?,
            None => 1,
        };
        drop(rows);

        let at_s = ts(at);
        tx.execute(
            "INSERT INTO publish_attempts (article_id, attempt_number, status, attempted_at)
             VALUES (?1, ?2, 'pending', ?3)",
            params![id.as_str(), next, at_s.as_str()],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        let attempt = u32::try_from(next)
            .map_err(|e| AutopressError::Storage(format!("attempt number {next}: {e}")))?;
        Ok((claimed, attempt))
    }

    /// Finalize a pending attempt. A row is finalized at most once; a second
    /// call fails with `InvalidTransition`.
    pub async fn finalize_attempt(
        &self,
        article_id: &ArticleId,
        attempt_number: u32,
        update: &AttemptUpdate,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.check_writable()?;
        if update.status == AttemptStatus::Pending {
            return Err(AutopressError::validation(
                "an attempt cannot be finalized as pending",
            ));
        }

        let id = article_id.to_string();
        let at_s = ts(at);
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE publish_attempts
                 SET status = ?1, external_post_id = ?2, error_kind = ?3, error_message = ?4,
                     finished_at = ?5
                 WHERE article_id = ?6 AND attempt_number = ?7 AND status = 'pending'",
                params![
                    update.status.as_str(),
                    update.external_post_id.as_deref(),
                    update.error_kind.map(FailureKind::as_str),
                    update.error_message.as_deref(),
                    at_s.as_str(),
                    id.as_str(),
                    i64::from(attempt_number)
                ],
            )
            .await
            .map_err(db_err)?;

        if affected == 0 {
            return Err(AutopressError::invalid_transition(
                id,
                format!("attempt {attempt_number} is not pending"),
            ));
        }
        Ok(())
    }

    /// All attempts for one article, in attempt order.
    pub async fn list_attempts(&self, article_id: &ArticleId) -> Result<Vec<PublishAttempt>> {
        let id = article_id.to_string();
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT attempt_number, external_post_id, status, error_kind, error_message,
                        attempted_at, finished_at
                 FROM publish_attempts WHERE article_id = ?1 ORDER BY attempt_number",
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(row_to_attempt(article_id, &row)?);
        }
        Ok(out)
    }

    /// Attempt counts by status across all articles.
    pub async fn attempt_statistics(&self) -> Result<AttemptStatistics> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT status, COUNT(*) FROM publish_attempts GROUP BY status",
                params![],
            )
            .await
            .map_err(db_err)?;

        let mut stats = AttemptStatistics::default();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let count = get_u64(&row, 1)?;
            match get_parsed::<AttemptStatus>(&row, 0)? {
                AttemptStatus::Pending => stats.pending = count,
                AttemptStatus::Success => stats.success = count,
                AttemptStatus::Failed => stats.failed = count,
            }
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;
    use autopress_shared::{ContentPayload, DuplicatePolicy};

    async fn approved(storage: &Storage) -> ArticleId {
        let now = Utc::now();
        let payload = ContentPayload {
            title: "Grinder".into(),
            body: "body".into(),
            ..Default::default()
        };
        let a = storage
            .insert_article("sku-1", &payload, 75.0, "pipeline", now)
            .await
            .unwrap();
        storage
            .submit_article(&a.article_id, DuplicatePolicy::Reject, "pipeline", now)
            .await
            .unwrap();
        storage
            .transition_article(
                &a.article_id,
                Transition::new(ArticleState::Approved, "alice", now),
            )
            .await
            .unwrap();
        a.article_id
    }

    #[tokio::test]
    async fn attempts_number_from_one_and_finalize_once() {
        let storage = test_storage().await;
        let id = approved(&storage).await;
        let now = Utc::now();

        let (claimed, n1) = storage
            .begin_publish_attempt(&id, "coordinator", now)
            .await
            .unwrap();
        assert_eq!(claimed.state, ArticleState::Publishing);
        assert_eq!(n1, 1);

        // A second claim while publishing is refused.
        assert!(
            storage
                .begin_publish_attempt(&id, "coordinator", now)
                .await
                .is_err()
        );

        let failed = AttemptUpdate::failed(FailureKind::Timeout, "slow");
        storage.finalize_attempt(&id, n1, &failed, now).await.unwrap();
        let again = storage.finalize_attempt(&id, n1, &failed, now).await;
        assert!(matches!(again, Err(AutopressError::InvalidTransition { .. })));

        storage
            .transition_article(
                &id,
                Transition::new(ArticleState::Approved, "coordinator", now)
                    .error_kind(FailureKind::Timeout),
            )
            .await
            .unwrap();
        let (_, n2) = storage
            .begin_publish_attempt(&id, "coordinator", now)
            .await
            .unwrap();
        assert_eq!(n2, 2);
        storage
            .finalize_attempt(&id, n2, &AttemptUpdate::success("99"), now)
            .await
            .unwrap();

        let attempts = storage.list_attempts(&id).await.unwrap();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0].status, AttemptStatus::Failed);
        assert_eq!(attempts[0].error_kind, Some(FailureKind::Timeout));
        assert_eq!(attempts[1].status, AttemptStatus::Success);
        assert_eq!(attempts[1].external_post_id.as_deref(), Some("99"));
        assert!(attempts[1].finished_at.is_some());

        let stats = storage.attempt_statistics().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.success, 1);
        assert_eq!(stats.pending, 0);
    }
}
