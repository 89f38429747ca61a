//! Publication coordinator: publish attempts, retry with backoff, rollback.
//!
//! One attempt per call: claim the article (`approved → publishing` plus a
//! pending attempt row), call the publisher, then finalize the attempt and
//! move the article on. A post created before a later step failed is deleted
//! exactly once before the article is failed.

use std::sync::Arc;

use autopress_shared::{
    ArticleId, AttemptStatistics, AutopressError, FailureKind, JobKind, PublishAttempt,
    PublishPolicy, Result, RunResult,
};
use autopress_storage::{AttemptUpdate, Storage};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::collaborators::{PublishFailure, Publisher};
use crate::ledger::{ArticleLedger, FailureDisposition};
use crate::pipeline::{RunObserver, UnitOutcome};

/// Approved articles picked up by one sweep at most.
const SWEEP_BATCH: u32 = 500;

/// Result of one publish attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublishOutcome {
    pub article_id: ArticleId,
    pub attempt: u32,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    /// Set when the article went back to `approved` for another attempt.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,
}

impl PublishOutcome {
    fn published(article_id: ArticleId, attempt: u32, post_id: String) -> Self {
        Self {
            article_id,
            attempt,
            success: true,
            external_post_id: Some(post_id),
            error_kind: None,
            retry_at: None,
        }
    }

    fn failed(article_id: ArticleId, attempt: u32, kind: FailureKind) -> Self {
        Self {
            article_id,
            attempt,
            success: false,
            external_post_id: None,
            error_kind: Some(kind),
            retry_at: None,
        }
    }

    /// The article went back to `approved`.
    pub fn will_retry(&self) -> bool {
        self.retry_at.is_some()
    }
}

/// Drives approved articles through the publisher.
pub struct PublicationCoordinator {
    storage: Arc<Storage>,
    ledger: ArticleLedger,
    publisher: Arc<dyn Publisher>,
    policy: PublishPolicy,
}

impl PublicationCoordinator {
    pub fn new(
        storage: Arc<Storage>,
        ledger: ArticleLedger,
        publisher: Arc<dyn Publisher>,
        policy: PublishPolicy,
    ) -> Self {
        Self {
            storage,
            ledger,
            publisher,
            policy,
        }
    }

    pub fn policy(&self) -> &PublishPolicy {
        &self.policy
    }

    /// Make one publish attempt for an approved article.
    ///
    /// Fails with `InvalidTransition` when the article is not `approved`
    /// (another coordinator holds it, or it was never approved). A manual
    /// call ignores `next_attempt_at`; only [`sweep`](Self::sweep) honours it.
    #[instrument(skip_all, fields(article_id = %article_id))]
    pub async fn publish(&self, article_id: &ArticleId) -> Result<PublishOutcome> {
        let (article, attempt) = self.ledger.claim_for_publish(article_id).await?;
        debug!(attempt, "publish attempt opened");

        match self.publisher.create_post(&article.payload).await {
            Ok(post_id) => {
                self.storage
                    .finalize_attempt(article_id, attempt, &AttemptUpdate::success(&post_id), Utc::now())
                    .await?;
                self.ledger.mark_published(article_id, &post_id).await?;
                info!(attempt, external_post_id = %post_id, "article published");
                Ok(PublishOutcome::published(article.article_id, attempt, post_id))
            }
            Err(failure) => match failure.created_post_id.clone() {
                Some(post_id) => self.roll_back(article_id, attempt, failure, post_id).await,
                None => self.fail_attempt(article_id, attempt, failure).await,
            },
        }
    }

    /// Record a failed attempt where nothing was created on the target.
    async fn fail_attempt(
        &self,
        article_id: &ArticleId,
        attempt: u32,
        failure: PublishFailure,
    ) -> Result<PublishOutcome> {
        let kind = failure.kind;
        self.storage
            .finalize_attempt(
                article_id,
                attempt,
                &AttemptUpdate::failed(kind, &failure.message),
                Utc::now(),
            )
            .await?;

        let mut outcome = PublishOutcome::failed(article_id.clone(), attempt, kind);
        if kind.is_transient() && attempt < self.policy.max_retries {
            let delay = chrono::Duration::from_std(self.policy.backoff(attempt))
                .unwrap_or(chrono::Duration::MAX);
            let at = Utc::now()
                .checked_add_signed(delay)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            self.ledger
                .mark_publish_failed(article_id, kind, FailureDisposition::Retry { at }, None)
                .await?;
            warn!(attempt, error_kind = %kind, retry_at = %at, error = %failure.message, "publish attempt failed, will retry");
            outcome.retry_at = Some(at);
        } else {
            self.ledger
                .mark_publish_failed(
                    article_id,
                    kind,
                    FailureDisposition::Fail {
                        needs_attention: false,
                    },
                    None,
                )
                .await?;
            warn!(attempt, error_kind = %kind, error = %failure.message, "publish failed");
        }
        Ok(outcome)
    }

    /// Delete a post left behind by a partial publish, then fail the article.
    async fn roll_back(
        &self,
        article_id: &ArticleId,
        attempt: u32,
        failure: PublishFailure,
        post_id: String,
    ) -> Result<PublishOutcome> {
        warn!(attempt, external_post_id = %post_id, error = %failure.message, "partial publish, deleting post");

        let (kind, needs_attention, orphan, message) =
            match self.publisher.delete_post(&post_id).await {
                Ok(()) => (failure.kind, false, None, failure.message),
                Err(delete_err) => {
                    let escalation = AutopressError::RollbackIncomplete {
                        article_id: article_id.to_string(),
                        message: format!("post {post_id} left on target: {delete_err}"),
                    };
                    error!(error = %escalation, "rollback incomplete");
                    (
                        FailureKind::RollbackIncomplete,
                        true,
                        Some(post_id.as_str()),
                        format!("{}; delete failed: {delete_err}", failure.message),
                    )
                }
            };

        self.storage
            .finalize_attempt(
                article_id,
                attempt,
                &AttemptUpdate::failed(kind, message).with_post_id(Some(post_id.clone())),
                Utc::now(),
            )
            .await?;
        self.ledger
            .mark_publish_failed(
                article_id,
                kind,
                FailureDisposition::Fail { needs_attention },
                orphan,
            )
            .await?;

        let mut outcome = PublishOutcome::failed(article_id.clone(), attempt, kind);
        outcome.external_post_id = orphan.map(str::to_string);
        Ok(outcome)
    }

    /// Publish every approved article eligible at `now`, up to
    /// `policy.concurrency` at a time.
    ///
    /// Articles not yet started when `cancel` fires are left `approved`. A
    /// store failure stops the sweep.
    #[instrument(skip_all, fields(job_id = %job_id))]
    pub async fn sweep(
        &self,
        job_id: &str,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
        observer: &dyn RunObserver,
    ) -> RunResult {
        let mut result = RunResult::start(job_id, JobKind::PublishSweep, now);
        let articles = match self.ledger.publishable(now, SWEEP_BATCH).await {
            Ok(articles) => articles,
            Err(e) => return result.abort(e, Utc::now()),
        };
        info!(eligible = articles.len(), "publish sweep started");

        let stop = cancel.child_token();
        let units = stream::iter(articles)
            .map(|article| {
                let stop = stop.clone();
                async move {
                    if stop.is_cancelled() {
                        return (article.article_id, None);
                    }
                    let res = self.publish(&article.article_id).await;
                    if let Err(e) = &res {
                        if e.is_store_failure() {
                            stop.cancel();
                        }
                    }
                    (article.article_id, Some(res))
                }
            })
            .buffer_unordered(self.policy.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for (article_id, res) in units {
            let unit = article_id.to_string();
            let outcome = match res {
                None => {
                    result.cancelled = true;
                    UnitOutcome::Cancelled
                }
                Some(Ok(o)) if o.success => {
                    result.succeeded += 1;
                    result.counters.published += 1;
                    UnitOutcome::Succeeded
                }
                Some(Ok(o)) => {
                    result.failed += 1;
                    if o.will_retry() {
                        result.counters.retried += 1;
                    } else {
                        result.counters.publish_failed += 1;
                    }
                    UnitOutcome::Failed
                }
                Some(Err(AutopressError::InvalidTransition { message, .. })) => {
                    debug!(article_id = %unit, reason = %message, "article no longer approved, skipped");
                    result.skipped += 1;
                    UnitOutcome::Skipped
                }
                Some(Err(e)) => {
                    warn!(article_id = %unit, error = %e, "publish errored");
                    result.failed += 1;
                    if e.is_store_failure() && result.error.is_none() {
                        result.error = Some(e.to_string());
                    }
                    UnitOutcome::Failed
                }
            };
            if outcome != UnitOutcome::Cancelled {
                result.processed += 1;
            }
            observer.unit_done(job_id, &unit, outcome);
        }

        result.finish(Utc::now())
    }

    pub async fn attempts(&self, article_id: &ArticleId) -> Result<Vec<PublishAttempt>> {
        self.storage.list_attempts(article_id).await
    }

    pub async fn statistics(&self) -> Result<AttemptStatistics> {
        self.storage.attempt_statistics().await
    }
}
