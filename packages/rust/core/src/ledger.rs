//! Article ledger: lifecycle operations over stored articles.
//!
//! ```text
//! generated → pending_review → approved → publishing → published
//!                            ↘ rejected              ↘ publish_failed
//!                                         ↖──────────┘ (retry)
//! ```
//!
//! Each operation is a single storage transaction that checks the edge and
//! appends the history row. At most one article per entity sits in
//! `pending_review`, `approved` or `publishing`.

use std::sync::Arc;

use autopress_shared::{
    Article, ArticleId, ArticleState, ArticleStatistics, ContentPayload, DuplicatePolicy,
    FailureKind, HistoryEntry, Result,
};
use autopress_storage::{Storage, Transition};
use chrono::{DateTime, Utc};
use tracing::{info, warn};

/// Actor recorded for transitions made by the pipeline itself.
pub const PIPELINE_ACTOR: &str = "pipeline";
/// Actor recorded for automatic approvals.
pub const AUTO_APPROVE_ACTOR: &str = "auto-approve";
/// Actor recorded for publish transitions.
pub const COORDINATOR_ACTOR: &str = "coordinator";
/// Actor recorded by cleanup recovery.
pub const RECOVERY_ACTOR: &str = "recovery";

/// What happens to an article after a failed publish attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureDisposition {
    /// Back to `approved`, eligible again from `at`.
    Retry { at: DateTime<Utc> },
    /// Terminal `publish_failed`, optionally flagged for an operator.
    Fail { needs_attention: bool },
}

/// Lifecycle operations for articles.
#[derive(Clone)]
pub struct ArticleLedger {
    storage: Arc<Storage>,
    duplicate_policy: DuplicatePolicy,
}

impl ArticleLedger {
    pub fn new(storage: Arc<Storage>, duplicate_policy: DuplicatePolicy) -> Self {
        Self {
            storage,
            duplicate_policy,
        }
    }

    pub fn duplicate_policy(&self) -> DuplicatePolicy {
        self.duplicate_policy
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Store a freshly generated article in `generated`.
    pub async fn record_generated(
        &self,
        entity_key: &str,
        payload: &ContentPayload,
        seo_score: f64,
    ) -> Result<Article> {
        let article = self
            .storage
            .insert_article(entity_key, payload, seo_score, PIPELINE_ACTOR, Utc::now())
            .await?;
        info!(
            article_id = %article.article_id,
            entity_key,
            version = article.version,
            title = %article.payload.title,
            "article generated"
        );
        Ok(article)
    }

    /// `generated → pending_review`, subject to the duplicate policy.
    pub async fn submit_for_review(&self, article_id: &ArticleId) -> Result<Article> {
        self.storage
            .submit_article(article_id, self.duplicate_policy, PIPELINE_ACTOR, Utc::now())
            .await
    }

    /// `pending_review → approved`.
    pub async fn approve(&self, article_id: &ArticleId, actor: &str, note: Option<&str>) -> Result<Article> {
        let article = self
            .transition(article_id, Transition::new(ArticleState::Approved, actor, Utc::now()).note(note))
            .await?;
        info!(article_id = %article_id, actor, "article approved");
        Ok(article)
    }

    /// `pending_review → rejected`.
    pub async fn reject(&self, article_id: &ArticleId, actor: &str, note: Option<&str>) -> Result<Article> {
        let article = self
            .transition(article_id, Transition::new(ArticleState::Rejected, actor, Utc::now()).note(note))
            .await?;
        info!(article_id = %article_id, actor, "article rejected");
        Ok(article)
    }

    /// `approved → publishing`.
    pub async fn mark_publishing(&self, article_id: &ArticleId) -> Result<Article> {
        self.transition(
            article_id,
            Transition::new(ArticleState::Publishing, COORDINATOR_ACTOR, Utc::now()),
        )
        .await
    }

    /// `approved → publishing` together with a new `pending` attempt row.
    /// Returns the claimed article and its attempt number.
    pub async fn claim_for_publish(&self, article_id: &ArticleId) -> Result<(Article, u32)> {
        self.storage
            .begin_publish_attempt(article_id, COORDINATOR_ACTOR, Utc::now())
            .await
    }

    /// `publishing → published`. Repeating with the same post id is a no-op.
    pub async fn mark_published(&self, article_id: &ArticleId, external_post_id: &str) -> Result<Article> {
        self.transition(
            article_id,
            Transition::new(ArticleState::Published, COORDINATOR_ACTOR, Utc::now())
                .external_post_id(Some(external_post_id)),
        )
        .await
    }

    /// `publishing → approved` (retry) or `publishing → publish_failed`.
    pub async fn mark_publish_failed(
        &self,
        article_id: &ArticleId,
        error_kind: FailureKind,
        disposition: FailureDisposition,
        orphan_post_id: Option<&str>,
    ) -> Result<Article> {
        let now = Utc::now();
        let note = error_kind.as_str();
        let transition = match disposition {
            FailureDisposition::Retry { at } => {
                Transition::new(ArticleState::Approved, COORDINATOR_ACTOR, now).retry_at(at)
            }
            FailureDisposition::Fail { needs_attention } => {
                Transition::new(ArticleState::PublishFailed, COORDINATOR_ACTOR, now)
                    .needs_attention(needs_attention)
                    .external_post_id(orphan_post_id)
            }
        };
        self.transition(article_id, transition.error_kind(error_kind).note(Some(note)))
            .await
    }

    async fn transition(&self, article_id: &ArticleId, t: Transition<'_>) -> Result<Article> {
        self.storage.transition_article(article_id, t).await
    }

    /// Edit the content of an article still awaiting review.
    pub async fn revise(
        &self,
        article_id: &ArticleId,
        payload: &ContentPayload,
        seo_score: Option<f64>,
    ) -> Result<Article> {
        let article = self
            .storage
            .revise_article(article_id, payload, seo_score)
            .await?;
        info!(article_id = %article_id, version = article.version, "article revised");
        Ok(article)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub async fn get(&self, article_id: &ArticleId) -> Result<Option<Article>> {
        self.storage.get_article(article_id).await
    }

    pub async fn list(&self, state: Option<ArticleState>, limit: u32) -> Result<Vec<Article>> {
        self.storage.list_articles(state, limit).await
    }

    /// The review queue, oldest submission first.
    pub async fn pending_review(&self, limit: u32) -> Result<Vec<Article>> {
        self.storage
            .list_articles(Some(ArticleState::PendingReview), limit)
            .await
    }

    /// Approved articles ready for a publish attempt at `now`.
    pub async fn publishable(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Article>> {
        self.storage.list_publishable(now, limit).await
    }

    /// The article currently holding the entity's active slot.
    pub async fn active_for(&self, entity_key: &str) -> Result<Option<Article>> {
        self.storage.active_article(entity_key).await
    }

    pub async fn history(&self, article_id: &ArticleId) -> Result<Vec<HistoryEntry>> {
        self.storage.article_history(article_id).await
    }

    pub async fn statistics(&self) -> Result<ArticleStatistics> {
        self.storage.article_statistics(Utc::now()).await
    }

    pub async fn needing_attention(&self) -> Result<Vec<Article>> {
        self.storage.articles_needing_attention().await
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Remove rejected and published articles older than the cutoff.
    pub async fn purge_terminal(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.storage.purge_articles(older_than).await
    }

    /// Fail articles left in `publishing` by a crashed process.
    pub async fn recover_stale_publishing(&self, older_than: DateTime<Utc>) -> Result<Vec<Article>> {
        let recovered = self
            .storage
            .recover_stale_publishing(older_than, RECOVERY_ACTOR, Utc::now())
            .await?;
        for article in &recovered {
            warn!(
                article_id = %article.article_id,
                entity_key = %article.entity_key,
                "publishing interrupted, article flagged for attention"
            );
        }
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{payload, test_storage};
    use autopress_shared::AutopressError;
    use chrono::Duration;

    async fn ledger(policy: DuplicatePolicy) -> ArticleLedger {
        ArticleLedger::new(test_storage().await, policy)
    }

    async fn submitted(ledger: &ArticleLedger, entity: &str) -> Article {
        let a = ledger
            .record_generated(entity, &payload(entity), 70.0)
            .await
            .unwrap();
        ledger.submit_for_review(&a.article_id).await.unwrap()
    }

    #[tokio::test]
    async fn approve_and_reject_only_from_pending_review() {
        let ledger = ledger(DuplicatePolicy::Reject).await;
        let a = submitted(&ledger, "sku-1").await;

        let approved = ledger
            .approve(&a.article_id, "alice", Some("looks good"))
            .await
            .unwrap();
        assert_eq!(approved.state, ArticleState::Approved);
        assert_eq!(approved.reviewer_note.as_deref(), Some("looks good"));

        let again = ledger.reject(&a.article_id, "bob", None).await;
        assert!(matches!(again, Err(AutopressError::InvalidTransition { .. })));

        let missing = ledger.approve(&ArticleId::new(), "alice", None).await;
        assert!(matches!(missing, Err(AutopressError::NotFound { .. })));
    }

    #[tokio::test]
    async fn one_active_article_per_entity() {
        let ledger = ledger(DuplicatePolicy::Reject).await;
        submitted(&ledger, "sku-1").await;
        let second = ledger
            .record_generated("sku-1", &payload("v2"), 80.0)
            .await
            .unwrap();
        assert!(ledger.submit_for_review(&second.article_id).await.is_err());

        let active = ledger.active_for("sku-1").await.unwrap().unwrap();
        assert_eq!(active.state, ArticleState::PendingReview);
        assert_ne!(active.article_id, second.article_id);

        // A different entity is unaffected.
        submitted(&ledger, "sku-2").await;
    }

    #[tokio::test]
    async fn supersede_policy_replaces_pending() {
        let ledger = ledger(DuplicatePolicy::Supersede).await;
        let first = submitted(&ledger, "sku-1").await;
        let second = submitted(&ledger, "sku-1").await;
        assert_eq!(second.version, first.version + 1);

        let first = ledger.get(&first.article_id).await.unwrap().unwrap();
        assert_eq!(first.state, ArticleState::Rejected);
        assert_eq!(ledger.pending_review(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn publish_failure_dispositions() {
        let ledger = ledger(DuplicatePolicy::Reject).await;
        let a = submitted(&ledger, "sku-1").await;
        ledger.approve(&a.article_id, "alice", None).await.unwrap();
        ledger.mark_publishing(&a.article_id).await.unwrap();

        let at = Utc::now() + Duration::minutes(1);
        let retried = ledger
            .mark_publish_failed(
                &a.article_id,
                FailureKind::ServerError,
                FailureDisposition::Retry { at },
                None,
            )
            .await
            .unwrap();
        assert_eq!(retried.state, ArticleState::Approved);
        assert!(retried.next_attempt_at.is_some());
        assert!(ledger.publishable(Utc::now(), 10).await.unwrap().is_empty());

        ledger.mark_publishing(&a.article_id).await.unwrap();
        let failed = ledger
            .mark_publish_failed(
                &a.article_id,
                FailureKind::RollbackIncomplete,
                FailureDisposition::Fail {
                    needs_attention: true,
                },
                Some("77"),
            )
            .await
            .unwrap();
        assert_eq!(failed.state, ArticleState::PublishFailed);
        assert!(failed.needs_attention);
        assert_eq!(failed.external_post_id.as_deref(), Some("77"));
        assert_eq!(ledger.needing_attention().await.unwrap().len(), 1);

        let stats = ledger.statistics().await.unwrap();
        assert_eq!(stats.count(ArticleState::PublishFailed), 1);
        assert_eq!(stats.needing_attention, 1);
    }

    #[tokio::test]
    async fn recorded_history_follows_legal_edges() {
        let ledger = ledger(DuplicatePolicy::Reject).await;
        let a = submitted(&ledger, "sku-1").await;
        ledger.approve(&a.article_id, "alice", None).await.unwrap();
        ledger.mark_publishing(&a.article_id).await.unwrap();
        ledger.mark_published(&a.article_id, "501").await.unwrap();
        ledger.mark_published(&a.article_id, "501").await.unwrap();

        let history = ledger.history(&a.article_id).await.unwrap();
        assert_eq!(history.len(), 5);
        for entry in &history {
            if let Some(from) = entry.from_state {
                assert!(from.can_transition_to(entry.to_state));
            }
        }
    }
}
