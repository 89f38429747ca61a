//! Core domain types for the autopress pipeline.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AutopressError;
use crate::schedule::Schedule;

// ---------------------------------------------------------------------------
// ArticleId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for article identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArticleId(pub Uuid);

impl ArticleId {
    /// Generate a new time-sortable article identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for ArticleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArticleId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Scraped content
// ---------------------------------------------------------------------------

/// Fields scraped for one listing.
///
/// Only `name`, `price`, `description`, `brand` and `category` take part in
/// change detection. Anything else the scraper sees (stock counters,
/// availability, timestamps) belongs in `attributes`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentFields {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Source page for the listing, carried through to generation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Volatile or informational fields, never hashed.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Fingerprints
// ---------------------------------------------------------------------------

/// Outcome of comparing an observation with the stored fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintStatus {
    New,
    Changed,
    Unchanged,
}

impl FingerprintStatus {
    /// Decide the status from the previous hash (if any) and the new hash.
    pub fn classify(previous: Option<&str>, new_hash: &str) -> Self {
        match previous {
            None => Self::New,
            Some(old) if old == new_hash => Self::Unchanged,
            Some(_) => Self::Changed,
        }
    }

    /// Return the string representation used in SQL storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Changed => "changed",
            Self::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for FingerprintStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FingerprintStatus {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "changed" => Ok(Self::Changed),
            "unchanged" => Ok(Self::Unchanged),
            other => Err(AutopressError::validation(format!(
                "unknown fingerprint status '{other}'"
            ))),
        }
    }
}

/// Stored identity/version record for one scraped entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub identity_key: String,
    pub content_hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub status: FingerprintStatus,
    /// Hash of the content an article was last submitted for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_hash: Option<String>,
}

/// Result of a single `observe` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservationResult {
    pub identity_key: String,
    pub status: FingerprintStatus,
    pub previous_hash: Option<String>,
    pub new_hash: String,
    /// Hash of the content an article was last submitted for, if any.
    pub generated_hash: Option<String>,
}

/// Diagnostic record of a hash replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintAuditEntry {
    pub identity_key: String,
    pub previous_hash: String,
    pub new_hash: String,
    pub observed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ArticleState
// ---------------------------------------------------------------------------

/// Lifecycle state of an article.
///
/// ```text
/// generated → pending_review → approved → publishing → published
///                            → rejected              → publish_failed
///                                                    → approved (retry)
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ArticleState {
    Generated,
    PendingReview,
    Approved,
    Rejected,
    Publishing,
    Published,
    PublishFailed,
}

impl ArticleState {
    /// Every state, in lifecycle order.
    pub const ALL: [Self; 7] = [
        Self::Generated,
        Self::PendingReview,
        Self::Approved,
        Self::Rejected,
        Self::Publishing,
        Self::Published,
        Self::PublishFailed,
    ];

    /// States that count towards the one-active-article-per-entity rule.
    pub const ACTIVE: [Self; 3] = [Self::PendingReview, Self::Approved, Self::Publishing];

    /// Valid next states from the current state.
    pub const fn allowed_next_states(self) -> &'static [Self] {
        match self {
            Self::Generated => &[Self::PendingReview],
            Self::PendingReview => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::Publishing],
            Self::Publishing => &[Self::Published, Self::PublishFailed, Self::Approved],
            Self::Rejected | Self::Published | Self::PublishFailed => &[],
        }
    }

    /// Check whether transitioning to `next` is allowed.
    pub fn can_transition_to(self, next: Self) -> bool {
        self.allowed_next_states().contains(&next)
    }

    /// Terminal states accept no further ledger transitions.
    pub fn is_terminal(self) -> bool {
        self.allowed_next_states().is_empty()
    }

    /// Whether this state occupies the entity's single active slot.
    pub fn is_active(self) -> bool {
        Self::ACTIVE.contains(&self)
    }

    /// Return the string representation used in SQL storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generated => "generated",
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Publishing => "publishing",
            Self::Published => "published",
            Self::PublishFailed => "publish_failed",
        }
    }
}

impl fmt::Display for ArticleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for ArticleState {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| AutopressError::validation(format!("unknown article state '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

/// Generated article content. The pipeline never inspects it beyond logging
/// the title; it is handed to the publisher as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContentPayload {
    pub title: String,
    #[serde(default)]
    pub slug: String,
    pub body: String,
    #[serde(default)]
    pub meta_description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Category name on the publishing target.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    /// Set when the payload came from the simulated fallback generator.
    #[serde(default)]
    pub degraded: bool,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

/// An article record as held by the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub article_id: ArticleId,
    pub entity_key: String,
    pub payload: ContentPayload,
    pub seo_score: f64,
    pub state: ArticleState,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub state_changed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewer_note: Option<String>,
    /// Post id on the publishing target once published.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_post_id: Option<String>,
    /// Earliest time a retry may be attempted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error_kind: Option<FailureKind>,
    /// Set when an operator has to look at the article.
    #[serde(default)]
    pub needs_attention: bool,
}

/// One immutable row of an article's transition log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub article_id: ArticleId,
    pub from_state: Option<ArticleState>,
    pub to_state: ArticleState,
    pub at: DateTime<Utc>,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Per-state article counts for the review/publishing dashboards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArticleStatistics {
    pub total: u64,
    pub by_state: BTreeMap<ArticleState, u64>,
    pub created_last_7_days: u64,
    pub needing_attention: u64,
}

impl ArticleStatistics {
    /// Count for one state, zero when absent.
    pub fn count(&self, state: ArticleState) -> u64 {
        self.by_state.get(&state).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// Failure kinds
// ---------------------------------------------------------------------------

/// Classified reason a collaborator call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    RateLimited,
    ServerError,
    Network,
    SourceUnreachable,
    QuotaExceeded,
    Generation,
    AuthRejected,
    ValidationRejected,
    PostProcessing,
    RollbackIncomplete,
    Interrupted,
}

impl FailureKind {
    const ALL: [Self; 12] = [
        Self::Timeout,
        Self::RateLimited,
        Self::ServerError,
        Self::Network,
        Self::SourceUnreachable,
        Self::QuotaExceeded,
        Self::Generation,
        Self::AuthRejected,
        Self::ValidationRejected,
        Self::PostProcessing,
        Self::RollbackIncomplete,
        Self::Interrupted,
    ];

    /// Whether a later attempt may succeed.
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::RateLimited
                | Self::ServerError
                | Self::Network
                | Self::SourceUnreachable
                | Self::QuotaExceeded
        )
    }

    /// Return the string representation used in SQL storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::SourceUnreachable => "source_unreachable",
            Self::QuotaExceeded => "quota_exceeded",
            Self::Generation => "generation",
            Self::AuthRejected => "auth_rejected",
            Self::ValidationRejected => "validation_rejected",
            Self::PostProcessing => "post_processing",
            Self::RollbackIncomplete => "rollback_incomplete",
            Self::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for FailureKind {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AutopressError::validation(format!("unknown failure kind '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Publication attempts
// ---------------------------------------------------------------------------

/// Status of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Success,
    Failed,
}

impl AttemptStatus {
    /// Return the string representation used in SQL storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for AttemptStatus {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "success" => Ok(Self::Success),
            "failed" => Ok(Self::Failed),
            other => Err(AutopressError::validation(format!(
                "unknown attempt status '{other}'"
            ))),
        }
    }
}

/// One row of the append-only publish attempt log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttempt {
    pub article_id: ArticleId,
    pub attempt_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_post_id: Option<String>,
    pub status: AttemptStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub attempted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Attempt counts across all articles.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct AttemptStatistics {
    pub pending: u64,
    pub success: u64,
    pub failed: u64,
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

/// What a job does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    ScrapeAndGenerate,
    PublishSweep,
    Cleanup,
}

impl JobKind {
    /// Return the string representation used in SQL storage and config.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScrapeAndGenerate => "scrape-and-generate",
            Self::PublishSweep => "publish-sweep",
            Self::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "scrape-and-generate" => Ok(Self::ScrapeAndGenerate),
            "publish-sweep" => Ok(Self::PublishSweep),
            "cleanup" => Ok(Self::Cleanup),
            other => Err(AutopressError::validation(format!("unknown job kind '{other}'"))),
        }
    }
}

/// Overall result of one job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Success,
    Failure,
    Partial,
    /// A scheduled tick found the job still running.
    Skipped,
}

impl RunOutcome {
    /// Return the string representation used in SQL storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Partial => "partial",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for RunOutcome {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "partial" => Ok(Self::Partial),
            "skipped" => Ok(Self::Skipped),
            other => Err(AutopressError::validation(format!(
                "unknown run outcome '{other}'"
            ))),
        }
    }
}

/// What started a job execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Schedule,
    Manual,
}

impl RunTrigger {
    /// Return the string representation used in SQL storage.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Schedule => "schedule",
            Self::Manual => "manual",
        }
    }
}

impl FromStr for RunTrigger {
    type Err = AutopressError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "schedule" => Ok(Self::Schedule),
            "manual" => Ok(Self::Manual),
            other => Err(AutopressError::validation(format!(
                "unknown run trigger '{other}'"
            ))),
        }
    }
}

/// A registered job and its execution bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub job_id: String,
    pub kind: JobKind,
    pub schedule: Schedule,
    pub enabled: bool,
    pub running: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_result: Option<RunOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run_at: Option<DateTime<Utc>>,
}

impl JobDefinition {
    /// A fresh, enabled, idle job definition.
    pub fn new(job_id: impl Into<String>, kind: JobKind, schedule: Schedule) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            schedule,
            enabled: true,
            running: false,
            run_started_at: None,
            last_run_at: None,
            last_result: None,
            next_run_at: None,
        }
    }
}

/// Named counters a run accumulates. Which ones move depends on the job kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunCounters {
    pub new: u64,
    pub changed: u64,
    pub unchanged: u64,
    pub generated: u64,
    pub degraded: u64,
    pub submitted: u64,
    pub auto_approved: u64,
    pub duplicates: u64,
    pub published: u64,
    pub retried: u64,
    pub publish_failed: u64,
    pub purged_fingerprints: u64,
    pub purged_articles: u64,
    pub purged_runs: u64,
    pub recovered: u64,
}

/// Summary of one job execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub job_id: String,
    pub kind: JobKind,
    pub outcome: RunOutcome,
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    /// The run stopped early at a cancellation checkpoint.
    pub cancelled: bool,
    pub counters: RunCounters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResult {
    /// An empty result for a run starting now.
    pub fn start(job_id: impl Into<String>, kind: JobKind, started_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job_id.into(),
            kind,
            outcome: RunOutcome::Success,
            processed: 0,
            succeeded: 0,
            failed: 0,
            skipped: 0,
            cancelled: false,
            counters: RunCounters::default(),
            started_at,
            finished_at: started_at,
            error: None,
        }
    }

    /// Stamp the finish time and derive the outcome from the tallies.
    pub fn finish(mut self, finished_at: DateTime<Utc>) -> Self {
        self.finished_at = finished_at;
        self.outcome = if self.error.is_some() && self.succeeded == 0 {
            RunOutcome::Failure
        } else if self.failed == 0 && !self.cancelled && self.error.is_none() {
            RunOutcome::Success
        } else if self.succeeded == 0 && self.failed > 0 {
            RunOutcome::Failure
        } else {
            RunOutcome::Partial
        };
        self
    }

    /// Record an error that stopped the run before all units were processed.
    pub fn abort(mut self, error: impl fmt::Display, finished_at: DateTime<Utc>) -> Self {
        self.error = Some(error.to_string());
        self.finish(finished_at)
    }
}

/// One row of a job's run history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub run_id: String,
    pub trigger: RunTrigger,
    #[serde(flatten)]
    pub result: RunResult,
}

/// A job occurrence inside a look-ahead window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRun {
    pub job_id: String,
    pub at: DateTime<Utc>,
}

/// Read-only projection of the scheduler for status surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStatus {
    pub jobs: Vec<JobDefinition>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn article_id_roundtrip() {
        let id = ArticleId::new();
        let parsed: ArticleId = id.to_string().parse().expect("parse ArticleId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn fingerprint_classification() {
        assert_eq!(FingerprintStatus::classify(None, "h1"), FingerprintStatus::New);
        assert_eq!(
            FingerprintStatus::classify(Some("h1"), "h1"),
            FingerprintStatus::Unchanged
        );
        assert_eq!(
            FingerprintStatus::classify(Some("h1"), "h2"),
            FingerprintStatus::Changed
        );
    }

    #[test]
    fn lifecycle_edges() {
        use ArticleState::*;
        assert!(Generated.can_transition_to(PendingReview));
        assert!(PendingReview.can_transition_to(Approved));
        assert!(PendingReview.can_transition_to(Rejected));
        assert!(Approved.can_transition_to(Publishing));
        assert!(Publishing.can_transition_to(Approved));
        assert!(!Generated.can_transition_to(Approved));
        assert!(!Approved.can_transition_to(Published));
        for terminal in [Rejected, Published, PublishFailed] {
            assert!(terminal.is_terminal());
            for next in ArticleState::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn state_string_roundtrip() {
        for state in ArticleState::ALL {
            let parsed: ArticleState = state.as_str().parse().expect("parse state");
            assert_eq!(parsed, state);
            let json = serde_json::to_string(&state).expect("serialize");
            assert_eq!(json, format!("\"{}\"", state.as_str()));
        }
        assert!("archived".parse::<ArticleState>().is_err());
    }

    #[test]
    fn failure_kind_transience() {
        assert!(FailureKind::Timeout.is_transient());
        assert!(FailureKind::RateLimited.is_transient());
        assert!(FailureKind::ServerError.is_transient());
        assert!(!FailureKind::AuthRejected.is_transient());
        assert!(!FailureKind::ValidationRejected.is_transient());
        assert!(!FailureKind::RollbackIncomplete.is_transient());
        assert_eq!(
            "rollback_incomplete".parse::<FailureKind>().unwrap(),
            FailureKind::RollbackIncomplete
        );
    }

    #[test]
    fn job_kind_uses_kebab_case() {
        let json = serde_json::to_string(&JobKind::ScrapeAndGenerate).expect("serialize");
        assert_eq!(json, "\"scrape-and-generate\"");
        assert_eq!(
            "publish-sweep".parse::<JobKind>().unwrap(),
            JobKind::PublishSweep
        );
    }

    #[test]
    fn run_outcome_derivation() {
        let t0 = Utc::now();
        let mut all_ok = RunResult::start("j", JobKind::PublishSweep, t0);
        all_ok.processed = 2;
        all_ok.succeeded = 2;
        assert_eq!(all_ok.finish(t0).outcome, RunOutcome::Success);

        let mut mixed = RunResult::start("j", JobKind::PublishSweep, t0);
        mixed.processed = 3;
        mixed.succeeded = 2;
        mixed.failed = 1;
        assert_eq!(mixed.finish(t0).outcome, RunOutcome::Partial);

        let mut none_ok = RunResult::start("j", JobKind::PublishSweep, t0);
        none_ok.processed = 1;
        none_ok.failed = 1;
        assert_eq!(none_ok.finish(t0).outcome, RunOutcome::Failure);

        let mut cancelled = RunResult::start("j", JobKind::PublishSweep, t0);
        cancelled.succeeded = 1;
        cancelled.cancelled = true;
        assert_eq!(cancelled.finish(t0).outcome, RunOutcome::Partial);

        let aborted = RunResult::start("j", JobKind::ScrapeAndGenerate, t0).abort("store down", t0);
        assert_eq!(aborted.outcome, RunOutcome::Failure);
        assert_eq!(aborted.error.as_deref(), Some("store down"));
    }
}
