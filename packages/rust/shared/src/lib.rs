//! Shared types, error model, schedules and configuration for autopress.
//!
//! This crate is the foundation depended on by all other autopress crates.
//! It provides:
//! - [`AutopressError`], the unified error type
//! - Domain types ([`Article`], [`ArticleState`], [`Fingerprint`], [`JobDefinition`], ...)
//! - [`Schedule`] evaluation
//! - Configuration ([`AppConfig`], runtime configs, config loading)

pub mod config;
pub mod error;
pub mod schedule;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BridgeSection, DefaultsConfig, DuplicatePolicy, FeedSection, JobEntry,
    PipelineConfig, PipelineSection, PublishPolicy, PublishSection, QuotaFallback,
    RetentionPolicy, RetentionSection, SchedulerConfig, SchedulerSection, WordPressSection,
    config_dir, config_file_path, init_config, load_config, load_config_from, wordpress_password,
};
pub use error::{AutopressError, Result};
pub use schedule::{Schedule, saturating_after, saturating_before};
pub use types::{
    Article, ArticleId, ArticleState, ArticleStatistics, AttemptStatistics, AttemptStatus,
    ContentFields, ContentPayload, FailureKind, Fingerprint, FingerprintAuditEntry,
    FingerprintStatus, HistoryEntry, JobDefinition, JobKind, JobRun, ObservationResult,
    PublishAttempt, RunCounters, RunOutcome, RunResult, RunTrigger, ScheduledRun, SchedulerStatus,
};
