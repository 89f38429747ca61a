//! Application configuration for autopress.
//!
//! User config lives at `~/.autopress/autopress.toml`.
//! CLI flags override config file values, which override defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Weekday;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AutopressError, Result};
use crate::schedule::Schedule;
use crate::types::{JobDefinition, JobKind};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "autopress.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".autopress";

/// Longest retention window accepted for any purge (about a century).
const MAX_RETENTION_DAYS: u32 = 36_500;

const MAX_STALE_PUBLISHING_HOURS: u32 = MAX_RETENTION_DAYS * 24;

/// A running flag older than this is always considered abandoned.
const MAX_STALE_RUNNING_SECS: u64 = 30 * 24 * 3600;

// ---------------------------------------------------------------------------
// Config structs (matching autopress.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub defaults: DefaultsConfig,

    #[serde(default)]
    pub pipeline: PipelineSection,

    #[serde(default)]
    pub publish: PublishSection,

    #[serde(default)]
    pub retention: RetentionSection,

    #[serde(default)]
    pub scheduler: SchedulerSection,

    #[serde(default)]
    pub feed: FeedSection,

    #[serde(default)]
    pub bridge: BridgeSection,

    #[serde(default)]
    pub wordpress: WordPressSection,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Directory holding the database. A leading `~/` expands to the home dir.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Database file name inside `data_dir`.
    #[serde(default = "default_db_file")]
    pub db_file: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            db_file: default_db_file(),
        }
    }
}

fn default_data_dir() -> String {
    "~/.autopress".into()
}
fn default_db_file() -> String {
    "autopress.db".into()
}

/// What to do for an entity when the generator reports an exhausted quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaFallback {
    /// Submit a deterministic degraded payload flagged for review.
    #[default]
    Simulate,
    /// Leave the entity for a later run.
    Skip,
}

/// How `submit_for_review` treats an entity that already has an active article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Refuse the new submission.
    #[default]
    Reject,
    /// Reject an earlier article still in review and submit the new one.
    Supersede,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Category listing URLs handed to the scraper.
    #[serde(default)]
    pub category_urls: Vec<String>,

    /// Entities processed concurrently within one run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    #[serde(default)]
    pub quota_fallback: QuotaFallback,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Approve submissions automatically when their score is high enough.
    #[serde(default)]
    pub auto_approve: bool,

    #[serde(default = "default_auto_approve_min_score")]
    pub auto_approve_min_score: f64,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            category_urls: Vec::new(),
            concurrency: default_concurrency(),
            quota_fallback: QuotaFallback::default(),
            duplicate_policy: DuplicatePolicy::default(),
            auto_approve: false,
            auto_approve_min_score: default_auto_approve_min_score(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_auto_approve_min_score() -> f64 {
    80.0
}

/// `[publish]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSection {
    /// Attempts allowed per article before it is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,

    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: u64,

    /// Articles published concurrently within one sweep.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_secs: default_base_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_base_delay_secs() -> u64 {
    60
}
fn default_max_delay_secs() -> u64 {
    3600
}

/// `[retention]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionSection {
    #[serde(default = "default_ninety_days")]
    pub fingerprint_days: u32,

    /// Age after which rejected and published articles are purged.
    #[serde(default = "default_ninety_days")]
    pub article_days: u32,

    #[serde(default = "default_run_history_days")]
    pub run_history_days: u32,

    /// Articles stuck in `publishing` longer than this are marked failed.
    #[serde(default = "default_stale_publishing_hours")]
    pub stale_publishing_hours: u32,
}

impl Default for RetentionSection {
    fn default() -> Self {
        Self {
            fingerprint_days: default_ninety_days(),
            article_days: default_ninety_days(),
            run_history_days: default_run_history_days(),
            stale_publishing_hours: default_stale_publishing_hours(),
        }
    }
}

fn default_ninety_days() -> u32 {
    90
}
fn default_run_history_days() -> u32 {
    30
}
fn default_stale_publishing_hours() -> u32 {
    6
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Jobs that may execute at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// A running flag older than this is force-cleared.
    #[serde(default = "default_stale_running_secs")]
    pub stale_running_secs: u64,

    #[serde(default = "default_jobs")]
    pub jobs: Vec<JobEntry>,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            workers: default_workers(),
            stale_running_secs: default_stale_running_secs(),
            jobs: default_jobs(),
        }
    }
}

fn default_poll_interval_secs() -> u64 {
    30
}
fn default_workers() -> usize {
    2
}
fn default_stale_running_secs() -> u64 {
    2 * 60 * 60
}
fn default_true() -> bool {
    true
}

fn default_jobs() -> Vec<JobEntry> {
    vec![
        JobEntry {
            id: "weekly_generation".into(),
            kind: JobKind::ScrapeAndGenerate,
            schedule: Schedule::Weekly {
                weekday: Weekday::Sun,
                hour: 10,
                minute: 0,
            },
            enabled: true,
        },
        JobEntry {
            id: "publish_sweep".into(),
            kind: JobKind::PublishSweep,
            schedule: Schedule::Interval { every_secs: 3600 },
            enabled: true,
        },
        JobEntry {
            id: "monthly_cleanup".into(),
            kind: JobKind::Cleanup,
            schedule: Schedule::MonthlyFirst {
                weekday: Weekday::Sun,
                hour: 2,
                minute: 0,
            },
            enabled: true,
        },
    ]
}

/// `[[scheduler.jobs]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEntry {
    pub id: String,
    pub kind: JobKind,
    pub schedule: Schedule,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl From<&JobEntry> for JobDefinition {
    fn from(entry: &JobEntry) -> Self {
        let mut job = JobDefinition::new(entry.id.clone(), entry.kind, entry.schedule.clone());
        job.enabled = entry.enabled;
        job
    }
}

/// `[feed]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSection {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    concat!("autopress/", env!("CARGO_PKG_VERSION")).into()
}

/// `[bridge]` section: the external generation script.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeSection {
    /// Interpreter or executable to launch.
    #[serde(default = "default_bridge_command")]
    pub command: String,

    /// Arguments passed to `command`, typically the script path.
    #[serde(default = "default_bridge_args")]
    pub args: Vec<String>,

    /// Seconds to wait for one generation response.
    #[serde(default = "default_bridge_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BridgeSection {
    fn default() -> Self {
        Self {
            command: default_bridge_command(),
            args: default_bridge_args(),
            timeout_secs: default_bridge_timeout_secs(),
        }
    }
}

fn default_bridge_command() -> String {
    "python3".into()
}
fn default_bridge_args() -> Vec<String> {
    vec!["generator_bridge.py".into()]
}
fn default_bridge_timeout_secs() -> u64 {
    120
}

/// `[wordpress]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WordPressSection {
    /// Site root, e.g. `https://blog.example.com`.
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub username: String,

    /// Name of the env var holding the application password (never store it here).
    #[serde(default = "default_password_env")]
    pub password_env: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for WordPressSection {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            username: String::new(),
            password_env: default_password_env(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_password_env() -> String {
    "AUTOPRESS_WP_PASSWORD".into()
}

impl AppConfig {
    /// Check URLs, schedules and numeric bounds.
    pub fn validate(&self) -> Result<()> {
        for raw in &self.pipeline.category_urls {
            Url::parse(raw).map_err(|e| {
                AutopressError::config(format!("invalid category url '{raw}': {e}"))
            })?;
        }
        if !self.wordpress.base_url.is_empty() {
            Url::parse(&self.wordpress.base_url).map_err(|e| {
                AutopressError::config(format!(
                    "invalid wordpress base_url '{}': {e}",
                    self.wordpress.base_url
                ))
            })?;
        }
        if self.pipeline.concurrency == 0 || self.publish.concurrency == 0 {
            return Err(AutopressError::config("concurrency must be at least 1"));
        }
        if self.scheduler.workers == 0 {
            return Err(AutopressError::config("scheduler.workers must be at least 1"));
        }
        if self.publish.max_retries == 0 {
            return Err(AutopressError::config("publish.max_retries must be at least 1"));
        }
        if self.publish.base_delay_secs > self.publish.max_delay_secs {
            return Err(AutopressError::config(
                "publish.base_delay_secs must not exceed max_delay_secs",
            ));
        }
        let r = &self.retention;
        for (name, days) in [
            ("fingerprint_days", r.fingerprint_days),
            ("article_days", r.article_days),
            ("run_history_days", r.run_history_days),
        ] {
            if days > MAX_RETENTION_DAYS {
                return Err(AutopressError::config(format!(
                    "retention.{name} must be at most {MAX_RETENTION_DAYS}"
                )));
            }
        }
        if r.stale_publishing_hours > MAX_STALE_PUBLISHING_HOURS {
            return Err(AutopressError::config(format!(
                "retention.stale_publishing_hours must be at most {MAX_STALE_PUBLISHING_HOURS}"
            )));
        }
        if !(1..=MAX_STALE_RUNNING_SECS).contains(&self.scheduler.stale_running_secs) {
            return Err(AutopressError::config(format!(
                "scheduler.stale_running_secs must be between 1 and {MAX_STALE_RUNNING_SECS}"
            )));
        }

        let mut seen = HashSet::new();
        for job in &self.scheduler.jobs {
            if !seen.insert(job.id.as_str()) {
                return Err(AutopressError::config(format!("duplicate job id '{}'", job.id)));
            }
            job.schedule.validate().map_err(|e| {
                AutopressError::config(format!("job '{}': {e}", job.id))
            })?;
        }
        Ok(())
    }

    /// Full path to the database file, with `~/` expanded.
    pub fn database_path(&self) -> Result<PathBuf> {
        Ok(expand_home(&self.defaults.data_dir)?.join(&self.defaults.db_file))
    }

    /// Job definitions declared in the config.
    pub fn job_definitions(&self) -> Vec<JobDefinition> {
        self.scheduler.jobs.iter().map(JobDefinition::from).collect()
    }
}

fn expand_home(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| AutopressError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None if raw == "~" => {
            dirs::home_dir().ok_or_else(|| AutopressError::config("could not determine home directory"))
        }
        None => Ok(PathBuf::from(raw)),
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (built from AppConfig)
// ---------------------------------------------------------------------------

/// Runtime settings for scrape-and-generate runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub category_urls: Vec<String>,
    pub concurrency: usize,
    pub quota_fallback: QuotaFallback,
    pub duplicate_policy: DuplicatePolicy,
    /// Minimum score for automatic approval; `None` disables it.
    pub auto_approve_min_score: Option<f64>,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            category_urls: p.category_urls.clone(),
            concurrency: p.concurrency.max(1),
            quota_fallback: p.quota_fallback,
            duplicate_policy: p.duplicate_policy,
            auto_approve_min_score: p.auto_approve.then_some(p.auto_approve_min_score),
        }
    }
}

/// Runtime retry/backoff settings for the publication coordinator.
#[derive(Debug, Clone)]
pub struct PublishPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub concurrency: usize,
}

impl Default for PublishPolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl PublishPolicy {
    /// Delay before the attempt following failed attempt `attempt` (1-based):
    /// `min(base * 2^(attempt-1), max)`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl From<&AppConfig> for PublishPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_retries: config.publish.max_retries.max(1),
            base_delay: Duration::from_secs(config.publish.base_delay_secs),
            max_delay: Duration::from_secs(config.publish.max_delay_secs),
            concurrency: config.publish.concurrency.max(1),
        }
    }
}

/// Runtime retention windows for the cleanup job.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub fingerprints: chrono::Duration,
    pub articles: chrono::Duration,
    pub run_history: chrono::Duration,
    pub stale_publishing: chrono::Duration,
}

impl From<&AppConfig> for RetentionPolicy {
    fn from(config: &AppConfig) -> Self {
        let r = &config.retention;
        Self {
            fingerprints: days(r.fingerprint_days),
            articles: days(r.article_days),
            run_history: days(r.run_history_days),
            stale_publishing: chrono::Duration::try_hours(i64::from(r.stale_publishing_hours))
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

fn days(n: u32) -> chrono::Duration {
    chrono::Duration::try_days(i64::from(n)).unwrap_or(chrono::Duration::MAX)
}

/// Runtime settings for the scheduler loop.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub workers: usize,
    pub stale_running: chrono::Duration,
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        let s = &config.scheduler;
        Self {
            poll_interval: Duration::from_secs(s.poll_interval_secs.max(1)),
            workers: s.workers.max(1),
            stale_running: i64::try_from(s.stale_running_secs)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .unwrap_or(chrono::Duration::MAX),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.autopress/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AutopressError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.autopress/autopress.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load and validate the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AutopressError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        AutopressError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AutopressError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AutopressError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AutopressError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the WordPress application password from the env var the config names.
pub fn wordpress_password(config: &AppConfig) -> Result<String> {
    let var_name = &config.wordpress.password_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(AutopressError::config(format!(
            "WordPress password not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_retries"));
        assert!(toml_str.contains("AUTOPRESS_WP_PASSWORD"));
        assert!(toml_str.contains("weekly_generation"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.publish.max_retries, 3);
        assert_eq!(parsed.scheduler.jobs.len(), 3);
        assert_eq!(parsed.pipeline.duplicate_policy, DuplicatePolicy::Reject);
        parsed.validate().expect("defaults are valid");
    }

    #[test]
    fn config_with_jobs() {
        let toml_str = r#"
[pipeline]
category_urls = ["https://shop.example.com/c/coffee"]
duplicate_policy = "supersede"
quota_fallback = "skip"

[[scheduler.jobs]]
id = "nightly"
kind = "scrape-and-generate"
schedule = { type = "daily", hour = 3, minute = 30 }

[[scheduler.jobs]]
id = "sweep"
kind = "publish-sweep"
enabled = false
schedule = { type = "interval", every_secs = 900 }
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        config.validate().expect("valid");
        assert_eq!(config.scheduler.jobs.len(), 2);
        assert_eq!(config.pipeline.duplicate_policy, DuplicatePolicy::Supersede);
        assert_eq!(config.pipeline.quota_fallback, QuotaFallback::Skip);

        let jobs = config.job_definitions();
        assert_eq!(jobs[0].job_id, "nightly");
        assert!(jobs[0].enabled);
        assert!(!jobs[1].enabled);
        assert_eq!(jobs[1].kind, JobKind::PublishSweep);
    }

    #[test]
    fn validation_catches_bad_values() {
        let mut config = AppConfig::default();
        config.pipeline.category_urls = vec!["not a url".into()];
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.jobs.push(config.scheduler.jobs[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate job id"));

        let mut config = AppConfig::default();
        config.publish.max_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_bounds_time_windows() {
        let mut config = AppConfig::default();
        config.retention.fingerprint_days = 200_000_000;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("retention.fingerprint_days"));

        let mut config = AppConfig::default();
        config.retention.stale_publishing_hours = u32::MAX;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.scheduler.stale_running_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("stale_running_secs"));

        let mut config = AppConfig::default();
        config.scheduler.stale_running_secs = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.retention.article_days = MAX_RETENTION_DAYS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn runtime_configs_saturate_unvalidated_windows() {
        let mut config = AppConfig::default();
        config.retention.fingerprint_days = u32::MAX;
        config.scheduler.stale_running_secs = u64::MAX;
        let retention = RetentionPolicy::from(&config);
        assert_eq!(retention.fingerprints, chrono::Duration::days(i64::from(u32::MAX)));
        let sched = SchedulerConfig::from(&config);
        assert_eq!(sched.stale_running, chrono::Duration::MAX);
    }

    #[test]
    fn publish_policy_backoff() {
        let policy = PublishPolicy {
            max_retries: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(200),
            concurrency: 1,
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(60));
        assert_eq!(policy.backoff(2), Duration::from_secs(120));
        assert_eq!(policy.backoff(3), Duration::from_secs(200));
        assert_eq!(policy.backoff(40), Duration::from_secs(200));
    }

    #[test]
    fn runtime_configs_from_app_config() {
        let mut app = AppConfig::default();
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.concurrency, 2);
        assert!(pipeline.auto_approve_min_score.is_none());

        app.pipeline.auto_approve = true;
        let pipeline = PipelineConfig::from(&app);
        assert_eq!(pipeline.auto_approve_min_score, Some(80.0));

        let sched = SchedulerConfig::from(&app);
        assert_eq!(sched.poll_interval, Duration::from_secs(30));
        assert_eq!(sched.stale_running, chrono::Duration::hours(2));

        let retention = RetentionPolicy::from(&app);
        assert_eq!(retention.fingerprints, chrono::Duration::days(90));
        assert_eq!(retention.run_history, chrono::Duration::days(30));
    }

    #[test]
    fn database_path_expands_home() {
        let mut config = AppConfig::default();
        config.defaults.data_dir = "/var/lib/autopress".into();
        assert_eq!(
            config.database_path().expect("path"),
            PathBuf::from("/var/lib/autopress/autopress.db")
        );
    }

    #[test]
    fn missing_password_env() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.wordpress.password_env = "AP_TEST_NONEXISTENT_PASSWORD_12345".into();
        let result = wordpress_password(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("password not found"));
    }
}
