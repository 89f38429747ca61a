//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use autopress_connectors::Connectors;
use autopress_core::pipeline::UnitOutcome;
use autopress_core::{
    ArticleLedger, JobRunner, RunObserver, Scheduler, pause_job, resume_job, scheduler_status,
    upcoming_runs,
};
use autopress_shared::{
    AppConfig, Article, ArticleId, ArticleState, ContentPayload, JobKind, PipelineConfig,
    RunResult, SchedulerConfig, init_config, load_config,
};
use autopress_storage::Storage;
use chrono::{DateTime, SecondsFormat, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// autopress: scrape listings, generate articles, publish after review.
#[derive(Parser)]
#[command(
    name = "autopress",
    version,
    about = "Scheduled scrape, generate and publish pipeline with a review queue.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the scheduler until interrupted.
    Daemon,

    /// Run one job now, outside its schedule.
    Run {
        /// Job id from the config.
        job: String,
    },

    /// Run the configured cleanup job now.
    Cleanup,

    /// Inspect and control job definitions.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Work the review queue.
    Review {
        #[command(subcommand)]
        action: ReviewAction,
    },

    /// Inspect articles.
    Articles {
        #[command(subcommand)]
        action: ArticlesAction,
    },

    /// Show the run history of a job, newest first.
    History {
        /// Job id.
        job: String,

        /// Maximum number of runs to show.
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },

    /// Show every job with its running flag and next fire time.
    Status,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Job subcommands.
#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// List registered jobs.
    List,
    /// Stop scheduled runs of a job.
    Pause { job: String },
    /// Re-enable a paused job.
    Resume { job: String },
    /// Show fire times within the next few hours.
    Next {
        #[arg(long, default_value = "24")]
        hours: u32,
    },
}

/// Review subcommands.
#[derive(Subcommand)]
pub(crate) enum ReviewAction {
    /// List articles awaiting review, oldest first.
    List {
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },
    /// Approve an article for publishing.
    Approve {
        id: String,
        #[arg(long)]
        note: Option<String>,
        /// Name recorded in the article history.
        #[arg(long, env = "AUTOPRESS_ACTOR", default_value = "cli")]
        actor: String,
    },
    /// Reject an article.
    Reject {
        id: String,
        #[arg(long)]
        note: Option<String>,
        #[arg(long, env = "AUTOPRESS_ACTOR", default_value = "cli")]
        actor: String,
    },
    /// Replace the content of an article awaiting review.
    Revise {
        id: String,
        /// JSON file holding the new content payload.
        #[arg(long)]
        file: PathBuf,
        /// New SEO score; the old one is kept when omitted.
        #[arg(long)]
        score: Option<f64>,
    },
}

/// Article subcommands.
#[derive(Subcommand)]
pub(crate) enum ArticlesAction {
    /// List articles, optionally in one state.
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },
    /// Print an article with its history and publish attempts as JSON.
    Show { id: String },
    /// Article and publish attempt counts.
    Stats,
    /// Articles an operator has to look at.
    Attention,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "autopress=info",
        1 => "autopress=debug",
        _ => "autopress=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Daemon => cmd_daemon().await,
        Command::Run { job } => cmd_run(&job).await,
        Command::Cleanup => cmd_cleanup().await,
        Command::Jobs { action } => match action {
            JobsAction::List => cmd_jobs_list().await,
            JobsAction::Pause { job } => cmd_jobs_pause(&job).await,
            JobsAction::Resume { job } => cmd_jobs_resume(&job).await,
            JobsAction::Next { hours } => cmd_jobs_next(hours).await,
        },
        Command::Review { action } => match action {
            ReviewAction::List { limit } => cmd_review_list(limit).await,
            ReviewAction::Approve { id, note, actor } => {
                cmd_review_decide(&id, true, note.as_deref(), &actor).await
            }
            ReviewAction::Reject { id, note, actor } => {
                cmd_review_decide(&id, false, note.as_deref(), &actor).await
            }
            ReviewAction::Revise { id, file, score } => cmd_review_revise(&id, &file, score).await,
        },
        Command::Articles { action } => match action {
            ArticlesAction::List { state, limit } => cmd_articles_list(state.as_deref(), limit).await,
            ArticlesAction::Show { id } => cmd_articles_show(&id).await,
            ArticlesAction::Stats => cmd_articles_stats().await,
            ArticlesAction::Attention => cmd_articles_attention().await,
        },
        Command::History { job, limit } => cmd_history(&job, limit).await,
        Command::Status => cmd_status().await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Loaded config plus the read-write store.
async fn open_store() -> Result<(AppConfig, Arc<Storage>)> {
    let config = load_config()?;
    config.validate()?;
    let storage = Storage::open(&config.database_path()?).await?;
    Ok((config, Arc::new(storage)))
}

/// Read-only store for inspection commands. Fails when no database exists.
async fn open_store_readonly() -> Result<(AppConfig, Storage)> {
    let config = load_config()?;
    let storage = Storage::open_readonly(&config.database_path()?).await?;
    Ok((config, storage))
}

fn ledger(config: &AppConfig, storage: Arc<Storage>) -> ArticleLedger {
    ArticleLedger::new(storage, PipelineConfig::from(config).duplicate_policy)
}

/// Build the scheduler with every connector and register the configured jobs.
async fn build_scheduler(
    config: &AppConfig,
    storage: Arc<Storage>,
    observer: Option<Arc<dyn RunObserver>>,
) -> Result<(Arc<Scheduler>, Connectors)> {
    let connectors = Connectors::from_config(config)?;
    let mut runner = JobRunner::new(
        storage.clone(),
        connectors.scraper.clone(),
        connectors.generator.clone(),
        connectors.publisher.clone(),
        config,
    );
    if let Some(observer) = observer {
        runner = runner.with_observer(observer);
    }

    let scheduler = Arc::new(Scheduler::new(
        storage,
        Arc::new(runner),
        SchedulerConfig::from(config),
    ));
    for job in config.job_definitions() {
        scheduler.register(job).await?;
    }
    Ok((scheduler, connectors))
}

/// Cancel the scheduler on ctrl-c.
fn shutdown_on_ctrl_c(scheduler: &Arc<Scheduler>) {
    let scheduler = Arc::clone(scheduler);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            scheduler.shutdown();
        }
    });
}

fn parse_article_id(raw: &str) -> Result<ArticleId> {
    raw.parse()
        .map_err(|e| eyre!("invalid article id '{raw}': {e}"))
}

fn fmt_time(at: Option<DateTime<Utc>>) -> String {
    at.map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string())
}

// ---------------------------------------------------------------------------
// Execution commands
// ---------------------------------------------------------------------------

async fn cmd_daemon() -> Result<()> {
    let (config, storage) = open_store().await?;
    let (scheduler, connectors) = build_scheduler(&config, storage, None).await?;

    let jobs = config.job_definitions();
    info!(jobs = jobs.len(), "daemon starting");
    if jobs.is_empty() {
        println!("No jobs configured. Add [[scheduler.jobs]] entries to the config.");
    }

    shutdown_on_ctrl_c(&scheduler);
    scheduler.clone().run().await?;
    connectors.shutdown().await;
    info!("daemon stopped");
    Ok(())
}

async fn cmd_run(job_id: &str) -> Result<()> {
    let (config, storage) = open_store().await?;
    let progress: Arc<dyn RunObserver> = Arc::new(CliProgress::new());
    let (scheduler, connectors) = build_scheduler(&config, storage, Some(progress)).await?;

    shutdown_on_ctrl_c(&scheduler);
    let result = scheduler.trigger(job_id).await;
    connectors.shutdown().await;
    let result = result?;

    print_run_summary(&result);
    Ok(())
}

async fn cmd_cleanup() -> Result<()> {
    let config = load_config()?;
    let job = config
        .job_definitions()
        .into_iter()
        .find(|job| job.kind == JobKind::Cleanup)
        .ok_or_else(|| eyre!("no cleanup job configured"))?;
    cmd_run(&job.job_id).await
}

fn print_run_summary(result: &RunResult) {
    let c = &result.counters;
    println!();
    println!("  Job:       {} ({})", result.job_id, result.kind);
    println!("  Outcome:   {}", result.outcome);
    println!(
        "  Units:     {} processed, {} succeeded, {} failed, {} skipped",
        result.processed, result.succeeded, result.failed, result.skipped
    );
    match result.kind {
        JobKind::ScrapeAndGenerate => {
            println!(
                "  Entities:  {} new, {} changed, {} unchanged",
                c.new, c.changed, c.unchanged
            );
            println!(
                "  Articles:  {} generated ({} degraded), {} submitted, {} auto-approved, {} duplicates",
                c.generated, c.degraded, c.submitted, c.auto_approved, c.duplicates
            );
        }
        JobKind::PublishSweep => {
            println!(
                "  Publish:   {} published, {} retrying, {} failed",
                c.published, c.retried, c.publish_failed
            );
        }
        JobKind::Cleanup => {
            println!(
                "  Purged:    {} fingerprints, {} articles, {} runs; {} recovered",
                c.purged_fingerprints, c.purged_articles, c.purged_runs, c.recovered
            );
        }
    }
    if result.cancelled {
        println!("  Cancelled before all units ran.");
    }
    if let Some(error) = &result.error {
        println!("  Error:     {error}");
    }
    println!(
        "  Time:      {:.1}s",
        (result.finished_at - result.started_at).num_milliseconds() as f64 / 1000.0
    );
    println!();
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// Run observer drawing an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    done: AtomicU64,
    failed: AtomicU64,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            done: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }
}

impl RunObserver for CliProgress {
    fn run_started(&self, job_id: &str, kind: JobKind) {
        self.spinner.set_message(format!("Running {job_id} ({kind})"));
    }

    fn unit_done(&self, _job_id: &str, unit: &str, outcome: UnitOutcome) {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        let failed = if outcome == UnitOutcome::Failed {
            self.failed.fetch_add(1, Ordering::Relaxed) + 1
        } else {
            self.failed.load(Ordering::Relaxed)
        };
        self.spinner
            .set_message(format!("[{done} done, {failed} failed] {unit}"));
    }

    fn run_finished(&self, _result: &RunResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

async fn cmd_jobs_list() -> Result<()> {
    let (_, storage) = open_store_readonly().await?;
    let jobs = storage.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs registered. Start the daemon or run a job to register the config.");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{:<20} {:<20} {:<8} {}",
            job.job_id,
            job.kind,
            if job.enabled { "enabled" } else { "paused" },
            job.schedule
        );
    }
    Ok(())
}

async fn cmd_jobs_pause(job_id: &str) -> Result<()> {
    let (_, storage) = open_store().await?;
    pause_job(&storage, job_id).await?;
    println!("Paused {job_id}");
    Ok(())
}

async fn cmd_jobs_resume(job_id: &str) -> Result<()> {
    let (_, storage) = open_store().await?;
    resume_job(&storage, job_id).await?;
    let next = storage.get_job(job_id).await?.and_then(|job| job.next_run_at);
    println!("Resumed {job_id}, next run {}", fmt_time(next));
    Ok(())
}

async fn cmd_jobs_next(hours: u32) -> Result<()> {
    let (_, storage) = open_store_readonly().await?;
    let runs = upcoming_runs(&storage, chrono::Duration::hours(i64::from(hours))).await?;
    if runs.is_empty() {
        println!("Nothing scheduled in the next {hours}h.");
    }
    for run in runs {
        println!("{}  {}", fmt_time(Some(run.at)), run.job_id);
    }
    Ok(())
}

async fn cmd_status() -> Result<()> {
    let (_, storage) = open_store_readonly().await?;
    let status = scheduler_status(&storage).await?;
    println!("Status at {}", fmt_time(Some(status.generated_at)));
    for job in &status.jobs {
        let state = match (job.running, job.enabled) {
            (true, _) => format!("running since {}", fmt_time(job.run_started_at)),
            (false, true) => "idle".to_string(),
            (false, false) => "paused".to_string(),
        };
        let last = job
            .last_result
            .map(|outcome| format!("{outcome} at {}", fmt_time(job.last_run_at)))
            .unwrap_or_else(|| "never run".to_string());
        println!("  {} ({})", job.job_id, job.kind);
        println!("    state: {state}");
        println!("    last:  {last}");
        println!("    next:  {}", fmt_time(job.next_run_at));
    }
    Ok(())
}

async fn cmd_history(job_id: &str, limit: u32) -> Result<()> {
    let (_, storage) = open_store_readonly().await?;
    let runs = storage.list_job_runs(job_id, limit).await?;
    if runs.is_empty() {
        println!("No runs recorded for {job_id}.");
    }
    for run in runs {
        let r = &run.result;
        print!(
            "{}  {:<9} {:<8} processed={} ok={} failed={} skipped={}",
            fmt_time(Some(r.started_at)),
            run.trigger.as_str(),
            r.outcome,
            r.processed,
            r.succeeded,
            r.failed,
            r.skipped
        );
        if let Some(error) = &r.error {
            print!("  error: {error}");
        }
        println!();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Review
// ---------------------------------------------------------------------------

fn print_article_line(article: &Article) {
    println!(
        "{}  {:<15} {:>5.1}  {}  {}{}",
        article.article_id,
        article.state,
        article.seo_score,
        article.entity_key,
        article.payload.title,
        if article.payload.degraded { " [degraded]" } else { "" }
    );
}

async fn cmd_review_list(limit: u32) -> Result<()> {
    let (config, storage) = open_store_readonly().await?;
    let articles = ledger(&config, Arc::new(storage)).pending_review(limit).await?;
    if articles.is_empty() {
        println!("Review queue is empty.");
    }
    for article in &articles {
        print_article_line(article);
    }
    Ok(())
}

async fn cmd_review_decide(id: &str, approve: bool, note: Option<&str>, actor: &str) -> Result<()> {
    let article_id = parse_article_id(id)?;
    let (config, storage) = open_store().await?;
    let ledger = ledger(&config, storage);
    let article = if approve {
        ledger.approve(&article_id, actor, note).await?
    } else {
        ledger.reject(&article_id, actor, note).await?
    };
    println!("{} is now {}", article.article_id, article.state);
    Ok(())
}

async fn cmd_review_revise(id: &str, file: &Path, score: Option<f64>) -> Result<()> {
    let article_id = parse_article_id(id)?;
    let raw = std::fs::read_to_string(file)
        .wrap_err_with(|| format!("failed to read {}", file.display()))?;
    let payload: ContentPayload = serde_json::from_str(&raw)
        .wrap_err_with(|| format!("{} is not a valid content payload", file.display()))?;

    let (config, storage) = open_store().await?;
    let article = ledger(&config, storage)
        .revise(&article_id, &payload, score)
        .await?;
    println!("{} revised, version {}", article.article_id, article.version);
    Ok(())
}

// ---------------------------------------------------------------------------
// Articles
// ---------------------------------------------------------------------------

async fn cmd_articles_list(state: Option<&str>, limit: u32) -> Result<()> {
    let state = state.map(str::parse::<ArticleState>).transpose()?;
    let (config, storage) = open_store_readonly().await?;
    for article in ledger(&config, Arc::new(storage)).list(state, limit).await? {
        print_article_line(&article);
    }
    Ok(())
}

async fn cmd_articles_show(id: &str) -> Result<()> {
    let article_id = parse_article_id(id)?;
    let (config, storage) = open_store_readonly().await?;
    let storage = Arc::new(storage);
    let ledger = ledger(&config, storage.clone());

    let article = ledger
        .get(&article_id)
        .await?
        .ok_or_else(|| eyre!("article {article_id} not found"))?;
    let history = ledger.history(&article_id).await?;
    let attempts = storage.list_attempts(&article_id).await?;

    let view = serde_json::json!({
        "article": article,
        "history": history,
        "attempts": attempts,
    });
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn cmd_articles_stats() -> Result<()> {
    let (config, storage) = open_store_readonly().await?;
    let storage = Arc::new(storage);
    let stats = ledger(&config, storage.clone()).statistics().await?;
    let attempts = storage.attempt_statistics().await?;

    println!();
    println!("  Articles:          {}", stats.total);
    for state in ArticleState::ALL {
        println!("    {:<16} {}", state.as_str(), stats.count(state));
    }
    println!("  Created (7 days):  {}", stats.created_last_7_days);
    println!("  Needing attention: {}", stats.needing_attention);
    println!(
        "  Publish attempts:  {} ok, {} failed, {} pending",
        attempts.success, attempts.failed, attempts.pending
    );
    println!();
    Ok(())
}

async fn cmd_articles_attention() -> Result<()> {
    let (config, storage) = open_store_readonly().await?;
    let articles = ledger(&config, Arc::new(storage)).needing_attention().await?;
    if articles.is_empty() {
        println!("Nothing needs attention.");
    }
    for article in &articles {
        print_article_line(article);
        let error = article
            .last_error_kind
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "-".to_string());
        let post = article.external_post_id.as_deref().unwrap_or("-");
        println!("    error: {error}, post: {post}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
