//! Job scheduler: registration, single-flight execution and the poll loop.
//!
//! Every execution, scheduled or manual, claims the job's running flag with
//! a fresh token before it starts and releases it with the same token when
//! it ends. A tick that finds the flag held records a skipped run; a manual
//! trigger fails with `AlreadyRunning`. Missed fire times are not caught up:
//! `next_run_at` always comes from the schedule and the current time.
//!
//! A scheduled run may wait for a worker after its claim; the flag's start
//! time is re-stamped when the run begins. A run that panics still releases
//! its flag and is recorded as a failure.

use std::sync::Arc;

use autopress_shared::{
    AutopressError, JobDefinition, JobRun, Result, RunOutcome, RunResult, RunTrigger,
    ScheduledRun, SchedulerConfig, SchedulerStatus, saturating_after, saturating_before,
};
use autopress_storage::{ClaimOutcome, Storage};
use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::pipeline::JobRunner;

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub dispatched: Vec<String>,
    pub skipped: Vec<String>,
}

/// Owns job definitions and sequences their runs.
pub struct Scheduler {
    storage: Arc<Storage>,
    runner: Arc<JobRunner>,
    config: SchedulerConfig,
    workers: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(storage: Arc<Storage>, runner: Arc<JobRunner>, config: SchedulerConfig) -> Self {
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));
        Self {
            storage,
            runner,
            config,
            workers,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Token cancelled by [`shutdown`](Self::shutdown). Runs in progress see
    /// it at their next unit boundary.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    /// Register or update a job. A stored pause survives re-registration.
    pub async fn register(&self, mut job: JobDefinition) -> Result<JobDefinition> {
        job.schedule.validate()?;
        let now = Utc::now();
        job.next_run_at = job.schedule.next_after(now);
        let stored = self.storage.upsert_job(&job, now).await?;
        debug!(job_id = %stored.job_id, schedule = %stored.schedule, next_run_at = ?stored.next_run_at, "job registered");
        Ok(stored)
    }

    pub async fn pause(&self, job_id: &str) -> Result<()> {
        pause_job(&self.storage, job_id).await
    }

    pub async fn resume(&self, job_id: &str) -> Result<()> {
        resume_job(&self.storage, job_id).await
    }

    async fn job(&self, job_id: &str) -> Result<JobDefinition> {
        load_job(&self.storage, job_id).await
    }

    // -----------------------------------------------------------------------
    // Execution
    // -----------------------------------------------------------------------

    /// Run a job now, outside its schedule. Paused jobs can still be
    /// triggered.
    pub async fn trigger(&self, job_id: &str) -> Result<RunResult> {
        let job = self.job(job_id).await?;
        let token = Uuid::now_v7().to_string();
        match self.claim(&job, &token, Utc::now()).await? {
            ClaimOutcome::AlreadyRunning { .. } => Err(AutopressError::AlreadyRunning {
                job_id: job_id.to_string(),
            }),
            ClaimOutcome::Claimed { .. } => Ok(self.execute(&job, &token, RunTrigger::Manual).await),
        }
    }

    async fn claim(&self, job: &JobDefinition, token: &str, now: DateTime<Utc>) -> Result<ClaimOutcome> {
        let outcome = self
            .storage
            .claim_job(
                &job.job_id,
                token,
                now,
                saturating_before(now, self.config.stale_running),
            )
            .await?;
        if let ClaimOutcome::Claimed {
            recovered_stale: true,
        } = outcome
        {
            warn!(job_id = %job.job_id, "stale running flag force-cleared");
        }
        Ok(outcome)
    }

    /// Run a claimed job, release its flag and record the run.
    #[instrument(skip_all, fields(job_id = %job.job_id, trigger = trigger.as_str()))]
    async fn execute(&self, job: &JobDefinition, token: &str, trigger: RunTrigger) -> RunResult {
        let started = Utc::now();
        match self.storage.mark_job_started(&job.job_id, token, started).await {
            Ok(true) => {}
            Ok(false) => {
                warn!("running flag was taken over while the run was queued");
                let mut result = RunResult::start(job.job_id.as_str(), job.kind, started).finish(started);
                result.outcome = RunOutcome::Skipped;
                return self.record(trigger, result).await;
            }
            Err(e) => warn!(error = %e, "failed to stamp run start"),
        }

        let cancel = self.shutdown.child_token();
        let runner = Arc::clone(&self.runner);
        let (job_id, kind) = (job.job_id.clone(), job.kind);
        let run = tokio::spawn(
            async move { runner.run(&job_id, kind, &cancel).await }.in_current_span(),
        );
        let result = match run.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "job run panicked");
                RunResult::start(job.job_id.as_str(), job.kind, started)
                    .abort(format!("run panicked: {e}"), Utc::now())
            }
        };

        match self
            .storage
            .release_job(&job.job_id, token, result.started_at, result.outcome)
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("running flag was taken over before this run finished"),
            Err(e) => error!(error = %e, "failed to release running flag"),
        }
        self.record(trigger, result).await
    }

    async fn record(&self, trigger: RunTrigger, result: RunResult) -> RunResult {
        let run = JobRun {
            run_id: Uuid::now_v7().to_string(),
            trigger,
            result,
        };
        if let Err(e) = self.storage.insert_job_run(&run).await {
            error!(error = %e, "failed to record job run");
        }
        run.result
    }

    /// Dispatch every job due at `now` onto `tasks`.
    ///
    /// Each due job's `next_run_at` moves past `now` before the claim, so a
    /// job found running is skipped for this occurrence, not queued.
    pub async fn tick(self: &Arc<Self>, now: DateTime<Utc>, tasks: &mut JoinSet<()>) -> Result<TickReport> {
        let mut report = TickReport::default();
        for job in self.storage.due_jobs(now).await? {
            self.storage
                .set_next_run(&job.job_id, job.schedule.next_after(now))
                .await?;

            let token = Uuid::now_v7().to_string();
            match self.claim(&job, &token, now).await? {
                ClaimOutcome::AlreadyRunning { since } => {
                    warn!(job_id = %job.job_id, running_since = ?since, "job still running, scheduled run skipped");
                    self.record_skipped(&job, now).await?;
                    report.skipped.push(job.job_id);
                }
                ClaimOutcome::Claimed { .. } => {
                    info!(job_id = %job.job_id, kind = %job.kind, "job dispatched");
                    report.dispatched.push(job.job_id.clone());
                    let this = Arc::clone(self);
                    let workers = Arc::clone(&self.workers);
                    tasks.spawn(async move {
                        let Ok(_permit) = workers.acquire_owned().await else {
                            return;
                        };
                        this.execute(&job, &token, RunTrigger::Schedule).await;
                    });
                }
            }
        }
        Ok(report)
    }

    async fn record_skipped(&self, job: &JobDefinition, now: DateTime<Utc>) -> Result<()> {
        let mut result = RunResult::start(job.job_id.as_str(), job.kind, now).finish(now);
        result.outcome = RunOutcome::Skipped;
        self.storage
            .insert_job_run(&JobRun {
                run_id: Uuid::now_v7().to_string(),
                trigger: RunTrigger::Schedule,
                result,
            })
            .await
    }

    /// Poll for due jobs until [`shutdown`](Self::shutdown), then wait for
    /// dispatched runs to finish.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let mut tasks = JoinSet::new();
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(poll_secs = self.config.poll_interval.as_secs(), workers = self.config.workers, "scheduler started");

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = interval.tick() => {
                    match self.tick(Utc::now(), &mut tasks).await {
                        Ok(report) if !report.dispatched.is_empty() || !report.skipped.is_empty() => {
                            debug!(dispatched = ?report.dispatched, skipped = ?report.skipped, "tick");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "scheduler tick failed"),
                    }
                }
            }
            while let Some(joined) = tasks.try_join_next() {
                if let Err(e) = joined {
                    error!(error = %e, "job task panicked");
                }
            }
        }

        info!(in_flight = tasks.len(), "scheduler stopping");
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "job task panicked");
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Projections
    // -----------------------------------------------------------------------

    pub async fn next_runs(&self, window: chrono::Duration) -> Result<Vec<ScheduledRun>> {
        upcoming_runs(&self.storage, window).await
    }

    pub async fn status(&self) -> Result<SchedulerStatus> {
        scheduler_status(&self.storage).await
    }

    pub async fn history(&self, job_id: &str, limit: u32) -> Result<Vec<JobRun>> {
        self.storage.list_job_runs(job_id, limit).await
    }
}

// ---------------------------------------------------------------------------
// Definition operations
//
// These only touch the store, so inspection and pause/resume commands can use
// them without building collaborators.
// ---------------------------------------------------------------------------

async fn load_job(storage: &Storage, job_id: &str) -> Result<JobDefinition> {
    storage
        .get_job(job_id)
        .await?
        .ok_or_else(|| AutopressError::not_found("job", job_id))
}

/// Stop scheduled runs of a job. Manual triggers still work.
pub async fn pause_job(storage: &Storage, job_id: &str) -> Result<()> {
    storage.set_job_enabled(job_id, false).await?;
    info!(job_id, "job paused");
    Ok(())
}

/// Re-enable a job. Its next run is computed from now; occurrences that
/// passed while paused are dropped.
pub async fn resume_job(storage: &Storage, job_id: &str) -> Result<()> {
    let job = load_job(storage, job_id).await?;
    storage.set_job_enabled(job_id, true).await?;
    let next = job.schedule.next_after(Utc::now());
    storage.set_next_run(job_id, next).await?;
    info!(job_id, next_run_at = ?next, "job resumed");
    Ok(())
}

/// Fire times of enabled jobs within `window` from now, in time order.
pub async fn upcoming_runs(storage: &Storage, window: chrono::Duration) -> Result<Vec<ScheduledRun>> {
    let now = Utc::now();
    let until = saturating_after(now, window);
    let mut runs: Vec<ScheduledRun> = storage
        .list_jobs()
        .await?
        .into_iter()
        .filter(|job| job.enabled)
        .flat_map(|job| {
            job.schedule
                .occurrences(now, until)
                .into_iter()
                .map(move |at| ScheduledRun {
                    job_id: job.job_id.clone(),
                    at,
                })
        })
        .collect();
    runs.sort_by(|a, b| a.at.cmp(&b.at).then_with(|| a.job_id.cmp(&b.job_id)));
    Ok(runs)
}

pub async fn scheduler_status(storage: &Storage) -> Result<SchedulerStatus> {
    Ok(SchedulerStatus {
        jobs: storage.list_jobs().await?,
        generated_at: Utc::now(),
    })
}
