//! Job runs: scrape-and-generate, publish-sweep and cleanup.
//!
//! The [`JobRunner`] sequences the fingerprint store, the ledger and the
//! coordinator for one execution and folds every unit into a [`RunResult`].
//! Per-unit failures are counted and the run carries on; a store failure
//! stops it.

use std::collections::HashSet;
use std::sync::Arc;

use autopress_shared::{
    AppConfig, ArticleState, AutopressError, DuplicatePolicy, FailureKind, FingerprintStatus,
    JobKind, PipelineConfig, PublishPolicy, QuotaFallback, Result, RetentionPolicy, RunResult,
    saturating_before,
};
use autopress_storage::Storage;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::collaborators::{
    GeneratedContent, Generator, Publisher, ScrapedEntity, Scraper, SimulatedGenerator,
};
use crate::fingerprint::{FingerprintStore, needs_generation};
use crate::ledger::{AUTO_APPROVE_ACTOR, ArticleLedger};
use crate::publication::PublicationCoordinator;

// ---------------------------------------------------------------------------
// Progress reporting
// ---------------------------------------------------------------------------

/// How one unit (category page, entity, article, cleanup step) ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    Succeeded,
    Failed,
    Skipped,
    /// Not started because the run was cancelled.
    Cancelled,
}

/// Progress callback for job runs.
pub trait RunObserver: Send + Sync {
    /// Called once before any unit starts.
    fn run_started(&self, job_id: &str, kind: JobKind);
    /// Called as each unit completes.
    fn unit_done(&self, job_id: &str, unit: &str, outcome: UnitOutcome);
    /// Called with the final result.
    fn run_finished(&self, result: &RunResult);
}

/// No-op observer for daemons and tests.
pub struct SilentObserver;

impl RunObserver for SilentObserver {
    fn run_started(&self, _job_id: &str, _kind: JobKind) {}
    fn unit_done(&self, _job_id: &str, _unit: &str, _outcome: UnitOutcome) {}
    fn run_finished(&self, _result: &RunResult) {}
}

// ---------------------------------------------------------------------------
// Entity processing
// ---------------------------------------------------------------------------

/// What happened to one scraped entity.
#[derive(Debug)]
enum EntityOutcome {
    /// Content already covered by a submitted article.
    UpToDate,
    /// An active article blocks a new one.
    Duplicate,
    /// Generator out of quota and the fallback is `skip`.
    QuotaSkipped,
    GenerationFailed,
    Submitted { degraded: bool, auto_approved: bool },
}

#[derive(Debug)]
struct EntityReport {
    status: FingerprintStatus,
    outcome: EntityOutcome,
}

/// Executes one job run end to end.
pub struct JobRunner {
    storage: Arc<Storage>,
    fingerprints: FingerprintStore,
    ledger: ArticleLedger,
    coordinator: PublicationCoordinator,
    scraper: Arc<dyn Scraper>,
    generator: Arc<dyn Generator>,
    simulated: SimulatedGenerator,
    pipeline: PipelineConfig,
    retention: RetentionPolicy,
    observer: Arc<dyn RunObserver>,
}

impl JobRunner {
    pub fn new(
        storage: Arc<Storage>,
        scraper: Arc<dyn Scraper>,
        generator: Arc<dyn Generator>,
        publisher: Arc<dyn Publisher>,
        config: &AppConfig,
    ) -> Self {
        let pipeline = PipelineConfig::from(config);
        let ledger = ArticleLedger::new(Arc::clone(&storage), pipeline.duplicate_policy);
        let coordinator = PublicationCoordinator::new(
            Arc::clone(&storage),
            ledger.clone(),
            publisher,
            PublishPolicy::from(config),
        );
        Self {
            fingerprints: FingerprintStore::new(Arc::clone(&storage)),
            storage,
            ledger,
            coordinator,
            scraper,
            generator,
            simulated: SimulatedGenerator,
            pipeline,
            retention: RetentionPolicy::from(config),
            observer: Arc::new(SilentObserver),
        }
    }

    /// Report progress to `observer` instead of discarding it.
    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn ledger(&self) -> &ArticleLedger {
        &self.ledger
    }

    pub fn coordinator(&self) -> &PublicationCoordinator {
        &self.coordinator
    }

    pub fn fingerprints(&self) -> &FingerprintStore {
        &self.fingerprints
    }

    /// Run one job of `kind` to completion or cancellation.
    #[instrument(skip_all, fields(job_id = %job_id, kind = %kind))]
    pub async fn run(&self, job_id: &str, kind: JobKind, cancel: &CancellationToken) -> RunResult {
        self.observer.run_started(job_id, kind);
        let result = match kind {
            JobKind::ScrapeAndGenerate => self.scrape_and_generate(job_id, cancel).await,
            JobKind::PublishSweep => {
                self.coordinator
                    .sweep(job_id, Utc::now(), cancel, self.observer.as_ref())
                    .await
            }
            JobKind::Cleanup => self.cleanup(job_id).await,
        };

        info!(
            outcome = %result.outcome,
            processed = result.processed,
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            cancelled = result.cancelled,
            "run finished"
        );
        self.observer.run_finished(&result);
        result
    }

    // -----------------------------------------------------------------------
    // scrape-and-generate
    // -----------------------------------------------------------------------

    async fn scrape_and_generate(&self, job_id: &str, cancel: &CancellationToken) -> RunResult {
        let mut result = RunResult::start(job_id, JobKind::ScrapeAndGenerate, Utc::now());

        let mut seen = HashSet::new();
        let mut entities: Vec<ScrapedEntity> = Vec::new();
        let mut fetch_error: Option<AutopressError> = None;
        for url in &self.pipeline.category_urls {
            if cancel.is_cancelled() {
                result.cancelled = true;
                break;
            }
            match self.scraper.fetch(url).await {
                Ok(found) => {
                    debug!(url = %url, count = found.len(), "category fetched");
                    for entity in found {
                        if seen.insert(entity.identity_key.clone()) {
                            entities.push(entity);
                        }
                    }
                }
                Err(e) => {
                    let e = AutopressError::from(e);
                    warn!(url = %url, transient = e.is_transient(), error = %e, "category fetch failed");
                    result.processed += 1;
                    result.failed += 1;
                    self.observer.unit_done(job_id, url, UnitOutcome::Failed);
                    fetch_error.get_or_insert(e);
                }
            }
        }
        info!(entities = entities.len(), "scrape finished");

        let stop = cancel.child_token();
        let reports = stream::iter(entities)
            .map(|entity| {
                let stop = stop.clone();
                async move {
                    if stop.is_cancelled() {
                        return (entity.identity_key, None);
                    }
                    let res = self.process_entity(&entity).await;
                    if let Err(e) = &res {
                        if e.is_store_failure() {
                            stop.cancel();
                        }
                    }
                    (entity.identity_key, Some(res))
                }
            })
            .buffer_unordered(self.pipeline.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;

        for (key, report) in reports {
            let outcome = match report {
                None => {
                    result.cancelled = true;
                    UnitOutcome::Cancelled
                }
                Some(Ok(report)) => tally(&mut result, report),
                Some(Err(e)) => {
                    warn!(identity_key = %key, error = %e, "entity failed");
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
            self.observer.unit_done(job_id, &key, outcome);
        }

        if result.error.is_none() {
            result.error = fetch_error.map(|e| e.to_string());
        }
        result.finish(Utc::now())
    }

    /// Observe, generate, record and submit one entity.
    async fn process_entity(&self, entity: &ScrapedEntity) -> Result<EntityReport> {
        let key = entity.identity_key.as_str();
        let obs = self.fingerprints.observe(key, &entity.content_fields).await?;
        let report = |outcome| EntityReport {
            status: obs.status,
            outcome,
        };

        if !needs_generation(&obs) {
            return Ok(report(EntityOutcome::UpToDate));
        }

        if let Some(active) = self.ledger.active_for(key).await? {
            let blocks = match active.state {
                ArticleState::PendingReview => {
                    self.ledger.duplicate_policy() == DuplicatePolicy::Reject
                }
                _ => true,
            };
            if blocks {
                debug!(identity_key = key, active = %active.article_id, state = %active.state, "active article exists, skipping");
                return Ok(report(EntityOutcome::Duplicate));
            }
        }

        let generated = match self.generator.generate(&entity.content_fields).await {
            Ok(g) => g,
            Err(e) if e.kind == FailureKind::QuotaExceeded => match self.pipeline.quota_fallback {
                QuotaFallback::Simulate => {
                    warn!(identity_key = key, "generator out of quota, using simulated content");
                    self.simulated.render(&entity.content_fields)
                }
                QuotaFallback::Skip => {
                    warn!(identity_key = key, "generator out of quota, entity skipped");
                    return Ok(report(EntityOutcome::QuotaSkipped));
                }
            },
            Err(e) => {
                warn!(identity_key = key, error_kind = %e.kind, error = %e.message, "generation failed");
                return Ok(report(EntityOutcome::GenerationFailed));
            }
        };
        let GeneratedContent { payload, seo_score } = generated;

        let article = self.ledger.record_generated(key, &payload, seo_score).await?;
        match self.ledger.submit_for_review(&article.article_id).await {
            Ok(_) => {}
            Err(AutopressError::InvalidTransition { message, .. }) => {
                debug!(identity_key = key, reason = %message, "submission blocked by an active article");
                return Ok(report(EntityOutcome::Duplicate));
            }
            Err(e) => return Err(e),
        }
        self.fingerprints.mark_generated(key, &obs.new_hash).await?;

        let auto_approved = match self.pipeline.auto_approve_min_score {
            Some(min) if !payload.degraded && seo_score >= min => {
                let note = format!("score {seo_score:.1} >= {min:.1}");
                self.ledger
                    .approve(&article.article_id, AUTO_APPROVE_ACTOR, Some(&note))
                    .await?;
                true
            }
            _ => false,
        };

        Ok(report(EntityOutcome::Submitted {
            degraded: payload.degraded,
            auto_approved,
        }))
    }

    // -----------------------------------------------------------------------
    // cleanup
    // -----------------------------------------------------------------------

    async fn cleanup(&self, job_id: &str) -> RunResult {
        let now = Utc::now();
        let mut result = RunResult::start(job_id, JobKind::Cleanup, now);

        let steps = async {
            result.counters.recovered = self
                .ledger
                .recover_stale_publishing(saturating_before(now, self.retention.stale_publishing))
                .await?
                .len() as u64;
            self.step_done(&mut result, "recover_stale_publishing");

            result.counters.purged_fingerprints = self
                .fingerprints
                .purge(saturating_before(now, self.retention.fingerprints))
                .await?;
            self.step_done(&mut result, "purge_fingerprints");

            result.counters.purged_articles = self
                .ledger
                .purge_terminal(saturating_before(now, self.retention.articles))
                .await?;
            self.step_done(&mut result, "purge_articles");

            result.counters.purged_runs = self
                .storage
                .purge_job_runs(saturating_before(now, self.retention.run_history))
                .await?;
            self.step_done(&mut result, "purge_job_runs");
            Ok::<_, AutopressError>(())
        };

        match steps.await {
            Ok(()) => {
                info!(
                    recovered = result.counters.recovered,
                    fingerprints = result.counters.purged_fingerprints,
                    articles = result.counters.purged_articles,
                    runs = result.counters.purged_runs,
                    "cleanup finished"
                );
                result.finish(Utc::now())
            }
            Err(e) => {
                warn!(error = %e, "cleanup stopped");
                result.processed += 1;
                result.failed += 1;
                result.abort(e, Utc::now())
            }
        }
    }

    fn step_done(&self, result: &mut RunResult, step: &str) {
        result.processed += 1;
        result.succeeded += 1;
        self.observer
            .unit_done(&result.job_id, step, UnitOutcome::Succeeded);
    }
}

fn tally(result: &mut RunResult, report: EntityReport) -> UnitOutcome {
    match report.status {
        FingerprintStatus::New => result.counters.new += 1,
        FingerprintStatus::Changed => result.counters.changed += 1,
        FingerprintStatus::Unchanged => result.counters.unchanged += 1,
    }
    match report.outcome {
        EntityOutcome::UpToDate | EntityOutcome::QuotaSkipped => {
            result.skipped += 1;
            UnitOutcome::Skipped
        }
        EntityOutcome::Duplicate => {
            result.skipped += 1;
            result.counters.duplicates += 1;
            UnitOutcome::Skipped
        }
        EntityOutcome::GenerationFailed => {
            result.failed += 1;
            UnitOutcome::Failed
        }
        EntityOutcome::Submitted {
            degraded,
            auto_approved,
        } => {
            result.succeeded += 1;
            result.counters.generated += 1;
            result.counters.submitted += 1;
            result.counters.degraded += u64::from(degraded);
            result.counters.auto_approved += u64::from(auto_approved);
            UnitOutcome::Succeeded
        }
    }
}
