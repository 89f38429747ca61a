//! Scheduler state: job definitions, running flags, and run history.

use autopress_shared::{
    AutopressError, JobDefinition, JobKind, JobRun, Result, RunCounters, RunOutcome, RunResult,
    Schedule,
};
use chrono::{DateTime, Utc};
use libsql::{Connection, params};

use crate::Storage;
use crate::helpers::{
    db_err, from_json, get_bool, get_opt_parsed, get_opt_string, get_opt_ts, get_parsed,
    get_string, get_ts, get_u64, int, opt_ts, to_json, ts,
};

const SELECT_COLS: &str = "job_id, kind, schedule_json, enabled, running, run_started_at, \
     last_run_at, last_result, next_run_at";

const RUN_COLS: &str = "run_id, job_id, kind, run_trigger, outcome, processed, succeeded, \
     failed, skipped, cancelled, counters_json, started_at, finished_at, error";

/// Result of trying to set a job's running flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The flag is now held by the caller's token. `recovered_stale` is set
    /// when a previous holder's flag was older than the stale threshold and
    /// was force-cleared.
    Claimed { recovered_stale: bool },
    /// Another execution holds the flag.
    AlreadyRunning { since: Option<DateTime<Utc>> },
}

fn row_to_job(row: &libsql::Row) -> Result<JobDefinition> {
    Ok(JobDefinition {
        job_id: get_string(row, 0)?,
        kind: get_parsed::<JobKind>(row, 1)?,
        schedule: from_json::<Schedule>(&get_string(row, 2)?)?,
        enabled: get_bool(row, 3)?,
        running: get_bool(row, 4)?,
        run_started_at: get_opt_ts(row, 5)?,
        last_run_at: get_opt_ts(row, 6)?,
        last_result: get_opt_parsed::<RunOutcome>(row, 7)?,
        next_run_at: get_opt_ts(row, 8)?,
    })
}

fn row_to_run(row: &libsql::Row) -> Result<JobRun> {
    Ok(JobRun {
        run_id: get_string(row, 0)?,
        trigger: get_parsed(row, 3)?,
        result: RunResult {
            job_id: get_string(row, 1)?,
            kind: get_parsed(row, 2)?,
            outcome: get_parsed(row, 4)?,
            processed: get_u64(row, 5)?,
            succeeded: get_u64(row, 6)?,
            failed: get_u64(row, 7)?,
            skipped: get_u64(row, 8)?,
            cancelled: get_bool(row, 9)?,
            counters: from_json::<RunCounters>(&get_string(row, 10)?)?,
            started_at: get_ts(row, 11)?,
            finished_at: get_ts(row, 12)?,
            error: get_opt_string(row, 13)?,
        },
    })
}

async fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<JobDefinition>> {
    let mut rows = conn.query(sql, params).await.map_err(db_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        out.push(row_to_job(&row)?);
    }
    Ok(out)
}

impl Storage {
    // -----------------------------------------------------------------------
    // Job operations
    // -----------------------------------------------------------------------

    /// Register or update a job definition.
    ///
    /// An existing row keeps its pause state, running flag and history. Its
    /// `next_run_at` is kept only when the schedule is unchanged and the time
    /// has not already passed by `now`; otherwise the definition's value wins.
    pub async fn upsert_job(&self, job: &JobDefinition, now: DateTime<Utc>) -> Result<JobDefinition> {
        self.check_writable()?;
        let schedule_json = to_json(&job.schedule)?;
        let next = opt_ts(job.next_run_at);
        let now_s = ts(now);
        let conn = self.conn().await;

        conn.execute(
            "INSERT INTO jobs (job_id, kind, schedule_json, enabled, next_run_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(job_id) DO UPDATE SET
                 kind = excluded.kind,
                 schedule_json = excluded.schedule_json,
                 enabled = CASE WHEN excluded.enabled = 0 THEN 0 ELSE jobs.enabled END,
                 next_run_at = CASE
                     WHEN jobs.schedule_json = excluded.schedule_json
                          AND jobs.next_run_at IS NOT NULL
                          AND jobs.next_run_at >= ?6
                     THEN jobs.next_run_at
                     ELSE excluded.next_run_at
                 END",
            params![
                job.job_id.as_str(),
                job.kind.as_str(),
                schedule_json.as_str(),
                i64::from(job.enabled),
                next.as_deref(),
                now_s.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

        query_jobs(
            &conn,
            &format!("SELECT {SELECT_COLS} FROM jobs WHERE job_id = ?1"),
            params![job.job_id.as_str()],
        )
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| AutopressError::not_found("job", job.job_id.as_str()))
    }

    /// Get a job by id.
    pub async fn get_job(&self, job_id: &str) -> Result<Option<JobDefinition>> {
        let conn = self.conn().await;
        Ok(query_jobs(
            &conn,
            &format!("SELECT {SELECT_COLS} FROM jobs WHERE job_id = ?1"),
            params![job_id],
        )
        .await?
        .into_iter()
        .next())
    }

    /// All registered jobs ordered by id.
    pub async fn list_jobs(&self) -> Result<Vec<JobDefinition>> {
        let conn = self.conn().await;
        query_jobs(
            &conn,
            &format!("SELECT {SELECT_COLS} FROM jobs ORDER BY job_id"),
            params![],
        )
        .await
    }

    /// Enabled jobs whose `next_run_at` is at or before `now`, earliest first.
    pub async fn due_jobs(&self, now: DateTime<Utc>) -> Result<Vec<JobDefinition>> {
        let now = ts(now);
        let conn = self.conn().await;
        query_jobs(
            &conn,
            &format!(
                "SELECT {SELECT_COLS} FROM jobs
                 WHERE enabled = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1
                 ORDER BY next_run_at, job_id"
            ),
            params![now.as_str()],
        )
        .await
    }

    /// Pause or resume a job.
    pub async fn set_job_enabled(&self, job_id: &str, enabled: bool) -> Result<()> {
        self.check_writable()?;
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE jobs SET enabled = ?1 WHERE job_id = ?2",
                params![i64::from(enabled), job_id],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(AutopressError::not_found("job", job_id));
        }
        Ok(())
    }

    /// Store the next fire time (`None` when the schedule is exhausted).
    pub async fn set_next_run(&self, job_id: &str, next_run_at: Option<DateTime<Utc>>) -> Result<()> {
        self.check_writable()?;
        let next = opt_ts(next_run_at);
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE jobs SET next_run_at = ?1 WHERE job_id = ?2",
                params![next.as_deref(), job_id],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(AutopressError::not_found("job", job_id));
        }
        Ok(())
    }

    /// Try to set the running flag for `job_id` under `token`.
    ///
    /// A flag set before `stale_before` is treated as abandoned and taken over.
    pub async fn claim_job(
        &self,
        job_id: &str,
        token: &str,
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> Result<ClaimOutcome> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let mut rows = tx
            .query(
                "SELECT running, run_started_at FROM jobs WHERE job_id = ?1",
                params![job_id],
            )
            .await
            .map_err(db_err)?;
        let (running, since) = match rows.next().await.map_err(db_err)? {
            Some(row) => (get_bool(&row, 0)?, get_opt_ts(&row, 1)?),
            None => return Err(AutopressError::not_found("job", job_id)),
        };
        drop(rows);

        let mut recovered_stale = false;
        if running {
            match since {
                Some(started) if started >= stale_before => {
                    return Ok(ClaimOutcome::AlreadyRunning { since });
                }
                _ => recovered_stale = true,
            }
        }

        let now_s = ts(now);
        tx.execute(
            "UPDATE jobs SET running = 1, run_token = ?1, run_started_at = ?2 WHERE job_id = ?3",
            params![token, now_s.as_str(), job_id],
        )
        .await
        .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(ClaimOutcome::Claimed { recovered_stale })
    }

    /// Move `run_started_at` to `now` while `token` still holds the flag, so
    /// the stale threshold counts from when the run actually began. Returns
    /// `false` when the flag was taken over in the meantime.
    pub async fn mark_job_started(&self, job_id: &str, token: &str, now: DateTime<Utc>) -> Result<bool> {
        self.check_writable()?;
        let now_s = ts(now);
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE jobs SET run_started_at = ?1
                 WHERE job_id = ?2 AND running = 1 AND run_token = ?3",
                params![now_s.as_str(), job_id, token],
            )
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    /// Clear the running flag if `token` still holds it and record the result.
    /// Returns `false` when the flag was taken over in the meantime.
    pub async fn release_job(
        &self,
        job_id: &str,
        token: &str,
        started_at: DateTime<Utc>,
        outcome: RunOutcome,
    ) -> Result<bool> {
        self.check_writable()?;
        let started = ts(started_at);
        let conn = self.conn().await;
        let affected = conn
            .execute(
                "UPDATE jobs
                 SET running = 0, run_token = NULL, run_started_at = NULL,
                     last_run_at = ?1, last_result = ?2
                 WHERE job_id = ?3 AND run_token = ?4",
                params![started.as_str(), outcome.as_str(), job_id, token],
            )
            .await
            .map_err(db_err)?;
        Ok(affected > 0)
    }

    // -----------------------------------------------------------------------
    // Run history
    // -----------------------------------------------------------------------

    /// Append one run to the job's history.
    pub async fn insert_job_run(&self, run: &JobRun) -> Result<()> {
        self.check_writable()?;
        let r = &run.result;
        let counters = to_json(&r.counters)?;
        let started = ts(r.started_at);
        let finished = ts(r.finished_at);
        let conn = self.conn().await;
        conn.execute(
            &format!(
                "INSERT INTO job_runs ({RUN_COLS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
            ),
            params![
                run.run_id.as_str(),
                r.job_id.as_str(),
                r.kind.as_str(),
                run.trigger.as_str(),
                r.outcome.as_str(),
                int(r.processed),
                int(r.succeeded),
                int(r.failed),
                int(r.skipped),
                i64::from(r.cancelled),
                counters.as_str(),
                started.as_str(),
                finished.as_str(),
                r.error.as_deref()
            ],
        )
        .await
        .map_err(db_err)?;
        Ok(())
    }

    /// Most recent runs of a job, newest first.
    pub async fn list_job_runs(&self, job_id: &str, limit: u32) -> Result<Vec<JobRun>> {
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RUN_COLS} FROM job_runs WHERE job_id = ?1
                     ORDER BY started_at DESC, run_id DESC LIMIT ?2"
                ),
                params![job_id, i64::from(limit)],
            )
            .await
            .map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(row_to_run(&row)?);
        }
        Ok(out)
    }

    /// Delete runs that started before `older_than`.
    pub async fn purge_job_runs(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let cutoff = ts(older_than);
        let conn = self.conn().await;
        conn.execute(
            "DELETE FROM job_runs WHERE started_at < ?1",
            params![cutoff.as_str()],
        )
        .await
        .map_err(db_err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;
    use autopress_shared::RunTrigger;
    use chrono::Duration;

    fn hourly(id: &str) -> JobDefinition {
        JobDefinition::new(id, JobKind::PublishSweep, Schedule::Interval { every_secs: 3600 })
    }

    #[tokio::test]
    async fn upsert_keeps_pause_and_future_next_run() {
        let storage = test_storage().await;
        let now = Utc::now();
        let mut job = hourly("sweep");
        job.next_run_at = Some(now + Duration::minutes(30));
        storage.upsert_job(&job, now).await.unwrap();
        storage.set_job_enabled("sweep", false).await.unwrap();

        job.next_run_at = Some(now + Duration::minutes(45));
        let stored = storage.upsert_job(&job, now).await.unwrap();
        assert!(!stored.enabled);
        assert_eq!(
            stored.next_run_at.map(|t| t.timestamp()),
            Some((now + Duration::minutes(30)).timestamp())
        );

        // A next run that already passed is replaced.
        let later = now + Duration::hours(2);
        let stored = storage.upsert_job(&job, later).await.unwrap();
        assert_eq!(
            stored.next_run_at.map(|t| t.timestamp()),
            Some((now + Duration::minutes(45)).timestamp())
        );
    }

    #[tokio::test]
    async fn due_jobs_skip_paused() {
        let storage = test_storage().await;
        let now = Utc::now();
        for id in ["a", "b"] {
            let mut job = hourly(id);
            job.next_run_at = Some(now - Duration::seconds(1));
            storage.upsert_job(&job, now - Duration::minutes(1)).await.unwrap();
        }
        storage.set_job_enabled("b", false).await.unwrap();
        let due = storage.due_jobs(now).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].job_id, "a");

        assert!(storage.set_job_enabled("missing", true).await.is_err());
    }

    #[tokio::test]
    async fn claim_is_single_flight_with_stale_takeover() {
        let storage = test_storage().await;
        let now = Utc::now();
        storage.upsert_job(&hourly("sweep"), now).await.unwrap();
        let stale_before = now - Duration::hours(2);

        let first = storage.claim_job("sweep", "t1", now, stale_before).await.unwrap();
        assert_eq!(first, ClaimOutcome::Claimed { recovered_stale: false });

        let second = storage.claim_job("sweep", "t2", now, stale_before).await.unwrap();
        assert!(matches!(second, ClaimOutcome::AlreadyRunning { .. }));

        // Much later the first holder is considered abandoned.
        let later = now + Duration::hours(3);
        let third = storage
            .claim_job("sweep", "t3", later, later - Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(third, ClaimOutcome::Claimed { recovered_stale: true });

        // The old token can no longer clear the flag.
        assert!(!storage.release_job("sweep", "t1", now, RunOutcome::Success).await.unwrap());
        let job = storage.get_job("sweep").await.unwrap().unwrap();
        assert!(job.running);

        assert!(storage.release_job("sweep", "t3", later, RunOutcome::Partial).await.unwrap());
        let job = storage.get_job("sweep").await.unwrap().unwrap();
        assert!(!job.running);
        assert_eq!(job.last_result, Some(RunOutcome::Partial));

        let missing = storage.claim_job("nope", "t", now, stale_before).await;
        assert!(matches!(missing, Err(AutopressError::NotFound { .. })));
    }

    #[tokio::test]
    async fn mark_started_restamps_only_for_holder() {
        let storage = test_storage().await;
        let claimed_at = Utc::now() - Duration::hours(3);
        storage.upsert_job(&hourly("sweep"), claimed_at).await.unwrap();
        storage
            .claim_job("sweep", "t1", claimed_at, claimed_at - Duration::hours(2))
            .await
            .unwrap();

        let now = Utc::now();
        assert!(!storage.mark_job_started("sweep", "other", now).await.unwrap());
        assert!(storage.mark_job_started("sweep", "t1", now).await.unwrap());
        let job = storage.get_job("sweep").await.unwrap().unwrap();
        assert_eq!(job.run_started_at.map(|t| t.timestamp()), Some(now.timestamp()));

        // Counted from the new start, the flag is no longer stale.
        let second = storage
            .claim_job("sweep", "t2", now, now - Duration::hours(2))
            .await
            .unwrap();
        assert!(matches!(second, ClaimOutcome::AlreadyRunning { .. }));

        storage.release_job("sweep", "t1", now, RunOutcome::Success).await.unwrap();
        assert!(!storage.mark_job_started("sweep", "t1", now).await.unwrap());
    }

    #[tokio::test]
    async fn run_history_newest_first_and_purge() {
        let storage = test_storage().await;
        let now = Utc::now();
        for (i, age_days) in [40, 2, 1].into_iter().enumerate() {
            let started = now - Duration::days(age_days);
            let mut result = RunResult::start("sweep", JobKind::PublishSweep, started);
            result.processed = i as u64;
            result.counters.published = i as u64;
            let run = JobRun {
                run_id: format!("run-{i}"),
                trigger: RunTrigger::Schedule,
                result: result.finish(started),
            };
            storage.insert_job_run(&run).await.unwrap();
        }

        let runs = storage.list_job_runs("sweep", 10).await.unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].run_id, "run-2");
        assert_eq!(runs[0].result.counters.published, 2);

        let removed = storage.purge_job_runs(now - Duration::days(30)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(storage.list_job_runs("sweep", 10).await.unwrap().len(), 2);
        assert_eq!(storage.list_job_runs("sweep", 1).await.unwrap().len(), 1);
    }
}
