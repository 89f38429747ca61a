//! SQL migration definitions for the autopress database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: fingerprints, articles, history, attempts",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per scraped entity
CREATE TABLE IF NOT EXISTS fingerprints (
    identity_key   TEXT PRIMARY KEY,
    content_hash   TEXT NOT NULL,
    first_seen     TEXT NOT NULL,
    last_seen      TEXT NOT NULL,
    status         TEXT NOT NULL,
    generated_hash TEXT
);

CREATE INDEX IF NOT EXISTS idx_fingerprints_last_seen ON fingerprints(last_seen);

-- Replaced hashes, kept for diagnostics
CREATE TABLE IF NOT EXISTS fingerprint_audit (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    identity_key  TEXT NOT NULL,
    previous_hash TEXT NOT NULL,
    new_hash      TEXT NOT NULL,
    observed_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_fingerprint_audit_key ON fingerprint_audit(identity_key);

-- Monotonic article version counter per entity
CREATE TABLE IF NOT EXISTS entity_versions (
    entity_key   TEXT PRIMARY KEY,
    last_version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS articles (
    article_id       TEXT PRIMARY KEY,
    entity_key       TEXT NOT NULL,
    payload_json     TEXT NOT NULL,
    seo_score        REAL NOT NULL,
    state            TEXT NOT NULL,
    version          INTEGER NOT NULL,
    created_at       TEXT NOT NULL,
    state_changed_at TEXT NOT NULL,
    reviewer_note    TEXT,
    external_post_id TEXT,
    next_attempt_at  TEXT,
    last_error_kind  TEXT,
    needs_attention  INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_articles_state ON articles(state, state_changed_at);
CREATE INDEX IF NOT EXISTS idx_articles_entity ON articles(entity_key);

-- At most one article per entity in review, approved or publishing
CREATE UNIQUE INDEX IF NOT EXISTS idx_articles_one_active
    ON articles(entity_key)
    WHERE state IN ('pending_review', 'approved', 'publishing');

CREATE TABLE IF NOT EXISTS article_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id TEXT NOT NULL,
    from_state TEXT,
    to_state   TEXT NOT NULL,
    at         TEXT NOT NULL,
    actor      TEXT NOT NULL,
    note       TEXT
);

CREATE INDEX IF NOT EXISTS idx_article_history_article ON article_history(article_id);

CREATE TABLE IF NOT EXISTS publish_attempts (
    article_id       TEXT NOT NULL,
    attempt_number   INTEGER NOT NULL,
    external_post_id TEXT,
    status           TEXT NOT NULL,
    error_kind       TEXT,
    error_message    TEXT,
    attempted_at     TEXT NOT NULL,
    finished_at      TEXT,
    PRIMARY KEY (article_id, attempt_number)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_publish_attempts_one_success
    ON publish_attempts(article_id)
    WHERE status = 'success';

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Scheduler: jobs and job run history",
            sql: r#"
CREATE TABLE IF NOT EXISTS jobs (
    job_id         TEXT PRIMARY KEY,
    kind           TEXT NOT NULL,
    schedule_json  TEXT NOT NULL,
    enabled        INTEGER NOT NULL DEFAULT 1,
    running        INTEGER NOT NULL DEFAULT 0,
    run_token      TEXT,
    run_started_at TEXT,
    last_run_at    TEXT,
    last_result    TEXT,
    next_run_at    TEXT
);

CREATE TABLE IF NOT EXISTS job_runs (
    run_id        TEXT PRIMARY KEY,
    job_id        TEXT NOT NULL,
    kind          TEXT NOT NULL,
    run_trigger   TEXT NOT NULL,
    outcome       TEXT NOT NULL,
    processed     INTEGER NOT NULL DEFAULT 0,
    succeeded     INTEGER NOT NULL DEFAULT 0,
    failed        INTEGER NOT NULL DEFAULT 0,
    skipped       INTEGER NOT NULL DEFAULT 0,
    cancelled     INTEGER NOT NULL DEFAULT 0,
    counters_json TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    finished_at   TEXT NOT NULL,
    error         TEXT
);

CREATE INDEX IF NOT EXISTS idx_job_runs_job ON job_runs(job_id, started_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
