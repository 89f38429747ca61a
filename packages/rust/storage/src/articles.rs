//! Article ledger tables: articles, their transition history, and the
//! per-entity version counter.
//!
//! State changes go through [`Storage::transition_article`] (or one of the
//! compound operations built on it), which checks the lifecycle edge, writes
//! the new state conditionally on the old one, and appends the history row in
//! the same transaction.

use std::collections::BTreeMap;

use autopress_shared::{
    Article, ArticleId, ArticleState, ArticleStatistics, AutopressError, ContentPayload,
    DuplicatePolicy, FailureKind, HistoryEntry, Result,
};
use chrono::{DateTime, Duration, Utc};
use libsql::{Connection, params};

use crate::Storage;
use crate::helpers::{
    db_err, from_json, get_bool, get_i64, get_opt_parsed, get_opt_string, get_opt_ts, get_parsed,
    get_string, get_ts, get_u64, opt_ts, to_json, ts,
};

const SELECT_COLS: &str = "article_id, entity_key, payload_json, seo_score, state, version, \
     created_at, state_changed_at, reviewer_note, external_post_id, next_attempt_at, \
     last_error_kind, needs_attention";

/// A requested state change plus the publish metadata that travels with it.
#[derive(Debug, Clone)]
pub struct Transition<'a> {
    pub to: ArticleState,
    pub actor: &'a str,
    pub note: Option<&'a str>,
    pub at: DateTime<Utc>,
    pub external_post_id: Option<&'a str>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub error_kind: Option<FailureKind>,
    pub needs_attention: bool,
}

impl<'a> Transition<'a> {
    pub fn new(to: ArticleState, actor: &'a str, at: DateTime<Utc>) -> Self {
        Self {
            to,
            actor,
            note: None,
            at,
            external_post_id: None,
            next_attempt_at: None,
            error_kind: None,
            needs_attention: false,
        }
    }

    pub fn note(mut self, note: Option<&'a str>) -> Self {
        self.note = note;
        self
    }

    pub fn external_post_id(mut self, id: Option<&'a str>) -> Self {
        self.external_post_id = id;
        self
    }

    pub fn retry_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = Some(at);
        self
    }

    pub fn error_kind(mut self, kind: FailureKind) -> Self {
        self.error_kind = Some(kind);
        self
    }

    pub fn needs_attention(mut self, flag: bool) -> Self {
        self.needs_attention = flag;
        self
    }
}

fn row_to_article(row: &libsql::Row) -> Result<Article> {
    let id: String = get_string(row, 0)?;
    let article_id = id
        .parse::<ArticleId>()
        .map_err(|e| AutopressError::Storage(format!("invalid article id '{id}': {e}")))?;
    Ok(Article {
        article_id,
        entity_key: get_string(row, 1)?,
        payload: from_json::<ContentPayload>(&get_string(row, 2)?)?,
        seo_score: row.get::<f64>(3).map_err(db_err)?,
        state: get_parsed(row, 4)?,
        version: get_i64(row, 5)?,
        created_at: get_ts(row, 6)?,
        state_changed_at: get_ts(row, 7)?,
        reviewer_note: get_opt_string(row, 8)?,
        external_post_id: get_opt_string(row, 9)?,
        next_attempt_at: get_opt_ts(row, 10)?,
        last_error_kind: get_opt_parsed(row, 11)?,
        needs_attention: get_bool(row, 12)?,
    })
}

async fn query_articles(
    conn: &Connection,
    sql: &str,
    params: impl libsql::params::IntoParams,
) -> Result<Vec<Article>> {
    let mut rows = conn.query(sql, params).await.map_err(db_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().await.map_err(db_err)? {
        out.push(row_to_article(&row)?);
    }
    Ok(out)
}

pub(crate) async fn load(conn: &Connection, article_id: &ArticleId) -> Result<Article> {
    let id = article_id.to_string();
    query_articles(
        conn,
        &format!("SELECT {SELECT_COLS} FROM articles WHERE article_id = ?1"),
        params![id.as_str()],
    )
    .await?
    .into_iter()
    .next()
    .ok_or_else(|| AutopressError::not_found("article", id))
}

/// The entity's article currently holding the active slot, other than `except`.
async fn active_for_entity(
    conn: &Connection,
    entity_key: &str,
    except: Option<&ArticleId>,
) -> Result<Option<Article>> {
    let except = except.map(ToString::to_string).unwrap_or_default();
    let found = query_articles(
        conn,
        &format!(
            "SELECT {SELECT_COLS} FROM articles
             WHERE entity_key = ?1 AND article_id <> ?2
               AND state IN ('pending_review', 'approved', 'publishing')"
        ),
        params![entity_key, except.as_str()],
    )
    .await?;
    Ok(found.into_iter().next())
}

/// Bump and return the entity's version counter.
async fn next_version(conn: &Connection, entity_key: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO entity_versions (entity_key, last_version) VALUES (?1, 1)
         ON CONFLICT(entity_key) DO UPDATE SET last_version = last_version + 1",
        params![entity_key],
    )
    .await
    .map_err(db_err)?;

    let mut rows = conn
        .query(
            "SELECT last_version FROM entity_versions WHERE entity_key = ?1",
            params![entity_key],
        )
        .await
        .map_err(db_err)?;
    match rows.next().await.map_err(db_err)? {
        Some(row) => get_i64(&row, 0),
        None => Err(AutopressError::Storage(format!(
            "version counter missing for {entity_key}"
        ))),
    }
}

async fn insert_history(
    conn: &Connection,
    article_id: &ArticleId,
    from: Option<ArticleState>,
    to: ArticleState,
    at: DateTime<Utc>,
    actor: &str,
    note: Option<&str>,
) -> Result<()> {
    let id = article_id.to_string();
    let at = ts(at);
    conn.execute(
        "INSERT INTO article_history (article_id, from_state, to_state, at, actor, note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            id.as_str(),
            from.map(ArticleState::as_str),
            to.as_str(),
            at.as_str(),
            actor,
            note
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

/// Compute the article after `t` without touching the store.
fn apply(current: &Article, t: &Transition<'_>) -> Result<Article> {
    if !current.state.can_transition_to(t.to) {
        return Err(AutopressError::invalid_transition(
            current.article_id.to_string(),
            format!("cannot move from {} to {}", current.state, t.to),
        ));
    }

    let mut next = current.clone();
    next.state = t.to;
    next.state_changed_at = t.at;

    match (current.state, t.to) {
        (ArticleState::PendingReview, ArticleState::Approved | ArticleState::Rejected) => {
            if let Some(note) = t.note {
                next.reviewer_note = Some(note.to_string());
            }
        }
        (_, ArticleState::Publishing) => {
            next.next_attempt_at = None;
        }
        (_, ArticleState::Published) => {
            next.external_post_id = t.external_post_id.map(str::to_string);
            next.next_attempt_at = None;
            next.last_error_kind = None;
        }
        (ArticleState::Publishing, ArticleState::Approved) => {
            next.next_attempt_at = t.next_attempt_at;
            next.last_error_kind = t.error_kind;
        }
        (_, ArticleState::PublishFailed) => {
            next.next_attempt_at = None;
            next.last_error_kind = t.error_kind;
            next.needs_attention = t.needs_attention;
            if let Some(id) = t.external_post_id {
                next.external_post_id = Some(id.to_string());
            }
        }
        _ => {}
    }
    Ok(next)
}

/// Apply `t` to `current` inside an open transaction.
pub(crate) async fn write_transition(
    conn: &Connection,
    current: &Article,
    t: &Transition<'_>,
) -> Result<Article> {
    let next = apply(current, t)?;
    let id = current.article_id.to_string();
    let changed_at = ts(next.state_changed_at);
    let next_attempt = opt_ts(next.next_attempt_at);

    let affected = conn
        .execute(
            "UPDATE articles
             SET state = ?1, state_changed_at = ?2, reviewer_note = ?3, external_post_id = ?4,
                 next_attempt_at = ?5, last_error_kind = ?6, needs_attention = ?7
             WHERE article_id = ?8 AND state = ?9",
            params![
                next.state.as_str(),
                changed_at.as_str(),
                next.reviewer_note.as_deref(),
                next.external_post_id.as_deref(),
                next_attempt.as_deref(),
                next.last_error_kind.map(FailureKind::as_str),
                i64::from(next.needs_attention),
                id.as_str(),
                current.state.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

    if affected == 0 {
        return Err(AutopressError::invalid_transition(
            id,
            format!("article left {} before the change was written", current.state),
        ));
    }

    insert_history(
        conn,
        &current.article_id,
        Some(current.state),
        t.to,
        t.at,
        t.actor,
        t.note,
    )
    .await?;
    Ok(next)
}

impl Storage {
    // -----------------------------------------------------------------------
    // Article operations
    // -----------------------------------------------------------------------

    /// Create an article in `generated` with the entity's next version.
    pub async fn insert_article(
        &self,
        entity_key: &str,
        payload: &ContentPayload,
        seo_score: f64,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Article> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let article = Article {
            article_id: ArticleId::new(),
            entity_key: entity_key.to_string(),
            payload: payload.clone(),
            seo_score,
            state: ArticleState::Generated,
            version: next_version(&tx, entity_key).await?,
            created_at: at,
            state_changed_at: at,
            reviewer_note: None,
            external_post_id: None,
            next_attempt_at: None,
            last_error_kind: None,
            needs_attention: false,
        };

        let id = article.article_id.to_string();
        let payload_json = to_json(&article.payload)?;
        let at_s = ts(at);
        tx.execute(
            "INSERT INTO articles
                 (article_id, entity_key, payload_json, seo_score, state, version,
                  created_at, state_changed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            params![
                id.as_str(),
                entity_key,
                payload_json.as_str(),
                seo_score,
                article.state.as_str(),
                article.version,
                at_s.as_str()
            ],
        )
        .await
        .map_err(db_err)?;
        insert_history(&tx, &article.article_id, None, article.state, at, actor, None).await?;

        tx.commit().await.map_err(db_err)?;
        Ok(article)
    }

    /// Get an article by id.
    pub async fn get_article(&self, article_id: &ArticleId) -> Result<Option<Article>> {
        let conn = self.conn().await;
        match load(&conn, article_id).await {
            Ok(article) => Ok(Some(article)),
            Err(AutopressError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// List articles, optionally filtered by state. A state filter returns the
    /// oldest state change first (queue order); otherwise newest first.
    pub async fn list_articles(&self, state: Option<ArticleState>, limit: u32) -> Result<Vec<Article>> {
        let conn = self.conn().await;
        match state {
            Some(state) => {
                query_articles(
                    &conn,
                    &format!(
                        "SELECT {SELECT_COLS} FROM articles WHERE state = ?1
                         ORDER BY state_changed_at, article_id LIMIT ?2"
                    ),
                    params![state.as_str(), i64::from(limit)],
                )
                .await
            }
            None => {
                query_articles(
                    &conn,
                    &format!(
                        "SELECT {SELECT_COLS} FROM articles
                         ORDER BY created_at DESC, article_id DESC LIMIT ?1"
                    ),
                    params![i64::from(limit)],
                )
                .await
            }
        }
    }

    /// All articles ever generated for one entity, oldest first.
    pub async fn articles_for_entity(&self, entity_key: &str) -> Result<Vec<Article>> {
        let conn = self.conn().await;
        query_articles(
            &conn,
            &format!(
                "SELECT {SELECT_COLS} FROM articles WHERE entity_key = ?1 ORDER BY version"
            ),
            params![entity_key],
        )
        .await
    }

    /// The article occupying the entity's active slot, if any.
    pub async fn active_article(&self, entity_key: &str) -> Result<Option<Article>> {
        let conn = self.conn().await;
        active_for_entity(&conn, entity_key, None).await
    }

    /// Approved articles whose retry backoff (if any) has elapsed by `now`.
    pub async fn list_publishable(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<Article>> {
        let now = ts(now);
        let conn = self.conn().await;
        query_articles(
            &conn,
            &format!(
                "SELECT {SELECT_COLS} FROM articles
                 WHERE state = 'approved'
                   AND (next_attempt_at IS NULL OR next_attempt_at <= ?1)
                 ORDER BY state_changed_at, article_id LIMIT ?2"
            ),
            params![now.as_str(), i64::from(limit)],
        )
        .await
    }

    /// Articles flagged for operator attention, most recent first.
    pub async fn articles_needing_attention(&self) -> Result<Vec<Article>> {
        let conn = self.conn().await;
        query_articles(
            &conn,
            &format!(
                "SELECT {SELECT_COLS} FROM articles WHERE needs_attention = 1
                 ORDER BY state_changed_at DESC"
            ),
            params![],
        )
        .await
    }

    /// Move an article along one lifecycle edge.
    ///
    /// Repeating `published` with the same external post id is a no-op that
    /// returns the stored article without writing history.
    pub async fn transition_article(
        &self,
        article_id: &ArticleId,
        transition: Transition<'_>,
    ) -> Result<Article> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let current = load(&tx, article_id).await?;

        if current.state == ArticleState::Published && transition.to == ArticleState::Published {
            return if current.external_post_id.as_deref() == transition.external_post_id {
                Ok(current)
            } else {
                Err(AutopressError::invalid_transition(
                    article_id.to_string(),
                    format!(
                        "already published as {}",
                        current.external_post_id.as_deref().unwrap_or("<none>")
                    ),
                ))
            };
        }

        let next = write_transition(&tx, &current, &transition).await?;
        tx.commit().await.map_err(db_err)?;
        Ok(next)
    }

    /// Move a `generated` article to `pending_review`, enforcing one active
    /// article per entity under `policy`.
    pub async fn submit_article(
        &self,
        article_id: &ArticleId,
        policy: DuplicatePolicy,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Article> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let current = load(&tx, article_id).await?;
        if current.state != ArticleState::Generated {
            return Err(AutopressError::invalid_transition(
                article_id.to_string(),
                format!("cannot submit from {}", current.state),
            ));
        }

        if let Some(other) = active_for_entity(&tx, &current.entity_key, Some(article_id)).await? {
            match (policy, other.state) {
                (DuplicatePolicy::Supersede, ArticleState::PendingReview) => {
                    let note = format!("superseded by {article_id}");
                    let t = Transition::new(ArticleState::Rejected, actor, at).note(Some(&note));
                    write_transition(&tx, &other, &t).await?;
                }
                _ => {
                    return Err(AutopressError::invalid_transition(
                        article_id.to_string(),
                        format!(
                            "entity {} already has article {} in {}",
                            current.entity_key, other.article_id, other.state
                        ),
                    ));
                }
            }
        }

        let next = write_transition(
            &tx,
            &current,
            &Transition::new(ArticleState::PendingReview, actor, at),
        )
        .await?;
        tx.commit().await.map_err(db_err)?;
        Ok(next)
    }

    /// Replace the content of an article still before review completes.
    /// The article takes the entity's next version number.
    pub async fn revise_article(
        &self,
        article_id: &ArticleId,
        payload: &ContentPayload,
        seo_score: Option<f64>,
    ) -> Result<Article> {
        self.check_writable()?;
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let mut article = load(&tx, article_id).await?;
        if !matches!(
            article.state,
            ArticleState::Generated | ArticleState::PendingReview
        ) {
            return Err(AutopressError::invalid_transition(
                article_id.to_string(),
                format!("cannot revise in {}", article.state),
            ));
        }

        article.version = next_version(&tx, &article.entity_key).await?;
        article.payload = payload.clone();
        if let Some(score) = seo_score {
            article.seo_score = score;
        }

        let id = article_id.to_string();
        let payload_json = to_json(&article.payload)?;
        tx.execute(
            "UPDATE articles SET payload_json = ?1, seo_score = ?2, version = ?3
             WHERE article_id = ?4 AND state = ?5",
            params![
                payload_json.as_str(),
                article.seo_score,
                article.version,
                id.as_str(),
                article.state.as_str()
            ],
        )
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(article)
    }

    /// Transition log of one article, oldest first.
    pub async fn article_history(&self, article_id: &ArticleId) -> Result<Vec<HistoryEntry>> {
        let id = article_id.to_string();
        let conn = self.conn().await;
        let mut rows = conn
            .query(
                "SELECT from_state, to_state, at, actor, note
                 FROM article_history WHERE article_id = ?1 ORDER BY id",
                params![id.as_str()],
            )
            .await
            .map_err(db_err)?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            out.push(HistoryEntry {
                article_id: article_id.clone(),
                from_state: get_opt_parsed(&row, 0)?,
                to_state: get_parsed(&row, 1)?,
                at: get_ts(&row, 2)?,
                actor: get_string(&row, 3)?,
                note: get_opt_string(&row, 4)?,
            });
        }
        Ok(out)
    }

    /// Per-state counts plus recent-creation and attention tallies.
    pub async fn article_statistics(&self, now: DateTime<Utc>) -> Result<ArticleStatistics> {
        let week_ago = ts(now - Duration::days(7));
        let conn = self.conn().await;

        let mut by_state = BTreeMap::new();
        let mut rows = conn
            .query("SELECT state, COUNT(*) FROM articles GROUP BY state", params![])
            .await
            .map_err(db_err)?;
        while let Some(row) = rows.next().await.map_err(db_err)? {
            let state: ArticleState = get_parsed(&row, 0)?;
            by_state.insert(state, get_u64(&row, 1)?);
        }

        let mut rows = conn
            .query(
                "SELECT
                     (SELECT COUNT(*) FROM articles WHERE created_at >= ?1),
                     (SELECT COUNT(*) FROM articles WHERE needs_attention = 1)",
                params![week_ago.as_str()],
            )
            .await
            .map_err(db_err)?;
        let (recent, attention) = match rows.next().await.map_err(db_err)? {
            Some(row) => (get_u64(&row, 0)?, get_u64(&row, 1)?),
            None => (0, 0),
        };

        Ok(ArticleStatistics {
            total: by_state.values().sum(),
            by_state,
            created_last_7_days: recent,
            needing_attention: attention,
        })
    }

    /// Delete rejected and published articles whose last state change predates
    /// `older_than`, with their history and attempts. Returns articles removed.
    pub async fn purge_articles(&self, older_than: DateTime<Utc>) -> Result<u64> {
        self.check_writable()?;
        let cutoff = ts(older_than);
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        const DOOMED: &str = "SELECT article_id FROM articles
             WHERE state IN ('rejected', 'published') AND state_changed_at < ?1";

        tx.execute(
            &format!("DELETE FROM article_history WHERE article_id IN ({DOOMED})"),
            params![cutoff.as_str()],
        )
        .await
        .map_err(db_err)?;
        tx.execute(
            &format!("DELETE FROM publish_attempts WHERE article_id IN ({DOOMED})"),
            params![cutoff.as_str()],
        )
        .await
        .map_err(db_err)?;
        let removed = tx
            .execute(
                "DELETE FROM articles
                 WHERE state IN ('rejected', 'published') AND state_changed_at < ?1",
                params![cutoff.as_str()],
            )
            .await
            .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(removed)
    }

    /// Fail articles stuck in `publishing` since before `older_than`.
    ///
    /// Each becomes `publish_failed` with kind `interrupted` and the attention
    /// flag set; its pending attempt row is finalized as failed.
    pub async fn recover_stale_publishing(
        &self,
        older_than: DateTime<Utc>,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<Article>> {
        self.check_writable()?;
        let cutoff = ts(older_than);
        let at_s = ts(at);
        let conn = self.conn().await;
        let tx = conn.transaction().await.map_err(db_err)?;

        let stale = query_articles(
            &tx,
            &format!(
                "SELECT {SELECT_COLS} FROM articles
                 WHERE state = 'publishing' AND state_changed_at < ?1"
            ),
            params![cutoff.as_str()],
        )
        .await?;

        let mut recovered = Vec::with_capacity(stale.len());
        for article in stale {
            let t = Transition::new(ArticleState::PublishFailed, actor, at)
                .note(Some("publishing interrupted"))
                .error_kind(FailureKind::Interrupted)
                .needs_attention(true);
            let next = write_transition(&tx, &article, &t).await?;

            let id = article.article_id.to_string();
            tx.execute(
                "UPDATE publish_attempts
                 SET status = 'failed', error_kind = ?1, error_message = ?2, finished_at = ?3
                 WHERE article_id = ?4 AND status = 'pending'",
                params![
                    FailureKind::Interrupted.as_str(),
                    "publishing interrupted",
                    at_s.as_str(),
                    id.as_str()
                ],
            )
            .await
            .map_err(db_err)?;
            recovered.push(next);
        }

        tx.commit().await.map_err(db_err)?;
        Ok(recovered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_storage;

    fn payload(title: &str) -> ContentPayload {
        ContentPayload {
            title: title.into(),
            body: format!("<p>{title}</p>"),
            ..Default::default()
        }
    }

    async fn pending(storage: &Storage, entity: &str) -> Article {
        let now = Utc::now();
        let a = storage
            .insert_article(entity, &payload(entity), 70.0, "pipeline", now)
            .await
            .unwrap();
        storage
            .submit_article(&a.article_id, DuplicatePolicy::Reject, "pipeline", now)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn insert_assigns_increasing_versions() {
        let storage = test_storage().await;
        let now = Utc::now();
        let a = storage
            .insert_article("sku-1", &payload("a"), 50.0, "pipeline", now)
            .await
            .unwrap();
        let b = storage
            .insert_article("sku-1", &payload("b"), 50.0, "pipeline", now)
            .await
            .unwrap();
        let other = storage
            .insert_article("sku-2", &payload("c"), 50.0, "pipeline", now)
            .await
            .unwrap();
        assert_eq!(a.version, 1);
        assert_eq!(b.version, 2);
        assert_eq!(other.version, 1);

        let history = storage.article_history(&a.article_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].from_state, None);
        assert_eq!(history[0].to_state, ArticleState::Generated);
    }

    #[tokio::test]
    async fn review_transitions_write_history_and_note() {
        let storage = test_storage().await;
        let a = pending(&storage, "sku-1").await;
        assert_eq!(a.state, ArticleState::PendingReview);

        let approved = storage
            .transition_article(
                &a.article_id,
                Transition::new(ArticleState::Approved, "alice", Utc::now()).note(Some("ok")),
            )
            .await
            .unwrap();
        assert_eq!(approved.state, ArticleState::Approved);
        assert_eq!(approved.reviewer_note.as_deref(), Some("ok"));

        let history = storage.article_history(&a.article_id).await.unwrap();
        let states: Vec<_> = history.iter().map(|h| h.to_state).collect();
        assert_eq!(
            states,
            vec![
                ArticleState::Generated,
                ArticleState::PendingReview,
                ArticleState::Approved
            ]
        );
        assert_eq!(history[2].actor, "alice");
        for pair in history.windows(2) {
            assert_eq!(pair[1].from_state, Some(pair[0].to_state));
        }
    }

    #[tokio::test]
    async fn illegal_edge_is_rejected_without_history() {
        let storage = test_storage().await;
        let a = pending(&storage, "sku-1").await;
        let err = storage
            .transition_article(
                &a.article_id,
                Transition::new(ArticleState::Published, "x", Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AutopressError::InvalidTransition { .. }));
        assert_eq!(storage.article_history(&a.article_id).await.unwrap().len(), 2);

        let missing = storage
            .transition_article(
                &ArticleId::new(),
                Transition::new(ArticleState::Approved, "x", Utc::now()),
            )
            .await
            .unwrap_err();
        assert!(matches!(missing, AutopressError::NotFound { .. }));
    }

    #[tokio::test]
    async fn duplicate_submission_rejected_by_default() {
        let storage = test_storage().await;
        let first = pending(&storage, "sku-1").await;
        let now = Utc::now();
        let second = storage
            .insert_article("sku-1", &payload("again"), 60.0, "pipeline", now)
            .await
            .unwrap();

        let err = storage
            .submit_article(&second.article_id, DuplicatePolicy::Reject, "pipeline", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AutopressError::InvalidTransition { .. }));

        let first = storage.get_article(&first.article_id).await.unwrap().unwrap();
        assert_eq!(first.state, ArticleState::PendingReview);
    }

    #[tokio::test]
    async fn supersede_replaces_pending_but_not_approved() {
        let storage = test_storage().await;
        let first = pending(&storage, "sku-1").await;
        let now = Utc::now();
        let second = storage
            .insert_article("sku-1", &payload("v2"), 60.0, "pipeline", now)
            .await
            .unwrap();
        let second = storage
            .submit_article(&second.article_id, DuplicatePolicy::Supersede, "pipeline", now)
            .await
            .unwrap();
        assert_eq!(second.state, ArticleState::PendingReview);

        let first = storage.get_article(&first.article_id).await.unwrap().unwrap();
        assert_eq!(first.state, ArticleState::Rejected);
        let history = storage.article_history(&first.article_id).await.unwrap();
        let last = history.last().unwrap();
        assert!(last.note.as_deref().unwrap().starts_with("superseded by"));

        storage
            .transition_article(
                &second.article_id,
                Transition::new(ArticleState::Approved, "alice", now),
            )
            .await
            .unwrap();
        let third = storage
            .insert_article("sku-1", &payload("v3"), 60.0, "pipeline", now)
            .await
            .unwrap();
        let err = storage
            .submit_article(&third.article_id, DuplicatePolicy::Supersede, "pipeline", now)
            .await
            .unwrap_err();
        assert!(matches!(err, AutopressError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn mark_published_is_idempotent_for_same_post() {
        let storage = test_storage().await;
        let a = pending(&storage, "sku-1").await;
        let now = Utc::now();
        for state in [ArticleState::Approved, ArticleState::Publishing] {
            storage
                .transition_article(&a.article_id, Transition::new(state, "x", now))
                .await
                .unwrap();
        }
        let published = Transition::new(ArticleState::Published, "coordinator", now)
            .external_post_id(Some("42"));
        storage
            .transition_article(&a.article_id, published.clone())
            .await
            .unwrap();
        let before = storage.article_history(&a.article_id).await.unwrap().len();

        let again = storage
            .transition_article(&a.article_id, published)
            .await
            .unwrap();
        assert_eq!(again.external_post_id.as_deref(), Some("42"));
        assert_eq!(storage.article_history(&a.article_id).await.unwrap().len(), before);

        let other = storage
            .transition_article(
                &a.article_id,
                Transition::new(ArticleState::Published, "coordinator", now)
                    .external_post_id(Some("43")),
            )
            .await;
        assert!(other.is_err());
    }

    #[tokio::test]
    async fn publishable_respects_backoff() {
        let storage = test_storage().await;
        let a = pending(&storage, "sku-1").await;
        let now = Utc::now();
        for state in [ArticleState::Approved, ArticleState::Publishing] {
            storage
                .transition_article(&a.article_id, Transition::new(state, "x", now))
                .await
                .unwrap();
        }
        let retry_at = now + Duration::minutes(5);
        let back = storage
            .transition_article(
                &a.article_id,
                Transition::new(ArticleState::Approved, "coordinator", now)
                    .retry_at(retry_at)
                    .error_kind(FailureKind::Timeout),
            )
            .await
            .unwrap();
        assert_eq!(back.last_error_kind, Some(FailureKind::Timeout));

        assert!(storage.list_publishable(now, 10).await.unwrap().is_empty());
        let later = storage
            .list_publishable(retry_at + Duration::seconds(1), 10)
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
    }

    #[tokio::test]
    async fn revise_bumps_version_only_before_approval() {
        let storage = test_storage().await;
        let a = pending(&storage, "sku-1").await;
        let revised = storage
            .revise_article(&a.article_id, &payload("edited"), Some(90.0))
            .await
            .unwrap();
        assert_eq!(revised.version, a.version + 1);
        assert_eq!(revised.payload.title, "edited");
        assert_eq!(revised.seo_score, 90.0);

        storage
            .transition_article(
                &a.article_id,
                Transition::new(ArticleState::Rejected, "alice", Utc::now()),
            )
            .await
            .unwrap();
        assert!(
            storage
                .revise_article(&a.article_id, &payload("late"), None)
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn statistics_and_purge() {
        let storage = test_storage().await;
        let old = Utc::now() - Duration::days(120);
        let a = storage
            .insert_article("sku-old", &payload("old"), 10.0, "pipeline", old)
            .await
            .unwrap();
        storage
            .submit_article(&a.article_id, DuplicatePolicy::Reject, "pipeline", old)
            .await
            .unwrap();
        storage
            .transition_article(&a.article_id, Transition::new(ArticleState::Rejected, "bob", old))
            .await
            .unwrap();
        pending(&storage, "sku-new").await;

        let stats = storage.article_statistics(Utc::now()).await.unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.count(ArticleState::Rejected), 1);
        assert_eq!(stats.count(ArticleState::PendingReview), 1);
        assert_eq!(stats.created_last_7_days, 1);

        let removed = storage
            .purge_articles(Utc::now() - Duration::days(90))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(storage.get_article(&a.article_id).await.unwrap().is_none());
        assert!(storage.article_history(&a.article_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stale_publishing_is_recovered() {
        let storage = test_storage().await;
        let a = pending(&storage, "sku-1").await;
        let long_ago = Utc::now() - Duration::hours(12);
        storage
            .transition_article(&a.article_id, Transition::new(ArticleState::Approved, "x", long_ago))
            .await
            .unwrap();
        storage
            .begin_publish_attempt(&a.article_id, "coordinator", long_ago)
            .await
            .unwrap();

        let recovered = storage
            .recover_stale_publishing(Utc::now() - Duration::hours(6), "recovery", Utc::now())
            .await
            .unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].state, ArticleState::PublishFailed);
        assert_eq!(recovered[0].last_error_kind, Some(FailureKind::Interrupted));
        assert!(recovered[0].needs_attention);

        let attempts = storage.list_attempts(&a.article_id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].status, autopress_shared::AttemptStatus::Failed);
        assert_eq!(storage.articles_needing_attention().await.unwrap().len(), 1);
    }
}
