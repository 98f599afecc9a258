//! C6: the review session state machine, grounded on
//! `original_source/sr/review_session.py`'s `ReviewSession` (the
//! `undo_stack` design, kept verbatim) and `server_review.py`'s
//! skip/suspend/flag HTTP handlers (translated into plain methods here,
//! since this crate has no HTTP surface).

use crate::adapter::get_adapter_from_string;
use crate::catalog::Catalog;
use crate::config::Clock;
use crate::model::{Card, CardId, Grade, Timestamp};
use crate::scheduler::Scheduler;
use crate::{Error, LibraryError, SessionErrorKind};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use uuid::Uuid;

/// Optional scope filters a session is created with.
#[derive(Debug, Clone, Default)]
pub struct ReviewFilters {
    pub tag: Option<String>,
    pub path_prefix: Option<String>,
    pub flag: Option<String>,
}

struct ServedCard {
    card: Card,
    served_at: DateTime<Utc>,
    flipped_at: Option<DateTime<Utc>>,
}

/// Pre-grade state pushed so `undo` can roll a completed cycle back into
/// `SHOWN_BACK`.
struct UndoEntry {
    served: ServedCard,
    newly_excluded: Vec<CardId>,
}

/// Stateful cursor over due cards for one scope. `IDLE -> SERVING ->
/// SHOWN_BACK -> (grade/skip/suspend) -> IDLE`, with `undo` rolling the
/// last completed cycle back into `SHOWN_BACK`.
pub struct ReviewSession {
    catalog: Catalog,
    scheduler: Option<Box<dyn Scheduler>>,
    filters: ReviewFilters,
    session_id: String,
    token: String,
    current: Option<ServedCard>,
    excluded: HashSet<CardId>,
    undo_stack: Vec<UndoEntry>,
    reviewed: u64,
}

impl ReviewSession {
    #[must_use]
    pub fn new(catalog: Catalog, scheduler: Option<Box<dyn Scheduler>>, filters: ReviewFilters) -> Self {
        Self {
            catalog,
            scheduler,
            filters,
            session_id: Uuid::new_v4().to_string(),
            token: Uuid::new_v4().to_string(),
            current: None,
            excluded: HashSet::new(),
            undo_stack: Vec::new(),
            reviewed: 0,
        }
    }

    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }

    #[must_use]
    pub fn reviewed(&self) -> u64 {
        self.reviewed
    }

    #[must_use]
    pub fn current_card(&self) -> Option<&Card> {
        self.current.as_ref().map(|s| &s.card)
    }

    /// Due-card selection: active
    /// gradable cards matching scope, not excluded, with no recommendation or
    /// a recommendation time <= now. Recommended cards sort first, then by
    /// time, then by id.
    pub async fn get_next_card(&mut self, clock: &dyn Clock) -> Result<Option<&Card>, Error> {
        let now = Timestamp::from_datetime(clock.now());
        let (clause, params) = self.filter_clause();
        let query = format!(
            r"SELECT c.* FROM cards c
               JOIN card_state cs ON c.id = cs.card_id
               LEFT JOIN recommendations r ON c.id = r.card_id AND r.scheduler_id = ?
               WHERE cs.status = 'active' AND c.gradable = 1
                 AND (r.time IS NULL OR r.time <= ?){clause}
               ORDER BY CASE WHEN r.time IS NULL THEN 1 ELSE 0 END, r.time ASC, c.id ASC
               LIMIT 1"
        );
        let mut q = sqlx::query_as::<_, Card>(&query)
            .bind(self.scheduler_id())
            .bind(&now.0);
        q = bind_params(q, &params);
        let card = q
            .fetch_optional(self.catalog.pool())
            .await
            .map_err(|e| Error::Sqlx { source: e })?;

        self.current = card.clone().map(|card| ServedCard {
            card,
            served_at: clock.now(),
            flipped_at: None,
        });
        Ok(self.current.as_ref().map(|s| &s.card))
    }

    pub async fn remaining_count(&self, clock: &dyn Clock) -> Result<i64, Error> {
        let now = Timestamp::from_datetime(clock.now());
        let (clause, params) = self.filter_clause();
        let query = format!(
            r"SELECT COUNT(*) FROM cards c
               JOIN card_state cs ON c.id = cs.card_id
               LEFT JOIN recommendations r ON c.id = r.card_id AND r.scheduler_id = ?
               WHERE cs.status = 'active' AND c.gradable = 1
                 AND (r.time IS NULL OR r.time <= ?){clause}"
        );
        let mut q = sqlx::query_as::<_, (i64,)>(&query)
            .bind(self.scheduler_id())
            .bind(&now.0);
        q = bind_params(q, &params);
        let (count,) = q
            .fetch_one(self.catalog.pool())
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Ok(count)
    }

    fn scheduler_id(&self) -> &'static str {
        self.scheduler.as_ref().map_or("", |s| s.scheduler_id())
    }

    pub fn render_front(&self, card: &Card) -> Result<String, Error> {
        let adapter = get_adapter_from_string(&card.adapter)?;
        Ok(adapter.render_front(&card.content))
    }

    pub fn flip(&mut self, clock: &dyn Clock) -> Result<String, Error> {
        let served = self
            .current
            .as_mut()
            .ok_or_else(|| no_current_card("flip"))?;
        served.flipped_at = Some(clock.now());
        let adapter = get_adapter_from_string(&served.card.adapter)?;
        Ok(adapter.render_back(&served.card.content))
    }

    /// Applies a grade to the current card.
    pub async fn grade_current(
        &mut self,
        grade: i64,
        feedback: Option<&str>,
        response: Option<&Value>,
        clock: &dyn Clock,
    ) -> Result<(), Error> {
        if Grade::from_i64(grade).is_none() {
            return Err(Error::Library(LibraryError::Session(
                SessionErrorKind::InvalidGrade(grade),
            )));
        }
        let served = self
            .current
            .take()
            .ok_or_else(|| no_current_card("grade"))?;
        let now = clock.now();
        let card_id = served.card.id;

        let time_on_front_ms = served
            .flipped_at
            .map(|flip| (flip - served.served_at).num_milliseconds());
        let time_on_card_ms = Some((now - served.served_at).num_milliseconds());

        let mut tx = self
            .catalog
            .pool()
            .begin()
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        let timestamp = Timestamp::from_datetime(now);
        Catalog::append_review_event(
            &mut tx,
            card_id,
            &self.session_id,
            &timestamp,
            grade,
            time_on_front_ms,
            time_on_card_ms,
            feedback,
            response,
        )
        .await?;

        if let Some(scheduler) = &self.scheduler {
            let event = crate::model::ReviewEvent {
                id: 0,
                card_id,
                session_id: self.session_id.clone(),
                timestamp: timestamp.clone(),
                grade,
                time_on_front_ms,
                time_on_card_ms,
                feedback: feedback.map(str::to_string),
                response: response.cloned(),
            };
            match scheduler.on_review(&event).await {
                Ok(recs) => {
                    for rec in recs {
                        Catalog::upsert_recommendation(&mut tx, &rec).await?;
                    }
                }
                Err(e) => log::warn!("scheduler hook on_review failed for card {card_id}: {e}"),
            }
        }
        tx.commit().await.map_err(|e| Error::Sqlx { source: e })?;

        self.advance_past(served).await
    }

    /// Used for non-gradable cards: same exclusion logic as grading, no
    /// review event.
    pub async fn skip(&mut self) -> Result<(), Error> {
        let served = self.current.take().ok_or_else(|| no_current_card("skip"))?;
        self.advance_past(served).await
    }

    /// Flips the current card's status to inactive, drops its
    /// recommendation, notifies the scheduler, then advances exactly as a
    /// skip.
    pub async fn suspend(&mut self, clock: &dyn Clock) -> Result<(), Error> {
        let served = self
            .current
            .take()
            .ok_or_else(|| no_current_card("suspend"))?;
        let card_id = served.card.id;
        let now = Timestamp::from_datetime(clock.now());

        let mut conn = self
            .catalog
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Catalog::set_card_status(&mut conn, card_id, "inactive", &now).await?;
        Catalog::delete_recommendations(&mut conn, card_id).await?;
        if let Some(scheduler) = &self.scheduler {
            if let Err(e) = scheduler.on_card_status_changed(card_id, "inactive").await {
                log::warn!("scheduler hook on_card_status_changed(inactive) failed for card {card_id}: {e}");
            }
        }

        self.advance_past(served).await
    }

    /// Pops the undo stack, restoring the popped card as current with
    /// flip-time already set. The review event is never removed; the log is
    /// append-only.
    pub fn undo(&mut self) -> Result<(), Error> {
        let entry = self
            .undo_stack
            .pop()
            .ok_or_else(|| Error::Library(LibraryError::Session(SessionErrorKind::EmptyUndoStack)))?;
        self.excluded.remove(&entry.served.card.id);
        for sibling in &entry.newly_excluded {
            self.excluded.remove(sibling);
        }
        self.reviewed = self.reviewed.saturating_sub(1);
        self.current = Some(entry.served);
        Ok(())
    }

    pub async fn add_flag(&self, flag: &str, note: Option<&str>) -> Result<(), Error> {
        let card_id = self.current_card_id()?;
        let mut conn = self
            .catalog
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Catalog::add_flag(&mut conn, card_id, flag, note).await
    }

    pub async fn remove_flag(&self, flag: &str) -> Result<(), Error> {
        let card_id = self.current_card_id()?;
        let mut conn = self
            .catalog
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Catalog::remove_flag(&mut conn, card_id, flag).await
    }

    fn current_card_id(&self) -> Result<CardId, Error> {
        self.current
            .as_ref()
            .map(|s| s.card.id)
            .ok_or_else(|| no_current_card("flag"))
    }

    /// Exclusion: the card and every `mutually_exclusive` sibling (in either
    /// direction) are added to the excluded set, so siblings do not appear
    /// again in this session; the pre-advance state is pushed to the undo
    /// stack.
    async fn advance_past(&mut self, served: ServedCard) -> Result<(), Error> {
        let card_id = served.card.id;
        let mut conn = self
            .catalog
            .pool()
            .acquire()
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        let siblings = Catalog::mutually_exclusive_siblings(&mut conn, card_id).await?;

        self.reviewed += 1;
        self.excluded.insert(card_id);
        let mut newly_excluded = Vec::new();
        for sibling in siblings {
            if self.excluded.insert(sibling) {
                newly_excluded.push(sibling);
            }
        }
        self.undo_stack.push(UndoEntry {
            served,
            newly_excluded,
        });
        Ok(())
    }

    fn filter_clause(&self) -> (String, Vec<FilterParam>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(tag) = &self.filters.tag {
            clauses.push("c.id IN (SELECT card_id FROM card_tags WHERE tag = ?)".to_string());
            params.push(FilterParam::Text(tag.clone()));
        }
        if let Some(prefix) = &self.filters.path_prefix {
            clauses.push("c.source_path LIKE ?".to_string());
            params.push(FilterParam::Text(format!("{prefix}%")));
        }
        if let Some(flag) = &self.filters.flag {
            clauses.push("c.id IN (SELECT card_id FROM card_flags WHERE flag = ?)".to_string());
            params.push(FilterParam::Text(flag.clone()));
        }
        if !self.excluded.is_empty() {
            let placeholders = std::iter::repeat("?")
                .take(self.excluded.len())
                .collect::<Vec<_>>()
                .join(", ");
            clauses.push(format!("c.id NOT IN ({placeholders})"));
            params.extend(self.excluded.iter().map(|&id| FilterParam::Id(id)));
        }
        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!(" AND {}", clauses.join(" AND ")), params)
        }
    }
}

enum FilterParam {
    Text(String),
    Id(CardId),
}

fn bind_params<'q, O>(
    mut q: sqlx::query::QueryAs<'q, sqlx::Sqlite, O, sqlx::sqlite::SqliteArguments<'q>>,
    params: &'q [FilterParam],
) -> sqlx::query::QueryAs<'q, sqlx::Sqlite, O, sqlx::sqlite::SqliteArguments<'q>> {
    for param in params {
        q = match param {
            FilterParam::Text(s) => q.bind(s),
            FilterParam::Id(id) => q.bind(id),
        };
    }
    q
}

fn no_current_card(action: &'static str) -> Error {
    Error::Library(LibraryError::Session(SessionErrorKind::NoCurrentCard(
        action,
    )))
}

const TERMINAL_FALLBACKS: &[&str] = &["kitty -e", "alacritty -e", "foot", "xterm -e"];

/// Builds the shell command a caller would spawn to jump an editor to
/// `file_path:line`. Pure string templating; actually spawning the process
/// is left to the caller (the thin CLI). Honors `settings.edit_command`'s
/// `{file}`/`{line}` placeholders first, then falls back to `$EDITOR` run
/// through the first terminal emulator found on `$PATH`, then bare `$EDITOR`.
#[must_use]
pub fn build_edit_command(edit_command: Option<&str>, file_path: &str, line: i64) -> String {
    if let Some(template) = edit_command {
        return template
            .replace("{file}", &shell_quote(file_path))
            .replace("{line}", &line.to_string());
    }
    let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
    for term_cmd in TERMINAL_FALLBACKS {
        let bin = term_cmd.split(' ').next().unwrap_or(term_cmd);
        if binary_on_path(bin) {
            return format!("{term_cmd} {editor} +{line} {}", shell_quote(file_path));
        }
    }
    format!("{editor} +{line} {}", shell_quote(file_path))
}

fn binary_on_path(bin: &str) -> bool {
    let Ok(path_var) = std::env::var("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(bin).is_file())
}

/// POSIX single-quote escaping, equivalent to Python's `shlex.quote`.
fn shell_quote(text: &str) -> String {
    if !text.is_empty() && text.chars().all(is_shell_safe) {
        return text.to_string();
    }
    format!("'{}'", text.replace('\'', "'\\''"))
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '@' | '%' | '+' | '=' | ':')
}

#[cfg(test)]
mod review_session_tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::config::FixedClock;
    use crate::model::RELATION_MUTUALLY_EXCLUSIVE;
    use crate::scheduler::impls::sm2::Sm2Scheduler;
    use chrono::TimeZone;
    use serde_json::json;

    async fn seeded_catalog(n: usize) -> Catalog {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let now = Timestamp::from_datetime(Utc::now());
        let mut conn = catalog.pool().acquire().await.unwrap();
        for i in 0..n {
            let id = Catalog::insert_card(
                &mut conn,
                "cards.md",
                &format!("qa_{i}"),
                "basic",
                &json!({"question": "q", "answer": "a"}),
                &format!("hash{i}"),
                "q",
                true,
                1,
                "active",
                &now,
            )
            .await
            .unwrap();
            let _ = id;
        }
        catalog
    }

    #[tokio::test]
    async fn get_next_card_returns_due_card() {
        let catalog = seeded_catalog(1).await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        let card = session.get_next_card(&clock).await.unwrap();
        assert!(card.is_some());
    }

    #[tokio::test]
    async fn remaining_count_drops_to_zero_after_grading() {
        let catalog = seeded_catalog(1).await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        assert_eq!(session.remaining_count(&clock).await.unwrap(), 1);
        session.get_next_card(&clock).await.unwrap();
        session.grade_current(1, None, None, &clock).await.unwrap();
        assert_eq!(session.remaining_count(&clock).await.unwrap(), 0);
        assert_eq!(session.reviewed(), 1);
    }

    #[tokio::test]
    async fn undo_restores_the_card_as_current_and_decrements_reviewed() {
        let catalog = seeded_catalog(1).await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        session.get_next_card(&clock).await.unwrap();
        session.grade_current(1, None, None, &clock).await.unwrap();
        assert_eq!(session.reviewed(), 1);

        session.undo().unwrap();
        assert_eq!(session.reviewed(), 0);
        assert!(session.current_card().is_some());
    }

    #[tokio::test]
    async fn undo_with_nothing_graded_is_an_error() {
        let catalog = seeded_catalog(1).await;
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        assert!(session.undo().is_err());
    }

    #[tokio::test]
    async fn suspend_excludes_the_card_from_later_selection() {
        let catalog = seeded_catalog(1).await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        session.get_next_card(&clock).await.unwrap();
        session.suspend(&clock).await.unwrap();
        assert_eq!(session.remaining_count(&clock).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn grading_a_card_excludes_its_mutually_exclusive_sibling() {
        let catalog = seeded_catalog(2).await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        Catalog::insert_relation(&mut conn, 1, 2, RELATION_MUTUALLY_EXCLUSIVE)
            .await
            .unwrap();
        drop(conn);

        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        session.get_next_card(&clock).await.unwrap();
        session.grade_current(1, None, None, &clock).await.unwrap();
        assert_eq!(session.remaining_count(&clock).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn grade_current_rejects_an_invalid_grade() {
        let catalog = seeded_catalog(1).await;
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog, None, ReviewFilters::default());
        session.get_next_card(&clock).await.unwrap();
        assert!(session.grade_current(7, None, None, &clock).await.is_err());
    }

    #[tokio::test]
    async fn scheduler_hook_runs_and_sets_a_recommendation() {
        let catalog = seeded_catalog(1).await;
        let scheduler: Box<dyn Scheduler> =
            Box::new(Sm2Scheduler::new(catalog.pool().clone()));
        let clock = FixedClock(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
        let mut session = ReviewSession::new(catalog.clone(), Some(scheduler), ReviewFilters::default());
        session.get_next_card(&clock).await.unwrap();
        session.grade_current(1, None, None, &clock).await.unwrap();

        let mut conn = catalog.pool().acquire().await.unwrap();
        let rec = Catalog::recommendation_for(&mut conn, 1, "sm2").await.unwrap();
        assert!(rec.is_some());
    }
}

#[cfg(test)]
mod edit_command_tests {
    use super::*;

    #[test]
    fn template_substitutes_file_and_line() {
        let cmd = build_edit_command(Some("code --goto {file}:{line}"), "notes/a.md", 12);
        assert_eq!(cmd, "code --goto notes/a.md:12");
    }

    #[test]
    fn quotes_paths_with_spaces() {
        let cmd = build_edit_command(Some("{file}"), "my notes/a.md", 1);
        assert_eq!(cmd, "'my notes/a.md'");
    }

    #[test]
    fn falls_back_to_editor_env_without_template() {
        // SAFETY: test-only env mutation, single-threaded within this test.
        unsafe { std::env::set_var("EDITOR", "nano") };
        unsafe { std::env::set_var("PATH", "/nonexistent") };
        let cmd = build_edit_command(None, "a.md", 3);
        assert_eq!(cmd, "nano +3 a.md");
    }
}
