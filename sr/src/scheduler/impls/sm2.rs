//! Reference SM-2 (SuperMemo 2) scheduler policy. Maintains its own
//! per-card state (ease factor, interval, repetitions) in a private SQLite
//! database, grounded on
//! `original_source/example_sr_dir/schedulers/sm2/sm2.py`, structurally a
//! self-contained policy module owning its own storage.

use crate::Error;
use crate::model::{CardId, Recommendation, ReviewEvent, Timestamp};
use crate::scheduler::Scheduler;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS sm2_state (
    card_id INTEGER PRIMARY KEY,
    ease_factor REAL NOT NULL DEFAULT 2.5,
    interval_days REAL NOT NULL DEFAULT 0,
    repetitions INTEGER NOT NULL DEFAULT 0,
    last_review TEXT,
    next_review TEXT
);
";

const DEFAULT_EASE: f64 = 2.5;
const MIN_EASE: f64 = 1.3;
const MAX_EASE: f64 = 3.0;

#[derive(Debug, Clone, Copy, sqlx::FromRow)]
struct Sm2State {
    ease_factor: f64,
    interval_days: f64,
    repetitions: i64,
}

pub struct Sm2Scheduler {
    pool: SqlitePool,
}

impl Sm2Scheduler {
    /// Assumes `pool`'s schema is already migrated; used by tests and by
    /// callers that share a pool across scheduler instances.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) `{scheduler_dir}/sm2.db` and applies the
    /// schema, mirroring `Scheduler.__init__`'s `sm2.db` path convention
    /// (mirroring the application directory layout).
    pub async fn connect(db_path: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{db_path}"))
            .map_err(|e| Error::Sqlx { source: e })?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        sqlx::raw_sql(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Ok(Self { pool })
    }

    async fn state_for(&self, card_id: CardId) -> Result<Option<Sm2State>, Error> {
        sqlx::query_as("SELECT ease_factor, interval_days, repetitions FROM sm2_state WHERE card_id = ?")
            .bind(card_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Sqlx { source: e })
    }

    fn precision_seconds(interval_days: f64) -> i64 {
        ((interval_days * 86400.0 * 0.1) as i64).max(60)
    }
}

#[async_trait]
impl Scheduler for Sm2Scheduler {
    fn scheduler_id(&self) -> &'static str {
        "sm2"
    }

    async fn on_card_created(&self, card_id: CardId) -> Result<Option<Recommendation>, Error> {
        sqlx::query(
            r"INSERT OR REPLACE INTO sm2_state (card_id, ease_factor, interval_days, repetitions)
              VALUES (?, ?, 0, 0)",
        )
        .bind(card_id)
        .bind(DEFAULT_EASE)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;

        Ok(Some(Recommendation {
            card_id,
            scheduler_id: self.scheduler_id().to_string(),
            time: Timestamp::from_datetime(Utc::now()),
            precision_seconds: 60,
        }))
    }

    async fn on_card_replaced(
        &self,
        old_id: CardId,
        new_id: CardId,
    ) -> Result<Option<Recommendation>, Error> {
        let Some(state) = self.state_for(old_id).await? else {
            return self.on_card_created(new_id).await;
        };

        let interval = (state.interval_days * 0.7).max(1.0);
        let repetitions = (state.repetitions - 1).max(0);
        let next_review = Utc::now() + Duration::seconds((interval * 86400.0) as i64);
        let next_review = Timestamp::from_datetime(next_review);

        sqlx::query(
            r"INSERT OR REPLACE INTO sm2_state (card_id, ease_factor, interval_days, repetitions, next_review)
              VALUES (?, ?, ?, ?, ?)",
        )
        .bind(new_id)
        .bind(state.ease_factor)
        .bind(interval)
        .bind(repetitions)
        .bind(&next_review.0)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;

        Ok(Some(Recommendation {
            card_id: new_id,
            scheduler_id: self.scheduler_id().to_string(),
            time: next_review,
            precision_seconds: Self::precision_seconds(interval),
        }))
    }

    async fn on_review(&self, event: &ReviewEvent) -> Result<Vec<Recommendation>, Error> {
        let state = self.state_for(event.card_id).await?;
        let (mut ease, mut interval, mut repetitions) = state
            .map(|s| (s.ease_factor, s.interval_days, s.repetitions))
            .unwrap_or((DEFAULT_EASE, 0.0, 0));

        if event.grade == 1 {
            repetitions += 1;
            interval = match repetitions {
                1 => 1.0,
                2 => 6.0,
                _ => interval * ease,
            };
            match event.feedback.as_deref() {
                Some("too_easy") => ease = (ease + 0.15).min(MAX_EASE),
                Some("too_hard") => ease = (ease - 0.15).max(MIN_EASE),
                _ => {}
            }
        } else {
            repetitions = 0;
            interval = 0.01;
            ease = (ease - 0.2).max(MIN_EASE);
        }

        let next_review = Utc::now() + Duration::seconds((interval * 86400.0) as i64);
        let next_review = Timestamp::from_datetime(next_review);

        sqlx::query(
            r"INSERT OR REPLACE INTO sm2_state
                (card_id, ease_factor, interval_days, repetitions, last_review, next_review)
              VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(event.card_id)
        .bind(ease)
        .bind(interval)
        .bind(repetitions)
        .bind(&event.timestamp.0)
        .bind(&next_review.0)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;

        Ok(vec![Recommendation {
            card_id: event.card_id,
            scheduler_id: self.scheduler_id().to_string(),
            time: next_review,
            precision_seconds: Self::precision_seconds(interval),
        }])
    }

    async fn on_card_status_changed(&self, card_id: CardId, status: &str) -> Result<(), Error> {
        if status == "deleted" {
            sqlx::query("DELETE FROM sm2_state WHERE card_id = ?")
                .bind(card_id)
                .execute(&self.pool)
                .await
                .map_err(|e| Error::Sqlx { source: e })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Grade;

    async fn scheduler() -> Sm2Scheduler {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::raw_sql(SCHEMA).execute(&pool).await.unwrap();
        Sm2Scheduler::new(pool)
    }

    #[tokio::test]
    async fn first_pass_sets_interval_one_day() {
        let sched = scheduler().await;
        sched.on_card_created(1).await.unwrap();
        let event = ReviewEvent {
            id: 1,
            card_id: 1,
            session_id: "s".into(),
            timestamp: Timestamp::from_datetime(Utc::now()),
            grade: Grade::Pass.as_i64(),
            time_on_front_ms: None,
            time_on_card_ms: None,
            feedback: None,
            response: None,
        };
        sched.on_review(&event).await.unwrap();
        let state = sched.state_for(1).await.unwrap().unwrap();
        assert_eq!(state.repetitions, 1);
        assert!((state.interval_days - 1.0).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn fail_resets_repetitions() {
        let sched = scheduler().await;
        sched.on_card_created(1).await.unwrap();
        let mut event = ReviewEvent {
            id: 1,
            card_id: 1,
            session_id: "s".into(),
            timestamp: Timestamp::from_datetime(Utc::now()),
            grade: Grade::Pass.as_i64(),
            time_on_front_ms: None,
            time_on_card_ms: None,
            feedback: None,
            response: None,
        };
        sched.on_review(&event).await.unwrap();
        event.grade = Grade::Fail.as_i64();
        sched.on_review(&event).await.unwrap();
        let state = sched.state_for(1).await.unwrap().unwrap();
        assert_eq!(state.repetitions, 0);
        assert!((state.interval_days - 0.01).abs() < 1e-9);
    }

    #[tokio::test]
    async fn replaced_card_carries_reduced_interval() {
        let sched = scheduler().await;
        sched.on_card_created(1).await.unwrap();
        let event = ReviewEvent {
            id: 1,
            card_id: 1,
            session_id: "s".into(),
            timestamp: Timestamp::from_datetime(Utc::now()),
            grade: Grade::Pass.as_i64(),
            time_on_front_ms: None,
            time_on_card_ms: None,
            feedback: None,
            response: None,
        };
        sched.on_review(&event).await.unwrap();
        sched.on_review(&event).await.unwrap();
        let before = sched.state_for(1).await.unwrap().unwrap();

        sched.on_card_replaced(1, 2).await.unwrap();
        let after = sched.state_for(2).await.unwrap().unwrap();
        assert_eq!(after.repetitions, before.repetitions - 1);
        assert!(after.interval_days <= before.interval_days * 0.7 + 1e-9);
    }

    #[tokio::test]
    async fn deleted_status_drops_state() {
        let sched = scheduler().await;
        sched.on_card_created(1).await.unwrap();
        sched.on_card_status_changed(1, "deleted").await.unwrap();
        assert!(sched.state_for(1).await.unwrap().is_none());
    }
}
