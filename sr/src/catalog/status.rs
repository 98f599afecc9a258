//! Aggregate status counts for the CLI `status` subcommand, grounded on
//! `original_source/sr/server_decks.py` and `cli.py`'s `status` handler.

use super::Catalog;
use crate::Error;
use sqlx::SqliteConnection;

pub use crate::deck::DeckTree;

#[derive(Debug, Clone, Default)]
pub struct CatalogStatus {
    pub active: i64,
    pub inactive: i64,
    pub deleted: i64,
    pub due: i64,
}

impl Catalog {
    /// Counts by status, plus how many active gradable cards currently have
    /// a due recommendation from `scheduler_id`, mirroring the counts the
    /// reference `status` subcommand prints. `recommendations`' primary key
    /// is `(card_id, scheduler_id)`, so the due count is scoped to one
    /// scheduler rather than joining every scheduler's rows for a card.
    pub async fn aggregate_status(
        conn: &mut SqliteConnection,
        scheduler_id: &str,
    ) -> Result<CatalogStatus, Error> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r"SELECT status, COUNT(*) FROM card_state GROUP BY status",
        )
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;

        let mut status = CatalogStatus::default();
        for (name, count) in rows {
            match name.as_str() {
                "active" => status.active = count,
                "inactive" => status.inactive = count,
                "deleted" => status.deleted = count,
                _ => {}
            }
        }

        let (due,): (i64,) = sqlx::query_as(
            r"SELECT COUNT(*) FROM cards c
               JOIN card_state cs ON c.id = cs.card_id
               JOIN recommendations r ON r.card_id = c.id AND r.scheduler_id = ?
               WHERE cs.status = 'active' AND c.gradable = 1
                 AND r.time <= strftime('%Y-%m-%d %H:%M:%S', 'now')",
        )
        .bind(scheduler_id)
        .fetch_one(conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;
        status.due = due;

        Ok(status)
    }
}
