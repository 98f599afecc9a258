use super::Catalog;
use crate::Error;
use crate::model::{CardId, Recommendation, Timestamp};
use sqlx::SqliteConnection;

impl Catalog {
    pub async fn upsert_recommendation(
        conn: &mut SqliteConnection,
        rec: &Recommendation,
    ) -> Result<(), Error> {
        sqlx::query(
            r"INSERT INTO recommendations (card_id, scheduler_id, time, precision_seconds)
              VALUES (?, ?, ?, ?)
              ON CONFLICT(card_id, scheduler_id) DO UPDATE SET
                time = excluded.time, precision_seconds = excluded.precision_seconds",
        )
        .bind(rec.card_id)
        .bind(&rec.scheduler_id)
        .bind(&rec.time.0)
        .bind(rec.precision_seconds)
        .execute(conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;
        Ok(())
    }

    /// Clears recommendations for a card whose status moved away from active
    /// — a non-active card should carry no recommendation rows.
    pub async fn delete_recommendations(
        conn: &mut SqliteConnection,
        card_id: CardId,
    ) -> Result<(), Error> {
        sqlx::query(r"DELETE FROM recommendations WHERE card_id = ?")
            .bind(card_id)
            .execute(conn)
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Ok(())
    }

    pub async fn recommendation_for(
        conn: &mut SqliteConnection,
        card_id: CardId,
        scheduler_id: &str,
    ) -> Result<Option<Timestamp>, Error> {
        let row: Option<(String,)> =
            sqlx::query_as(r"SELECT time FROM recommendations WHERE card_id = ? AND scheduler_id = ?")
                .bind(card_id)
                .bind(scheduler_id)
                .fetch_optional(conn)
                .await
                .map_err(|e| Error::Sqlx { source: e })?;
        Ok(row.map(|(t,)| Timestamp(t)))
    }
}
