use super::Catalog;
use crate::Error;
use crate::model::{CardId, Timestamp};
use serde_json::Value;
use sqlx::SqliteConnection;

impl Catalog {
    /// Appends a review event. Never mutated afterwards — undo does not
    /// remove it.
    #[allow(clippy::too_many_arguments)]
    pub async fn append_review_event(
        conn: &mut SqliteConnection,
        card_id: CardId,
        session_id: &str,
        timestamp: &Timestamp,
        grade: i64,
        time_on_front_ms: Option<i64>,
        time_on_card_ms: Option<i64>,
        feedback: Option<&str>,
        response: Option<&Value>,
    ) -> Result<i64, Error> {
        let response_text = response.map(std::string::ToString::to_string);
        let (id,): (i64,) = sqlx::query_as(
            r"INSERT INTO review_log
                (card_id, session_id, timestamp, grade, time_on_front_ms, time_on_card_ms, feedback, response)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(card_id)
        .bind(session_id)
        .bind(&timestamp.0)
        .bind(grade)
        .bind(time_on_front_ms)
        .bind(time_on_card_ms)
        .bind(feedback)
        .bind(response_text)
        .fetch_one(conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;
        Ok(id)
    }
}
