use super::Catalog;
use crate::Error;
use crate::model::{CardId, RELATION_MUTUALLY_EXCLUSIVE};
use sqlx::SqliteConnection;

impl Catalog {
    /// Resolves the currently-live (non-deleted) card id for a
    /// (source_path, card_key) pair, used to resolve relation targets during
    /// sync. A card need not have status `active` to be a relation endpoint —
    /// a suspended card can still be `mutually_exclusive` with another.
    pub async fn resolve_active_card(
        conn: &mut SqliteConnection,
        source_path: &str,
        card_key: &str,
    ) -> Result<Option<CardId>, Error> {
        let row: Option<(CardId,)> = sqlx::query_as(
            r"SELECT c.id FROM cards c JOIN card_state cs ON c.id = cs.card_id
              WHERE c.source_path = ? AND c.card_key = ? AND cs.status != 'deleted'",
        )
        .bind(source_path)
        .bind(card_key)
        .fetch_optional(conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;
        Ok(row.map(|(id,)| id))
    }

    /// Cards linked to `card_id` by a symmetric `mutually_exclusive` edge in
    /// either direction.
    pub async fn mutually_exclusive_siblings(
        conn: &mut SqliteConnection,
        card_id: CardId,
    ) -> Result<Vec<CardId>, Error> {
        let rows: Vec<(CardId,)> = sqlx::query_as(
            r"SELECT downstream_card_id FROM card_relations
                WHERE upstream_card_id = ? AND relation_type = ?
              UNION
              SELECT upstream_card_id FROM card_relations
                WHERE downstream_card_id = ? AND relation_type = ?",
        )
        .bind(card_id)
        .bind(RELATION_MUTUALLY_EXCLUSIVE)
        .bind(card_id)
        .bind(RELATION_MUTUALLY_EXCLUSIVE)
        .fetch_all(conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}
