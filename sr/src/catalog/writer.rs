//! The write primitives the catalog requires, each a single statement so
//! callers can compose them inside one transaction.
//!
//! Every function takes `&mut SqliteConnection` rather than `&SqlitePool` —
//! unlike the reference crate (which never needs cross-statement atomicity),
//! this engine's correctness depends on several of these running inside one
//! transaction, so callers pass
//! `&mut *tx` from an open `sqlx::Transaction` and deref-coercion does the rest.

use super::Catalog;
use crate::Error;
use crate::model::{Card, CardId, Timestamp};
use serde_json::Value;
use sqlx::SqliteConnection;

fn sql_err(source: sqlx::Error) -> Error {
    Error::Sqlx { source }
}

impl Catalog {
    /// Inserts a card and its initial `card_state` row atomically, returning
    /// the new id; every card has a state row from the moment it exists.
    pub async fn insert_card(
        conn: &mut SqliteConnection,
        source_path: &str,
        card_key: &str,
        adapter: &str,
        content: &Value,
        content_hash: &str,
        display_text: &str,
        gradable: bool,
        source_line: i64,
        status: &str,
        at: &Timestamp,
    ) -> Result<CardId, Error> {
        let content_text = content.to_string();
        let (id,): (CardId,) = sqlx::query_as(
            r"INSERT INTO cards
                (source_path, card_key, adapter, content, content_hash, display_text, gradable, source_line, created_at)
              VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
              RETURNING id",
        )
        .bind(source_path)
        .bind(card_key)
        .bind(adapter)
        .bind(content_text)
        .bind(content_hash)
        .bind(display_text)
        .bind(gradable)
        .bind(source_line)
        .bind(&at.0)
        .fetch_one(&mut *conn)
        .await
        .map_err(sql_err)?;

        sqlx::query(r"INSERT INTO card_state (card_id, status, updated_at) VALUES (?, ?, ?)")
            .bind(id)
            .bind(status)
            .bind(&at.0)
            .execute(&mut *conn)
            .await
            .map_err(sql_err)?;

        Ok(id)
    }

    pub async fn set_card_status(
        conn: &mut SqliteConnection,
        card_id: CardId,
        status: &str,
        at: &Timestamp,
    ) -> Result<(), Error> {
        sqlx::query(r"UPDATE card_state SET status = ?, updated_at = ? WHERE card_id = ?")
            .bind(status)
            .bind(&at.0)
            .bind(card_id)
            .execute(conn)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    /// Rewrites a deleted card's key to `{key}__replaced_{id}` to free the
    /// uniqueness slot so a new card can reuse the original key.
    pub async fn release_card_key(
        conn: &mut SqliteConnection,
        card_id: CardId,
    ) -> Result<(), Error> {
        sqlx::query(
            r"UPDATE cards SET card_key = card_key || '__replaced_' || CAST(id AS TEXT) WHERE id = ?",
        )
        .bind(card_id)
        .execute(conn)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    pub async fn insert_relation(
        conn: &mut SqliteConnection,
        upstream_card_id: CardId,
        downstream_card_id: CardId,
        relation_type: &str,
    ) -> Result<(), Error> {
        sqlx::query(
            r"INSERT OR IGNORE INTO card_relations (upstream_card_id, downstream_card_id, relation_type)
              VALUES (?, ?, ?)",
        )
        .bind(upstream_card_id)
        .bind(downstream_card_id)
        .bind(relation_type)
        .execute(conn)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    pub async fn fetch_card(conn: &mut SqliteConnection, card_id: CardId) -> Result<Card, Error> {
        sqlx::query_as(r"SELECT * FROM cards WHERE id = ?")
            .bind(card_id)
            .fetch_one(conn)
            .await
            .map_err(sql_err)
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;
    use crate::model::Timestamp;
    use chrono::Utc;

    async fn catalog() -> Catalog {
        Catalog::connect(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn insert_card_creates_an_active_state_row() {
        let catalog = catalog().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        let now = Timestamp::from_datetime(Utc::now());
        let id = Catalog::insert_card(
            &mut conn,
            "cards.md",
            "qa_1",
            "basic",
            &serde_json::json!({"question": "q", "answer": "a"}),
            "hash",
            "q",
            true,
            1,
            "active",
            &now,
        )
        .await
        .unwrap();
        let card = Catalog::fetch_card(&mut conn, id).await.unwrap();
        assert_eq!(card.card_key, "qa_1");
    }

    #[tokio::test]
    async fn release_card_key_frees_the_original_key() {
        let catalog = catalog().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        let now = Timestamp::from_datetime(Utc::now());
        let id = Catalog::insert_card(
            &mut conn,
            "cards.md",
            "qa_1",
            "basic",
            &serde_json::json!({"question": "q", "answer": "a"}),
            "hash",
            "q",
            true,
            1,
            "active",
            &now,
        )
        .await
        .unwrap();
        Catalog::release_card_key(&mut conn, id).await.unwrap();
        let card = Catalog::fetch_card(&mut conn, id).await.unwrap();
        assert_ne!(card.card_key, "qa_1");
        assert!(card.card_key.starts_with("qa_1__replaced_"));

        // The original key is now free for a new card to reuse.
        let new_id = Catalog::insert_card(
            &mut conn,
            "cards.md",
            "qa_1",
            "basic",
            &serde_json::json!({"question": "q2", "answer": "a2"}),
            "hash2",
            "q2",
            true,
            2,
            "active",
            &now,
        )
        .await
        .unwrap();
        assert_ne!(new_id, id);
    }
}
