use super::Catalog;
use crate::Error;
use crate::model::CardId;
use sqlx::SqliteConnection;
use std::collections::HashSet;

impl Catalog {
    /// Tags for a card are authoritative from the latest scan of its source
    /// add what's missing, remove what's no longer declared.
    pub async fn sync_tags(
        conn: &mut SqliteConnection,
        card_id: CardId,
        tags: &[String],
    ) -> Result<(), Error> {
        let existing: Vec<(String,)> =
            sqlx::query_as(r"SELECT tag FROM card_tags WHERE card_id = ?")
                .bind(card_id)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| Error::Sqlx { source: e })?;
        let existing: HashSet<String> = existing.into_iter().map(|(tag,)| tag).collect();
        let wanted: HashSet<String> = tags.iter().cloned().collect();

        for tag in wanted.difference(&existing) {
            sqlx::query(r"INSERT OR IGNORE INTO card_tags (card_id, tag) VALUES (?, ?)")
                .bind(card_id)
                .bind(tag)
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::Sqlx { source: e })?;
        }
        for tag in existing.difference(&wanted) {
            sqlx::query(r"DELETE FROM card_tags WHERE card_id = ? AND tag = ?")
                .bind(card_id)
                .bind(tag)
                .execute(&mut *conn)
                .await
                .map_err(|e| Error::Sqlx { source: e })?;
        }
        Ok(())
    }

    pub async fn tags_for_card(
        conn: &mut SqliteConnection,
        card_id: CardId,
    ) -> Result<Vec<String>, Error> {
        let rows: Vec<(String,)> = sqlx::query_as(r"SELECT tag FROM card_tags WHERE card_id = ?")
            .bind(card_id)
            .fetch_all(conn)
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Ok(rows.into_iter().map(|(tag,)| tag).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::Catalog;

    async fn seeded() -> Catalog {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let mut conn = catalog.pool().acquire().await.unwrap();
        Catalog::insert_card(
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
            &crate::model::Timestamp::from_datetime(chrono::Utc::now()),
        )
        .await
        .unwrap();
        catalog
    }

    #[tokio::test]
    async fn sync_tags_adds_and_removes_to_match_the_latest_set() {
        let catalog = seeded().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        Catalog::sync_tags(&mut conn, 1, &["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        let mut tags = Catalog::tags_for_card(&mut conn, 1).await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["a".to_string(), "b".to_string()]);

        Catalog::sync_tags(&mut conn, 1, &["b".to_string(), "c".to_string()])
            .await
            .unwrap();
        let mut tags = Catalog::tags_for_card(&mut conn, 1).await.unwrap();
        tags.sort();
        assert_eq!(tags, vec!["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn sync_tags_with_empty_set_clears_all_tags() {
        let catalog = seeded().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        Catalog::sync_tags(&mut conn, 1, &["a".to_string()]).await.unwrap();
        Catalog::sync_tags(&mut conn, 1, &[]).await.unwrap();
        assert!(Catalog::tags_for_card(&mut conn, 1).await.unwrap().is_empty());
    }
}
