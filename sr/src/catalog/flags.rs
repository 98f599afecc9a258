//! Per-card flag annotations, grounded on the reference implementation's
//! `sr/flags.py` (`add_flag`/`remove_flag`/`get_flags`).

use super::Catalog;
use crate::model::{CardFlag, CardId};
use crate::{Error, LibraryError, SessionErrorKind};
use sqlx::SqliteConnection;

fn sql_err(source: sqlx::Error) -> Error {
    Error::Sqlx { source }
}

impl Catalog {
    pub async fn add_flag(
        conn: &mut SqliteConnection,
        card_id: CardId,
        flag: &str,
        note: Option<&str>,
    ) -> Result<(), Error> {
        if flag.trim().is_empty() {
            return Err(Error::Library(LibraryError::Session(
                SessionErrorKind::EmptyFlagName,
            )));
        }
        sqlx::query(
            r"INSERT INTO card_flags (card_id, flag, note) VALUES (?, ?, ?)
              ON CONFLICT(card_id, flag) DO UPDATE SET note = excluded.note",
        )
        .bind(card_id)
        .bind(flag)
        .bind(note)
        .execute(conn)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    pub async fn remove_flag(
        conn: &mut SqliteConnection,
        card_id: CardId,
        flag: &str,
    ) -> Result<(), Error> {
        sqlx::query(r"DELETE FROM card_flags WHERE card_id = ? AND flag = ?")
            .bind(card_id)
            .bind(flag)
            .execute(conn)
            .await
            .map_err(sql_err)?;
        Ok(())
    }

    pub async fn flags_for_card(
        conn: &mut SqliteConnection,
        card_id: CardId,
    ) -> Result<Vec<CardFlag>, Error> {
        sqlx::query_as(r"SELECT * FROM card_flags WHERE card_id = ?")
            .bind(card_id)
            .fetch_all(conn)
            .await
            .map_err(sql_err)
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
    async fn add_then_remove_flag_round_trips() {
        let catalog = seeded().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        Catalog::add_flag(&mut conn, 1, "hard", Some("tricky wording")).await.unwrap();
        let flags = Catalog::flags_for_card(&mut conn, 1).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].note.as_deref(), Some("tricky wording"));

        Catalog::remove_flag(&mut conn, 1, "hard").await.unwrap();
        assert!(Catalog::flags_for_card(&mut conn, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_flag_name_is_rejected() {
        let catalog = seeded().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        assert!(Catalog::add_flag(&mut conn, 1, "  ", None).await.is_err());
    }

    #[tokio::test]
    async fn re_adding_a_flag_updates_its_note() {
        let catalog = seeded().await;
        let mut conn = catalog.pool().acquire().await.unwrap();
        Catalog::add_flag(&mut conn, 1, "hard", Some("first")).await.unwrap();
        Catalog::add_flag(&mut conn, 1, "hard", Some("second")).await.unwrap();
        let flags = Catalog::flags_for_card(&mut conn, 1).await.unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].note.as_deref(), Some("second"));
    }
}
