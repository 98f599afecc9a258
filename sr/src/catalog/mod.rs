//! C1: durable, transactional storage of cards, state, tags, relations,
//! reviews, recommendations and flags.

mod flags;
mod query;
mod recommendations;
mod relations;
mod reviews;
pub mod schema;
mod status;
mod tags;
mod writer;

pub use query::ExistingCardRow;
pub use status::{CatalogStatus, DeckTree};

use crate::Error;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// A handle to the durable catalog store. Cheap to clone (wraps a pooled
/// connection); pass `&SqlitePool` by reference everywhere.
#[derive(Clone)]
pub struct Catalog {
    pool: SqlitePool,
}

impl Catalog {
    /// Opens (creating if needed) the catalog database at `path` and applies
    /// the schema. `path` may be `:memory:` for tests.
    pub async fn connect(path: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite://{path}"))
            .map_err(|e| Error::Sqlx { source: e })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        let catalog = Self { pool };
        catalog.migrate().await?;
        Ok(catalog)
    }

    #[must_use]
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn migrate(&self) -> Result<(), Error> {
        // SQLite's driver executes one statement per `execute` call; `sqlx::raw_sql`
        // splits a script into its constituent statements for us, mirroring the
        // reference implementation's single `executescript` call.
        sqlx::raw_sql(schema::SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Sqlx { source: e })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrate_is_idempotent() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        catalog.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn from_pool_wraps_an_already_migrated_pool() {
        let source = Catalog::connect(":memory:").await.unwrap();
        let catalog = Catalog::from_pool(source.pool().clone());
        assert!(Catalog::aggregate_status(&mut catalog.pool().acquire().await.unwrap(), "sm2")
            .await
            .is_ok());
    }
}
