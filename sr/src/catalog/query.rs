//! Range-scan queries the synchronizer composes over.
//!
//! Grounded on the reference implementation's `sr/sync.py`, which builds a
//! single query over every source path touched by a scan and compares the
//! result set against the freshly-scanned triples.

use super::Catalog;
use crate::Error;
use crate::model::CardId;
use sqlx::SqliteConnection;

/// One row of an existing, non-deleted card as seen by the synchronizer:
/// enough to decide insert/unchanged/replace without a second round trip.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ExistingCardRow {
    pub id: CardId,
    pub source_path: String,
    pub card_key: String,
    pub adapter: String,
    pub content_hash: String,
    pub status: String,
}

impl Catalog {
    /// All non-deleted cards whose `source_path` is one of `source_paths`.
    /// Empty input returns no rows rather than matching everything, since
    /// `sync.py` only ever calls this with the set of paths it just scanned.
    pub async fn existing_cards_for_sources(
        conn: &mut SqliteConnection,
        source_paths: &[String],
    ) -> Result<Vec<ExistingCardRow>, Error> {
        if source_paths.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = std::iter::repeat("?")
            .take(source_paths.len())
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            r"SELECT c.id, c.source_path, c.card_key, c.adapter, c.content_hash, cs.status
               FROM cards c JOIN card_state cs ON c.id = cs.card_id
               WHERE cs.status != 'deleted' AND c.source_path IN ({placeholders})"
        );
        let mut q = sqlx::query_as(&query);
        for path in source_paths {
            q = q.bind(path);
        }
        q.fetch_all(conn).await.map_err(|e| Error::Sqlx { source: e })
    }

    /// All non-deleted cards under any of `source_paths`' parent directories,
    /// used by the deletion sweep to find cards whose source file vanished
    /// from a directory entirely.
    pub async fn existing_cards_for_prefixes(
        conn: &mut SqliteConnection,
        prefixes: &[String],
    ) -> Result<Vec<ExistingCardRow>, Error> {
        if prefixes.is_empty() {
            return Ok(Vec::new());
        }
        let clause = std::iter::repeat("c.source_path LIKE ? || '%' ESCAPE '\\'")
            .take(prefixes.len())
            .collect::<Vec<_>>()
            .join(" OR ");
        let query = format!(
            r"SELECT c.id, c.source_path, c.card_key, c.adapter, c.content_hash, cs.status
               FROM cards c JOIN card_state cs ON c.id = cs.card_id
               WHERE cs.status != 'deleted' AND ({clause})"
        );
        let mut q = sqlx::query_as(&query);
        for prefix in prefixes {
            q = q.bind(escape_like(prefix));
        }
        q.fetch_all(conn).await.map_err(|e| Error::Sqlx { source: e })
    }
}

/// Escapes `LIKE` wildcards (`%`, `_`) and the escape character itself, so a
/// bound prefix containing them is matched literally rather than as a
/// pattern.
fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}
