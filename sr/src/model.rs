//! Catalog row types. These mirror the schema in [`crate::catalog::schema`] exactly —
//! keep the two in sync when either changes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;

pub type CardId = i64;

/// A stored timestamp: `YYYY-MM-DD HH:MM:SS` UTC, zero-padded so that plain
/// string comparison is equivalent to chronological comparison.
#[derive(Clone, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize, sqlx::Type)]
#[sqlx(transparent)]
pub struct Timestamp(pub String);

impl Timestamp {
    #[must_use]
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self(at.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses back into a `DateTime<Utc>` for arithmetic (e.g. "now + N days").
    /// Panics only on a corrupt catalog, since every writer goes through
    /// `from_datetime`.
    #[must_use]
    pub fn to_datetime(&self) -> DateTime<Utc> {
        chrono::NaiveDateTime::parse_from_str(&self.0, "%Y-%m-%d %H:%M:%S")
            .expect("stored timestamps are always well-formed")
            .and_utc()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One version of one flashcard. Immutable after creation: an edit produces a
/// new row linked to this one by an `is_replaced_by` relation.
#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct Card {
    pub id: CardId,
    pub source_path: String,
    pub card_key: String,
    pub adapter: String,
    /// Canonical-JSON-serialized opaque content, stored as SQLite `TEXT`.
    pub content: Value,
    /// SHA-256 hex digest over the canonical JSON of `content`.
    pub content_hash: String,
    pub display_text: String,
    pub gradable: bool,
    pub source_line: i64,
    pub created_at: Timestamp,
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum CardStatus {
    Active,
    Inactive,
    Deleted,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct CardState {
    pub card_id: CardId,
    pub status: String,
    pub updated_at: Timestamp,
}

impl CardState {
    /// # Panics
    /// If the `status` column holds something other than the three known values,
    /// which would mean the `CHECK` constraint was bypassed.
    #[must_use]
    pub fn status(&self) -> CardStatus {
        self.status
            .parse()
            .expect("status column holds a valid CardStatus")
    }
}

pub const RELATION_IS_REPLACED_BY: &str = "is_replaced_by";
pub const RELATION_MUTUALLY_EXCLUSIVE: &str = "mutually_exclusive";

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct CardRelation {
    pub upstream_card_id: CardId,
    pub downstream_card_id: CardId,
    pub relation_type: String,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct CardTag {
    pub card_id: CardId,
    pub tag: String,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Grade {
    Fail = 0,
    Pass = 1,
}

impl Grade {
    #[must_use]
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(Self::Fail),
            1 => Some(Self::Pass),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> i64 {
        self as i64
    }
}

#[derive(
    Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum Feedback {
    TooHard,
    JustRight,
    TooEasy,
}

/// Append-only review log entry.
#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct ReviewEvent {
    pub id: i64,
    pub card_id: CardId,
    pub session_id: String,
    pub timestamp: Timestamp,
    pub grade: i64,
    pub time_on_front_ms: Option<i64>,
    pub time_on_card_ms: Option<i64>,
    pub feedback: Option<String>,
    pub response: Option<Value>,
}

/// At most one per (card, scheduler): "surface no earlier than `time` ± `precision`".
#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct Recommendation {
    pub card_id: CardId,
    pub scheduler_id: String,
    pub time: Timestamp,
    pub precision_seconds: i64,
}

#[derive(Clone, Debug, Deserialize, FromRow, Serialize)]
pub struct CardFlag {
    pub card_id: CardId,
    pub flag: String,
    pub note: Option<String>,
    pub created_at: Timestamp,
}
