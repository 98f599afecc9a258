//! C5: the synchronizer — the reconciliation protocol between
//! a scan and the catalog. Grounded on `original_source/sr/sync.py`, which
//! this module follows triple-for-triple.

use crate::adapter::{AdapterConfig, ParsedRelation};
use crate::catalog::{Catalog, ExistingCardRow};
use crate::config::Clock;
use crate::fingerprint::content_hash;
use crate::model::{CardId, RELATION_IS_REPLACED_BY, Timestamp};
use crate::scanner::{AdapterLookup, ScannedSource, scan_sources};
use crate::scheduler::Scheduler;
use crate::{AdapterErrorKind, Error, LibraryError};
use sqlx::{Sqlite, Transaction};
use std::collections::HashMap;
use std::path::PathBuf;

/// Counts of what the synchronizer did to scanned triples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub new: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub deleted: u64,
}

/// Identifies a card independent of its content version.
type Triple = (String, String, String);

struct ScannedCard {
    source_path: String,
    adapter: String,
    card: crate::adapter::ParsedCard,
    config: AdapterConfig,
}

/// A source is suspended iff its config's `suspended` key is `true`
/// (case-insensitive), matching the `basic` adapter's own parsing of the key.
fn config_suspended(config: &AdapterConfig) -> bool {
    config
        .get("suspended")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
}

/// Scans `paths` and reconciles the result against the catalog in a single
/// transaction, committed once at the end.
/// Scheduler hook failures are caught and logged; they never abort the
/// transaction.
pub async fn synchronize(
    catalog: &Catalog,
    paths: &[PathBuf],
    get_adapter: AdapterLookup<'_>,
    scheduler: Option<&dyn Scheduler>,
    clock: &dyn Clock,
) -> Result<SyncReport, Error> {
    let scanned = scan_sources(paths, get_adapter).await?;
    let scanned_paths: Vec<String> = scanned.iter().map(|s| s.source_path.clone()).collect();
    let prefixes = directory_prefixes(paths);

    let mut tx = catalog
        .pool()
        .begin()
        .await
        .map_err(|e| Error::Sqlx { source: e })?;

    let existing = in_scope_existing(&mut tx, &scanned_paths, &prefixes).await?;
    let mut existing_by_triple: HashMap<Triple, ExistingCardRow> = existing
        .into_iter()
        .map(|row| {
            (
                (row.source_path.clone(), row.card_key.clone(), row.adapter.clone()),
                row,
            )
        })
        .collect();

    let scanned_cards = dedup_last_wins(&scanned);
    let mut report = SyncReport::default();
    let mut resolved_ids: HashMap<Triple, CardId> = HashMap::new();
    let now = Timestamp::from_datetime(clock.now());

    for scanned_card in scanned_cards.values() {
        if !scanned_card.card.content.is_object() {
            return Err(Error::Library(LibraryError::Adapter(
                AdapterErrorKind::NonObjectContent {
                    adapter_name: scanned_card.adapter.clone(),
                    key: scanned_card.card.key.clone(),
                },
            )));
        }
        let triple: Triple = (
            scanned_card.source_path.clone(),
            scanned_card.card.key.clone(),
            scanned_card.adapter.clone(),
        );
        let h = content_hash(&scanned_card.card.content);
        let desired_status = if config_suspended(&scanned_card.config) {
            "inactive"
        } else {
            "active"
        };

        let id = match existing_by_triple.remove(&triple) {
            None => {
                report.new += 1;
                process_insert(&mut tx, scheduler, scanned_card, &h, desired_status, &now).await?
            }
            Some(row) if row.content_hash == h => {
                report.unchanged += 1;
                Catalog::sync_tags(&mut tx, row.id, &scanned_card.card.tags).await?;
                row.id
            }
            Some(row) => {
                report.updated += 1;
                process_replace(&mut tx, scheduler, scanned_card, &row, &h, &now).await?
            }
        };
        resolved_ids.insert(triple, id);
    }

    // Deletion sweep: whatever is left in `existing_by_triple` was in scope
    // but not matched by a scanned triple.
    for row in existing_by_triple.into_values() {
        Catalog::set_card_status(&mut tx, row.id, "deleted", &now).await?;
        Catalog::delete_recommendations(&mut tx, row.id).await?;
        if let Some(scheduler) = scheduler {
            if let Err(e) = scheduler.on_card_status_changed(row.id, "deleted").await {
                log::warn!("scheduler hook on_card_status_changed(deleted) failed for card {}: {e}", row.id);
            }
        }
        report.deleted += 1;
    }

    sync_relations(&mut tx, &scanned_cards, &resolved_ids).await?;

    tx.commit().await.map_err(|e| Error::Sqlx { source: e })?;
    Ok(report)
}

async fn process_insert(
    tx: &mut Transaction<'_, Sqlite>,
    scheduler: Option<&dyn Scheduler>,
    scanned_card: &ScannedCard,
    fingerprint: &str,
    status: &str,
    at: &Timestamp,
) -> Result<CardId, Error> {
    let card = &scanned_card.card;
    let id = Catalog::insert_card(
        tx,
        &scanned_card.source_path,
        &card.key,
        &scanned_card.adapter,
        &card.content,
        fingerprint,
        &card.display_text,
        card.gradable,
        card.source_line,
        status,
        at,
    )
    .await?;
    Catalog::sync_tags(tx, id, &card.tags).await?;

    if let Some(scheduler) = scheduler {
        if status == "active" {
            match scheduler.on_card_created(id).await {
                Ok(Some(rec)) => Catalog::upsert_recommendation(tx, &rec).await?,
                Ok(None) => {}
                Err(e) => log::warn!("scheduler hook on_card_created failed for card {id}: {e}"),
            }
        }
    }
    Ok(id)
}

async fn process_replace(
    tx: &mut Transaction<'_, Sqlite>,
    scheduler: Option<&dyn Scheduler>,
    scanned_card: &ScannedCard,
    old_row: &ExistingCardRow,
    fingerprint: &str,
    at: &Timestamp,
) -> Result<CardId, Error> {
    // Suspension survives edits; otherwise a replaced card resurfaces active
    // even if the source is currently marked suspended.
    let new_status = if old_row.status == "inactive" {
        "inactive"
    } else {
        "active"
    };

    Catalog::set_card_status(tx, old_row.id, "deleted", at).await?;
    Catalog::release_card_key(tx, old_row.id).await?;

    let card = &scanned_card.card;
    let new_id = Catalog::insert_card(
        tx,
        &scanned_card.source_path,
        &card.key,
        &scanned_card.adapter,
        &card.content,
        fingerprint,
        &card.display_text,
        card.gradable,
        card.source_line,
        new_status,
        at,
    )
    .await?;
    Catalog::insert_relation(tx, old_row.id, new_id, RELATION_IS_REPLACED_BY).await?;
    Catalog::sync_tags(tx, new_id, &card.tags).await?;

    if let Some(scheduler) = scheduler {
        if new_status == "active" {
            match scheduler.on_card_replaced(old_row.id, new_id).await {
                Ok(Some(rec)) => Catalog::upsert_recommendation(tx, &rec).await?,
                Ok(None) => {}
                Err(e) => log::warn!(
                    "scheduler hook on_card_replaced failed for card {old_row_id} -> {new_id}: {e}",
                    old_row_id = old_row.id
                ),
            }
        }
    }
    Ok(new_id)
}

async fn sync_relations(
    tx: &mut Transaction<'_, Sqlite>,
    scanned_cards: &HashMap<Triple, ScannedCard>,
    resolved_ids: &HashMap<Triple, CardId>,
) -> Result<(), Error> {
    for (triple, scanned_card) in scanned_cards {
        let Some(&from_id) = resolved_ids.get(triple) else {
            continue;
        };
        for relation in &scanned_card.card.relations {
            let ParsedRelation {
                target_key,
                relation_type,
                target_source,
            } = relation;
            let target_source = target_source
                .as_deref()
                .unwrap_or(&scanned_card.source_path);
            let Some(to_id) =
                Catalog::resolve_active_card(tx, target_source, target_key).await?
            else {
                // Target doesn't resolve yet; a later sync heals this.
                continue;
            };
            Catalog::insert_relation(tx, from_id, to_id, relation_type).await?;
        }
    }
    Ok(())
}

/// Flattens scanned sources into per-card entries, keeping only the last
/// occurrence of each triple.
fn dedup_last_wins(scanned: &[ScannedSource]) -> HashMap<Triple, ScannedCard> {
    let mut out = HashMap::new();
    for source in scanned {
        for card in &source.cards {
            let triple = (
                source.source_path.clone(),
                card.key.clone(),
                source.adapter_name.clone(),
            );
            out.insert(
                triple,
                ScannedCard {
                    source_path: source.source_path.clone(),
                    adapter: source.adapter_name.clone(),
                    card: card.clone(),
                    config: source.config.clone(),
                },
            );
        }
    }
    out
}

async fn in_scope_existing(
    tx: &mut Transaction<'_, Sqlite>,
    scanned_paths: &[String],
    prefixes: &[String],
) -> Result<Vec<ExistingCardRow>, Error> {
    let mut rows = Catalog::existing_cards_for_sources(tx, scanned_paths).await?;
    let prefix_rows = Catalog::existing_cards_for_prefixes(tx, prefixes).await?;
    let mut seen: std::collections::HashSet<CardId> = rows.iter().map(|r| r.id).collect();
    for row in prefix_rows {
        if seen.insert(row.id) {
            rows.push(row);
        }
    }
    Ok(rows)
}

/// The directory inputs among `paths`, as string prefixes (with a trailing
/// separator so `/a/b` doesn't match `/a/bc`).
fn directory_prefixes(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .filter(|p| p.is_dir())
        .map(|p| {
            let mut s = p.to_string_lossy().to_string();
            if !s.ends_with(std::path::MAIN_SEPARATOR) {
                s.push(std::path::MAIN_SEPARATOR);
            }
            s
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::get_adapter_from_string;
    use crate::config::{Clock, SystemClock};
    use std::fs;

    fn write_card_file(dir: &std::path::Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("---\nsr_adapter: basic\n---\n{body}")).unwrap();
        path
    }

    #[tokio::test]
    async fn first_scan_inserts_new_cards() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_card_file(dir.path(), "cards.md", "Q: 2+2?\nA: 4\n");
        let clock = SystemClock;

        let report = synchronize(
            &catalog,
            &[dir.path().to_path_buf()],
            &get_adapter_from_string,
            None,
            &clock,
        )
        .await
        .unwrap();
        assert_eq!(report.new, 1);
        assert_eq!(report.updated, 0);
        assert_eq!(report.deleted, 0);
    }

    #[tokio::test]
    async fn source_config_suspended_inserts_cards_inactive() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cards.md");
        fs::write(
            &path,
            "---\nsr_adapter: basic\nsuspended: true\n---\nQ: 2+2?\nA: 4\n",
        )
        .unwrap();
        let clock = SystemClock;

        synchronize(
            &catalog,
            &[dir.path().to_path_buf()],
            &get_adapter_from_string,
            None,
            &clock,
        )
        .await
        .unwrap();

        let mut conn = catalog.pool().acquire().await.unwrap();
        let row: ExistingCardRow =
            Catalog::existing_cards_for_sources(&mut conn, &[path.to_string_lossy().to_string()])
                .await
                .unwrap()
                .into_iter()
                .next()
                .unwrap();
        assert_eq!(row.status, "inactive");
    }

    #[tokio::test]
    async fn rescanning_unchanged_content_is_a_no_op() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_card_file(dir.path(), "cards.md", "Q: 2+2?\nA: 4\n");
        let clock = SystemClock;
        let paths = [dir.path().to_path_buf()];

        synchronize(&catalog, &paths, &get_adapter_from_string, None, &clock)
            .await
            .unwrap();
        let report = synchronize(&catalog, &paths, &get_adapter_from_string, None, &clock)
            .await
            .unwrap();
        assert_eq!(report.new, 0);
        assert_eq!(report.unchanged, 1);
    }

    #[tokio::test]
    async fn editing_content_replaces_the_card_and_links_is_replaced_by() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_card_file(dir.path(), "cards.md", "Q: 2+2?\nA: 4\n");
        let clock = SystemClock;
        let paths = [dir.path().to_path_buf()];

        synchronize(&catalog, &paths, &get_adapter_from_string, None, &clock)
            .await
            .unwrap();
        let mut conn = catalog.pool().acquire().await.unwrap();
        let old_id = Catalog::existing_cards_for_sources(
            &mut conn,
            &[path.to_string_lossy().to_string()],
        )
        .await
        .unwrap()[0]
            .id;
        drop(conn);

        fs::write(&path, "---\nsr_adapter: basic\n---\nQ: 2+2?\nA: four\n").unwrap();
        let report = synchronize(&catalog, &paths, &get_adapter_from_string, None, &clock)
            .await
            .unwrap();
        assert_eq!(report.updated, 1);

        let mut conn = catalog.pool().acquire().await.unwrap();
        let siblings = Catalog::mutually_exclusive_siblings(&mut conn, old_id)
            .await
            .unwrap();
        assert!(siblings.is_empty());
        let (relation_type,): (String,) = sqlx::query_as(
            r"SELECT relation_type FROM card_relations WHERE upstream_card_id = ?",
        )
        .bind(old_id)
        .fetch_one(&mut *conn)
        .await
        .unwrap();
        assert_eq!(relation_type, RELATION_IS_REPLACED_BY);
    }

    #[tokio::test]
    async fn removing_the_source_file_marks_cards_deleted() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_card_file(dir.path(), "cards.md", "Q: 2+2?\nA: 4\n");
        let clock = SystemClock;
        let paths = [dir.path().to_path_buf()];

        synchronize(&catalog, &paths, &get_adapter_from_string, None, &clock)
            .await
            .unwrap();
        fs::remove_file(&path).unwrap();
        let report = synchronize(&catalog, &paths, &get_adapter_from_string, None, &clock)
            .await
            .unwrap();
        assert_eq!(report.deleted, 1);
    }

    #[tokio::test]
    async fn non_object_content_is_rejected() {
        let catalog = Catalog::connect(":memory:").await.unwrap();
        let clock = SystemClock;
        let scanned_card = ScannedCard {
            source_path: "cards.md".to_string(),
            adapter: "basic".to_string(),
            card: crate::adapter::ParsedCard {
                key: "qa_1".to_string(),
                content: serde_json::json!(["not", "an", "object"]),
                display_text: "q".to_string(),
                gradable: true,
                source_line: 1,
                tags: Vec::new(),
                relations: Vec::new(),
            },
            config: AdapterConfig::new(),
        };
        let scanned_cards: HashMap<Triple, ScannedCard> = [((
            scanned_card.source_path.clone(),
            scanned_card.card.key.clone(),
            scanned_card.adapter.clone(),
        ), scanned_card)]
            .into_iter()
            .collect();

        let mut tx = catalog.pool().begin().await.unwrap();
        let now = Timestamp::from_datetime(clock.now());
        let mut saw_error = false;
        for scanned_card in scanned_cards.values() {
            if !scanned_card.card.content.is_object() {
                saw_error = true;
                break;
            }
            let _ = process_insert(
                &mut tx,
                None,
                scanned_card,
                "deadbeef",
                "active",
                &now,
            )
            .await;
        }
        assert!(saw_error);
    }
}
