//! C7: the deck aggregator — a pure read-side projection of
//! gradable, non-deleted cards onto a tree keyed by source-path segments.
//! Grounded on `original_source/sr/decks.py::build_deck_tree`/`collapse`,
//! which this module follows structurally while trading its dict-of-dicts
//! scratch space for a typed intermediate tree.

use crate::catalog::Catalog;
use crate::Error;
use sqlx::SqliteConnection;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Per-node counts, summed up from descendant leaves for internal nodes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeckStats {
    pub total: i64,
    pub active: i64,
    pub due: i64,
}

impl DeckStats {
    fn add(&mut self, other: DeckStats) {
        self.total += other.total;
        self.active += other.active;
        self.due += other.due;
    }
}

/// One node of the collapsed deck tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeckTree {
    pub name: String,
    /// Full source path for a leaf; the shared-prefix-joined path otherwise.
    pub path: String,
    pub is_leaf: bool,
    pub stats: DeckStats,
    pub children: Vec<DeckTree>,
}

struct LeafRow {
    source_path: String,
    status: String,
    is_due: bool,
}

/// A scratch node before collapsing: either a leaf (`stats` set) or an
/// internal node with named children, mirroring the Python function's
/// dict-of-dicts with `__stats__`/`__full_path__` sentinel keys.
#[derive(Default)]
struct RawNode {
    children: BTreeMap<String, RawNode>,
    leaf: Option<(DeckStats, String)>,
}

impl Catalog {
    /// Builds the deck tree over all gradable, non-deleted cards, with due
    /// status computed from `scheduler_id`'s recommendations. `recommendations`'
    /// primary key is `(card_id, scheduler_id)`, so the join is restricted to
    /// one scheduler rather than every scheduler that has ever scored a card.
    pub async fn deck_tree(
        conn: &mut SqliteConnection,
        scheduler_id: &str,
    ) -> Result<Vec<DeckTree>, Error> {
        let rows: Vec<(String, String, i64)> = sqlx::query_as(
            r"SELECT c.source_path, cs.status,
                     CASE WHEN r.time IS NOT NULL
                          AND r.time <= strftime('%Y-%m-%d %H:%M:%S', 'now')
                          THEN 1 ELSE 0 END AS is_due
                FROM cards c
                JOIN card_state cs ON c.id = cs.card_id
                LEFT JOIN recommendations r ON c.id = r.card_id AND r.scheduler_id = ?
               WHERE c.gradable = 1 AND cs.status IN ('active', 'inactive')",
        )
        .bind(scheduler_id)
        .fetch_all(conn)
        .await
        .map_err(|e| Error::Sqlx { source: e })?;

        let rows: Vec<LeafRow> = rows
            .into_iter()
            .map(|(source_path, status, is_due)| LeafRow {
                source_path,
                status,
                is_due: is_due != 0,
            })
            .collect();

        Ok(build_tree(rows))
    }
}

fn build_tree(rows: Vec<LeafRow>) -> Vec<DeckTree> {
    if rows.is_empty() {
        return Vec::new();
    }

    let mut path_stats: BTreeMap<String, DeckStats> = BTreeMap::new();
    for row in &rows {
        let stats = path_stats.entry(row.source_path.clone()).or_default();
        stats.total += 1;
        if row.status == "active" {
            stats.active += 1;
            if row.is_due {
                stats.due += 1;
            }
        }
    }

    let all_paths: Vec<&String> = path_stats.keys().collect();
    let common = common_prefix(&all_paths);

    let mut root = RawNode::default();
    for source_path in &all_paths {
        let rel = relative_to(source_path, &common);
        let parts: Vec<&str> = rel.split('/').filter(|p| !p.is_empty()).collect();
        let mut node = &mut root;
        for part in &parts {
            node = node.children.entry((*part).to_string()).or_default();
        }
        node.leaf = Some((path_stats[*source_path], (*source_path).clone()));
    }

    collapse(&mut root);
    to_list(&root, &common, "")
}

/// Mirrors `os.path.commonpath`, with the single-source special case the
/// reference implementation carves out (the common path of one element is
/// itself, so it falls back to the parent directory).
fn common_prefix(paths: &[&String]) -> String {
    if paths.len() == 1 {
        return parent_of(paths[0]);
    }
    let mut common = common_path(paths);
    if paths.iter().any(|p| p.as_str() == common) {
        common = parent_of(&common);
    }
    common
}

fn parent_of(path: &str) -> String {
    Path::new(path)
        .parent()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn common_path(paths: &[&String]) -> String {
    let split: Vec<Vec<&str>> = paths.iter().map(|p| p.split('/').collect()).collect();
    let Some(first) = split.first() else {
        return String::new();
    };
    let mut shared = first.len();
    for segs in &split[1..] {
        let matched = first
            .iter()
            .zip(segs.iter())
            .take_while(|(a, b)| a == b)
            .count();
        shared = shared.min(matched);
    }
    split
        .first()
        .map(|first| first[..shared].join("/"))
        .unwrap_or_default()
}

/// Path of `path` relative to `base`, POSIX-style (source paths are
/// forward-slash markdown repo paths, following `decks.py`'s `os.path.relpath`).
fn relative_to(path: &str, base: &str) -> String {
    if base.is_empty() {
        return path.trim_start_matches('/').to_string();
    }
    let path_buf = PathBuf::from(path);
    let base_buf = PathBuf::from(base);
    let mut path_parts = path_buf.components();
    let mut base_parts = base_buf.components();
    loop {
        match (path_parts.clone().next(), base_parts.clone().next()) {
            (Some(p), Some(b)) if p == b => {
                path_parts.next();
                base_parts.next();
            }
            _ => break,
        }
    }
    path_parts
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

/// Collapses any internal node with exactly one child into a single node
/// whose name is the joined path, repeated until a branch point or leaf
/// (internal nodes with a single child are collapsed).
fn collapse(node: &mut RawNode) {
    if node.leaf.is_none() && node.children.len() == 1 {
        let (child_key, child) = node.children.pop_first().expect("len() == 1");
        if !child.children.is_empty() || child.leaf.is_some() {
            let mut joined_key = child_key;
            let mut inner = child;
            while inner.leaf.is_none() && inner.children.len() == 1 {
                let (next_key, next_inner) = inner.children.pop_first().expect("len() == 1");
                joined_key = format!("{joined_key}/{next_key}");
                inner = next_inner;
            }
            node.children.insert(joined_key, inner);
        }
    }
    for child in node.children.values_mut() {
        collapse(child);
    }
}

fn to_list(node: &RawNode, common: &str, prefix: &str) -> Vec<DeckTree> {
    let mut result = Vec::new();
    for (name, child) in &node.children {
        let is_leaf = child.leaf.is_some() && child.children.is_empty();
        let node_path = if prefix.is_empty() {
            name.clone()
        } else {
            format!("{prefix}/{name}")
        };
        let (path, stats, children) = if is_leaf {
            let (stats, full_path) = child.leaf.as_ref().expect("is_leaf checked leaf.is_some()");
            (full_path.clone(), *stats, Vec::new())
        } else {
            let joined = if common.is_empty() {
                node_path.clone()
            } else {
                format!("{common}/{node_path}")
            };
            (joined, aggregate_stats(child), to_list(child, common, &node_path))
        };
        result.push(DeckTree {
            name: name.clone(),
            path,
            is_leaf,
            stats,
            children,
        });
    }
    result
}

fn aggregate_stats(node: &RawNode) -> DeckStats {
    let mut stats = DeckStats::default();
    if let Some((leaf_stats, _)) = &node.leaf {
        stats.add(*leaf_stats);
    }
    for child in node.children.values() {
        stats.add(aggregate_stats(child));
    }
    stats
}
