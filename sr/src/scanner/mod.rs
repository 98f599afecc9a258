//! C4: the scanner, grounded on `original_source/sr/scanner.py`
//! and `sr/config.py`'s `parse_frontmatter`/`_parse_toml_simple`.

mod frontmatter;

pub use frontmatter::{parse_flat_config, parse_frontmatter};

use crate::adapter::{AdapterConfig, ParsedCard, SrsAdapter};
use crate::{Error, LibraryError, ScanErrorKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// One scanned source: a single file, the adapter that parsed it, the cards
/// it yielded, and the config forwarded to the adapter.
#[derive(Debug, Clone)]
pub struct ScannedSource {
    pub source_path: String,
    pub adapter_name: String,
    pub cards: Vec<ParsedCard>,
    pub config: AdapterConfig,
}

/// Resolves an adapter by name; boxed so callers can supply the process-wide
/// registry or a test double.
pub type AdapterLookup<'a> = &'a dyn Fn(&str) -> Result<Box<dyn SrsAdapter>, Error>;

/// Scans `paths` for card sources. File reads and directory listings run on
/// the blocking thread pool via `tokio::task::spawn_blocking`, so a large
/// scan never stalls the async executor; only adapter parsing stays on the
/// calling task.
pub async fn scan_sources(
    paths: &[PathBuf],
    get_adapter: AdapterLookup<'_>,
) -> Result<Vec<ScannedSource>, Error> {
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    for path in paths {
        let path = path
            .canonicalize()
            .unwrap_or_else(|_| path.clone());
        if path.is_file() && path.extension().is_some_and(|e| e == "md") {
            scan_md_file(&path, get_adapter, &mut results, &mut seen).await;
        } else if path.is_dir() {
            scan_directory(&path, get_adapter, &mut results, &mut seen).await?;
        }
    }

    Ok(results)
}

async fn scan_md_file(
    path: &Path,
    get_adapter: AdapterLookup<'_>,
    results: &mut Vec<ScannedSource>,
    seen: &mut HashSet<PathBuf>,
) {
    if !seen.insert(path.to_path_buf()) {
        return;
    }
    let text = match read_to_string_blocking(path.to_path_buf()).await {
        Ok(text) => text,
        Err(e) => {
            log::warn!("cannot read {}: {e}", path.display());
            return;
        }
    };
    let (config, _body) = parse_frontmatter(&text);
    let Some(adapter_name) = config.get("sr_adapter").cloned() else {
        return;
    };
    let adapter = match get_adapter(&adapter_name) {
        Ok(adapter) => adapter,
        Err(e) => {
            log::warn!("cannot load adapter '{adapter_name}' for {}: {e}", path.display());
            return;
        }
    };
    let path_str = path.to_string_lossy().to_string();
    match adapter.parse(&text, &path_str, &config).await {
        Ok(cards) => results.push(ScannedSource {
            source_path: path_str,
            adapter_name,
            cards,
            config,
        }),
        Err(e) => log::warn!("adapter '{adapter_name}' failed on {}: {e}", path.display()),
    }
}

async fn scan_directory(
    dir: &Path,
    get_adapter: AdapterLookup<'_>,
    results: &mut Vec<ScannedSource>,
    seen: &mut HashSet<PathBuf>,
) -> Result<(), Error> {
    let config_path = dir.join(".sr.config");
    if config_path.is_file() {
        let text = match read_to_string_blocking(config_path.clone()).await {
            Ok(text) => text,
            Err(e) => {
                log::warn!("cannot read {}: {e}", config_path.display());
                return Ok(());
            }
        };
        let config = parse_flat_config(&text);
        let Some(adapter_name) = config.get("adapter").cloned() else {
            return Err(Error::Library(LibraryError::Scan(
                ScanErrorKind::MissingAdapterKey(dir.display().to_string()),
            )));
        };
        let adapter = match get_adapter(&adapter_name) {
            Ok(adapter) => adapter,
            Err(e) => {
                log::warn!("cannot load adapter '{adapter_name}': {e}");
                return Ok(());
            }
        };
        let mut entries = read_dir_sorted(dir).await?;
        entries.retain(|p| p.file_name().and_then(|n| n.to_str()) != Some(".sr.config"));
        for file in entries {
            if !file.is_file() || !seen.insert(file.clone()) {
                continue;
            }
            let text = match read_to_string_blocking(file.clone()).await {
                Ok(text) => text,
                Err(e) => {
                    log::warn!("cannot read {}: {e}", file.display());
                    continue;
                }
            };
            let path_str = file.to_string_lossy().to_string();
            match adapter.parse(&text, &path_str, &config).await {
                Ok(cards) => results.push(ScannedSource {
                    source_path: path_str,
                    adapter_name: adapter_name.clone(),
                    cards,
                    config: config.clone(),
                }),
                Err(e) => log::warn!("adapter '{adapter_name}' failed on {}: {e}", file.display()),
            }
        }
        return Ok(());
    }

    let entries = read_dir_sorted(dir).await?;
    for entry in entries {
        if entry.is_dir() {
            let hidden = entry
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with('.'));
            if !hidden {
                Box::pin(scan_directory(&entry, get_adapter, results, seen)).await?;
            }
        } else if entry.is_file() && entry.extension().is_some_and(|e| e == "md") {
            scan_md_file(&entry, get_adapter, results, seen).await;
        }
    }
    Ok(())
}

/// Directory enumeration is deterministic (sorted). A permission error on
/// the directory itself is not fatal to the scan, mirroring the reference
/// scanner's silent skip on `PermissionError`.
async fn read_dir_sorted(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let dir = dir.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let read_dir = match std::fs::read_dir(&dir) {
            Ok(read_dir) => read_dir,
            Err(e) => {
                log::warn!("cannot enumerate {}: {e}", dir.display());
                return Ok(Vec::new());
            }
        };
        let mut entries: Vec<PathBuf> = Vec::new();
        for entry in read_dir {
            let entry = entry.map_err(|e| Error::Io {
                description: format!("reading directory entry in {}", dir.display()),
                source: e,
            })?;
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    })
    .await
    .expect("blocking directory read task panicked")
}

/// Offloads a single file read onto the blocking thread pool.
async fn read_to_string_blocking(path: PathBuf) -> std::io::Result<String> {
    tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
        .await
        .expect("blocking file read task panicked")
}
