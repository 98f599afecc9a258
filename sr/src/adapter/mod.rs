//! C2: the adapter contract and the process-wide adapter
//! registry: looking up an adapter by name and enumerating every
//! registered implementation.

pub mod impls;

use crate::{AdapterErrorKind, Error, LibraryError};
use async_trait::async_trait;
use serde_json::Value;

/// A relation an adapter declares between the card it just produced and
/// another card, resolved by the synchronizer's relation sync pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedRelation {
    pub target_key: String,
    pub relation_type: String,
    /// Defaults to the same source path when `None`.
    pub target_source: Option<String>,
}

/// One card record produced by `parse`.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedCard {
    pub key: String,
    pub content: Value,
    pub display_text: String,
    pub gradable: bool,
    pub source_line: i64,
    pub tags: Vec<String>,
    pub relations: Vec<ParsedRelation>,
}

/// Flat per-source config forwarded to an adapter (from frontmatter or
/// `.sr.config`).
pub type AdapterConfig = std::collections::BTreeMap<String, String>;

/// `parse` must be pure and deterministic in `(text, config)`; rendering
/// must not mutate content. Kept `async_trait` for symmetry with the
/// scheduler trait, and so a future network-backed adapter doesn't need a
/// breaking trait change.
#[async_trait]
pub trait SrsAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Must be deterministic in `(text, config)`. Keys returned must be
    /// unique within one call.
    async fn parse(
        &self,
        text: &str,
        path: &str,
        config: &AdapterConfig,
    ) -> Result<Vec<ParsedCard>, Error>;

    fn render_front(&self, content: &Value) -> String;
    fn render_back(&self, content: &Value) -> String;
}

pub fn get_adapter_from_string(name: &str) -> Result<Box<dyn SrsAdapter>, Error> {
    let matching: Vec<_> = get_all_adapters()
        .into_iter()
        .filter(|make| make().name() == name)
        .collect();
    if matching.is_empty() {
        return Err(Error::Library(LibraryError::Adapter(
            AdapterErrorKind::NotFound(name.to_string()),
        )));
    }
    // Not possible; see `test_adapters_validation`.
    Ok(matching[0]())
}

pub fn get_all_adapters() -> Vec<fn() -> Box<dyn SrsAdapter>> {
    vec![|| Box::new(impls::basic::BasicQaAdapter)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use itertools::Itertools;

    #[test]
    fn test_adapters_validation() {
        let all_adapters = get_all_adapters();
        assert!(!all_adapters.is_empty());
        let names: Vec<_> = all_adapters.iter().map(|make| make().name()).collect();
        assert_eq!(names.len(), names.iter().unique().count());
    }
}
