//! Hand-rolled frontmatter and flat-config parsers, grounded on
//! `original_source/sr/config.py::parse_frontmatter` / `_parse_toml_simple`.
//! The frontmatter dialect is deliberately restrictive (scalar/bool/int/
//! string-list values only), so a small parser is preferred over pulling in
//! a full YAML grammar.

use crate::adapter::AdapterConfig;

/// Parses YAML-style frontmatter from markdown text. Returns `(config, body)`;
/// `config` is empty and `body` is `text` unchanged if there is no
/// frontmatter block. List and bool/int values are stringified (lists as
/// comma-joined strings) so every value fits `AdapterConfig`'s `String` type.
#[must_use]
pub fn parse_frontmatter(text: &str) -> (AdapterConfig, String) {
    let Some(stripped) = text.strip_prefix("---") else {
        return (AdapterConfig::new(), text.to_string());
    };
    let Some(end) = stripped.find("\n---") else {
        return (AdapterConfig::new(), text.to_string());
    };
    let yaml_block = stripped[..end].trim();
    let body = stripped[end + 4..].trim().to_string();

    let mut config = AdapterConfig::new();
    for line in yaml_block.lines() {
        let line = line.trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_string();
        let value = value.trim();
        config.insert(key, stringify_value(value));
    }
    (config, body)
}

/// Parses a flat `key=value` config file (e.g. `.sr.config`). Blank lines
/// and lines starting with `#` are ignored.
#[must_use]
pub fn parse_flat_config(text: &str) -> AdapterConfig {
    let mut config = AdapterConfig::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        config.insert(key.trim().to_string(), unquote(value.trim()).to_string());
    }
    config
}

fn stringify_value(value: &str) -> String {
    if let Some(inner) = value.strip_prefix('[').and_then(|v| v.strip_suffix(']')) {
        return inner
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(unquote)
            .collect::<Vec<_>>()
            .join(",");
    }
    unquote(value).to_string()
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typed_frontmatter_fields() {
        let text = "---\nsr_adapter: basic\ntags: [a, b, c]\nsuspended: true\n---\nbody text\n";
        let (config, body) = parse_frontmatter(text);
        assert_eq!(config.get("sr_adapter").unwrap(), "basic");
        assert_eq!(config.get("tags").unwrap(), "a,b,c");
        assert_eq!(config.get("suspended").unwrap(), "true");
        assert_eq!(body, "body text");
    }

    #[test]
    fn missing_frontmatter_is_empty_config() {
        let (config, body) = parse_frontmatter("no frontmatter here");
        assert!(config.is_empty());
        assert_eq!(body, "no frontmatter here");
    }

    #[test]
    fn parses_flat_config_with_comments() {
        let text = "# comment\nadapter = basic\nsuspended = true\n";
        let config = parse_flat_config(text);
        assert_eq!(config.get("adapter").unwrap(), "basic");
        assert_eq!(config.get("suspended").unwrap(), "true");
    }
}
