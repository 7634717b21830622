//! Read-only loader for named keyword configurations.
//!
//! A configuration file `<dir>/<name>.json` maps category names to keyword
//! lists:
//!
//! ```json
//! { "network": { "keep": ["timeout"], "filter": ["healthcheck"] },
//!   "legacy":  ["panic", "fatal"] }
//! ```
//!
//! A bare list is the older format and means keep.

use crate::error::{FilterError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CategoryEntry {
    Split {
        #[serde(default)]
        keep: Vec<String>,
        #[serde(default)]
        filter: Vec<String>,
    },
    Legacy(Vec<String>),
}

/// Keep and exclude keywords collected from one or more configurations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeywordConfig {
    pub keep: Vec<String>,
    pub exclude: Vec<String>,
}

impl KeywordConfig {
    /// Parse a configuration document. Categories are visited in name order.
    pub fn parse(json: &str) -> Result<Self> {
        let categories: BTreeMap<String, CategoryEntry> = serde_json::from_str(json)
            .map_err(|e| FilterError::invalid(format!("malformed keyword config: {}", e)))?;

        let mut config = Self::default();
        for entry in categories.into_values() {
            match entry {
                CategoryEntry::Split { keep, filter } => {
                    config.keep.extend(keep);
                    config.exclude.extend(filter);
                }
                CategoryEntry::Legacy(keep) => config.keep.extend(keep),
            }
        }
        Ok(config)
    }

    /// Load `<dir>/<name>.json`
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(FilterError::invalid(format!("bad keyword config name: {:?}", name)));
        }

        let path = dir.join(format!("{}.json", name));
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(FilterError::invalid(format!("unknown keyword config: {}", name)));
            }
            Err(e) => return Err(e.into()),
        };
        Self::parse(&content)
    }

    /// Load and merge several named configurations in order
    pub fn load_all<S: AsRef<str>>(dir: &Path, names: &[S]) -> Result<Self> {
        let mut merged = Self::default();
        for name in names {
            merged.merge(Self::load(dir, name.as_ref())?);
        }
        Ok(merged)
    }

    pub fn merge(&mut self, other: KeywordConfig) {
        self.keep.extend(other.keep);
        self.exclude.extend(other.exclude);
    }

    /// Ad-hoc keywords count as keep
    pub fn with_temp_keywords<S: AsRef<str>>(mut self, temp: &[S]) -> Self {
        self.keep.extend(temp.iter().map(|k| k.as_ref().to_string()));
        self
    }

    /// Named configurations from `dir` merged with ad-hoc keep and exclude
    /// keywords
    pub fn resolve<S: AsRef<str>>(
        dir: &Path,
        names: &[S],
        keep: &[String],
        exclude: &[String],
    ) -> Result<Self> {
        let mut keywords = Self::load_all(dir, names)?.with_temp_keywords(keep);
        keywords.exclude.extend(exclude.iter().cloned());
        Ok(keywords)
    }
}

/// Names of the configurations in `dir`, sorted, without the `.json` suffix
pub fn list_keyword_configs(dir: &Path) -> io::Result<Vec<String>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut names = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && let Some(stem) = name.strip_suffix(".json")
        {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_split_and_legacy() {
        let config = KeywordConfig::parse(
            r#"{
                "net": {"keep": ["timeout"], "filter": ["healthcheck"]},
                "core": ["panic", "fatal"],
                "empty": {}
            }"#,
        )
        .unwrap();

        // "core" sorts before "net"
        assert_eq!(config.keep, vec!["panic", "fatal", "timeout"]);
        assert_eq!(config.exclude, vec!["healthcheck"]);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = KeywordConfig::parse("[1, 2]").unwrap_err();
        assert_eq!(err.kind(), "invalid_request");
    }

    #[test]
    fn test_load_merge_and_temp_keywords() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("default.json"), r#"{"a": {"keep": ["ERROR"]}}"#).unwrap();
        fs::write(dir.path().join("quiet.json"), r#"{"b": {"filter": ["DEBUG"]}}"#).unwrap();

        let config = KeywordConfig::load_all(dir.path(), &["default", "quiet"])
            .unwrap()
            .with_temp_keywords(&["WARN"]);
        assert_eq!(config.keep, vec!["ERROR", "WARN"]);
        assert_eq!(config.exclude, vec!["DEBUG"]);
    }

    #[test]
    fn test_load_rejects_unknown_and_traversal() {
        let dir = tempdir().unwrap();
        assert!(KeywordConfig::load(dir.path(), "nope").is_err());
        assert!(KeywordConfig::load(dir.path(), "../etc/passwd").is_err());
        assert!(KeywordConfig::load(dir.path(), "  ").is_err());
    }

    #[test]
    fn test_list_configs() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.json"), "{}").unwrap();
        fs::write(dir.path().join("a.json"), "{}").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();

        assert_eq!(list_keyword_configs(dir.path()).unwrap(), vec!["a", "b"]);
        assert!(list_keyword_configs(&dir.path().join("missing")).unwrap().is_empty());
    }
}
