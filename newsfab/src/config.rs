use crate::types::{ConfigError, SourceId, SourceList};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use url::Url;

/// A `urls` list element: the URL text, or a description of a non-string value.
type RawUrl = Result<String, String>;

/// Loads the source list from `path`.
///
/// TOML by default, JSON when the extension is `.json`. Both take a top-level `urls`
/// list. Entries that are not strings or not http(s) URLs are skipped with a warning;
/// duplicates keep their first position.
pub fn load_sources(path: &Path) -> Result<SourceList, ConfigError> {
    let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: PathBuf::from(path),
        source: e,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();

    let raw = if ext == "json" {
        parse_json(&content)
    } else {
        parse_toml(&content)
    }
    .map_err(|message| ConfigError::Parse {
        path: PathBuf::from(path),
        message,
    })?
    .ok_or_else(|| ConfigError::MissingUrls {
        path: PathBuf::from(path),
    })?;

    Ok(clean_urls(raw))
}

fn parse_toml(s: &str) -> Result<Option<Vec<RawUrl>>, String> {
    let table: toml::Table = toml::from_str(s).map_err(|e| e.to_string())?;
    match table.get("urls") {
        None => Ok(None),
        Some(toml::Value::Array(items)) => Ok(Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| v.to_string()))
                .collect(),
        )),
        Some(other) => Err(format!("`urls` must be a list, found {}", other.type_str())),
    }
}

fn parse_json(s: &str) -> Result<Option<Vec<RawUrl>>, String> {
    let value: serde_json::Value = serde_json::from_str(s).map_err(|e| e.to_string())?;
    match value.get("urls") {
        None => Ok(None),
        Some(serde_json::Value::Array(items)) => Ok(Some(
            items
                .iter()
                .map(|v| v.as_str().map(str::to_string).ok_or_else(|| v.to_string()))
                .collect(),
        )),
        Some(other) => Err(format!("`urls` must be a list, found {}", other)),
    }
}

fn clean_urls(items: Vec<RawUrl>) -> SourceList {
    let mut ids = Vec::with_capacity(items.len());
    for item in items {
        let text = match item {
            Ok(text) => text,
            Err(value) => {
                warn!("Skipping invalid URL: {}", value);
                continue;
            }
        };
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        match Url::parse(text) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => ids.push(SourceId::new(text)),
            Ok(url) => warn!("Skipping URL with unsupported scheme {}: {}", url.scheme(), text),
            Err(e) => warn!("Skipping invalid URL {}: {}", text, e),
        }
    }
    SourceList::new(ids)
}
