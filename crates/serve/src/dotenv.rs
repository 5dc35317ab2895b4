//! Parser for the watched `KEY = value` config file.
//!
//! Malformed content or a missing file yields an empty value set; a broken
//! operator file must never take the server down.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

type ValueMap = BTreeMap<String, Option<String>>;

/// Missing file is the common case on first boot and is not logged as an
/// error.
pub fn parse_file(path: &Path) -> ValueMap {
    match std::fs::read_to_string(path) {
        Ok(content) => parse(&content).unwrap_or_else(|line| {
            warn!(path = %path.display(), line, "malformed config file, continuing with an empty value set");
            ValueMap::new()
        }),
        Err(_) => ValueMap::new(),
    }
}

/// Line syntax: optional `export` prefix, `KEY = value` with surrounding
/// whitespace trimmed, `#` comment lines, optional single or double quotes
/// around the value. Any other non-empty line marks the whole file as
/// malformed (`Err` carries the 1-based line number).
pub fn parse(content: &str) -> Result<ValueMap, usize> {
    let mut values = ValueMap::new();
    for (index, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        let Some((key, value)) = line.split_once('=') else {
            return Err(index + 1);
        };
        let key = key.trim();
        if key.is_empty() || !key.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
            return Err(index + 1);
        }
        values.insert(key.to_owned(), Some(unquote(value.trim()).to_owned()));
    }
    Ok(values)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
            return &value[1..value.len() - 1];
        }
    }
    value
}
