//! `.rarconfig` per-archive configuration: an INI-like text file at
//! `<source>/.rarconfig` binding options to specific archive paths.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::RarfsError;
use crate::sanitize::alias_shares_directory;

/// One `[path]` section's settings.
#[derive(Debug, Clone, Default)]
pub struct ArchiveConfig {
    pub password: Option<String>,
    pub seek_length: Option<u64>,
    pub save_eof: Option<bool>,
    pub aliases: Vec<(String, String)>,
}

/// Per-archive config table. Parsing the whole file happens once at startup
/// in this implementation — there is no per-archive lazy parse to serialize
/// — so the mutex here guards a single population pass rather than a cache
/// of independent first-touches; it is kept because a future lazy-parse
/// mode (one `.rarconfig` per subtree) would need exactly this discipline
/// and the type should not have to change shape to add it.
pub struct ArchiveConfigTable {
    entries: Mutex<HashMap<PathBuf, ArchiveConfig>>,
}

impl ArchiveConfigTable {
    pub fn empty() -> Self {
        ArchiveConfigTable {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Loads `<source_root>/.rarconfig` if present; a missing file is not an
    /// error since the sidecar config is optional.
    pub fn load(source_root: &Path) -> Result<Self, RarfsError> {
        let path = source_root.join(".rarconfig");
        let table = ArchiveConfigTable::empty();
        match std::fs::read_to_string(&path) {
            Ok(text) => {
                let parsed = parse_rarconfig(&text)?;
                *table.entries.lock().unwrap() = parsed;
                Ok(table)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(table),
            Err(e) => Err(RarfsError::ConfigError(format!(
                "failed to read {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn for_archive(&self, archive_path: &Path) -> Option<ArchiveConfig> {
        self.entries.lock().unwrap().get(archive_path).cloned()
    }
}

fn parse_rarconfig(text: &str) -> Result<HashMap<PathBuf, ArchiveConfig>, RarfsError> {
    let mut out: HashMap<PathBuf, ArchiveConfig> = HashMap::new();
    let mut current: Option<PathBuf> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            current = Some(PathBuf::from(section.trim()));
            out.entry(current.clone().unwrap()).or_default();
            continue;
        }

        let Some(path) = current.clone() else {
            return Err(RarfsError::ConfigError(format!(
                "line {}: key=value outside of a [section]",
                lineno + 1
            )));
        };
        let (key, value) = line.split_once('=').ok_or_else(|| {
            RarfsError::ConfigError(format!("line {}: expected key = value", lineno + 1))
        })?;
        let key = key.trim();
        let value = value.trim();
        let entry = out.entry(path).or_default();

        match key {
            "password" => entry.password = Some(unquote(value)),
            "seek-length" => {
                entry.seek_length = Some(value.parse().map_err(|_| {
                    RarfsError::ConfigError(format!(
                        "line {}: seek-length must be an integer",
                        lineno + 1
                    ))
                })?)
            }
            "save-eof" => {
                entry.save_eof = Some(parse_bool(value).ok_or_else(|| {
                    RarfsError::ConfigError(format!(
                        "line {}: save-eof must be a boolean",
                        lineno + 1
                    ))
                })?)
            }
            "alias" => {
                let (from, to) = parse_alias(value).ok_or_else(|| {
                    RarfsError::ConfigError(format!(
                        "line {}: alias must be \"orig\", \"new\"",
                        lineno + 1
                    ))
                })?;
                if !alias_shares_directory(&from, &to) {
                    return Err(RarfsError::ConfigError(format!(
                        "line {}: alias source and target must share a directory",
                        lineno + 1
                    )));
                }
                entry.aliases.push((from, to));
            }
            other => {
                return Err(RarfsError::ConfigError(format!(
                    "line {}: unknown key {other:?}",
                    lineno + 1
                )));
            }
        }
    }

    Ok(out)
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
        .to_string()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

fn parse_alias(value: &str) -> Option<(String, String)> {
    let mut parts = value.splitn(2, ',');
    let from = unquote(parts.next()?.trim());
    let to = unquote(parts.next()?.trim());
    if from.is_empty() || to.is_empty() {
        return None;
    }
    Some((from, to))
}
