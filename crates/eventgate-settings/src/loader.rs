//! Settings loading: compiled defaults, JSON file, env overrides.

use std::env;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::{Result, SettingsError};
use crate::types::GateSettings;

/// Default settings file location: `~/.eventgate/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".eventgate").join("settings.json")
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<GateSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific file with env overrides applied.
///
/// A missing file is not an error: defaults plus env overrides are returned.
pub fn load_settings_from_path(path: &Path) -> Result<GateSettings> {
    let mut document = serde_json::to_value(GateSettings::default())
        .expect("default settings serialize");

    if path.exists() {
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: Value = serde_json::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(&mut document, file);
    }

    apply_env_overrides(&mut document);

    serde_json::from_value(document).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Recursively merge `overlay` into `base`. Objects merge key-by-key; any
/// other value replaces the base value wholesale.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        let _ = base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// `EVENTGATE_*` env overrides, highest priority.
fn apply_env_overrides(document: &mut Value) {
    let overrides: [(&str, &[&str], fn(&str) -> Option<Value>); 8] = [
        ("EVENTGATE_HOST", &["server", "host"], parse_string),
        ("EVENTGATE_PORT", &["server", "port"], parse_number),
        (
            "EVENTGATE_KEEP_ALIVE_MS",
            &["server", "keepAliveMs"],
            parse_number,
        ),
        (
            "EVENTGATE_REAP_INTERVAL_MS",
            &["server", "reapIntervalMs"],
            parse_number,
        ),
        (
            "EVENTGATE_PUBLISH_CHANGES",
            &["server", "publishChanges"],
            parse_bool,
        ),
        ("EVENTGATE_BRIDGE_ENABLED", &["bridge", "enabled"], parse_bool),
        ("EVENTGATE_BRIDGE_SECRET", &["bridge", "secret"], parse_string),
        ("EVENTGATE_LOG_LEVEL", &["log", "level"], parse_string),
    ];

    for (var, path, parse) in overrides {
        let Ok(raw) = env::var(var) else { continue };
        match parse(&raw) {
            Some(value) => set_path(document, path, value),
            None => tracing::warn!(var, raw, "ignoring unparseable env override"),
        }
    }
}

fn parse_string(raw: &str) -> Option<Value> {
    Some(Value::String(raw.to_string()))
}

fn parse_number(raw: &str) -> Option<Value> {
    raw.parse::<u64>().ok().map(Value::from)
}

fn parse_bool(raw: &str) -> Option<Value> {
    match raw {
        "true" | "1" => Some(Value::Bool(true)),
        "false" | "0" => Some(Value::Bool(false)),
        _ => None,
    }
}

fn set_path(document: &mut Value, path: &[&str], value: Value) {
    let mut current = document;
    for key in &path[..path.len() - 1] {
        current = current
            .as_object_mut()
            .expect("settings document is an object")
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if let Some(map) = current.as_object_mut() {
        let _ = map.insert(path[path.len() - 1].to_string(), value);
    }
}
