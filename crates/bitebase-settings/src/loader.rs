//! Settings loading: file discovery, deep merge, env overrides.

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::errors::Result;
use crate::types::Settings;

/// Path to the user settings file.
///
/// `$BITEBASE_SETTINGS_PATH` wins when set; otherwise
/// `$HOME/.bitebase/settings.json`.
#[must_use]
pub fn settings_path() -> PathBuf {
    if let Ok(path) = std::env::var("BITEBASE_SETTINGS_PATH") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".bitebase").join("settings.json")
}

/// Deep-merge `overlay` onto `base`.
///
/// Objects merge recursively; any other value type in the overlay replaces
/// the base value wholesale (arrays are not element-merged).
#[must_use]
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                let _ = base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Load settings from the default path with env overrides applied.
pub fn load_settings() -> Result<Settings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path.
///
/// A missing file is not an error — defaults apply. A present-but-invalid
/// file is an error so a typo never silently reverts the deployment to
/// defaults.
pub fn load_settings_from_path(path: &Path) -> Result<Settings> {
    let defaults = serde_json::to_value(Settings::default())?;

    let merged = if path.exists() {
        let raw = std::fs::read_to_string(path)?;
        let file_value: Value = serde_json::from_str(&raw)?;
        deep_merge(defaults, file_value)
    } else {
        tracing::debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: Settings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    settings.validate();
    Ok(settings)
}

/// Apply `BITEBASE_*` environment overrides.
///
/// Unparseable values are logged and ignored — env typos must not take the
/// server down.
fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(port) = std::env::var("BITEBASE_HTTP_PORT") {
        match port.parse::<u16>() {
            Ok(parsed) => settings.server.http_port = parsed,
            Err(_) => {
                tracing::warn!(value = %port, "ignoring invalid BITEBASE_HTTP_PORT");
            }
        }
    }
    if let Ok(filter) = std::env::var("BITEBASE_LOG_FILTER") {
        settings.logging.filter = filter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deep_merge_disjoint_keys() {
        let a = serde_json::json!({"x": 1});
        let b = serde_json::json!({"y": 2});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 1);
        assert_eq!(merged["y"], 2);
    }

    #[test]
    fn deep_merge_overlay_wins_on_conflict() {
        let a = serde_json::json!({"x": 1, "nested": {"a": 1, "b": 2}});
        let b = serde_json::json!({"x": 9, "nested": {"b": 3}});
        let merged = deep_merge(a, b);
        assert_eq!(merged["x"], 9);
        assert_eq!(merged["nested"]["a"], 1);
        assert_eq!(merged["nested"]["b"], 3);
    }

    #[test]
    fn deep_merge_replaces_arrays_wholesale() {
        let a = serde_json::json!({"stages": [1, 2, 3]});
        let b = serde_json::json!({"stages": [9]});
        let merged = deep_merge(a, b);
        assert_eq!(merged["stages"], serde_json::json!([9]));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let settings = load_settings_from_path(Path::new("/nonexistent/nope.json")).unwrap();
        assert_eq!(settings.server.http_port, 3001);
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "server": {"httpPort": 8088},
                "mcp": {"healthCheckIntervalSecs": 5}
            }"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.http_port, 8088);
        assert_eq!(settings.mcp.health_check_interval_secs, 5);
        // Untouched fields keep defaults
        assert_eq!(settings.server.bind_addr, "127.0.0.1");
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_settings_from_path(&path).is_err());
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"futureFeature": {"x": 1}}"#).unwrap();
        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.server.http_port, 3001);
    }

    #[test]
    fn file_defines_mcp_servers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{
                "mcp": {
                    "servers": {
                        "scraper": {
                            "transport": {"type": "stdio", "command": "firecrawl-mcp"},
                            "capabilities": ["web-scraping"]
                        }
                    }
                }
            }"#,
        )
        .unwrap();

        let settings = load_settings_from_path(&path).unwrap();
        assert_eq!(settings.mcp.servers.len(), 1);
        assert!(settings.mcp.servers.contains_key("scraper"));
    }
}
