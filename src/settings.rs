use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub const WINDOW_WIDTH_KEY: &str = "WINDOW_WIDTH";
pub const WINDOW_HEIGHT_KEY: &str = "WINDOW_HEIGHT";
pub const TAIL_KEY: &str = "TAIL";

/// Flat key-value settings. Missing keys read as the empty string.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> String;
    fn set(&self, key: &str, value: &str) -> Result<()>;
}

pub fn port_from_key(pod: &str) -> String {
    format!("PORT-FROM-{pod}")
}

pub fn port_to_key(pod: &str) -> String {
    format!("PORT-TO-{pod}")
}

/// Terminal window and log tail preferences.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TerminalPreferences {
    pub width: String,
    pub height: String,
    pub tail: String,
}

impl TerminalPreferences {
    pub fn load(settings: &dyn SettingsStore) -> Self {
        Self {
            width: or_default(settings.get(WINDOW_WIDTH_KEY), "300"),
            height: or_default(settings.get(WINDOW_HEIGHT_KEY), "50"),
            tail: or_default(settings.get(TAIL_KEY), "10"),
        }
    }

    pub fn save(&self, settings: &dyn SettingsStore) -> Result<()> {
        settings.set(WINDOW_WIDTH_KEY, &self.width)?;
        settings.set(WINDOW_HEIGHT_KEY, &self.height)?;
        settings.set(TAIL_KEY, &self.tail)?;
        Ok(())
    }

    pub fn geometry(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

fn or_default(value: String, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value
    }
}

/// Settings persisted as a YAML map, rewritten on every `set`.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: Mutex<BTreeMap<String, String>>,
}

impl FileSettings {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("failed to read settings {}", path.display()))?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                serde_yaml::from_str(&raw)
                    .with_context(|| format!("failed to parse settings {}", path.display()))?
            }
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let rendered = serde_yaml::to_string(values).context("failed to encode settings")?;
        let staging = self.path.with_extension("yaml.tmp");
        fs::write(&staging, rendered)
            .with_context(|| format!("failed to write settings {}", staging.display()))?;
        fs::rename(&staging, &self.path)
            .with_context(|| format!("failed to replace settings {}", self.path.display()))?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> String {
        match self.values.lock() {
            Ok(values) => values.get(key).cloned().unwrap_or_default(),
            Err(_) => {
                warn!("settings lock poisoned while reading {key}");
                String::new()
            }
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self
            .values
            .lock()
            .map_err(|_| anyhow::anyhow!("settings lock poisoned"))?;
        let mut staged = values.clone();
        staged.insert(key.to_string(), value.to_string());
        self.persist(&staged)?;
        *values = staged;
        Ok(())
    }
}

pub fn default_settings_path() -> PathBuf {
    std::env::var("HOME")
        .map(|home| PathBuf::from(home).join(".config/kubetray/settings.yaml"))
        .unwrap_or_else(|_| PathBuf::from("kubetray-settings.yaml"))
}

#[cfg(test)]
mod tests {
    use super::{FileSettings, SettingsStore, TAIL_KEY, TerminalPreferences, port_from_key};
    use crate::testing::MemorySettings;

    #[test]
    fn file_settings_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.yaml");

        let settings = FileSettings::open(&path).unwrap();
        assert_eq!(settings.get(&port_from_key("web-1")), "");
        settings.set(&port_from_key("web-1"), "8080").unwrap();

        let reopened = FileSettings::open(&path).unwrap();
        assert_eq!(reopened.get("PORT-FROM-web-1"), "8080");
        assert_eq!(reopened.get("missing"), "");
    }

    #[test]
    fn failed_write_keeps_the_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let settings = FileSettings::open(&path).unwrap();
        settings.set(TAIL_KEY, "50").unwrap();

        // A directory in the way of the staging file makes every write fail.
        std::fs::create_dir(path.with_extension("yaml.tmp")).unwrap();
        assert!(settings.set(TAIL_KEY, "500").is_err());
        assert_eq!(settings.get(TAIL_KEY), "50");
        assert_eq!(FileSettings::open(&path).unwrap().get(TAIL_KEY), "50");
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "- not\n- a map\n").unwrap();
        assert!(FileSettings::open(&path).is_err());
    }

    #[test]
    fn terminal_preferences_fall_back_to_defaults() {
        let settings = MemorySettings::default();
        let prefs = TerminalPreferences::load(&settings);
        assert_eq!(prefs.geometry(), "300x50");
        assert_eq!(prefs.tail, "10");

        TerminalPreferences {
            width: "120".to_string(),
            height: "40".to_string(),
            tail: "200".to_string(),
        }
        .save(&settings)
        .unwrap();
        let prefs = TerminalPreferences::load(&settings);
        assert_eq!(prefs.geometry(), "120x40");
        assert_eq!(prefs.tail, "200");
    }
}
