use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::CliArgs;
use crate::reconciler::{DEFAULT_GRACE_PERIOD, DEFAULT_POLL_INTERVAL};
use crate::settings::default_settings_path;

const MIN_REFRESH_MS: u64 = 250;
const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    #[serde(alias = "refresh")]
    refresh_ms: Option<u64>,
    #[serde(alias = "grace")]
    grace_secs: Option<u64>,
    #[serde(alias = "timeout_ms")]
    command_timeout_ms: Option<u64>,
    kubectl: Option<String>,
    terminal: Option<String>,
    settings: Option<PathBuf>,
    startup_delay_secs: Option<u64>,
    log_filter: Option<String>,
}

/// Effective runtime settings: flags over config file over defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrayConfig {
    pub source: Option<PathBuf>,
    pub refresh: Duration,
    pub grace: Duration,
    pub command_timeout: Duration,
    pub kubectl: String,
    pub terminal: String,
    pub settings_path: PathBuf,
    pub startup_delay: Duration,
    pub log_filter: String,
}

impl TrayConfig {
    pub fn load(args: &CliArgs) -> Result<Self> {
        let source = discover_config_path();
        let file = match &source {
            Some(path) => read_config_file(path)?,
            None => ConfigFile::default(),
        };
        Ok(Self::merge(args, file, source))
    }

    fn merge(args: &CliArgs, file: ConfigFile, source: Option<PathBuf>) -> Self {
        let refresh_ms = args
            .refresh_ms
            .or(file.refresh_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL.as_millis() as u64)
            .max(MIN_REFRESH_MS);
        let grace = args
            .grace_secs
            .or(file.grace_secs)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_GRACE_PERIOD);

        Self {
            source,
            refresh: Duration::from_millis(refresh_ms),
            grace,
            command_timeout: Duration::from_millis(
                args.command_timeout_ms
                    .or(file.command_timeout_ms)
                    .unwrap_or(DEFAULT_COMMAND_TIMEOUT_MS),
            ),
            kubectl: args
                .kubectl
                .clone()
                .or(file.kubectl)
                .unwrap_or_else(|| "kubectl".to_string()),
            terminal: args
                .terminal
                .clone()
                .or(file.terminal)
                .unwrap_or_else(|| "xterm".to_string()),
            settings_path: args
                .settings
                .clone()
                .or(file.settings)
                .unwrap_or_else(default_settings_path),
            startup_delay: Duration::from_secs(
                args.startup_delay_secs
                    .or(file.startup_delay_secs)
                    .unwrap_or(0),
            ),
            log_filter: args
                .log_filter
                .clone()
                .or(file.log_filter)
                .unwrap_or_else(|| "info".to_string()),
        }
    }
}

fn read_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(ConfigFile::default());
    }
    serde_yaml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

fn discover_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("KUBETRAY_CONFIG")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }

    let cwd_candidates = [PathBuf::from("kubetray.yaml"), PathBuf::from(".kubetray.yaml")];
    for candidate in cwd_candidates {
        if candidate.exists() {
            return Some(candidate);
        }
    }

    if let Ok(home) = std::env::var("HOME") {
        let candidate = PathBuf::from(home).join(".config/kubetray/config.yaml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    None
}
