//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.ferrocord/config.json`). The bot's credentials live
//! in a separate JSON file, by default `bot.json` next to the config.

use crate::gateway::DEFAULT_MAX_PARTIAL_BYTES;
use crate::rest::{RestConfig, DEFAULT_API_ROOT, DEFAULT_API_VERSION};
use crate::snowflake::Snowflake;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// REST and gateway API version (default 10).
    #[serde(default = "default_api_version")]
    pub api_version: u32,

    /// REST root without the version segment.
    #[serde(default = "default_api_root")]
    pub api_root: String,

    /// Credentials file. Relative paths are resolved against the config file's parent.
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,

    /// Sleep between ticks of the bot loop.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Largest incomplete gateway frame held for reassembly.
    #[serde(default = "default_max_partial_frame_bytes")]
    pub max_partial_frame_bytes: usize,
}

fn default_api_version() -> u32 {
    DEFAULT_API_VERSION
}

fn default_api_root() -> String {
    DEFAULT_API_ROOT.to_string()
}

fn default_tick_interval_ms() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_partial_frame_bytes() -> usize {
    DEFAULT_MAX_PARTIAL_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            api_root: default_api_root(),
            credentials_path: None,
            tick_interval_ms: default_tick_interval_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            max_partial_frame_bytes: default_max_partial_frame_bytes(),
        }
    }
}

impl Config {
    pub fn rest(&self) -> RestConfig {
        RestConfig {
            api_root: self.api_root.clone(),
            api_version: self.api_version,
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bot identity. Immutable once loaded; each component keeps its own copy.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub token: String,
    pub app_id: Snowflake,
    /// Guild that commands are registered in by default. Global when absent.
    #[serde(default)]
    pub guild_scope: Option<Snowflake>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("app_id", &self.app_id)
            .field("guild_scope", &self.guild_scope)
            .finish()
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("FERROCORD_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".ferrocord").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path, or the default path. Missing file => default config.
/// Returns the config and the path that was used (for resolving the credentials file).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

/// Credentials file: `config.credentials_path` (relative paths resolved against the config
/// file's parent), otherwise `bot.json` next to the config.
pub fn resolve_credentials_path(config: &Config, config_path: &Path) -> PathBuf {
    let config_parent = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    match &config.credentials_path {
        Some(p) if !p.as_os_str().is_empty() => {
            if p.is_absolute() {
                p.clone()
            } else {
                config_parent.join(p)
            }
        }
        _ => config_parent.join("bot.json"),
    }
}

/// Read and parse the credentials file, then apply the token override.
pub fn load_credentials(path: &Path) -> Result<Credentials> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading credentials from {}", path.display()))?;
    let mut credentials: Credentials = serde_json::from_str(&s)
        .with_context(|| format!("parsing credentials from {}", path.display()))?;
    if let Some(token) = resolve_token(&credentials) {
        credentials.token = token;
    }
    anyhow::ensure!(
        !credentials.token.is_empty(),
        "no bot token in {} and FERROCORD_TOKEN is not set",
        path.display()
    );
    Ok(credentials)
}

/// Resolve the bot token: env FERROCORD_TOKEN overrides the credentials file.
pub fn resolve_token(credentials: &Credentials) -> Option<String> {
    std::env::var("FERROCORD_TOKEN")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            Some(credentials.token.trim().to_string()).filter(|s| !s.is_empty())
        })
}
