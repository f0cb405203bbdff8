use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use plan_harness_core::graph::DEFAULT_MAX_DEPTH;
use plan_harness_core::ingest::{IngestSettings, DEFAULT_MAX_ITEM_BYTES};

/// Environment variable that overrides `auth.internal_secret`.
pub const INTERNAL_SECRET_ENV: &str = "PH_INTERNAL_SECRET";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Directory under which full plan artifacts are written.
    pub artifact_root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    /// Largest request body accepted, in bytes.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_item_bytes")]
    pub max_item_bytes: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_list_limit")]
    pub list_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_item_bytes: default_max_item_bytes(),
            max_depth: default_max_depth(),
            list_limit: default_list_limit(),
        }
    }
}

impl IngestConfig {
    pub fn settings(&self) -> IngestSettings {
        IngestSettings {
            max_item_bytes: self.max_item_bytes,
            max_depth: self.max_depth,
        }
    }
}

fn default_max_item_bytes() -> usize {
    DEFAULT_MAX_ITEM_BYTES
}
fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
fn default_list_limit() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    /// Shared secret accepted in the `x-internal-secret` header.
    #[serde(default)]
    pub internal_secret: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationsConfig {
    /// Webhook used when a project has none of its own.
    #[serde(default)]
    pub slack_webhook: Option<String>,
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL of a dashboard; alerts link to `<base>/plans/<id>` when set.
    #[serde(default)]
    pub plan_url_base: Option<String>,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            slack_webhook: None,
            timeout_secs: default_notify_timeout_secs(),
            plan_url_base: None,
        }
    }
}

fn default_notify_timeout_secs() -> u64 {
    5
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let mut config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if let Ok(secret) = std::env::var(INTERNAL_SECRET_ENV) {
        if !secret.is_empty() {
            config.auth.internal_secret = Some(secret);
        }
    }

    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.server.max_body_bytes == 0 {
        anyhow::bail!("server.max_body_bytes must be > 0");
    }
    if config.ingest.max_item_bytes == 0 {
        anyhow::bail!("ingest.max_item_bytes must be > 0");
    }
    if config.ingest.max_depth == 0 {
        anyhow::bail!("ingest.max_depth must be > 0");
    }
    if config.ingest.list_limit == 0 {
        anyhow::bail!("ingest.list_limit must be >= 1");
    }
    if config.notifications.timeout_secs == 0 {
        anyhow::bail!("notifications.timeout_secs must be > 0");
    }
    if let Some(secret) = &config.auth.internal_secret {
        if secret.len() < 16 {
            anyhow::bail!("auth.internal_secret must be at least 16 characters");
        }
    }
    if let Some(url) = &config.notifications.slack_webhook {
        if !url.starts_with("https://") && !url.starts_with("http://") {
            anyhow::bail!("notifications.slack_webhook must be an http(s) URL");
        }
    }
    Ok(())
}
