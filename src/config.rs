//! Server configuration.
//!
//! Loaded from a YAML file:
//!
//! ```yaml
//! server:
//!   listen: "0.0.0.0:8080"
//!   idle_timeout_secs: 30
//! hosts:
//!   - name: "example.com"
//!     root: "/srv/www"
//!     cgi: "/srv/www/cgi-bin"
//!     aliases:
//!       /docs: /documentation
//!   - name: "*"
//!     proxy: "127.0.0.1:9000"
//! ```
//!
//! The `LISTEN` environment variable overrides `server.listen`.

use anyhow::Context;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::http::parser::ParserLimits;

pub const DEFAULT_LISTEN: &str = "127.0.0.1:8080";
pub const DEFAULT_PATH: &str = "lantern.yaml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    #[serde(rename = "listen")]
    pub listen_addr: String,
    pub idle_timeout_secs: u64,
    pub max_head_bytes: usize,
    pub max_body_bytes: usize,
    /// Upper bound on one readiness wait
    pub tick_millis: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let limits = ParserLimits::default();
        Self {
            listen_addr: DEFAULT_LISTEN.to_string(),
            idle_timeout_secs: 30,
            max_head_bytes: limits.max_head_bytes,
            max_body_bytes: limits.max_body_bytes,
            tick_millis: 500,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    pub fn parser_limits(&self) -> ParserLimits {
        ParserLimits {
            max_head_bytes: self.max_head_bytes,
            max_body_bytes: self.max_body_bytes,
        }
    }
}

/// One virtual host. `name: "*"` is the fallback.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    pub name: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default)]
    pub cgi: Option<PathBuf>,
    /// `host:port` or `http://host:port`
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Config {
    /// Loads from `$LANTERN_CONFIG`, else `lantern.yaml` if it exists, else defaults.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(std::env::var_os("LANTERN_CONFIG").map(PathBuf::from))
    }

    /// Loads from an explicit path (which must exist), or as [`load`](Config::load)
    /// does without one. Environment overrides are applied last.
    pub fn load_from(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let mut cfg = match path {
            Some(path) => Self::from_path(&path)?,
            None if Path::new(DEFAULT_PATH).exists() => Self::from_path(Path::new(DEFAULT_PATH))?,
            None => {
                tracing::warn!("No configuration file found, using defaults");
                Self::default()
            }
        };

        if let Ok(listen) = std::env::var("LISTEN") {
            cfg.server.listen_addr = listen;
        }

        Ok(cfg)
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(text)?;
        Ok(cfg)
    }
}
