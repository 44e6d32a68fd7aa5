use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::purge::DEFAULT_RETENTION_DAYS;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub prices: PricesConfig,
  #[serde(default)]
  pub cache: CacheTimings,
  /// Days a soft-deleted record survives before the purge removes it.
  #[serde(default = "default_retention_days")]
  pub retention_days: i64,
  /// Override for the record database location.
  pub db_path: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      sync: SyncConfig::default(),
      prices: PricesConfig::default(),
      cache: CacheTimings::default(),
      retention_days: default_retention_days(),
      db_path: None,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SyncConfig {
  /// Base URL of the remote record store. Absent means local-only mode:
  /// sync is permanently unavailable, which is not an error.
  pub remote_url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PricesConfig {
  /// Base URL of the remote price source.
  pub source_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheTimings {
  #[serde(default = "default_ttl_seconds")]
  pub ttl_seconds: u64,
  #[serde(default = "default_stale_seconds")]
  pub stale_seconds: u64,
}

impl Default for CacheTimings {
  fn default() -> Self {
    Self {
      ttl_seconds: default_ttl_seconds(),
      stale_seconds: default_stale_seconds(),
    }
  }
}

impl CacheTimings {
  pub fn cache_config(&self) -> CacheConfig {
    CacheConfig {
      ttl: Duration::from_secs(self.ttl_seconds),
      stale_time: Duration::from_secs(self.stale_seconds),
    }
  }
}

fn default_retention_days() -> i64 {
  DEFAULT_RETENTION_DAYS
}

fn default_ttl_seconds() -> u64 {
  30 * 60
}

fn default_stale_seconds() -> u64 {
  5 * 60
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (an error if it doesn't exist)
  /// 2. ./bidbook.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bidbook/config.yaml
  ///
  /// No file at all falls back to defaults: the app works local-only
  /// without any configuration.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("bidbook.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bidbook").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// API token for the remote record store, from the environment.
  /// Optional: an unauthenticated remote is allowed.
  pub fn api_token() -> Option<String> {
    std::env::var("BIDBOOK_API_TOKEN").ok()
  }
}
