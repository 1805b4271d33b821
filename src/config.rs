use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::progress::WaitOptions;
use crate::request::{RequestDefaults, DEFAULT_ITEMS_PER_PAGE, DEFAULT_NUM_RETRIES};

const DEFAULT_HOST: &str = "canvas.instructure.com";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub canvas: CanvasConfig,
  #[serde(default)]
  pub requests: RequestConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub wait: WaitConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CanvasConfig {
  /// Host name, or a full base URL for non-https instances
  #[serde(default = "default_host")]
  pub host: String,
  /// Prefix placed in front of every API path (e.g. when Canvas sits behind a proxy)
  #[serde(default)]
  pub api_path_prefix: String,
  /// Prefer the environment; see [`Config::access_token`]
  pub access_token: Option<String>,
}

impl Default for CanvasConfig {
  fn default() -> Self {
    Self {
      host: default_host(),
      api_path_prefix: String::new(),
      access_token: None,
    }
  }
}

fn default_host() -> String {
  DEFAULT_HOST.to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RequestConfig {
  #[serde(default = "default_items_per_page")]
  pub items_per_page: NonZeroU32,
  pub max_pages: Option<NonZeroU32>,
  #[serde(default = "default_num_retries")]
  pub num_retries: u32,
}

impl Default for RequestConfig {
  fn default() -> Self {
    Self {
      items_per_page: DEFAULT_ITEMS_PER_PAGE,
      max_pages: None,
      num_retries: DEFAULT_NUM_RETRIES,
    }
  }
}

fn default_items_per_page() -> NonZeroU32 {
  DEFAULT_ITEMS_PER_PAGE
}

fn default_num_retries() -> u32 {
  DEFAULT_NUM_RETRIES
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
  /// Every request goes to the network
  None,
  /// In-process cache, lost on exit
  #[default]
  Memory,
  /// SQLite file shared across runs, scoped by session
  Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub kind: CacheKind,
  /// Session id for the SQLite store
  #[serde(default = "default_session")]
  pub session: String,
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  /// SQLite entries older than this are refetched
  pub max_age_minutes: Option<u32>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      kind: CacheKind::default(),
      session: default_session(),
      path: None,
      max_age_minutes: None,
    }
  }
}

fn default_session() -> String {
  "default".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct WaitConfig {
  #[serde(default = "default_timeout_minutes")]
  pub timeout_minutes: u64,
  #[serde(default = "default_refresh_ms")]
  pub refresh_ms: u64,
}

impl Default for WaitConfig {
  fn default() -> Self {
    Self {
      timeout_minutes: default_timeout_minutes(),
      refresh_ms: default_refresh_ms(),
    }
  }
}

fn default_timeout_minutes() -> u64 {
  2
}

fn default_refresh_ms() -> u64 {
  250
}

impl WaitConfig {
  pub fn options(&self) -> WaitOptions {
    WaitOptions {
      timeout: Duration::from_secs(self.timeout_minutes * 60),
      refresh: Duration::from_millis(self.refresh_ms),
    }
  }
}

impl Config {
  /// Read `explicit_path`, or else the first file from [`search_paths`]; with neither the
  /// defaults apply. A named file that does not exist is an error.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    if let Some(path) = explicit_path {
      if !path.is_file() {
        return Err(eyre!("Config file not found: {}", path.display()));
      }
      return Self::load_from_path(path);
    }

    match search_paths().into_iter().find(|candidate| candidate.is_file()) {
      Some(found) => Self::load_from_path(&found),
      None => {
        tracing::debug!("no config file found, using defaults");
        Ok(Self::default())
      }
    }
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    tracing::debug!(path = %path.display(), "loading config");
    let yaml = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Could not read {}: {}", path.display(), e))?;
    Self::from_yaml_str(&yaml).map_err(|e| eyre!("Invalid config in {}: {}", path.display(), e))
  }

  pub fn from_yaml_str(contents: &str) -> Result<Self> {
    Ok(serde_yaml::from_str(contents)?)
  }

  /// Get the Canvas access token.
  ///
  /// Checks CANVAS_ENGINE_TOKEN first, then CANVAS_ACCESS_TOKEN, then the config file.
  pub fn access_token(&self) -> Option<String> {
    resolve_token(
      |name| std::env::var(name).ok(),
      self.canvas.access_token.as_deref(),
    )
  }

  /// Request defaults for a client built from this config.
  pub fn request_defaults(&self) -> RequestDefaults {
    RequestDefaults {
      access_token: self.access_token(),
      items_per_page: self.requests.items_per_page,
      max_pages: self.requests.max_pages,
      path_prefix: self.canvas.api_path_prefix.clone(),
      num_retries: self.requests.num_retries,
    }
  }
}

/// Candidate config locations, most specific first.
fn search_paths() -> Vec<PathBuf> {
  let mut paths = vec![PathBuf::from("canvas-engine.yaml")];
  paths.extend(dirs::config_dir().map(|dir| dir.join("canvas-engine").join("config.yaml")));
  paths
}

fn resolve_token(env: impl Fn(&str) -> Option<String>, configured: Option<&str>) -> Option<String> {
  ["CANVAS_ENGINE_TOKEN", "CANVAS_ACCESS_TOKEN"]
    .into_iter()
    .find_map(|name| env(name).filter(|v| !v.is_empty()))
    .or_else(|| configured.map(str::to_string))
}
