use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Assets precached at install, relative to the app origin.
const DEFAULT_ASSETS: &[&str] = &[
  "./",
  "./index.html",
  "./manifest.json",
  "./assets/css/bootstrap.min.css",
  "./assets/css/styles.css",
  "./assets/js/bootstrap.bundle.min.js",
  "./assets/icons/icon-192.png",
  "./assets/icons/icon-512.png",
  "./pages/maid.html",
  "./pages/reception.html",
];

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
  #[serde(default)]
  pub api: ApiConfig,
  #[serde(default)]
  pub app: AppConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub sync: SyncConfig,
  #[serde(default)]
  pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  /// REST API root, including its fixed base path
  pub base_url: String,
  /// Upper bound for every network attempt
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:3000/api".to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
  /// Origin the pages and static assets are served from
  pub origin: String,
  /// Precache manifest, relative to `origin`
  pub assets: Vec<String>,
  /// Served for navigations when neither cache nor network can answer
  pub offline_page: String,
  /// External static origins (CDNs), cached only on HTTP 200
  pub cdn_origins: Vec<String>,
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      origin: "http://localhost:8080/".to_string(),
      assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
      offline_page: "./pages/offline.html".to_string(),
      cdn_origins: vec!["https://cdn.jsdelivr.net".to_string()],
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub prefix: String,
  /// Deployed version; each version owns its own cache generation
  pub version: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      prefix: "hotel-pwa".to_string(),
      version: "v1".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Whether the platform offers a background-sync facility
  pub background_sync: bool,
  /// How often connectivity is checked
  pub check_interval_secs: u64,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      background_sync: true,
      check_interval_secs: 15,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StorageConfig {
  /// Database file (default: $XDG_DATA_HOME/roomsync/roomsync.db)
  pub path: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./roomsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/roomsync/config.yaml
  ///
  /// Without any file the defaults are used.
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

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.validate()?;
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("roomsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("roomsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  fn validate(&self) -> Result<()> {
    self.api_base()?;
    self.app_origin()?;
    Ok(())
  }

  /// API root as a URL, always ending in `/` so joins stay under it.
  pub fn api_base(&self) -> Result<Url> {
    parse_dir_url(&self.api.base_url).map_err(|e| eyre!("Invalid api.base_url: {}", e))
  }

  pub fn app_origin(&self) -> Result<Url> {
    parse_dir_url(&self.app.origin).map_err(|e| eyre!("Invalid app.origin: {}", e))
  }

  /// Absolute URL of an API path such as `habitaciones/marcar-limpia/42`.
  pub fn api_url(&self, path: &str) -> Result<String> {
    let joined = self
      .api_base()?
      .join(path.trim_start_matches('/'))
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))?;
    Ok(joined.to_string())
  }

  /// Absolute URL of an app-relative path such as `./pages/maid.html`.
  pub fn app_url(&self, path: &str) -> Result<String> {
    let joined = self
      .app_origin()?
      .join(path)
      .map_err(|e| eyre!("Invalid app path {}: {}", path, e))?;
    Ok(joined.to_string())
  }

  /// The precache manifest as absolute URLs.
  pub fn asset_urls(&self) -> Result<Vec<String>> {
    self.app.assets.iter().map(|a| self.app_url(a)).collect()
  }

  pub fn offline_page_url(&self) -> Result<String> {
    self.app_url(&self.app.offline_page)
  }

  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.api.timeout_secs)
  }

  pub fn check_interval(&self) -> Duration {
    Duration::from_secs(self.sync.check_interval_secs.max(1))
  }

  /// Database location, resolving the platform default.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.storage.path {
      Some(path) => Ok(path.clone()),
      None => crate::db::Database::default_path(),
    }
  }

  /// Session token override from the environment.
  ///
  /// Checks ROOMSYNC_TOKEN.
  pub fn env_token() -> Option<String> {
    std::env::var("ROOMSYNC_TOKEN")
      .ok()
      .filter(|t| !t.trim().is_empty())
  }
}

fn parse_dir_url(raw: &str) -> std::result::Result<Url, url::ParseError> {
  let mut url = Url::parse(raw)?;
  if !url.path().ends_with('/') {
    let path = format!("{}/", url.path());
    url.set_path(&path);
  }
  Ok(url)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_without_file() {
    let config = Config::default();
    assert_eq!(config.cache.prefix, "hotel-pwa");
    assert_eq!(config.app.assets.len(), DEFAULT_ASSETS.len());
    assert!(config.sync.background_sync);
    assert!(config.validate().is_ok());
  }

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::from_yaml(
      r#"
api:
  base_url: "https://hotel.example/api/v2"
cache:
  version: "v7"
"#,
    )
    .unwrap();

    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.cache.prefix, "hotel-pwa");
    assert_eq!(config.cache.version, "v7");
  }

  #[test]
  fn test_api_url_stays_under_base_path() {
    let mut config = Config::default();
    config.api.base_url = "https://hotel.example/api".to_string();

    assert_eq!(
      config.api_url("/habitaciones/marcar-limpia/42").unwrap(),
      "https://hotel.example/api/habitaciones/marcar-limpia/42"
    );
  }

  #[test]
  fn test_asset_urls_resolve_against_origin() {
    let mut config = Config::default();
    config.app.origin = "https://hotel.example/app".to_string();
    config.app.assets = vec!["./".to_string(), "./pages/maid.html".to_string()];

    assert_eq!(
      config.asset_urls().unwrap(),
      vec![
        "https://hotel.example/app/",
        "https://hotel.example/app/pages/maid.html"
      ]
    );
    assert_eq!(
      config.offline_page_url().unwrap(),
      "https://hotel.example/app/pages/offline.html"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    let mut config = Config::default();
    config.api.base_url = "not a url".to_string();
    assert!(config.validate().is_err());
  }

  #[test]
  fn test_missing_explicit_file_is_error() {
    assert!(Config::load(Some(Path::new("/nonexistent/roomsync.yaml"))).is_err());
  }
}
