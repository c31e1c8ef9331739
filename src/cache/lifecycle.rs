//! Versioned cache generations: install populates, activate prunes.

use color_eyre::Result;
use tracing::{info, warn};

use super::storage::{CacheStorage, ResponseCache};
use crate::http::{Request, Transport};

/// Outcome of precaching the asset manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
  pub cached: Vec<String>,
  pub skipped: Vec<String>,
}

/// Names and manages the cache generation owned by one deployed version.
#[derive(Clone)]
pub struct CacheLifecycle {
  caches: CacheStorage,
  prefix: String,
  version: String,
}

impl CacheLifecycle {
  pub fn new(caches: CacheStorage, prefix: &str, version: &str) -> Self {
    Self {
      caches,
      prefix: prefix.to_string(),
      version: version.to_string(),
    }
  }

  pub fn static_cache_name(&self) -> String {
    format!("{}-static-{}", self.prefix, self.version)
  }

  pub fn api_cache_name(&self) -> String {
    format!("{}-api-{}", self.prefix, self.version)
  }

  /// Every cache name belonging to the current generation.
  pub fn current_names(&self) -> Vec<String> {
    vec![self.static_cache_name(), self.api_cache_name()]
  }

  pub fn static_cache(&self) -> Result<ResponseCache> {
    self.caches.open(&self.static_cache_name())
  }

  pub fn api_cache(&self) -> Result<ResponseCache> {
    self.caches.open(&self.api_cache_name())
  }

  pub fn storage(&self) -> &CacheStorage {
    &self.caches
  }

  /// Precache the asset manifest into this generation's static cache.
  ///
  /// An asset that cannot be fetched is logged and skipped; install itself
  /// only fails if the cache cannot be opened.
  pub async fn install(&self, transport: &dyn Transport, assets: &[String]) -> Result<InstallReport> {
    let cache = self.static_cache()?;
    self.api_cache()?;

    let mut report = InstallReport::default();
    for asset in assets {
      let request = Request::get(asset.as_str());
      match transport.send(&request).await {
        Ok(response) if response.is_success() => match cache.put(&request, &response) {
          Ok(()) => report.cached.push(asset.clone()),
          Err(e) => {
            warn!(asset = %asset, "Could not cache asset: {}", e);
            report.skipped.push(asset.clone());
          }
        },
        Ok(response) => {
          warn!(asset = %asset, status = %response.status, "Could not cache asset");
          report.skipped.push(asset.clone());
        }
        Err(e) => {
          warn!(asset = %asset, "Could not cache asset: {}", e);
          report.skipped.push(asset.clone());
        }
      }
    }

    info!(
      cache = %cache.name(),
      cached = report.cached.len(),
      skipped = report.skipped.len(),
      "Installed static assets"
    );
    Ok(report)
  }

  /// Delete every cache that is not part of the current generation.
  ///
  /// Returns the names removed. Running it again removes nothing.
  pub fn activate(&self) -> Result<Vec<String>> {
    let current = self.current_names();
    let mut deleted = Vec::new();

    for name in self.caches.keys()? {
      if !current.contains(&name) {
        self.caches.delete(&name)?;
        info!(cache = %name, "Deleted stale cache");
        deleted.push(name);
      }
    }

    Ok(deleted)
  }
}
