//! Request classification.

use color_eyre::Result;
use url::Url;

use crate::config::Config;
use crate::http::{Method, Request};

/// How a request is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
  /// App shell file: cache-first
  StaticAsset,
  /// External static resource: cache-first, written only on 200
  CdnAsset,
  /// API GET: network-first with cache fallback
  ApiRead,
  /// API POST/PUT/DELETE: network, captured into the queue on failure
  ApiWrite,
  /// Everything else goes straight to the network
  Passthrough,
}

/// Classifies requests by origin, path and method.
#[derive(Debug, Clone)]
pub struct RoutingPolicy {
  api_base: Url,
  app_origin: Url,
  cdn_origins: Vec<Url>,
}

impl RoutingPolicy {
  pub fn new(api_base: Url, app_origin: Url, cdn_origins: Vec<Url>) -> Self {
    Self {
      api_base,
      app_origin,
      cdn_origins,
    }
  }

  pub fn from_config(config: &Config) -> Result<Self> {
    let cdn_origins = config
      .app
      .cdn_origins
      .iter()
      .filter_map(|o| Url::parse(o).ok())
      .collect();
    Ok(Self::new(config.api_base()?, config.app_origin()?, cdn_origins))
  }

  pub fn classify(&self, request: &Request) -> Route {
    let Ok(url) = Url::parse(&request.url) else {
      return Route::Passthrough;
    };

    if self.is_api(&url) {
      return match request.method {
        Method::GET => Route::ApiRead,
        Method::POST | Method::PUT | Method::DELETE => Route::ApiWrite,
        _ => Route::Passthrough,
      };
    }

    if request.method != Method::GET {
      return Route::Passthrough;
    }

    if same_origin(&url, &self.app_origin) {
      Route::StaticAsset
    } else if self.cdn_origins.iter().any(|cdn| same_origin(&url, cdn)) {
      Route::CdnAsset
    } else {
      Route::Passthrough
    }
  }

  fn is_api(&self, url: &Url) -> bool {
    if !same_origin(url, &self.api_base) {
      return false;
    }
    let base = self.api_base.path().trim_end_matches('/');
    let path = url.path();
    path == base || path.starts_with(&format!("{}/", base))
  }
}

fn same_origin(a: &Url, b: &Url) -> bool {
  a.origin() == b.origin()
}
