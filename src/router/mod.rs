//! Per-request strategy selection and execution.
//!
//! - Static assets: cache-first, offline page for failed navigations
//! - API reads: network-first, last cached response on transport failure
//! - API writes: network, captured into the queue on transport failure and
//!   answered with a synthetic "accepted offline" response
//!
//! Only transport failures change behavior. A reachable server answering
//! with an error status is passed through untouched.

mod policy;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::cache::ResponseCache;
use crate::http::{Request, Response, StatusCode, Transport, TransportError};
use crate::queue::{CaptureQueue, EntryMeta, NewEntry};

pub use policy::{Route, RoutingPolicy};

/// Message returned to the page when a write is captured.
pub const OFFLINE_MESSAGE: &str =
  "Request stored offline; it will be sent when the connection returns";

/// Body of the synthetic response for a captured write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineAck {
  pub offline: bool,
  pub message: String,
}

impl OfflineAck {
  pub fn response() -> Response {
    Response::json(
      StatusCode::OK,
      &OfflineAck {
        offline: true,
        message: OFFLINE_MESSAGE.to_string(),
      },
    )
  }
}

/// Where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
  Network,
  Cache,
  /// The offline fallback page, served for a failed navigation
  OfflinePage,
  /// Synthetic acknowledgement; the request was queued under this id
  Queued { entry_id: i64 },
}

/// A response together with its origin.
#[derive(Debug, Clone)]
pub struct Fetched {
  pub response: Response,
  pub source: Source,
}

impl Fetched {
  fn network(response: Response) -> Self {
    Self {
      response,
      source: Source::Network,
    }
  }

  pub fn queued_id(&self) -> Option<i64> {
    match self.source {
      Source::Queued { entry_id } => Some(entry_id),
      _ => None,
    }
  }
}

/// Applies the routing policy to requests.
pub struct Interceptor {
  policy: RoutingPolicy,
  transport: Arc<dyn Transport>,
  static_cache: ResponseCache,
  api_cache: ResponseCache,
  queue: Arc<CaptureQueue>,
  offline_page: String,
}

impl Interceptor {
  pub fn new(
    policy: RoutingPolicy,
    transport: Arc<dyn Transport>,
    static_cache: ResponseCache,
    api_cache: ResponseCache,
    queue: Arc<CaptureQueue>,
    offline_page: String,
  ) -> Self {
    Self {
      policy,
      transport,
      static_cache,
      api_cache,
      queue,
      offline_page,
    }
  }

  /// Serve `request`; `meta` is stored with the entry if a write is queued.
  ///
  /// An `Err` is a transport failure that no cache could cover. A write
  /// whose response was cut off after the status line is not queued: the
  /// server already has it.
  pub async fn handle(
    &self,
    request: Request,
    meta: EntryMeta,
  ) -> Result<Fetched, TransportError> {
    let route = self.policy.classify(&request);
    debug!(method = %request.method, url = %request.url, ?route, "Routing request");

    match route {
      Route::StaticAsset => self.cache_first(&request, false).await,
      Route::CdnAsset => self.cache_first(&request, true).await,
      Route::ApiRead => self.network_first(&request).await,
      Route::ApiWrite => self.capture_on_failure(&request, meta).await,
      Route::Passthrough => self.transport.send(&request).await.map(Fetched::network),
    }
  }

  async fn cache_first(&self, request: &Request, only_ok: bool) -> Result<Fetched, TransportError> {
    if let Some(response) = lookup(&self.static_cache, request) {
      return Ok(Fetched {
        response,
        source: Source::Cache,
      });
    }

    match self.transport.send(request).await {
      Ok(response) => {
        let cacheable = if only_ok {
          response.status == StatusCode::OK
        } else {
          response.is_success()
        };
        if cacheable {
          store(&self.static_cache, request, &response);
        }
        Ok(Fetched::network(response))
      }
      Err(e) if request.navigate => {
        match lookup(&self.static_cache, &Request::get(self.offline_page.as_str())) {
          Some(page) => {
            info!(url = %request.url, "Serving offline page: {}", e);
            Ok(Fetched {
              response: page,
              source: Source::OfflinePage,
            })
          }
          None => Err(e),
        }
      }
      Err(e) => Err(e),
    }
  }

  async fn network_first(&self, request: &Request) -> Result<Fetched, TransportError> {
    match self.transport.send(request).await {
      Ok(response) => {
        if response.is_success() {
          store(&self.api_cache, request, &response);
        }
        Ok(Fetched::network(response))
      }
      Err(e) => match lookup(&self.api_cache, request) {
        Some(response) => {
          info!(url = %request.url, "Network unavailable, serving cached response: {}", e);
          Ok(Fetched {
            response,
            source: Source::Cache,
          })
        }
        None => Err(e),
      },
    }
  }

  async fn capture_on_failure(
    &self,
    request: &Request,
    meta: EntryMeta,
  ) -> Result<Fetched, TransportError> {
    let error = match self.transport.send(request).await {
      Ok(response) => return Ok(Fetched::network(response)),
      Err(e) if e.is_network() => e,
      Err(e) => return Err(e),
    };

    let Some(entry) = NewEntry::capture(request, meta) else {
      return Err(error);
    };

    match self.queue.capture(entry) {
      Ok(entry_id) => {
        info!(entry_id, method = %request.method, url = %request.url, "Captured write while offline: {}", error);
        Ok(Fetched {
          response: OfflineAck::response(),
          source: Source::Queued { entry_id },
        })
      }
      Err(e) => {
        error!(url = %request.url, "Failed to capture request: {}", e);
        Err(error)
      }
    }
  }
}

/// Cache read that treats storage errors as a miss.
fn lookup(cache: &ResponseCache, request: &Request) -> Option<Response> {
  cache.match_request(request).unwrap_or_else(|e| {
    warn!(cache = %cache.name(), url = %request.url, "Cache read failed: {}", e);
    None
  })
}

/// Cache write that never fails the request.
fn store(cache: &ResponseCache, request: &Request, response: &Response) {
  if let Err(e) = cache.put(request, response) {
    warn!(cache = %cache.name(), url = %request.url, "Cache write failed: {}", e);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheLifecycle, CacheStorage};
  use crate::db::Database;
  use crate::http::testing::ScriptedTransport;
  use crate::http::Method;
  use crate::queue::SqliteQueueStore;
  use url::Url;

  const API: &str = "http://hotel.local/api";

  struct Fixture {
    transport: Arc<ScriptedTransport>,
    queue: Arc<CaptureQueue>,
    lifecycle: CacheLifecycle,
    interceptor: Interceptor,
  }

  impl Fixture {
    async fn fetch(&self, request: Request) -> Result<Fetched, TransportError> {
      self.interceptor.handle(request, EntryMeta::default()).await
    }
  }

  fn fixture() -> Fixture {
    let db = Arc::new(Database::open_in_memory().unwrap());
    let transport = Arc::new(ScriptedTransport::online());
    let queue = Arc::new(CaptureQueue::new(Arc::new(SqliteQueueStore::new(
      Arc::clone(&db),
    ))));
    let lifecycle = CacheLifecycle::new(CacheStorage::new(db), "hotel-pwa", "v1");
    let policy = RoutingPolicy::new(
      Url::parse("http://hotel.local/api/").unwrap(),
      Url::parse("http://hotel.local/").unwrap(),
      vec![Url::parse("https://cdn.example").unwrap()],
    );
    let interceptor = Interceptor::new(
      policy,
      transport.clone(),
      lifecycle.static_cache().unwrap(),
      lifecycle.api_cache().unwrap(),
      Arc::clone(&queue),
      "http://hotel.local/pages/offline.html".to_string(),
    );

    Fixture {
      transport,
      queue,
      lifecycle,
      interceptor,
    }
  }

  #[tokio::test]
  async fn test_offline_write_is_captured_once() {
    let f = fixture();
    f.transport.set_online(false);
    let request = Request::new(Method::PUT, format!("{}/habitaciones/marcar-limpia/42", API));

    let fetched = f.fetch(request).await.unwrap();

    let ack: OfflineAck = serde_json::from_slice(&fetched.response.body).unwrap();
    assert!(ack.offline);
    assert_eq!(
      fetched.response.text(),
      format!(r#"{{"offline":true,"message":"{}"}}"#, OFFLINE_MESSAGE)
    );

    let entries = f.queue.list_all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].method.as_str(), "PUT");
    assert!(entries[0].url.ends_with("/42"));
    assert_eq!(fetched.queued_id(), Some(entries[0].id));
  }

  #[tokio::test]
  async fn test_application_error_is_not_queued() {
    let f = fixture();
    let url = format!("{}/usuarios", API);
    f.transport
      .route(&url, Response::new(StatusCode::UNPROCESSABLE_ENTITY, "invalid"));

    let request = Request::new(Method::POST, url);
    let fetched = f.fetch(request).await.unwrap();

    assert_eq!(fetched.response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(fetched.source, Source::Network);
    assert!(f.queue.list_all().is_empty());
  }

  #[tokio::test]
  async fn test_interrupted_write_is_not_queued() {
    let f = fixture();
    let url = format!("{}/habitaciones/marcar-limpia/42", API);
    f.transport.interrupt(&url, StatusCode::OK);

    let result = f.fetch(Request::new(Method::PUT, url)).await;

    assert!(matches!(result, Err(e) if e.delivered_status() == Some(StatusCode::OK)));
    assert!(f.queue.list_all().is_empty());
    assert_eq!(f.transport.attempts().len(), 1);
  }

  #[tokio::test]
  async fn test_read_falls_back_to_cached_bytes() {
    let f = fixture();
    let url = format!("{}/habitaciones", API);
    let body = br#"[{"id":42,"estado":"sucia"}]"#.to_vec();
    f.transport
      .route(&url, Response::new(StatusCode::OK, body.clone()));

    let first = f.fetch(Request::get(url.as_str())).await.unwrap();
    assert_eq!(first.source, Source::Network);

    f.transport.set_online(false);
    let second = f.fetch(Request::get(url.as_str())).await.unwrap();
    assert_eq!(second.source, Source::Cache);
    assert_eq!(second.response.body, body);
  }

  #[tokio::test]
  async fn test_read_without_cache_propagates_failure() {
    let f = fixture();
    f.transport.set_online(false);
    let result = f
      .fetch(Request::get(format!("{}/habitaciones", API)))
      .await;
    assert!(result.is_err());
  }

  #[tokio::test]
  async fn test_error_responses_do_not_replace_cached_reads() {
    let f = fixture();
    let url = format!("{}/habitaciones", API);
    f.transport.route(&url, Response::new(StatusCode::OK, "good"));
    f.fetch(Request::get(url.as_str())).await.unwrap();

    f.transport
      .route(&url, Response::new(StatusCode::INTERNAL_SERVER_ERROR, "bad"));
    let fetched = f.fetch(Request::get(url.as_str())).await.unwrap();
    assert_eq!(fetched.response.status, StatusCode::INTERNAL_SERVER_ERROR);

    f.transport.set_online(false);
    let cached = f.fetch(Request::get(url.as_str())).await.unwrap();
    assert_eq!(cached.response.text(), "good");
  }

  #[tokio::test]
  async fn test_static_asset_is_cache_first() {
    let f = fixture();
    let url = "http://hotel.local/pages/maid.html";
    f.transport.route(url, Response::new(StatusCode::OK, "maid"));

    let first = f.fetch(Request::get(url)).await.unwrap();
    assert_eq!(first.source, Source::Network);

    let second = f.fetch(Request::get(url)).await.unwrap();
    assert_eq!(second.source, Source::Cache);
    assert_eq!(f.transport.attempts().len(), 1);
  }

  #[tokio::test]
  async fn test_failed_navigation_serves_offline_page() {
    let f = fixture();
    let offline = Request::get("http://hotel.local/pages/offline.html");
    f.lifecycle
      .static_cache()
      .unwrap()
      .put(&offline, &Response::new(StatusCode::OK, "sin conexion"))
      .unwrap();
    f.transport.set_online(false);

    let page = f
      .fetch(Request::get("http://hotel.local/pages/reception.html").navigation())
      .await
      .unwrap();
    assert_eq!(page.source, Source::OfflinePage);
    assert_eq!(page.response.text(), "sin conexion");

    let script = f
      .fetch(Request::get("http://hotel.local/assets/js/app.js"))
      .await;
    assert!(script.is_err());
  }

  #[tokio::test]
  async fn test_cdn_assets_cached_only_on_200() {
    let f = fixture();
    let partial = "https://cdn.example/lib.js";
    f.transport
      .route(partial, Response::new(StatusCode::PARTIAL_CONTENT, "part"));
    f.fetch(Request::get(partial)).await.unwrap();
    f.fetch(Request::get(partial)).await.unwrap();
    assert_eq!(f.transport.attempts().len(), 2);

    let full = "https://cdn.example/lib.css";
    f.transport.route(full, Response::new(StatusCode::OK, "css"));
    f.fetch(Request::get(full)).await.unwrap();
    let cached = f.fetch(Request::get(full)).await.unwrap();
    assert_eq!(cached.source, Source::Cache);
  }
}
