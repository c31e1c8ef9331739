//! Scripted in-memory transport for tests.

use futures::future::{BoxFuture, FutureExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use super::transport::{Transport, TransportError};
use super::types::{Request, Response};
use super::StatusCode;

/// Transport that answers from a table of canned responses and records every
/// attempted request, including the ones it fails.
pub struct ScriptedTransport {
  online: AtomicBool,
  routes: Mutex<HashMap<String, Response>>,
  /// URLs whose response is cut off after the status line
  interrupted: Mutex<HashMap<String, StatusCode>>,
  /// Delay before each answer, so concurrent senders overlap
  latency: Option<Duration>,
  /// Remaining successful sends before the connection drops
  budget: Mutex<Option<usize>>,
  attempts: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
  pub fn online() -> Self {
    Self {
      online: AtomicBool::new(true),
      routes: Mutex::new(HashMap::new()),
      interrupted: Mutex::new(HashMap::new()),
      latency: None,
      budget: Mutex::new(None),
      attempts: Mutex::new(Vec::new()),
    }
  }

  pub fn offline() -> Self {
    let transport = Self::online();
    transport.set_online(false);
    transport
  }

  pub fn with_latency(mut self, latency: Duration) -> Self {
    self.latency = Some(latency);
    self
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  /// Go offline after `n` more successful sends.
  pub fn drop_after(&self, n: usize) {
    *self.budget.lock().unwrap() = Some(n);
  }

  /// Answer requests for `url` with `response`. Unrouted URLs get `200 {}`.
  pub fn route(&self, url: &str, response: Response) {
    self.routes.lock().unwrap().insert(url.to_string(), response);
  }

  /// Answer requests for `url` with `status` and then lose the body.
  pub fn interrupt(&self, url: &str, status: StatusCode) {
    self
      .interrupted
      .lock()
      .unwrap()
      .insert(url.to_string(), status);
  }

  pub fn attempts(&self) -> Vec<Request> {
    self.attempts.lock().unwrap().clone()
  }

  pub fn attempted_urls(&self) -> Vec<String> {
    self.attempts().into_iter().map(|r| r.url).collect()
  }

  fn respond(&self, request: &Request) -> Result<Response, TransportError> {
    self.attempts.lock().unwrap().push(request.clone());

    if !self.online.load(Ordering::SeqCst) {
      return Err(TransportError::Connect("scripted offline".into()));
    }

    let mut budget = self.budget.lock().unwrap();
    if let Some(remaining) = budget.as_mut() {
      if *remaining == 0 {
        self.online.store(false, Ordering::SeqCst);
        return Err(TransportError::Connect("scripted drop".into()));
      }
      *remaining -= 1;
    }
    drop(budget);

    if let Some(status) = self.interrupted.lock().unwrap().get(&request.url) {
      return Err(TransportError::Interrupted {
        status: *status,
        reason: "scripted body loss".into(),
      });
    }

    Ok(
      self
        .routes
        .lock()
        .unwrap()
        .get(&request.url)
        .cloned()
        .unwrap_or_else(|| Response::new(StatusCode::OK, b"{}".to_vec())),
    )
  }
}

impl Transport for ScriptedTransport {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, TransportError>> {
    async move {
      if let Some(latency) = self.latency {
        tokio::time::sleep(latency).await;
      }
      self.respond(request)
    }
    .boxed()
  }
}
