use color_eyre::{eyre::eyre, Result};
use futures::future::{BoxFuture, FutureExt};
use std::fmt;
use std::time::Duration;

use super::types::{Request, Response};
use super::StatusCode;

/// Failure to obtain any response at all.
///
/// A reachable server answering 4xx/5xx is *not* a transport error; that is
/// an `Ok(Response)` with an error status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
  /// The request did not complete within the client timeout
  Timeout,
  /// DNS failure, connection refused or reset
  Connect(String),
  /// Any other failure while sending the request
  Io(String),
  /// The server answered with `status` but the body never fully arrived.
  /// The request itself was delivered.
  Interrupted { status: StatusCode, reason: String },
  /// The request could not be built (bad URL, bad header)
  Invalid(String),
}

impl TransportError {
  /// Whether this failure means "the network is unreachable", as opposed to a
  /// request that can never be sent or one the server already received.
  pub fn is_network(&self) -> bool {
    matches!(self, Self::Timeout | Self::Connect(_) | Self::Io(_))
  }

  /// Status of a response whose headers arrived before the failure.
  pub fn delivered_status(&self) -> Option<StatusCode> {
    match self {
      Self::Interrupted { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl fmt::Display for TransportError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Timeout => write!(f, "request timed out"),
      Self::Connect(msg) => write!(f, "connection failed: {}", msg),
      Self::Io(msg) => write!(f, "transport failure: {}", msg),
      Self::Interrupted { status, reason } => {
        write!(f, "response {} interrupted: {}", status, reason)
      }
      Self::Invalid(msg) => write!(f, "invalid request: {}", msg),
    }
  }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
  fn from(e: reqwest::Error) -> Self {
    if e.is_timeout() {
      Self::Timeout
    } else if e.is_connect() {
      Self::Connect(e.to_string())
    } else if e.is_builder() {
      Self::Invalid(e.to_string())
    } else {
      Self::Io(e.to_string())
    }
  }
}

/// The network, as seen by the interceptor and the replay engine.
pub trait Transport: Send + Sync {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, TransportError>>;
}

/// Production transport backed by a shared reqwest client.
#[derive(Clone)]
pub struct ReqwestTransport {
  client: reqwest::Client,
}

impl ReqwestTransport {
  /// Build a client whose requests are bounded by `timeout`.
  pub fn new(timeout: Duration) -> Result<Self> {
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Transport for ReqwestTransport {
  fn send<'a>(&'a self, request: &'a Request) -> BoxFuture<'a, Result<Response, TransportError>> {
    async move {
      let mut builder = self.client.request(request.method.clone(), &request.url);
      for (name, value) in &request.headers {
        builder = builder.header(name.as_str(), value.as_str());
      }
      if let Some(body) = &request.body {
        builder = builder.body(body.clone());
      }

      let response = builder.send().await?;
      let status = response.status();
      let headers = response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
          value
            .to_str()
            .ok()
            .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect();
      // Headers are in, so the server has the request
      let body = response
        .bytes()
        .await
        .map_err(|e| TransportError::Interrupted {
          status,
          reason: e.to_string(),
        })?
        .to_vec();

      Ok(Response {
        status,
        headers,
        body,
      })
    }
    .boxed()
  }
}
