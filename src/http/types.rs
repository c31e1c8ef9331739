use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::Value;

/// An outgoing request as issued by a page.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
  pub method: Method,
  pub url: String,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
  /// Top-level document load (eligible for the offline page fallback)
  pub navigate: bool,
}

impl Request {
  pub fn new(method: Method, url: impl Into<String>) -> Self {
    Self {
      method,
      url: url.into(),
      headers: Vec::new(),
      body: None,
      navigate: false,
    }
  }

  pub fn get(url: impl Into<String>) -> Self {
    Self::new(Method::GET, url)
  }

  /// Mark this request as a page navigation.
  pub fn navigation(mut self) -> Self {
    self.navigate = true;
    self
  }

  /// Set a header, replacing any existing value (names are case-insensitive).
  pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    self.headers.push((name.to_string(), value.into()));
    self
  }

  /// Attach a JSON body.
  pub fn with_json(mut self, body: &Value) -> Self {
    self.body = Some(body.to_string().into_bytes());
    self.with_header("content-type", "application/json")
  }

  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  /// Bearer token from the Authorization header, if any.
  pub fn bearer_token(&self) -> Option<&str> {
    let value = self.header("authorization")?;
    value
      .strip_prefix("Bearer ")
      .or_else(|| value.strip_prefix("bearer "))
      .map(str::trim)
      .filter(|t| !t.is_empty())
  }

  /// Body decoded as JSON; `None` when absent or not JSON.
  pub fn json_body(&self) -> Option<Value> {
    let body = self.body.as_ref().filter(|b| !b.is_empty())?;
    serde_json::from_slice(body).ok()
  }
}

/// A response snapshot, either received from the network, read from a cache,
/// or synthesized locally.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
  pub status: StatusCode,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Response {
  pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
    Self {
      status,
      headers: Vec::new(),
      body: body.into(),
    }
  }

  /// Serialize `value` as a JSON response body.
  pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Self {
    // Serializing plain structs and Values into a Vec cannot fail
    let mut response = Self::new(status, serde_json::to_vec(value).unwrap_or_default());
    response
      .headers
      .push(("content-type".to_string(), "application/json".to_string()));
    response
  }

  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }

  pub fn is_success(&self) -> bool {
    self.status.is_success()
  }

  /// Body as text, for display.
  pub fn text(&self) -> String {
    String::from_utf8_lossy(&self.body).into_owned()
  }
}
