use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::http::{Method, Request};

/// Body fields that name the room a request concerns.
const RESOURCE_FIELDS: &[&str] = &["habitacion_id", "habitacionId", "room_id", "roomId"];

/// Mutating methods the queue accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueMethod {
  Post,
  Put,
  Delete,
}

impl QueueMethod {
  /// `None` for methods that are never queued.
  pub fn from_method(method: &Method) -> Option<Self> {
    match *method {
      Method::POST => Some(Self::Post),
      Method::PUT => Some(Self::Put),
      Method::DELETE => Some(Self::Delete),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Post => "POST",
      Self::Put => "PUT",
      Self::Delete => "DELETE",
    }
  }

  pub fn to_method(self) -> Method {
    match self {
      Self::Post => Method::POST,
      Self::Put => Method::PUT,
      Self::Delete => Method::DELETE,
    }
  }
}

impl fmt::Display for QueueMethod {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for QueueMethod {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "POST" => Ok(Self::Post),
      "PUT" => Ok(Self::Put),
      "DELETE" => Ok(Self::Delete),
      other => Err(format!("not a queueable method: {}", other)),
    }
  }
}

/// UI context stored with an entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
  /// Domain resource (room id) the request concerns; filled at capture time
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub resource_id: Option<String>,
  /// Human-readable subject for pending lists
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub label: Option<String>,
}

impl EntryMeta {
  pub fn for_resource(resource_id: impl Into<String>) -> Self {
    Self {
      resource_id: Some(resource_id.into()),
      label: None,
    }
  }
}

/// A request about to be queued (no id yet).
#[derive(Debug, Clone, PartialEq)]
pub struct NewEntry {
  pub url: String,
  pub method: QueueMethod,
  /// Request body exactly as issued
  pub body: Option<Vec<u8>>,
  pub content_type: Option<String>,
  pub captured_auth: Option<String>,
  pub meta: EntryMeta,
  pub created_at: DateTime<Utc>,
}

impl NewEntry {
  /// Snapshot a failed request for later delivery.
  ///
  /// Returns `None` for methods that are never queued. The resource id is
  /// resolved here, once: caller-provided meta wins, then a room field in
  /// the body, then the last numeric path segment.
  pub fn capture(request: &Request, mut meta: EntryMeta) -> Option<Self> {
    let method = QueueMethod::from_method(&request.method)?;

    if meta.resource_id.is_none() {
      meta.resource_id = infer_resource_id(&request.url, request.json_body().as_ref());
    }

    Some(Self {
      url: request.url.clone(),
      method,
      body: request.body.clone().filter(|b| !b.is_empty()),
      content_type: request.header("content-type").map(String::from),
      captured_auth: request.bearer_token().map(String::from),
      meta,
      created_at: Utc::now(),
    })
  }
}

/// A persisted request awaiting delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
  /// Store-assigned; negative ids live only in the in-process fallback
  pub id: i64,
  pub url: String,
  pub method: QueueMethod,
  pub body: Option<Vec<u8>>,
  pub content_type: Option<String>,
  pub captured_auth: Option<String>,
  pub meta: EntryMeta,
  pub created_at: DateTime<Utc>,
}

impl QueueEntry {
  pub fn from_new(id: i64, entry: NewEntry) -> Self {
    Self {
      id,
      url: entry.url,
      method: entry.method,
      body: entry.body,
      content_type: entry.content_type,
      captured_auth: entry.captured_auth,
      meta: entry.meta,
      created_at: entry.created_at,
    }
  }

  /// Whether this entry only exists in process memory.
  pub fn is_durable(&self) -> bool {
    self.id > 0
  }

  /// Rebuild the request for delivery. `token` is the freshest credential
  /// available at replay time; the captured one is used only without it.
  pub fn to_request(&self, token: Option<&str>) -> Request {
    let mut request = Request::new(self.method.to_method(), self.url.clone());
    request.body = self.body.clone();
    if let Some(content_type) = &self.content_type {
      request = request.with_header("content-type", content_type.as_str());
    }
    if let Some(token) = token.or(self.captured_auth.as_deref()) {
      request = request.with_header("authorization", format!("Bearer {}", token));
    }
    request
  }
}

/// Work out which room a request concerns.
fn infer_resource_id(url: &str, body: Option<&Value>) -> Option<String> {
  if let Some(Value::Object(fields)) = body {
    for name in RESOURCE_FIELDS {
      match fields.get(*name) {
        Some(Value::String(s)) if !s.is_empty() => return Some(s.clone()),
        Some(Value::Number(n)) => return Some(n.to_string()),
        _ => {}
      }
    }
  }

  let path = match url::Url::parse(url) {
    Ok(parsed) => parsed.path().to_string(),
    // Relative URL
    Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
  };

  path
    .rsplit('/')
    .find(|segment| !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()))
    .map(String::from)
}
