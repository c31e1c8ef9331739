//! Queue store trait and its SQLite and in-memory implementations.

use chrono::{DateTime, Duration, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Row};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::entry::{EntryMeta, NewEntry, QueueEntry};
use crate::db::Database;

/// Durable keyed storage of pending mutating requests.
///
/// Entry contents are never updated in place; only the sending lease is.
pub trait QueueStore: Send + Sync {
  /// Persist an entry and return its id. The entry is durable on return.
  fn enqueue(&self, entry: NewEntry) -> Result<i64>;

  /// All entries in insertion order.
  fn list_all(&self) -> Result<Vec<QueueEntry>>;

  /// Remove an entry. Deleting an unknown id is not an error.
  fn delete_by_id(&self, id: i64) -> Result<()>;

  /// Take the sending lease on an entry for `owner`.
  ///
  /// Returns `false` when the entry is gone or another owner holds an
  /// unexpired lease. At most one caller wins for a given entry.
  fn claim(&self, id: i64, owner: &str) -> Result<bool>;

  /// Give back a lease taken with [`QueueStore::claim`].
  fn release(&self, id: i64, owner: &str) -> Result<()>;
}

/// Seconds a lease blocks other senders. A pass that died while holding
/// one stops blocking after this; well above any request timeout.
const CLAIM_LEASE_SECS: i64 = 600;

/// Non-durable store that lives as long as the process.
///
/// Ids are assigned from a counter moving in `step` direction, so a fallback
/// store can hand out negative ids that never collide with durable ones.
pub struct MemoryQueueStore {
  inner: Mutex<MemoryInner>,
  step: i64,
}

struct MemoryInner {
  last_id: i64,
  entries: Vec<QueueEntry>,
  claims: HashMap<i64, String>,
}

impl MemoryQueueStore {
  #[cfg(test)]
  pub fn new() -> Self {
    Self::with_step(1)
  }

  /// Store handing out -1, -2, ...
  pub fn negative() -> Self {
    Self::with_step(-1)
  }

  fn with_step(step: i64) -> Self {
    Self {
      inner: Mutex::new(MemoryInner {
        last_id: 0,
        entries: Vec::new(),
        claims: HashMap::new(),
      }),
      step,
    }
  }

  fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryInner>> {
    self.inner.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

impl QueueStore for MemoryQueueStore {
  fn enqueue(&self, entry: NewEntry) -> Result<i64> {
    let mut inner = self.lock()?;
    inner.last_id += self.step;
    let id = inner.last_id;
    inner.entries.push(QueueEntry::from_new(id, entry));
    Ok(id)
  }

  fn list_all(&self) -> Result<Vec<QueueEntry>> {
    Ok(self.lock()?.entries.clone())
  }

  fn delete_by_id(&self, id: i64) -> Result<()> {
    let mut inner = self.lock()?;
    inner.entries.retain(|e| e.id != id);
    inner.claims.remove(&id);
    Ok(())
  }

  fn claim(&self, id: i64, owner: &str) -> Result<bool> {
    let mut inner = self.lock()?;
    if !inner.entries.iter().any(|e| e.id == id) {
      return Ok(false);
    }
    match inner.claims.get(&id) {
      Some(holder) => Ok(holder == owner),
      None => {
        inner.claims.insert(id, owner.to_string());
        Ok(true)
      }
    }
  }

  fn release(&self, id: i64, owner: &str) -> Result<()> {
    let mut inner = self.lock()?;
    if inner.claims.get(&id).map(String::as_str) == Some(owner) {
      inner.claims.remove(&id);
    }
    Ok(())
  }
}

/// SQLite-backed queue store.
pub struct SqliteQueueStore {
  db: Arc<Database>,
}

impl SqliteQueueStore {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }
}

const SELECT_ENTRY: &str = "SELECT id, url, method, body, content_type, captured_auth, meta, created_at
   FROM request_queue";

impl QueueStore for SqliteQueueStore {
  fn enqueue(&self, entry: NewEntry) -> Result<i64> {
    let meta =
      serde_json::to_string(&entry.meta).map_err(|e| eyre!("Failed to serialize meta: {}", e))?;

    let conn = self.db.lock()?;

    // Single statement: the row is either fully written or not at all
    conn
      .execute(
        "INSERT INTO request_queue
           (url, method, body, content_type, captured_auth, meta, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?)",
        params![
          entry.url,
          entry.method.as_str(),
          entry.body,
          entry.content_type,
          entry.captured_auth,
          meta,
          entry.created_at.to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to enqueue request: {}", e))?;

    Ok(conn.last_insert_rowid())
  }

  fn list_all(&self) -> Result<Vec<QueueEntry>> {
    let conn = self.db.lock()?;

    let mut stmt = conn
      .prepare(&format!("{} ORDER BY id", SELECT_ENTRY))
      .map_err(|e| eyre!("Failed to prepare queue query: {}", e))?;

    let rows = stmt
      .query_map([], read_row)
      .map_err(|e| eyre!("Failed to query queue: {}", e))?;

    let mut entries = Vec::new();
    for row in rows {
      let raw = row.map_err(|e| eyre!("Failed to read queue row: {}", e))?;
      entries.push(raw.into_entry()?);
    }
    Ok(entries)
  }

  fn delete_by_id(&self, id: i64) -> Result<()> {
    self
      .db
      .lock()?
      .execute("DELETE FROM request_queue WHERE id = ?", params![id])
      .map_err(|e| eyre!("Failed to delete queue entry {}: {}", id, e))?;
    Ok(())
  }

  fn claim(&self, id: i64, owner: &str) -> Result<bool> {
    let now = Utc::now();
    let expired = (now - Duration::seconds(CLAIM_LEASE_SECS)).timestamp_millis();

    // Single conditional UPDATE: SQLite's write lock makes it one winner
    let updated = self
      .db
      .lock()?
      .execute(
        "UPDATE request_queue SET claimed_by = ?1, claimed_at = ?2
         WHERE id = ?3
           AND (claimed_by IS NULL OR claimed_by = ?1 OR claimed_at < ?4)",
        params![owner, now.timestamp_millis(), id, expired],
      )
      .map_err(|e| eyre!("Failed to claim queue entry {}: {}", id, e))?;

    Ok(updated == 1)
  }

  fn release(&self, id: i64, owner: &str) -> Result<()> {
    self
      .db
      .lock()?
      .execute(
        "UPDATE request_queue SET claimed_by = NULL, claimed_at = NULL
         WHERE id = ? AND claimed_by = ?",
        params![id, owner],
      )
      .map_err(|e| eyre!("Failed to release queue entry {}: {}", id, e))?;
    Ok(())
  }
}

/// Row as stored, before JSON decoding.
struct RawEntry {
  id: i64,
  url: String,
  method: String,
  body: Option<Vec<u8>>,
  content_type: Option<String>,
  captured_auth: Option<String>,
  meta: String,
  created_at: String,
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
  Ok(RawEntry {
    id: row.get(0)?,
    url: row.get(1)?,
    method: row.get(2)?,
    body: row.get(3)?,
    content_type: row.get(4)?,
    captured_auth: row.get(5)?,
    meta: row.get(6)?,
    created_at: row.get(7)?,
  })
}

impl RawEntry {
  fn into_entry(self) -> Result<QueueEntry> {
    let method = self
      .method
      .parse()
      .map_err(|e| eyre!("Corrupt queue entry {}: {}", self.id, e))?;
    let meta: EntryMeta = serde_json::from_str(&self.meta).unwrap_or_default();
    let created_at = DateTime::parse_from_rfc3339(&self.created_at)
      .map(|dt| dt.with_timezone(&Utc))
      .map_err(|e| eyre!("Failed to parse datetime '{}': {}", self.created_at, e))?;

    Ok(QueueEntry {
      id: self.id,
      url: self.url,
      method,
      body: self.body,
      content_type: self.content_type,
      captured_auth: self.captured_auth,
      meta,
      created_at,
    })
  }
}
