//! Named response caches stored in SQLite.

use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;

use super::key::request_key;
use crate::db::Database;
use crate::http::{Request, Response, StatusCode};

/// The set of named cache containers in one store.
#[derive(Clone)]
pub struct CacheStorage {
  db: Arc<Database>,
}

impl CacheStorage {
  pub fn new(db: Arc<Database>) -> Self {
    Self { db }
  }

  /// Open (creating if needed) the cache called `name`.
  pub fn open(&self, name: &str) -> Result<ResponseCache> {
    self
      .db
      .lock()?
      .execute(
        "INSERT OR IGNORE INTO cache_names (name) VALUES (?)",
        params![name],
      )
      .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;

    Ok(ResponseCache {
      db: Arc::clone(&self.db),
      name: name.to_string(),
    })
  }

  /// Names of all existing caches.
  pub fn keys(&self) -> Result<Vec<String>> {
    let conn = self.db.lock()?;
    let mut stmt = conn
      .prepare("SELECT name FROM cache_names ORDER BY name")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  /// Delete a cache and everything in it. Returns whether it existed.
  pub fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.db.lock()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM response_cache WHERE cache_name = ?",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete cache entries: {}", e))?;

    let removed = tx
      .execute("DELETE FROM cache_names WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }
}

/// One named cache of response snapshots, keyed by method + URL.
#[derive(Clone)]
pub struct ResponseCache {
  db: Arc<Database>,
  name: String,
}

impl ResponseCache {
  pub fn name(&self) -> &str {
    &self.name
  }

  /// Store (or overwrite) the response for `request`.
  pub fn put(&self, request: &Request, response: &Response) -> Result<()> {
    let key = request_key(&request.method, &request.url);
    let headers = serde_json::to_string(&response.headers)
      .map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    self
      .db
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO response_cache
           (cache_name, request_key, method, url, status, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          self.name,
          key,
          request.method.as_str(),
          request.url,
          response.status.as_u16(),
          headers,
          response.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store response for {}: {}", request.url, e))?;

    Ok(())
  }

  /// Cached response for exactly this method and URL.
  pub fn match_request(&self, request: &Request) -> Result<Option<Response>> {
    let key = request_key(&request.method, &request.url);

    let row: Option<(u16, String, Vec<u8>)> = self
      .db
      .lock()?
      .query_row(
        "SELECT status, headers, body FROM response_cache
         WHERE cache_name = ? AND request_key = ?",
        params![self.name, key],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cache {}: {}", self.name, e))?;

    match row {
      Some((status, headers, body)) => {
        let status = StatusCode::from_u16(status)
          .map_err(|e| eyre!("Corrupt status in cache {}: {}", self.name, e))?;
        let headers = serde_json::from_str(&headers).unwrap_or_default();
        Ok(Some(Response {
          status,
          headers,
          body,
        }))
      }
      None => Ok(None),
    }
  }

  /// Cached GET response for `url`.
  #[cfg(test)]
  pub fn match_url(&self, url: &str) -> Result<Option<Response>> {
    self.match_request(&Request::get(url))
  }

  /// Number of stored responses.
  #[cfg(test)]
  pub fn len(&self) -> Result<usize> {
    let count: i64 = self
      .db
      .lock()?
      .query_row(
        "SELECT COUNT(*) FROM response_cache WHERE cache_name = ?",
        params![self.name],
        |row| row.get(0),
      )
      .map_err(|e| eyre!("Failed to count cache {}: {}", self.name, e))?;
    Ok(count as usize)
  }
}
