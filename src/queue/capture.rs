use color_eyre::Result;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::entry::{NewEntry, QueueEntry};
use super::store::{MemoryQueueStore, QueueStore};

/// The one queue both the worker and the pages capture into.
///
/// Writes go to the durable store. When that store is missing or fails, the
/// entry lands in an in-process list instead (lost on restart) and a warning
/// is logged. Reads never fail: a broken durable store reads as empty.
pub struct CaptureQueue {
  durable: Option<Arc<dyn QueueStore>>,
  fallback: MemoryQueueStore,
}

impl CaptureQueue {
  pub fn new(durable: Arc<dyn QueueStore>) -> Self {
    Self {
      durable: Some(durable),
      fallback: MemoryQueueStore::negative(),
    }
  }

  /// Queue without persistent storage.
  pub fn memory_only() -> Self {
    Self {
      durable: None,
      fallback: MemoryQueueStore::negative(),
    }
  }

  pub fn is_durable(&self) -> bool {
    self.durable.is_some()
  }

  /// Store a captured request, degrading to memory if needed.
  pub fn capture(&self, entry: NewEntry) -> Result<i64> {
    if let Some(store) = &self.durable {
      match store.enqueue(entry.clone()) {
        Ok(id) => {
          debug!(id, url = %entry.url, method = %entry.method, "Queued request");
          return Ok(id);
        }
        Err(e) => {
          warn!(url = %entry.url, "Persistent queue unavailable, keeping request in memory: {}", e);
        }
      }
    } else {
      warn!(url = %entry.url, "No persistent queue, keeping request in memory");
    }

    self.fallback.enqueue(entry)
  }

  /// Every pending entry, in capture order.
  pub fn list_all(&self) -> Vec<QueueEntry> {
    let durable = match &self.durable {
      Some(store) => store.list_all().unwrap_or_else(|e| {
        warn!("Failed to read persistent queue: {}", e);
        Vec::new()
      }),
      None => Vec::new(),
    };
    let fallback = self.fallback.list_all().unwrap_or_default();
    if fallback.is_empty() {
      return durable;
    }

    // Interleave by capture time; each store keeps its own id order
    let mut merged = Vec::with_capacity(durable.len() + fallback.len());
    let mut durable = durable.into_iter().peekable();
    for entry in fallback {
      while let Some(next) = durable.next_if(|d| d.created_at <= entry.created_at) {
        merged.push(next);
      }
      merged.push(entry);
    }
    merged.extend(durable);
    merged
  }

  /// Take the sending lease on an entry. `false` means another sender
  /// holds it or it was already delivered.
  pub fn claim(&self, id: i64, owner: &str) -> Result<bool> {
    match self.store_for(id) {
      Some(store) => store.claim(id, owner),
      None => Ok(false),
    }
  }

  /// Give a lease back after a failed delivery.
  pub fn release(&self, id: i64, owner: &str) -> Result<()> {
    match self.store_for(id) {
      Some(store) => store.release(id, owner),
      None => Ok(()),
    }
  }

  fn store_for(&self, id: i64) -> Option<&dyn QueueStore> {
    if id < 0 {
      Some(&self.fallback as &dyn QueueStore)
    } else {
      self.durable.as_deref()
    }
  }

  /// Remove a delivered entry.
  pub fn delete(&self, id: i64) -> Result<()> {
    match self.store_for(id) {
      Some(store) => store.delete_by_id(id),
      None => Ok(()),
    }
  }

  /// Pending entries grouped by resource id, for badges.
  pub fn pending_counts(&self) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for entry in self.list_all() {
      if let Some(resource) = entry.meta.resource_id {
        *counts.entry(resource).or_insert(0) += 1;
      }
    }
    counts
  }

  pub fn pending_for(&self, resource_id: &str) -> usize {
    self
      .list_all()
      .iter()
      .filter(|e| e.meta.resource_id.as_deref() == Some(resource_id))
      .count()
  }

  pub fn pending_total(&self) -> usize {
    self.list_all().len()
  }
}
