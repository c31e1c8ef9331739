//! Background-sync registrations and the driver that fires them.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use super::WorkerHandle;
use crate::connectivity::wait_for_online;

/// Tag registered whenever a write is queued.
pub const SYNC_TAG: &str = "sync-requests";

/// Pending background-sync tags.
///
/// When the platform has no such facility every registration is refused and
/// the pages fall back to triggering replay themselves.
pub struct SyncRegistry {
  supported: bool,
  tags: Mutex<BTreeSet<String>>,
}

impl SyncRegistry {
  pub fn new(supported: bool) -> Self {
    Self {
      supported,
      tags: Mutex::new(BTreeSet::new()),
    }
  }

  pub fn is_supported(&self) -> bool {
    self.supported
  }

  /// Ask to be woken once connectivity returns. Registering a tag that is
  /// already pending is a no-op. Returns whether the request was accepted.
  pub fn register(&self, tag: &str) -> bool {
    if !self.supported {
      debug!(tag, "Background sync unavailable");
      return false;
    }
    if let Ok(mut tags) = self.tags.lock() {
      tags.insert(tag.to_string());
    }
    true
  }

  pub fn pending(&self) -> Vec<String> {
    self
      .tags
      .lock()
      .map(|tags| tags.iter().cloned().collect())
      .unwrap_or_default()
  }

  /// Remove and return every pending tag.
  fn take_all(&self) -> Vec<String> {
    self
      .tags
      .lock()
      .map(|mut tags| std::mem::take(&mut *tags).into_iter().collect())
      .unwrap_or_default()
  }
}

/// Fire every pending tag at the worker each time connectivity is restored,
/// whether or not any page is open.
pub fn spawn_driver(
  registry: Arc<SyncRegistry>,
  mut online: watch::Receiver<bool>,
  worker: WorkerHandle,
) -> JoinHandle<()> {
  tokio::spawn(async move {
    while wait_for_online(&mut online).await {
      for tag in registry.take_all() {
        debug!(tag = %tag, "Firing background sync");
        if worker.background_sync(&tag).is_err() {
          return;
        }
      }
    }
  })
}
