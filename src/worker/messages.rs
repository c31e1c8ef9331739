//! Messages exchanged between the worker and the pages.

use serde::{Deserialize, Serialize};

/// Sent by a page to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
  /// Replay the queue now
  Sync,
}

/// Broadcast by the worker to every page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkerEvent {
  /// A replay pass finished
  RequestsSynced { success: usize, failures: usize },
}
