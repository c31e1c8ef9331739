//! Write-behind queue for mutating requests that could not reach the API.
//!
//! This module provides the single queue contract used by both the worker's
//! interception path and the pages' own capture path:
//! - `QueueStore`: durable keyed storage (insert, list in order, lease,
//!   delete)
//! - `CaptureQueue`: capture with in-memory degradation and pending counts
//! - `QueueEntry`: the persisted request, with its resource id resolved at
//!   capture time

mod capture;
mod entry;
mod store;

pub use capture::CaptureQueue;
pub use entry::{EntryMeta, NewEntry, QueueEntry};
pub use store::SqliteQueueStore;
