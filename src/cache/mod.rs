//! Response caches for offline reads.
//!
//! This module provides:
//! - Named caches of raw HTTP response snapshots keyed by method + URL
//! - A static-asset cache filled at install time and an API cache filled on
//!   every successful GET
//! - Versioned generations, with stale generations removed on activation

mod key;
mod lifecycle;
mod storage;

pub use lifecycle::CacheLifecycle;
pub use storage::{CacheStorage, ResponseCache};
