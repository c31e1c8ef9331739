//! Per-process handles, built once at startup and passed to each component.

use color_eyre::Result;
use std::sync::Arc;
use tracing::warn;

use crate::cache::{CacheLifecycle, CacheStorage};
use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::db::Database;
use crate::http::Transport;
use crate::queue::{CaptureQueue, SqliteQueueStore};
use crate::session::Session;

/// Everything one execution context (the worker, or one page) works with.
///
/// Contexts never share in-memory state with each other; each opens its own
/// connection to the store.
#[derive(Clone)]
pub struct Context {
  pub config: Arc<Config>,
  pub queue: Arc<CaptureQueue>,
  pub caches: CacheLifecycle,
  pub session: Arc<Session>,
  pub transport: Arc<dyn Transport>,
  pub connectivity: Connectivity,
}

impl Context {
  /// Open the durable store named in `config`.
  ///
  /// If it cannot be opened the context still comes up, backed by private
  /// in-memory storage, and nothing it queues survives a restart.
  pub fn open(
    config: Arc<Config>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
  ) -> Result<Self> {
    let durable = config
      .database_path()
      .and_then(|path| Database::open(&path));

    match durable {
      Ok(db) => Self::with_database(config, Arc::new(db), transport, connectivity),
      Err(e) => {
        warn!("Persistent storage unavailable, running without durability: {}", e);
        let db = Arc::new(Database::open_in_memory()?);
        let mut context = Self::with_database(config, db, transport, connectivity)?;
        context.queue = Arc::new(CaptureQueue::memory_only());
        Ok(context)
      }
    }
  }

  pub fn with_database(
    config: Arc<Config>,
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    connectivity: Connectivity,
  ) -> Result<Self> {
    let queue = Arc::new(CaptureQueue::new(Arc::new(SqliteQueueStore::new(Arc::clone(
      &db,
    )))));
    let caches = CacheLifecycle::new(
      CacheStorage::new(Arc::clone(&db)),
      &config.cache.prefix,
      &config.cache.version,
    );
    let session = Arc::new(Session::new(db, Config::env_token()));

    Ok(Self {
      config,
      queue,
      caches,
      session,
      transport,
      connectivity,
    })
  }
}
