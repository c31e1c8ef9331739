//! The long-lived background worker.
//!
//! The worker is an actor: pages reach it only through a [`WorkerHandle`]
//! (fetches and messages in, broadcasts out). Each incoming event runs as its
//! own task, so a slow replay never blocks request handling.

mod messages;
mod sync;

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

use crate::context::Context;
use crate::http::{Request, TransportError};
use crate::queue::EntryMeta;
use crate::replay::{ReplayReport, Replayer};
use crate::router::{Fetched, Interceptor, RoutingPolicy};

pub use messages::{ClientMessage, WorkerEvent};
pub use sync::{SyncRegistry, SYNC_TAG};

/// Capacity of the broadcast channel to pages.
const EVENT_CAPACITY: usize = 16;

/// How the worker brings up its cache generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
  /// Precache the asset manifest, then activate
  Install,
  /// Reuse the installed generation; only activate
  Resume,
}

enum Command {
  Fetch {
    request: Request,
    meta: EntryMeta,
    reply: oneshot::Sender<Result<Fetched, TransportError>>,
  },
  Message(ClientMessage),
  BackgroundSync(String),
}

struct WorkerState {
  context: Context,
  interceptor: Interceptor,
  replayer: Replayer,
  registry: Arc<SyncRegistry>,
  events: broadcast::Sender<WorkerEvent>,
}

/// Cloneable handle pages use to talk to the worker.
#[derive(Clone)]
pub struct WorkerHandle {
  tx: mpsc::UnboundedSender<Command>,
  events: broadcast::Sender<WorkerEvent>,
}

/// Install/activate the cache generation and start the worker.
///
/// Activation finishes before the first request is accepted.
pub async fn start(context: Context, startup: Startup) -> Result<WorkerHandle> {
  let config = Arc::clone(&context.config);

  if startup == Startup::Install {
    context
      .caches
      .install(context.transport.as_ref(), &config.asset_urls()?)
      .await?;
  }
  context.caches.activate()?;

  let interceptor = Interceptor::new(
    RoutingPolicy::from_config(&config)?,
    Arc::clone(&context.transport),
    context.caches.static_cache()?,
    context.caches.api_cache()?,
    Arc::clone(&context.queue),
    config.offline_page_url()?,
  );

  let registry = Arc::new(SyncRegistry::new(config.sync.background_sync));
  // Writes queued by an earlier run still need a trigger
  if context.queue.pending_total() > 0 {
    registry.register(SYNC_TAG);
  }

  let (tx, rx) = mpsc::unbounded_channel();
  let (events, _) = broadcast::channel(EVENT_CAPACITY);
  let handle = WorkerHandle {
    tx,
    events: events.clone(),
  };

  if registry.is_supported() {
    sync::spawn_driver(
      Arc::clone(&registry),
      context.connectivity.subscribe(),
      handle.clone(),
    );
  }

  let pending_tags = registry.pending();
  let state = Arc::new(WorkerState {
    replayer: Replayer::new(Arc::clone(&context.transport)),
    context,
    interceptor,
    registry,
    events,
  });
  tokio::spawn(run(state, rx));

  info!(version = %config.cache.version, ?pending_tags, "Worker started");
  Ok(handle)
}

async fn run(state: Arc<WorkerState>, mut rx: mpsc::UnboundedReceiver<Command>) {
  while let Some(command) = rx.recv().await {
    let state = Arc::clone(&state);
    tokio::spawn(async move { state.dispatch(command).await });
  }
  debug!("Worker stopped");
}

impl WorkerState {
  async fn dispatch(&self, command: Command) {
    match command {
      Command::Fetch {
        request,
        meta,
        reply,
      } => {
        let result = self.interceptor.handle(request, meta).await;
        if matches!(&result, Ok(fetched) if fetched.queued_id().is_some()) {
          self.registry.register(SYNC_TAG);
        }
        // The page may have gone away
        let _ = reply.send(result);
      }
      Command::Message(ClientMessage::Sync) => {
        self.replay_and_broadcast().await;
      }
      Command::BackgroundSync(tag) if tag == SYNC_TAG => {
        if let Some(report) = self.replay_and_broadcast().await {
          if report.failures > 0 {
            self.registry.register(SYNC_TAG);
          }
        }
      }
      Command::BackgroundSync(tag) => {
        debug!(tag = %tag, "Ignoring unknown sync tag");
      }
    }
  }

  async fn replay_and_broadcast(&self) -> Option<ReplayReport> {
    let token = self.context.session.token();
    let report = self
      .replayer
      .replay(&self.context.queue, token.as_deref())
      .await?;

    // No open pages is fine
    let _ = self.events.send(WorkerEvent::RequestsSynced {
      success: report.success,
      failures: report.failures,
    });
    Some(report)
  }
}

impl WorkerHandle {
  /// Send a request through the worker's routing policy.
  pub async fn fetch(&self, request: Request, meta: EntryMeta) -> Result<Fetched, TransportError> {
    let (reply, rx) = oneshot::channel();
    self
      .tx
      .send(Command::Fetch {
        request,
        meta,
        reply,
      })
      .map_err(|_| TransportError::Io("worker is not running".into()))?;

    rx.await
      .map_err(|_| TransportError::Io("worker dropped the request".into()))?
  }

  pub fn post_message(&self, message: ClientMessage) -> Result<()> {
    self
      .tx
      .send(Command::Message(message))
      .map_err(|_| eyre!("Worker is not running"))
  }

  /// Post a message in its JSON wire form, e.g. `{"type":"sync"}`.
  pub fn post_json(&self, raw: &str) -> Result<()> {
    let message: ClientMessage =
      serde_json::from_str(raw).map_err(|e| eyre!("Invalid worker message {}: {}", raw, e))?;
    self.post_message(message)
  }

  /// Subscribe to worker broadcasts.
  pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
    self.events.subscribe()
  }

  fn background_sync(&self, tag: &str) -> Result<()> {
    self
      .tx
      .send(Command::BackgroundSync(tag.to_string()))
      .map_err(|_| eyre!("Worker is not running"))
  }
}
