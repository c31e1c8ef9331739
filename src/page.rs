//! A foreground page instance.
//!
//! Pages normally fetch through the worker, but they can also call the API
//! directly and capture failed writes themselves into the same queue. They
//! replay that queue on their own when connectivity returns; a lease on the
//! queue row keeps the two sides from sending the same request.

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::wait_for_online;
use crate::context::Context;
use crate::http::{Request, TransportError};
use crate::queue::{EntryMeta, NewEntry, QueueEntry};
use crate::replay::{ReplayReport, Replayer};
use crate::router::{Fetched, OfflineAck, Source};
use crate::worker::{ClientMessage, WorkerEvent, WorkerHandle};

pub struct Page {
  name: String,
  context: Context,
  worker: Option<WorkerHandle>,
  replayer: Replayer,
  events: Option<Mutex<broadcast::Receiver<WorkerEvent>>>,
}

impl Page {
  pub fn new(name: &str, context: Context, worker: Option<WorkerHandle>) -> Self {
    let events = worker.as_ref().map(|w| Mutex::new(w.subscribe()));
    Self {
      name: name.to_string(),
      replayer: Replayer::new(Arc::clone(&context.transport)),
      context,
      worker,
      events,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub async fn fetch(&self, request: Request) -> Result<Fetched, TransportError> {
    self.fetch_with_meta(request, EntryMeta::default()).await
  }

  /// Issue a request with the session credential attached, through the
  /// worker when one is running.
  pub async fn fetch_with_meta(
    &self,
    request: Request,
    meta: EntryMeta,
  ) -> Result<Fetched, TransportError> {
    let request = self.context.session.attach(request);
    match &self.worker {
      Some(worker) => worker.fetch(request, meta).await,
      None => self.send_direct(request, meta).await,
    }
  }

  /// Call the network directly, bypassing the worker. A write that gets no
  /// response is captured into the queue and acknowledged as offline.
  pub async fn send_direct(
    &self,
    request: Request,
    meta: EntryMeta,
  ) -> Result<Fetched, TransportError> {
    let error = match self.context.transport.send(&request).await {
      Ok(response) => {
        return Ok(Fetched {
          response,
          source: Source::Network,
        })
      }
      Err(e) if e.is_network() => e,
      Err(e) => return Err(e),
    };

    let Some(entry) = NewEntry::capture(&request, meta) else {
      return Err(error);
    };

    match self.context.queue.capture(entry) {
      Ok(entry_id) => {
        info!(page = %self.name, entry_id, url = %request.url, "Saved write for later: {}", error);
        Ok(Fetched {
          response: OfflineAck::response(),
          source: Source::Queued { entry_id },
        })
      }
      Err(e) => {
        warn!(page = %self.name, url = %request.url, "Failed to save write: {}", e);
        Err(error)
      }
    }
  }

  /// Pending writes per room, for badges.
  pub fn pending_counts(&self) -> BTreeMap<String, usize> {
    self.context.queue.pending_counts()
  }

  pub fn pending_for(&self, resource_id: &str) -> usize {
    self.context.queue.pending_for(resource_id)
  }

  pub fn pending_total(&self) -> usize {
    self.context.queue.pending_total()
  }

  /// Every queued write, oldest first.
  pub fn pending(&self) -> Vec<QueueEntry> {
    self.context.queue.list_all()
  }

  pub fn has_durable_queue(&self) -> bool {
    self.context.queue.is_durable()
  }

  /// Replay the queue from this page with the session's current credential.
  pub async fn replay_pending(&self) -> Option<ReplayReport> {
    let token = self.context.session.token();
    self
      .replayer
      .replay(&self.context.queue, token.as_deref())
      .await
  }

  /// Ask the worker to replay now.
  pub fn request_sync(&self) {
    if let Some(worker) = &self.worker {
      if let Err(e) = worker.post_message(ClientMessage::Sync) {
        warn!(page = %self.name, "Could not reach worker: {}", e);
      }
    }
  }

  /// Connectivity came back: replay from here and, without background
  /// sync, nudge the worker too.
  pub async fn on_online(&self) -> Option<ReplayReport> {
    let report = self.replay_pending().await;
    if !self.context.config.sync.background_sync {
      self.request_sync();
    }
    report
  }

  /// Run [`Page::on_online`] on every offline-to-online transition.
  pub fn spawn_online_listener(self: Arc<Self>) -> JoinHandle<()> {
    let mut online = self.context.connectivity.subscribe();
    tokio::spawn(async move {
      while wait_for_online(&mut online).await {
        if let Some(report) = self.on_online().await {
          debug!(page = %self.name, ?report, "Replayed after reconnect");
        }
      }
    })
  }

  /// Wait for the next worker broadcast. Returns `None` without a worker or
  /// once the worker is gone.
  pub async fn next_event(&self) -> Option<WorkerEvent> {
    let mut events = self.events.as_ref()?.lock().await;
    loop {
      match events.recv().await {
        Ok(event) => {
          let WorkerEvent::RequestsSynced { success, failures } = &event;
          info!(
            page = %self.name,
            success,
            failures,
            pending = self.pending_total(),
            "Requests synced, refreshing view"
          );
          return Some(event);
        }
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
          debug!(page = %self.name, skipped, "Missed worker broadcasts");
        }
        Err(broadcast::error::RecvError::Closed) => return None,
      }
    }
  }
}
