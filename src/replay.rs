//! Drains the capture queue against the network.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::http::{StatusCode, Transport};
use crate::queue::{CaptureQueue, QueueEntry};

static NEXT_REPLAYER: AtomicU64 = AtomicU64::new(1);

/// Result of one replay pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
  /// Entries the server received (and that are now gone from the queue)
  pub success: usize,
  /// Entries that got no response and stay queued
  pub failures: usize,
  /// Delivered entries the server answered with an error status; included
  /// in `success`
  pub rejected: usize,
  /// Entries another pass was sending or had already delivered
  pub skipped: usize,
}

/// Replays queued writes, one pass at a time.
pub struct Replayer {
  transport: Arc<dyn Transport>,
  in_flight: AtomicBool,
  /// Lease holder name, unique across processes sharing the store
  owner: String,
}

/// Clears the in-flight flag when the pass ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::Release);
  }
}

impl Replayer {
  pub fn new(transport: Arc<dyn Transport>) -> Self {
    Self {
      transport,
      in_flight: AtomicBool::new(false),
      owner: format!(
        "{}-{}",
        std::process::id(),
        NEXT_REPLAYER.fetch_add(1, Ordering::Relaxed)
      ),
    }
  }

  /// Replay every queued entry in capture order.
  ///
  /// `token` is the current session credential; entries fall back to the
  /// one captured with them. Returns `None` without doing anything when a
  /// pass is already running.
  pub async fn replay(&self, queue: &CaptureQueue, token: Option<&str>) -> Option<ReplayReport> {
    if self
      .in_flight
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      debug!("Replay already in progress");
      return None;
    }
    let _guard = InFlight(&self.in_flight);

    let mut report = ReplayReport::default();
    for entry in queue.list_all() {
      // The lease keeps other contexts from sending the same entry
      match queue.claim(entry.id, &self.owner) {
        Ok(true) => {}
        Ok(false) => {
          report.skipped += 1;
          continue;
        }
        Err(e) => {
          warn!(id = entry.id, "Could not claim queued request: {}", e);
          report.failures += 1;
          continue;
        }
      }

      let request = entry.to_request(token);
      let status = match self.transport.send(&request).await {
        Ok(response) => response.status,
        Err(e) => match e.delivered_status() {
          Some(status) => {
            debug!(id = entry.id, url = %entry.url, "Response lost after delivery: {}", e);
            status
          }
          None => {
            debug!(id = entry.id, url = %entry.url, "Replay attempt failed: {}", e);
            if let Err(e) = queue.release(entry.id, &self.owner) {
              warn!(id = entry.id, "Could not release queued request: {}", e);
            }
            report.failures += 1;
            continue;
          }
        },
      };

      // The server processed it; sending again would not be safe
      self.delivered(queue, &entry, status, &mut report);
    }

    if report.success + report.failures > 0 {
      info!(
        success = report.success,
        failures = report.failures,
        rejected = report.rejected,
        "Replayed queued requests"
      );
    }
    Some(report)
  }

  fn delivered(
    &self,
    queue: &CaptureQueue,
    entry: &QueueEntry,
    status: StatusCode,
    report: &mut ReplayReport,
  ) {
    if let Err(e) = queue.delete(entry.id) {
      error!(id = entry.id, "Delivered request could not be removed from queue: {}", e);
    }
    if !status.is_success() {
      warn!(
        id = entry.id,
        method = %entry.method,
        url = %entry.url,
        status = %status,
        "Queued request rejected by server"
      );
      report.rejected += 1;
    }
    report.success += 1;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::db::Database;
  use crate::http::testing::ScriptedTransport;
  use crate::http::{Method, Request, Response};
  use crate::queue::{EntryMeta, NewEntry, SqliteQueueStore};
  use std::time::Duration;

  fn queue() -> CaptureQueue {
    let db = Arc::new(Database::open_in_memory().unwrap());
    CaptureQueue::new(Arc::new(SqliteQueueStore::new(db)))
  }

  fn capture(queue: &CaptureQueue, request: Request) -> i64 {
    queue
      .capture(NewEntry::capture(&request, EntryMeta::default()).unwrap())
      .unwrap()
  }

  fn mark_clean(room: u32) -> Request {
    Request::new(
      Method::PUT,
      format!("http://h/api/habitaciones/marcar-limpia/{}", room),
    )
    .with_header("Authorization", "Bearer captured")
  }

  #[tokio::test]
  async fn test_replays_in_insertion_order_and_empties_queue() {
    let queue = queue();
    for room in [5, 3, 9] {
      capture(&queue, mark_clean(room));
    }
    let transport = Arc::new(ScriptedTransport::online());
    let replayer = Replayer::new(transport.clone());

    let report = replayer.replay(&queue, None).await.unwrap();

    assert_eq!(report.success, 3);
    assert_eq!(report.failures, 0);
    assert!(queue.list_all().is_empty());
    assert_eq!(
      transport.attempted_urls(),
      vec![
        "http://h/api/habitaciones/marcar-limpia/5",
        "http://h/api/habitaciones/marcar-limpia/3",
        "http://h/api/habitaciones/marcar-limpia/9",
      ]
    );
  }

  #[tokio::test]
  async fn test_replayed_entries_are_not_sent_again() {
    let queue = queue();
    capture(&queue, mark_clean(1));
    let transport = Arc::new(ScriptedTransport::online());
    let replayer = Replayer::new(transport.clone());

    replayer.replay(&queue, None).await.unwrap();
    let second = replayer.replay(&queue, None).await.unwrap();

    assert_eq!(second, ReplayReport::default());
    assert_eq!(transport.attempts().len(), 1);
  }

  #[tokio::test]
  async fn test_transport_drop_mid_batch_keeps_failed_entry() {
    let queue = queue();
    let _first = capture(&queue, mark_clean(42));
    let second = capture(&queue, mark_clean(42));
    assert_eq!(queue.pending_for("42"), 2);

    let transport = Arc::new(ScriptedTransport::online());
    transport.drop_after(1);
    let report = Replayer::new(transport).replay(&queue, None).await.unwrap();

    assert_eq!(report.success, 1);
    assert_eq!(report.failures, 1);
    let remaining = queue.list_all();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, second);
    assert_eq!(queue.pending_for("42"), 1);
  }

  #[tokio::test]
  async fn test_error_status_counts_as_delivered() {
    let queue = queue();
    capture(&queue, mark_clean(404));
    let transport = Arc::new(ScriptedTransport::online());
    transport.route(
      "http://h/api/habitaciones/marcar-limpia/404",
      Response::new(StatusCode::UNAUTHORIZED, ""),
    );

    let report = Replayer::new(transport).replay(&queue, None).await.unwrap();

    assert_eq!(report.success, 1);
    assert_eq!(report.rejected, 1);
    assert!(queue.list_all().is_empty());
  }

  #[tokio::test]
  async fn test_fresh_token_takes_precedence() {
    let queue = queue();
    capture(&queue, mark_clean(1));
    capture(&queue, mark_clean(2));
    let transport = Arc::new(ScriptedTransport::online());
    let replayer = Replayer::new(transport.clone());

    replayer.replay(&queue, Some("fresh")).await.unwrap();

    for request in transport.attempts() {
      assert_eq!(request.bearer_token(), Some("fresh"));
    }
  }

  #[tokio::test]
  async fn test_captured_token_used_without_session() {
    let queue = queue();
    capture(&queue, mark_clean(1));
    let transport = Arc::new(ScriptedTransport::online());

    Replayer::new(transport.clone())
      .replay(&queue, None)
      .await
      .unwrap();
    assert_eq!(transport.attempts()[0].bearer_token(), Some("captured"));
  }

  #[tokio::test]
  async fn test_second_trigger_while_running_is_noop() {
    let queue = queue();
    capture(&queue, mark_clean(1));
    let replayer = Replayer::new(Arc::new(ScriptedTransport::online()));

    replayer.in_flight.store(true, Ordering::SeqCst);
    assert!(replayer.replay(&queue, None).await.is_none());
    assert_eq!(queue.pending_total(), 1);

    replayer.in_flight.store(false, Ordering::SeqCst);
    assert!(replayer.replay(&queue, None).await.is_some());
    assert!(!replayer.in_flight.load(Ordering::SeqCst));
  }

  fn shared_queues() -> (tempfile::TempDir, CaptureQueue, CaptureQueue) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let open = || {
      CaptureQueue::new(Arc::new(SqliteQueueStore::new(Arc::new(
        Database::open(&path).unwrap(),
      ))))
    };
    let (worker, page) = (open(), open());
    (dir, worker, page)
  }

  #[tokio::test]
  async fn test_entries_delivered_by_another_context_are_not_resent() {
    let (_dir, worker_queue, page_queue) = shared_queues();
    let id = capture(&page_queue, mark_clean(8));

    // Both contexts see the entry until the page delivers it
    assert_eq!(worker_queue.list_all().len(), 1);
    page_queue.delete(id).unwrap();
    assert!(!worker_queue.claim(id, "worker").unwrap());

    let transport = Arc::new(ScriptedTransport::online());
    let report = Replayer::new(transport.clone())
      .replay(&worker_queue, None)
      .await
      .unwrap();
    assert_eq!(report.success, 0);
    assert!(transport.attempts().is_empty());
  }

  #[tokio::test]
  async fn test_concurrent_contexts_send_each_entry_once() {
    let (_dir, worker_queue, page_queue) = shared_queues();
    for room in [1, 2, 3] {
      capture(&page_queue, mark_clean(room));
    }
    let transport = Arc::new(ScriptedTransport::online().with_latency(Duration::from_millis(20)));
    let worker = Replayer::new(transport.clone());
    let page = Replayer::new(transport.clone());

    let (a, b) = tokio::join!(
      worker.replay(&worker_queue, None),
      page.replay(&page_queue, None)
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert_eq!(transport.attempts().len(), 3);
    assert_eq!(a.success + b.success, 3);
    assert_eq!(a.failures + b.failures, 0);
    assert!(worker_queue.list_all().is_empty());
  }

  #[tokio::test]
  async fn test_failed_send_releases_entry_for_next_pass() {
    let (_dir, worker_queue, page_queue) = shared_queues();
    capture(&page_queue, mark_clean(4));

    let offline = Arc::new(ScriptedTransport::offline());
    let report = Replayer::new(offline).replay(&worker_queue, None).await.unwrap();
    assert_eq!(report.failures, 1);

    // A different context can pick it up straight away
    let transport = Arc::new(ScriptedTransport::online());
    let report = Replayer::new(transport.clone())
      .replay(&page_queue, None)
      .await
      .unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(transport.attempts().len(), 1);
  }

  #[tokio::test]
  async fn test_interrupted_response_counts_as_delivered() {
    let queue = queue();
    capture(&queue, mark_clean(12));
    let transport = Arc::new(ScriptedTransport::online());
    transport.interrupt(
      "http://h/api/habitaciones/marcar-limpia/12",
      StatusCode::CONFLICT,
    );
    let replayer = Replayer::new(transport.clone());

    let report = replayer.replay(&queue, None).await.unwrap();
    assert_eq!(report.success, 1);
    assert_eq!(report.rejected, 1);
    assert_eq!(report.failures, 0);
    assert!(queue.list_all().is_empty());

    replayer.replay(&queue, None).await.unwrap();
    assert_eq!(transport.attempts().len(), 1);
  }
}
