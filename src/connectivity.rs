//! Online/offline state and its transitions.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use crate::http::{Request, Transport};

/// Observable connectivity state for one execution context.
#[derive(Clone)]
pub struct Connectivity {
  tx: Arc<watch::Sender<bool>>,
}

impl Connectivity {
  pub fn new(online: bool) -> Self {
    let (tx, _rx) = watch::channel(online);
    Self { tx: Arc::new(tx) }
  }

  pub fn is_online(&self) -> bool {
    *self.tx.borrow()
  }

  /// Record the current state; subscribers are only woken on a change.
  pub fn set_online(&self, online: bool) {
    let changed = self.tx.send_if_modified(|state| {
      if *state == online {
        false
      } else {
        *state = online;
        true
      }
    });
    if changed {
      info!(online, "Connectivity changed");
    }
  }

  pub fn subscribe(&self) -> watch::Receiver<bool> {
    self.tx.subscribe()
  }

  /// Periodically check `url`; any response at all means online.
  pub fn spawn_checks(
    &self,
    transport: Arc<dyn Transport>,
    url: String,
    interval: Duration,
  ) -> JoinHandle<()> {
    let connectivity = self.clone();
    tokio::spawn(async move {
      let request = Request::get(url);
      let mut ticker = tokio::time::interval(interval);
      loop {
        ticker.tick().await;
        let online = reachable(transport.as_ref(), &request).await;
        connectivity.set_online(online);
      }
    })
  }
}

/// Whether `request` got any response, even one cut off mid-body.
pub async fn reachable(transport: &dyn Transport, request: &Request) -> bool {
  match transport.send(request).await {
    Ok(_) => true,
    Err(e) => e.delivered_status().is_some(),
  }
}

/// Wait until the state goes from offline to online.
///
/// Returns `false` once the sender is gone.
pub async fn wait_for_online(rx: &mut watch::Receiver<bool>) -> bool {
  let mut was_online = *rx.borrow_and_update();
  loop {
    if rx.changed().await.is_err() {
      return false;
    }
    let online = *rx.borrow_and_update();
    if online && !was_online {
      return true;
    }
    was_online = online;
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::http::testing::ScriptedTransport;
  use crate::http::StatusCode;

  #[tokio::test]
  async fn test_wait_for_online_fires_on_transition() {
    let connectivity = Connectivity::new(false);
    let mut rx = connectivity.subscribe();

    let waiter = tokio::spawn(async move { wait_for_online(&mut rx).await });
    tokio::time::sleep(Duration::from_millis(10)).await;
    connectivity.set_online(true);

    assert!(waiter.await.unwrap());
  }

  #[tokio::test]
  async fn test_setting_same_state_does_not_notify() {
    let connectivity = Connectivity::new(true);
    let mut rx = connectivity.subscribe();
    rx.borrow_and_update();

    connectivity.set_online(true);
    assert!(!rx.has_changed().unwrap());

    connectivity.set_online(false);
    assert!(rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_interrupted_response_is_reachable() {
    let transport = ScriptedTransport::online();
    let request = Request::get("http://h/api/");
    transport.interrupt("http://h/api/", StatusCode::OK);
    assert!(reachable(&transport, &request).await);

    transport.set_online(false);
    assert!(!reachable(&transport, &request).await);
  }

  #[tokio::test]
  async fn test_checks_track_transport() {
    let connectivity = Connectivity::new(true);
    let transport = Arc::new(ScriptedTransport::offline());
    let checks = connectivity.spawn_checks(
      transport.clone(),
      "http://h/api/".to_string(),
      Duration::from_millis(5),
    );

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!connectivity.is_online());

    transport.set_online(true);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(connectivity.is_online());

    checks.abort();
  }
}
