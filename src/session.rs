//! Stored sign-in state and credential attachment.
//!
//! Tokens are issued elsewhere; this only keeps the current one and puts it
//! on outgoing requests.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tracing::warn;

use crate::db::Database;
use crate::http::Request;

/// A signed-in user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
  pub token: String,
  pub user_id: Option<String>,
  pub username: Option<String>,
  pub role: Option<String>,
}

/// What to do when signing in without a network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfflineLogin {
  /// A previous sign-in is stored; continue in offline mode
  Restored(Identity),
  /// Nobody signed in before; show the offline page
  ShowOfflinePage,
}

/// Session state for one execution context.
///
/// Reads go to the shared store each time so a sign-in made by one page is
/// seen by the worker's next replay.
pub struct Session {
  db: Arc<Database>,
  cached: RwLock<Option<Identity>>,
  override_token: Option<String>,
}

impl Session {
  pub fn new(db: Arc<Database>, override_token: Option<String>) -> Self {
    Self {
      db,
      cached: RwLock::new(None),
      override_token,
    }
  }

  /// Persist a new sign-in, replacing any previous one.
  pub fn sign_in(&self, identity: Identity) -> Result<()> {
    self
      .db
      .lock()?
      .execute(
        "INSERT OR REPLACE INTO session (slot, token, user_id, username, role, signed_in_at)
         VALUES (1, ?, ?, ?, ?, ?)",
        params![
          identity.token,
          identity.user_id,
          identity.username,
          identity.role,
          Utc::now().to_rfc3339(),
        ],
      )
      .map_err(|e| eyre!("Failed to store session: {}", e))?;

    self.set_cached(Some(identity));
    Ok(())
  }

  pub fn sign_out(&self) -> Result<()> {
    self
      .db
      .lock()?
      .execute("DELETE FROM session", [])
      .map_err(|e| eyre!("Failed to clear session: {}", e))?;

    self.set_cached(None);
    Ok(())
  }

  /// The stored identity, if anyone is signed in.
  pub fn identity(&self) -> Option<Identity> {
    match self.load() {
      Ok(identity) => {
        self.set_cached(identity.clone());
        identity
      }
      Err(e) => {
        warn!("Failed to read session, using last known: {}", e);
        self.cached.read().ok().and_then(|c| c.clone())
      }
    }
  }

  /// Freshest credential: the environment override, then the stored session.
  pub fn token(&self) -> Option<String> {
    self
      .override_token
      .clone()
      .or_else(|| self.identity().map(|i| i.token))
  }

  /// Sign-in fallback for when the network is down.
  pub fn offline_login(&self) -> OfflineLogin {
    match self.identity() {
      Some(identity) if identity.username.is_some() && identity.role.is_some() => {
        OfflineLogin::Restored(identity)
      }
      _ => OfflineLogin::ShowOfflinePage,
    }
  }

  /// Add the bearer credential unless the request already carries one.
  pub fn attach(&self, request: Request) -> Request {
    if request.header("authorization").is_some() {
      return request;
    }
    match self.token() {
      Some(token) => request.with_header("authorization", format!("Bearer {}", token)),
      None => request,
    }
  }

  fn load(&self) -> Result<Option<Identity>> {
    self
      .db
      .lock()?
      .query_row(
        "SELECT token, user_id, username, role FROM session WHERE slot = 1",
        [],
        |row| {
          Ok(Identity {
            token: row.get(0)?,
            user_id: row.get(1)?,
            username: row.get(2)?,
            role: row.get(3)?,
          })
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to read session: {}", e))
  }

  fn set_cached(&self, identity: Option<Identity>) {
    if let Ok(mut cached) = self.cached.write() {
      *cached = identity;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn maid() -> Identity {
    Identity {
      token: "tok-maid".into(),
      user_id: Some("u-7".into()),
      username: Some("lucia".into()),
      role: Some("maid".into()),
    }
  }

  #[test]
  fn test_sign_in_is_visible_to_other_contexts() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");
    let page = Session::new(Arc::new(Database::open(&path).unwrap()), None);
    let worker = Session::new(Arc::new(Database::open(&path).unwrap()), None);

    assert_eq!(worker.token(), None);
    page.sign_in(maid()).unwrap();
    assert_eq!(worker.token().as_deref(), Some("tok-maid"));

    page.sign_out().unwrap();
    assert_eq!(worker.token(), None);
  }

  #[test]
  fn test_override_token_wins() {
    let session = Session::new(
      Arc::new(Database::open_in_memory().unwrap()),
      Some("from-env".into()),
    );
    session.sign_in(maid()).unwrap();
    assert_eq!(session.token().as_deref(), Some("from-env"));
  }

  #[test]
  fn test_offline_login() {
    let session = Session::new(Arc::new(Database::open_in_memory().unwrap()), None);
    assert_eq!(session.offline_login(), OfflineLogin::ShowOfflinePage);

    session.sign_in(maid()).unwrap();
    assert_eq!(session.offline_login(), OfflineLogin::Restored(maid()));
  }

  #[test]
  fn test_attach_keeps_explicit_header() {
    let session = Session::new(Arc::new(Database::open_in_memory().unwrap()), None);
    session.sign_in(maid()).unwrap();

    let attached = session.attach(Request::get("http://h/api/habitaciones"));
    assert_eq!(attached.bearer_token(), Some("tok-maid"));

    let explicit = session
      .attach(Request::get("http://h/api/habitaciones").with_header("Authorization", "Bearer x"));
    assert_eq!(explicit.bearer_token(), Some("x"));
  }
}
