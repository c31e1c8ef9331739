mod cache;
mod config;
mod connectivity;
mod context;
mod db;
mod http;
mod logging;
mod page;
mod queue;
mod replay;
mod router;
mod session;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::config::Config;
use crate::connectivity::Connectivity;
use crate::context::Context;
use crate::http::{Method, ReqwestTransport, Request, Transport};
use crate::page::Page;
use crate::queue::EntryMeta;
use crate::session::{Identity, OfflineLogin};
use crate::worker::{Startup, WorkerEvent};

#[derive(Parser, Debug)]
#[command(name = "roomsync")]
#[command(about = "Offline request queue and cache for the hotel housekeeping client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/roomsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Precache the app shell and delete stale cache generations
  Install,
  /// Send one request through the worker
  Send {
    /// POST, PUT, DELETE or GET
    method: String,
    /// Absolute URL, or a path under the API base
    target: String,
    /// JSON body
    #[arg(long)]
    body: Option<String>,
    /// Room the request concerns (inferred when omitted)
    #[arg(long)]
    resource: Option<String>,
  },
  /// List queued requests and per-room counts
  Pending {
    /// Only count requests for this room
    #[arg(long)]
    room: Option<String>,
  },
  /// Replay queued requests now
  Sync,
  /// Run the worker and a page until interrupted
  Run,
  /// Store a session token issued by the API
  Login {
    token: String,
    #[arg(long)]
    user_id: Option<String>,
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    role: Option<String>,
  },
  /// Forget the stored session
  Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose)?;

  let config = Arc::new(Config::load(args.config.as_deref())?);
  let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new(config.request_timeout())?);
  let connectivity = Connectivity::new(true);

  // Each execution context gets its own connection to the store
  let open = || Context::open(Arc::clone(&config), Arc::clone(&transport), connectivity.clone());

  match args.command {
    Command::Install => {
      let context = open()?;
      let report = context
        .caches
        .install(context.transport.as_ref(), &config.asset_urls()?)
        .await?;
      let deleted = context.caches.activate()?;
      println!(
        "cached {} assets, skipped {}, deleted {} stale caches",
        report.cached.len(),
        report.skipped.len(),
        deleted.len()
      );
      for asset in report.skipped {
        println!("  skipped {}", asset);
      }
      for name in context.caches.storage().keys()? {
        println!("  cache {}", name);
      }
    }

    Command::Send {
      method,
      target,
      body,
      resource,
    } => {
      let worker = worker::start(open()?, Startup::Resume).await?;
      let page = Page::new("cli", open()?, Some(worker));

      let request = build_request(&config, &method, &target, body.as_deref())?;
      let meta = resource.map(EntryMeta::for_resource).unwrap_or_default();
      let fetched = page
        .fetch_with_meta(request, meta)
        .await
        .map_err(|e| eyre!("Request failed: {}", e))?;

      println!("{} ({:?})", fetched.response.status, fetched.source);
      println!("{}", fetched.response.text());
    }

    Command::Pending { room } => {
      let page = Page::new("cli", open()?, None);
      if let Some(room) = room {
        println!("room {}: {} pending", room, page.pending_for(&room));
        return Ok(());
      }

      let entries = page.pending();
      if entries.is_empty() {
        println!("no pending requests");
      }
      if !page.has_durable_queue() {
        println!("persistent queue unavailable");
      }
      for entry in &entries {
        println!(
          "#{:<5} {:<6} {} room={} queued={}{}",
          entry.id,
          entry.method,
          entry.url,
          entry.meta.resource_id.as_deref().unwrap_or("-"),
          entry.created_at.format("%Y-%m-%d %H:%M:%S"),
          if entry.is_durable() { "" } else { " (not durable)" }
        );
      }
      for (room, count) in page.pending_counts() {
        println!("room {}: {} pending", room, count);
      }
    }

    Command::Sync => {
      let page = Page::new("cli", open()?, None);
      let report = page
        .replay_pending()
        .await
        .ok_or_else(|| eyre!("A replay is already running"))?;
      let event = WorkerEvent::RequestsSynced {
        success: report.success,
        failures: report.failures,
      };
      println!("{}", serde_json::to_string(&event)?);
      if report.rejected > 0 {
        println!("{} delivered requests were rejected by the server", report.rejected);
      }
    }

    Command::Run => run(&config, open()?, open()?).await?,

    Command::Login {
      token,
      user_id,
      username,
      role,
    } => {
      open()?.session.sign_in(Identity {
        token,
        user_id,
        username,
        role,
      })?;
      println!("session stored");
    }

    Command::Logout => {
      open()?.session.sign_out()?;
      println!("session cleared");
    }
  }

  Ok(())
}

/// Start the worker and one page, replay on reconnect, print broadcasts.
async fn run(config: &Config, worker_context: Context, page_context: Context) -> Result<()> {
  let transport = Arc::clone(&worker_context.transport);
  let connectivity = worker_context.connectivity.clone();
  let check_url = config.api_base()?.to_string();

  // First check decides how the page starts
  let online =
    crate::connectivity::reachable(transport.as_ref(), &Request::get(check_url.as_str())).await;
  connectivity.set_online(online);

  let session = Arc::clone(&page_context.session);
  let worker = worker::start(worker_context, Startup::Install).await?;
  let messages = worker.clone();
  let page = Arc::new(Page::new("main", page_context, Some(worker)));

  if !online {
    match session.offline_login() {
      OfflineLogin::Restored(identity) => {
        info!(user = ?identity.username, role = ?identity.role, "Continuing offline with stored session");
      }
      OfflineLogin::ShowOfflinePage => {
        warn!("Offline and not signed in");
        let offline = Request::get(config.offline_page_url()?).navigation();
        if let Ok(fetched) = page.fetch(offline).await {
          println!("{}", fetched.response.text());
        }
      }
    }
  }

  let checks = connectivity.spawn_checks(Arc::clone(&transport), check_url, config.check_interval());
  let listener = Arc::clone(&page).spawn_online_listener();
  info!(page = page.name(), "Page ready");
  println!(
    "{} requests pending ({})",
    page.pending_total(),
    if connectivity.is_online() { "online" } else { "offline" }
  );

  // Worker messages in their JSON form, one per line
  let mut stdin = BufReader::new(tokio::io::stdin()).lines();
  let mut stdin_open = true;

  loop {
    tokio::select! {
      _ = tokio::signal::ctrl_c() => break,
      line = stdin.next_line(), if stdin_open => match line {
        Ok(Some(line)) if !line.trim().is_empty() => {
          if let Err(e) = messages.post_json(line.trim()) {
            warn!("{}", e);
          }
        }
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => stdin_open = false,
      },
      event = page.next_event() => match event {
        Some(event) => {
          println!("{}", serde_json::to_string(&event)?);
          for (room, count) in page.pending_counts() {
            println!("  room {}: {} pending", room, count);
          }
        }
        None => break,
      },
    }
  }

  checks.abort();
  listener.abort();
  Ok(())
}

fn build_request(config: &Config, method: &str, target: &str, body: Option<&str>) -> Result<Request> {
  let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
    .map_err(|e| eyre!("Invalid method {}: {}", method, e))?;
  let url = if target.starts_with("http://") || target.starts_with("https://") {
    target.to_string()
  } else {
    config.api_url(target)?
  };

  let mut request = Request::new(method, url);
  if let Some(body) = body {
    let value: serde_json::Value =
      serde_json::from_str(body).map_err(|e| eyre!("Body is not valid JSON: {}", e))?;
    request = request.with_json(&value);
  }
  Ok(request)
}
