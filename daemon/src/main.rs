mod brightness;
mod config;
mod dimming;
mod event;
mod focus;
mod lcu;
mod logging;
mod paths;
mod status;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::{mpsc, RwLock};

use crate::brightness::DdcBrightness;
use crate::dimming::{DimmingController, DimmingWorker};
use crate::lcu::api::{owned_champions, LcuApi};
use crate::lcu::lockfile::CredentialResolver;
use crate::lcu::{
    ChampSelectHandler, Connector, FeatureHandler, LockfileResolver, ReadyCheckHandler,
    WebSocketConnect, WindowClassPresence,
};

#[derive(Debug, Parser)]
#[command(name = "qol-daemon", version, about = "League of Legends quality-of-life daemon")]
struct Cli {
    /// Enable debug logging for the daemon (RUST_LOG overrides)
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the daemon (default)
    Run,
    /// Print the champions the logged-in account owns as `name = id` lines
    Champions,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.debug);

    let result = match cli.command.unwrap_or(Command::Run) {
        Command::Run => run().await,
        Command::Champions => print_champions().await,
    };
    if let Err(e) = result {
        tracing::error!(error = %format!("{e:#}"), "qol-daemon exited with an error");
        std::process::exit(1);
    }
}

async fn print_champions() -> Result<()> {
    let credential = LockfileResolver::standard()
        .resolve()
        .context("League client lock file not found; is the client running?")?;
    let api = LcuApi::new(&credential).context("failed to build HTTP client")?;
    let champions = owned_champions(&api)
        .await
        .context("failed to fetch owned champions")?;
    for (name, id) in champions {
        println!("{name} = {id}");
    }
    Ok(())
}

async fn run() -> Result<()> {
    // ── App data directory ────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    std::fs::create_dir_all(&app_dir)
        .with_context(|| format!("failed to create app data directory {}", app_dir.display()))?;

    // ── Status ────────────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = status::DaemonStatus::new();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let initial_settings = config::load_or_default(&config_path).unwrap_or_else(|e| {
        tracing::warn!(error = %format!("{e:#}"), "config error, using defaults");
        current_status.error = Some(format!("{e:#}"));
        config::Settings::default()
    });
    let shared_settings: config::SharedSettings = Arc::new(RwLock::new(initial_settings));
    status::write_status(&status_path, &mut current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<event::DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_config(config_path, event_tx.clone()));

    let focus_handle = match focus::start(event_tx.clone()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %format!("{e:#}"), "focus tracking unavailable, dimming disabled");
            None
        }
    };

    let dimming = DimmingWorker::spawn(DimmingController::new(DdcBrightness::new()));
    dimming.restore(shared_settings.read().await.clone()).await;

    let handlers: Vec<Arc<dyn FeatureHandler>> = vec![
        Arc::new(ReadyCheckHandler::new(Arc::clone(&shared_settings))),
        Arc::new(ChampSelectHandler::new(Arc::clone(&shared_settings))),
    ];
    let connector = Connector::new(
        Arc::new(WindowClassPresence::default()),
        Arc::new(LockfileResolver::standard()),
        Arc::new(WebSocketConnect),
        handlers,
    )
    .spawn();

    {
        let tx = event_tx.clone();
        let mut state_rx = connector.subscribe();
        tokio::spawn(async move {
            while state_rx.changed().await.is_ok() {
                let state = *state_rx.borrow_and_update();
                if tx
                    .send(event::DaemonEvent::ConnectorStateChanged(state))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });
    }

    {
        let tx = event_tx.clone();
        let mut dimmed_rx = dimming.subscribe();
        tokio::spawn(async move {
            while dimmed_rx.changed().await.is_ok() {
                let dimmed = *dimmed_rx.borrow_and_update();
                if tx.send(event::DaemonEvent::DimmingChanged(dimmed)).await.is_err() {
                    break;
                }
            }
        });
    }

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(event::DaemonEvent::Shutdown).await;
            }
        });
    }

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "qol-daemon started");

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            event::DaemonEvent::FocusChanged(title) => {
                let settings = shared_settings.read().await.clone();
                dimming.focus_changed(title, settings).await;
            }

            event::DaemonEvent::DimmingChanged(dimmed) => {
                current_status.dimming = dimmed;
                status::write_status(&status_path, &mut current_status);
            }

            event::DaemonEvent::ConfigReloaded(new_settings) => {
                tracing::info!("config reloaded");
                let was_enabled = shared_settings.read().await.dimming_enabled;
                if was_enabled && !new_settings.dimming_enabled {
                    dimming.restore(new_settings.clone()).await;
                }
                *shared_settings.write().await = new_settings;
                current_status.error = None;
                status::write_status(&status_path, &mut current_status);
            }

            event::DaemonEvent::ConnectorStateChanged(state) => {
                tracing::info!(state = state.as_str(), "client connector state changed");
                current_status.client = state.into();
                status::write_status(&status_path, &mut current_status);
            }

            event::DaemonEvent::Shutdown => {
                tracing::info!(client = connector.state().as_str(), "shutting down");
                break;
            }
        }
    }

    connector.stop();
    connector.join().await;

    dimming.shutdown(shared_settings.read().await.clone()).await;
    current_status.client = status::ClientState::Stopped;
    current_status.dimming = false;
    status::write_status(&status_path, &mut current_status);

    if let Some(handle) = focus_handle {
        handle.stop();
    }
    Ok(())
}
