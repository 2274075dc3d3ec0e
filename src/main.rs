//! idlesync - one tab of a shared idle session.
//!
//! Reads activity from stdin (one input kind per line, an empty line counts
//! as a key press), coordinates with every other process pointing at the
//! same store file, and logs idle transitions.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use idlesync::clock::{Clock, SystemClock};
use idlesync::config::{Config, StoreBackend};
use idlesync::logging::JsonlLogger;
use idlesync::store::{FileStore, MemoryStore, SharedStore};
use idlesync::{ActivityEvent, ActivityKind, IdleEvent, TabEngine, TabEvent, TabHandle, TabRuntime};

/// Application version.
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let config_path = std::env::args().nth(1).map(PathBuf::from);

    // Load configuration
    let config = Config::load(config_path.as_deref())?;
    config.validate()?;

    // Initialize tracing
    init_tracing(&config.logging.level)?;

    info!("Starting idlesync v{}", VERSION);

    let store = open_store(&config)?;
    let engine = TabEngine::new(config.engine_config(), store, Arc::new(SystemClock))
        .context("Invalid session configuration")?;
    let mut events_rx = engine.subscribe();

    let (activity_tx, activity_rx) = mpsc::channel::<ActivityEvent>(64);
    let handle = TabRuntime::spawn(engine, activity_rx, config.runtime.poll_interval());

    let mut logger = JsonlLogger::new(config.logging.logs_dir(), handle.tab_id())?;
    logger.log_session_start(VERSION, &config.session.key)?;

    info!(
        "Tab {} ready: timeout={}ms, prompt lead={}ms",
        handle.tab_id(),
        config.session.timeout_ms,
        config.session.prompt_lead_ms
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        let kind = if line.trim().is_empty() {
                            Ok(ActivityKind::KeyDown)
                        } else {
                            line.parse::<ActivityKind>()
                        };
                        match kind {
                            Ok(kind) => {
                                let event = ActivityEvent::new(kind, SystemClock.now_ms());
                                if activity_tx.send(event).await.is_err() {
                                    error!("Tab loop stopped unexpectedly");
                                    break;
                                }
                            }
                            Err(e) => warn!("{}", e),
                        }
                    }
                    Ok(None) => {
                        info!("Input closed");
                        break;
                    }
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
            event = events_rx.recv() => {
                match event {
                    Ok(event) => handle_event(&handle, &mut logger, &event),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Dropped {} tab events", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupt received");
                break;
            }
        }
    }

    // Cleanup
    info!("Shutting down...");
    let snapshot = handle.snapshot();
    handle.shutdown().await;
    logger.log_session_end(&snapshot)?;

    info!("idlesync shutdown complete");
    Ok(())
}

/// Open the configured shared store.
fn open_store(config: &Config) -> Result<Arc<dyn SharedStore>> {
    let store: Arc<dyn SharedStore> = match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory store; this tab will not see other processes");
            Arc::new(MemoryStore::new())
        }
        StoreBackend::File => {
            let path = config.store_path();
            let store = FileStore::open(&path, config.store.watch_interval())
                .with_context(|| format!("Failed to open store file: {:?}", path))?;
            Arc::new(store)
        }
    };
    Ok(store)
}

/// Log a tab event and act on it.
fn handle_event(handle: &TabHandle, logger: &mut JsonlLogger, event: &TabEvent) {
    let leader = handle.is_leader();
    let remaining_ms = handle.remaining_time();

    match event {
        TabEvent::Idle(IdleEvent::Prompted) => {
            info!("Still there? Logging out in {}s", remaining_ms.div_ceil(1000));
        }
        TabEvent::Idle(IdleEvent::Idle) => {
            if leader {
                // Only the leader performs session-wide side effects.
                info!("User idle: signalling logout for the session");
            } else {
                info!("User idle");
            }
        }
        TabEvent::Idle(IdleEvent::Active { idle_duration_secs }) => {
            info!("User was idle for {} seconds", idle_duration_secs);
        }
        TabEvent::LeadershipAcquired => info!("This tab now leads the session"),
        TabEvent::LeadershipLost => info!("Another tab now leads the session"),
        TabEvent::StoreDegraded { reason } => {
            warn!("Cross-tab sync disabled: {}", reason);
        }
    }

    if let Err(e) = logger.log_tab_event(event, leader, remaining_ms) {
        warn!("Failed to log event: {}", e);
    }
}

/// Initialize tracing subscriber with the given log level.
fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}
