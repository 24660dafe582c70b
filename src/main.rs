//! voice-lamp-daemon: wakeup lifecycle core of a voice-controlled lamp
//!
//! A single dispatcher task owns all wakeup state and consumes one bounded
//! mailbox. Recognition results, timer expiries, playback completions and
//! interrupt-side power events only ever post messages to it.
//!
//! On a host build the board is simulated: recognition input comes from
//! stdin (see `console`), persistent data lives in the data directory, and
//! every collaborator call is logged.

mod collab;
mod commands;
mod config;
mod console;
mod dispatch;
mod events;
mod lifecycle;
mod mailbox;
mod power;
mod state;
mod timer;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::collab::{Collaborators, JsonFileStore, PlaybackMode, SimBoard};
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::events::StateEvent;
use crate::lifecycle::ShutdownSignal;
use crate::mailbox::{Message, MAILBOX_CAPACITY};

/// Simulated prompt length
const SIM_PROMPT_DURATION: Duration = Duration::from_millis(800);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "voice-lamp-daemon starting"
    );

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(
        data_dir = %config.data_dir.display(),
        exit_wakeup_ms = config.exit_wakeup_timeout.as_millis() as u64,
        low_power = ?config.low_power,
        "configuration loaded"
    );

    let shutdown = ShutdownSignal::new();

    let board = Arc::new(SimBoard::new(PlaybackMode::After(SIM_PROMPT_DURATION)));
    let collab = Collaborators {
        store: Arc::new(JsonFileStore::open(&config.data_dir)),
        capture_device: config.capture_device,
        ..Collaborators::simulated(&board)
    };

    let (sender, mailbox) = mailbox::channel(MAILBOX_CAPACITY);
    let (event_tx, mut event_rx) = broadcast::channel::<StateEvent>(64);

    let mut dispatcher = Dispatcher::new(config, collab, sender.clone(), mailbox, event_tx)
        .context("failed to create dispatcher timers")?;

    let vad = dispatcher.vad_interrupt();
    let snapshot = dispatcher.subscribe();

    // Capture is up as soon as the board is.
    sender
        .post(Message::AudioCaptureStarted)
        .context("failed to post boot message")?;

    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = dispatcher.run() => {
            if let Err(e) = result {
                error!(error = %e, "dispatcher stopped");
                return Err(e).context("dispatcher halted");
            }
        }

        result = console::run(sender, vad, snapshot) => {
            if let Err(e) = result {
                warn!(error = %e, "console input failed");
            }
        }

        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => info!(%event, "state event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("state event logger exited");
        }

        result = shutdown.wait() => {
            result.context("failed to install signal handlers")?;
            info!("shutdown signal received");
        }
    }

    info!("voice-lamp-daemon stopped");
    Ok(())
}
