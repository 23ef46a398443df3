//! keygrid-daemon: keyboard-driven pointer control
//!
//! Alt+G enters grid mode, Escape leaves it. In grid mode the nine keys
//! `q w e / a s d / z x c` narrow a 3x3 grid over the screen and move the
//! pointer; `return` left-clicks, `r` right-clicks, `h` hovers and
//! `backspace` starts over from the whole screen.
//!
//! On macOS keys come from a CGEventTap. Elsewhere they are read from
//! stdin, one `press <key>` / `release <key>` line per event.

mod grid;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use keygrid_daemon::config::Config;
use keygrid_daemon::events::{EventPublisher, ListenerEvent};
use keygrid_daemon::hook::InputHook;
use keygrid_daemon::lifecycle::ShutdownSignal;
use keygrid_daemon::manager::{Backends, PlatformManager};

use crate::grid::{Grid, GridAction};

/// Requests from hotkey and key callbacks to the main loop
#[derive(Debug)]
enum Command {
    EnterGrid,
    ExitGrid,
    Key(String),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "keygrid-daemon starting");

    let config = Config::load().context("failed to load configuration")?;
    info!(?config, "configuration loaded");

    let shutdown = ShutdownSignal::new();

    // Callbacks -> main loop
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Command>(32);
    // Dispatchers -> log relay
    let (event_tx, mut event_rx) = broadcast::channel::<ListenerEvent>(64);

    let hook = input_hook()?;
    let manager = Arc::new(
        PlatformManager::new(&config, hook, Backends::headless(), EventPublisher::new(event_tx))
            .context("failed to create platform manager")?,
    );

    blocking(&manager, |m| m.initialize())
        .await?
        .context("platform initialization failed")?;

    register_hotkeys(&manager, &cmd_tx).await?;

    info!("daemon initialized, entering main loop");

    let mut grid: Option<Grid> = None;
    let shutdown_wait = shutdown.wait();
    tokio::pin!(shutdown_wait);

    loop {
        tokio::select! {
            Some(command) = cmd_rx.recv() => {
                handle_command(&manager, &cmd_tx, &mut grid, command).await?;
            }

            event = event_rx.recv() => match event {
                Ok(event) => info!(%event, "listener event"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "listener event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("listener event channel closed");
                    break;
                }
            },

            result = &mut shutdown_wait => {
                if let Err(e) = result {
                    error!(?e, "failed to wait for shutdown signal");
                }
                info!("shutdown signal received");
                break;
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    blocking(&manager, |m| m.cleanup()).await?;
    let status = serde_json::to_string(&manager.status()).context("failed to encode status")?;
    info!(%status, "final platform status");

    info!("keygrid-daemon stopped");

    Ok(())
}

#[cfg(target_os = "macos")]
fn input_hook() -> Result<Arc<dyn InputHook>> {
    info!("using CGEventTap input hook");
    Ok(Arc::new(keygrid_daemon::hook::MacHook))
}

#[cfg(not(target_os = "macos"))]
fn input_hook() -> Result<Arc<dyn InputHook>> {
    use std::io::{self, BufReader};

    use keygrid_daemon::hook::ReplayHook;

    let hook = Arc::new(ReplayHook::new());
    hook.spawn_reader(BufReader::new(io::stdin()))
        .context("failed to start stdin reader")?;
    info!("no native input hook on this platform; reading key events from stdin");
    Ok(hook)
}

/// Run a blocking manager call off the async runtime
async fn blocking<T, F>(manager: &Arc<PlatformManager>, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&PlatformManager) -> T + Send + 'static,
{
    let manager = Arc::clone(manager);
    tokio::task::spawn_blocking(move || f(&manager))
        .await
        .context("blocking manager task failed")
}

async fn register_hotkeys(manager: &Arc<PlatformManager>, cmd_tx: &mpsc::Sender<Command>) -> Result<()> {
    let enter_tx = cmd_tx.clone();
    let exit_tx = cmd_tx.clone();

    let registered = blocking(manager, move |m| {
        m.register_activation_hotkey(Arc::new(move || {
            enter_tx.try_send(Command::EnterGrid)?;
            Ok(())
        }))?;
        m.register_exit_hotkey(Arc::new(move || {
            exit_tx.try_send(Command::ExitGrid)?;
            Ok(())
        }))
    })
    .await?;

    match registered {
        Ok(()) => info!("hotkeys registered: alt+g enters grid mode, escape leaves it"),
        Err(e) => {
            error!(error = %e, "failed to register hotkeys");
            warn!("continuing without hotkey support - check Accessibility permissions");
        }
    }
    Ok(())
}

async fn handle_command(
    manager: &Arc<PlatformManager>,
    cmd_tx: &mpsc::Sender<Command>,
    grid: &mut Option<Grid>,
    command: Command,
) -> Result<()> {
    match command {
        Command::EnterGrid => {
            if grid.is_some() {
                debug!("already in grid mode");
                return Ok(());
            }

            let key_tx = cmd_tx.clone();
            let started = blocking(manager, move |m| {
                m.start_keyboard_listening(Arc::new(move |token: &str| {
                    key_tx.try_send(Command::Key(token.to_string()))?;
                    Ok(())
                }))
            })
            .await?;

            match started {
                Ok(_) => {
                    let screen = manager.screen_rect();
                    info!(%screen, "grid mode entered");
                    *grid = Some(Grid::new(screen));
                }
                Err(e) => error!(error = %e, "failed to enter grid mode"),
            }
        }

        Command::ExitGrid => {
            if grid.take().is_some() {
                blocking(manager, |m| m.stop_keyboard_listening()).await?;
                info!("grid mode left");
            }
        }

        Command::Key(token) => {
            let Some(active) = grid.as_mut() else {
                debug!(token, "key outside grid mode");
                return Ok(());
            };

            match active.handle(&token) {
                Some(GridAction::Hover(point)) => {
                    debug!(%point, region = %active.region(), "grid hover");
                    if let Err(e) = blocking(manager, move |m| m.hover_at(point.x, point.y, true)).await? {
                        warn!(error = %e, "hover failed");
                    }
                }
                Some(GridAction::Click(point, button)) => {
                    if let Err(e) = blocking(manager, move |m| m.click_at(point.x, point.y, button)).await? {
                        warn!(error = %e, "click failed");
                    }
                    // A click completes the selection
                    *grid = None;
                    blocking(manager, |m| m.stop_keyboard_listening()).await?;
                    info!("grid mode left after click");
                }
                None => debug!(token, "grid key with no pointer action"),
            }
        }
    }
    Ok(())
}
