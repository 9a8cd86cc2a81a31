//! Strata terminal window server.
//!
//! A single-process compositor that multiplexes a cell-based terminal
//! display among client applications connected over a Unix socket. Clients
//! create layered windows, draw attributed cells into them and receive the
//! input events for the window under the cursor or in focus; the server
//! blends the layers back-to-front onto the terminal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::UnixListener;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use strata_server::backend::{CrosstermBackend, MemoryBackend, TerminalBackend};
use strata_server::compositor::Compositor;
use strata_server::config::Config;
use strata_server::server;

#[tokio::main]
async fn main() -> Result<()> {
    let headless = std::env::args().any(|arg| arg == "--headless");
    let config = Config::load()?;
    init_tracing(&config, headless)?;
    info!("starting strata server");

    let mut backend: Box<dyn TerminalBackend> = if headless {
        let (backend, _handle) = MemoryBackend::new(config.headless.width, config.headless.height);
        Box::new(backend)
    } else {
        Box::new(CrosstermBackend::new()?)
    };
    let events_source = backend.events()?;

    let (commands_tx, commands_rx) = mpsc::channel(config.limits.request_queue);
    let (events_tx, events_rx) = mpsc::channel(256);
    let (quit_tx, _) = broadcast::channel(8);

    // Terminal input pump on a blocking thread, stopped via flag on quit.
    let stop_input = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop_input);
        let mut quit_rx = quit_tx.subscribe();
        tokio::spawn(async move {
            let _ = quit_rx.recv().await;
            stop.store(true, Ordering::Relaxed);
        });
    }
    let input_task = tokio::task::spawn_blocking({
        let quit = quit_tx.clone();
        move || server::input_loop(events_source, events_tx, stop_input, quit)
    });

    let compositor = Compositor::new(
        backend,
        commands_rx,
        commands_tx.clone(),
        events_rx,
        quit_tx.clone(),
    );
    let compositor_task = tokio::spawn(compositor.run());

    // Ctrl-C is a clean shutdown.
    {
        let quit = quit_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = quit.send(());
            }
        });
    }

    let socket_path = config.socket_path();
    if socket_path.exists() {
        std::fs::remove_file(&socket_path).context("failed to remove stale socket")?;
    }
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create runtime directory")?;
    }
    let listener = UnixListener::bind(&socket_path)
        .with_context(|| format!("failed to bind {}", socket_path.display()))?;
    restrict_to_owner(&socket_path)?;
    info!(path = %socket_path.display(), "listening");

    let served = server::serve(
        listener,
        commands_tx,
        quit_tx.clone(),
        config.limits.client_channel,
    )
    .await;
    let _ = quit_tx.send(());

    let composited = compositor_task.await.context("compositor task panicked")?;
    let polled = input_task.await.context("input task panicked")?;
    let _ = std::fs::remove_file(&socket_path);
    info!("strata server stopped");

    // Any fatal path (accept loop, terminal flush, terminal input) makes
    // the process exit non-zero.
    served.and(composited).and(polled)
}

fn init_tracing(config: &Config, headless: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "strata_server=debug,info".into()),
    );
    if headless {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    } else {
        // The terminal belongs to the compositor; logs go to a file.
        let path = config.log_file();
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let file = std::fs::File::create(&path)
            .with_context(|| format!("failed to open log file {}", path.display()))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::sync::Mutex::new(file))
                    .with_ansi(false),
            )
            .init();
    }
    Ok(())
}

/// Only the owning user may talk to the server.
fn restrict_to_owner(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .context("failed to restrict socket permissions")
}
