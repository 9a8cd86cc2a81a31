//! Accept loop and terminal input pump.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use strata_ipc::{ClientId, InputEvent};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::backend::EventSource;
use crate::client::run_client;
use crate::compositor::Command;

/// Accept connections until quit. Accept failures are fatal and surface as
/// global shutdown.
pub async fn serve(
    listener: UnixListener,
    commands: mpsc::Sender<Command>,
    quit: broadcast::Sender<()>,
    channel_capacity: usize,
) -> Result<()> {
    let mut quit_rx = quit.subscribe();
    loop {
        let (stream, _) = tokio::select! {
            accepted = listener.accept() => accepted.context("accept failed")?,
            _ = quit_rx.recv() => return Ok(()),
        };
        if let Err(e) = setup_client(stream, &commands, &quit, channel_capacity).await {
            warn!(error = %e, "client setup failed");
        }
    }
}

/// Handshake one connection: read the client's pid, register its channels
/// with the compositor, then hand the stream to a handler task.
async fn setup_client(
    mut stream: UnixStream,
    commands: &mpsc::Sender<Command>,
    quit: &broadcast::Sender<()>,
    channel_capacity: usize,
) -> Result<()> {
    let client = read_pid(&mut stream).await?;
    info!(client, "client connected");

    let (reply_tx, reply_rx) = mpsc::channel(channel_capacity);
    let (event_tx, event_rx) = mpsc::channel(channel_capacity);
    let (attached_tx, attached_rx) = oneshot::channel();
    commands
        .send(Command::Attach {
            client,
            reply_tx,
            event_tx,
            attached: attached_tx,
        })
        .await
        .map_err(|_| anyhow!("compositor is gone"))?;
    // Wait for the registration to be live before READY goes out, so no
    // request of this client can race it.
    attached_rx
        .await
        .map_err(|_| anyhow!("compositor dropped the registration"))?;

    let commands = commands.clone();
    let quit_rx = quit.subscribe();
    tokio::spawn(async move {
        match run_client(stream, client, commands, reply_rx, event_rx, quit_rx).await {
            Ok(()) => debug!(client, "client handler ended"),
            Err(e) => debug!(client, error = %e, "client handler ended with error"),
        }
    });
    Ok(())
}

/// The connect preamble: the client's pid as a little-endian u32, tolerant
/// of trailing padding up to 64 bytes.
async fn read_pid(stream: &mut UnixStream) -> Result<ClientId> {
    let mut buf = [0u8; 64];
    let n = stream.read(&mut buf).await.context("pid read failed")?;
    if n < 4 {
        anyhow::bail!("short pid handshake ({n} bytes)");
    }
    Ok(u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]))
}

/// Blocking poll loop over the backend's event source, feeding the
/// compositor. Run on a blocking thread; the poll itself cannot select on
/// quit, so it watches `stop` between polls. Quiet timeouts poll again; a
/// poll failure takes the server down and is surfaced to the caller so the
/// process exits non-zero.
pub fn input_loop(
    mut source: Box<dyn EventSource>,
    events: mpsc::Sender<InputEvent>,
    stop: Arc<AtomicBool>,
    quit: broadcast::Sender<()>,
) -> Result<()> {
    while !stop.load(Ordering::Relaxed) {
        match source.poll_event(Duration::from_millis(100)) {
            Ok(InputEvent::None) => continue,
            Ok(event) => {
                if events.blocking_send(event).is_err() {
                    break;
                }
            }
            Err(e) => {
                let _ = quit.send(());
                return Err(e).context("terminal input failed");
            }
        }
    }
    Ok(())
}
