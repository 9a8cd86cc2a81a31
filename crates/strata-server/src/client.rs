//! Per-connection client handler.
//!
//! Each accepted connection gets a read half and a write half. The read
//! half turns frames into compositor commands and acknowledges the
//! fire-and-forget mutators; the write half is the socket's single writer,
//! draining the client's reply channel, event channel and the internal ack
//! queue. On disconnect the handler synthesizes deletes for every window
//! the client owned.

use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use strata_ipc::frame::{read_frame, write_frame};
use strata_ipc::{ClientId, EventMsg, LayerId, Reply, Request, READY};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::compositor::Command;

/// Capacity of the internal ack queue between the read and write halves.
const OUTBOUND_CAPACITY: usize = 256;

/// Drive one client connection until EOF, error, channel loss or quit.
pub async fn run_client(
    stream: UnixStream,
    client: ClientId,
    commands: mpsc::Sender<Command>,
    reply_rx: mpsc::Receiver<Reply>,
    event_rx: mpsc::Receiver<EventMsg>,
    quit: broadcast::Receiver<()>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();

    // The channels are registered by now; tell the client the handler is
    // ready for framed traffic.
    writer
        .write_all(READY)
        .await
        .context("ready handshake failed")?;

    let owned: Arc<Mutex<Vec<LayerId>>> = Arc::new(Mutex::new(Vec::new()));
    let (ack_tx, ack_rx) = mpsc::channel::<Vec<u8>>(OUTBOUND_CAPACITY);

    let mut writer_task = tokio::spawn(write_loop(
        writer,
        reply_rx,
        event_rx,
        ack_rx,
        Arc::clone(&owned),
    ));

    let result = tokio::select! {
        result = read_loop(reader, client, &commands, &ack_tx, quit) => result,
        // The write half exits when the compositor drops our channels or
        // the socket breaks; either way this connection is done.
        _ = &mut writer_task => Ok(()),
    };
    writer_task.abort();

    // Reap every window the client owned, then unregister. The deletes go
    // through the ordinary request queue, so they serialize with whatever
    // the compositor is doing. A poisoned list still names our windows.
    let ids: Vec<LayerId> = owned.lock().unwrap_or_else(|e| e.into_inner()).clone();
    for id in ids {
        let _ = commands
            .send(Command::Request {
                client,
                request: Request::Delete { id },
            })
            .await;
    }
    let _ = commands.send(Command::Detach { client }).await;
    debug!(client, "client handler finished");
    result
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    client: ClientId,
    commands: &mpsc::Sender<Command>,
    ack_tx: &mpsc::Sender<Vec<u8>>,
    mut quit: broadcast::Receiver<()>,
) -> Result<()> {
    loop {
        let frame = tokio::select! {
            frame = read_frame(&mut reader) => frame.context("client read failed")?,
            _ = quit.recv() => return Ok(()),
        };
        let Some(frame) = frame else {
            debug!(client, "client disconnected");
            return Ok(());
        };

        let request = match Request::decode(&frame) {
            Ok(request) => request,
            Err(e) => {
                // Malformed traffic is dropped without disconnecting.
                warn!(client, error = %e, "malformed request dropped");
                continue;
            }
        };
        let ack = request.ack_id();

        if commands
            .send(Command::Request { client, request })
            .await
            .is_err()
        {
            // Compositor is gone; the server is shutting down.
            return Ok(());
        }

        // Acknowledge receipt immediately, before the compositor has
        // necessarily processed the request.
        if let Some(id) = ack {
            if ack_tx.try_send(Reply::Ack { id }.encode()).is_err() {
                anyhow::bail!("client too slow consuming acks");
            }
        }
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut reply_rx: mpsc::Receiver<Reply>,
    mut event_rx: mpsc::Receiver<EventMsg>,
    mut ack_rx: mpsc::Receiver<Vec<u8>>,
    owned: Arc<Mutex<Vec<LayerId>>>,
) {
    loop {
        let frame = tokio::select! {
            reply = reply_rx.recv() => match reply {
                Some(reply) => {
                    if let Reply::Creation { id } = reply {
                        owned.lock().unwrap_or_else(|e| e.into_inner()).push(id);
                    }
                    reply.encode()
                }
                // The compositor dropped us (slow client or shutdown).
                None => break,
            },
            event = event_rx.recv() => match event {
                Some(event) => event.encode(),
                None => break,
            },
            ack = ack_rx.recv() => match ack {
                Some(frame) => frame,
                None => break,
            },
        };
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "client write failed");
            break;
        }
    }
}
