//! Client library for the strata terminal window server.
//!
//! Connects to the server's Unix socket, performs the pid/`READY`
//! handshake, and exposes the request surface: window creation and
//! mutation, cell reads, screen queries and the stream of dispatched input
//! events. A background task demultiplexes server traffic into replies,
//! acknowledgements and events.

use std::path::Path;

use anyhow::{bail, Context, Result};
use strata_ipc::frame::{read_frame, write_frame};
use strata_ipc::{
    socket_path, Cell, EventMsg, LayerId, OutputMode, Reply, Request, ServerMsg, WindowAttr, READY,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tracing::debug;

/// A connection to the strata server.
///
/// Replies arrive in request order, so each query method sends its request
/// and waits for the next reply. Acknowledgements and input events flow on
/// their own queues; drain them with [`Connection::next_ack`] and
/// [`Connection::next_event`].
pub struct Connection {
    pid: u32,
    writer: OwnedWriteHalf,
    replies: mpsc::Receiver<Reply>,
    acks: mpsc::Receiver<LayerId>,
    events: mpsc::Receiver<EventMsg>,
}

impl Connection {
    /// Connect to the server at the default socket path as this process.
    pub async fn connect() -> Result<Self> {
        Self::connect_as(&socket_path(), std::process::id()).await
    }

    /// Connect to a specific socket under a specific client id. The id is
    /// normally the process pid; anything unique per connection works.
    pub async fn connect_as(path: &Path, pid: u32) -> Result<Self> {
        let mut stream = UnixStream::connect(path)
            .await
            .with_context(|| format!("failed to connect to {}", path.display()))?;

        // Announce ourselves, then block until the server's handler is
        // registered and answers READY.
        stream
            .write_all(&pid.to_le_bytes())
            .await
            .context("pid handshake failed")?;
        let mut ready = [0u8; 5];
        stream
            .read_exact(&mut ready)
            .await
            .context("ready handshake failed")?;
        if ready != READY {
            bail!("unexpected handshake from server: {ready:?}");
        }

        let (mut reader, writer) = stream.into_split();
        let (reply_tx, replies) = mpsc::channel(256);
        let (ack_tx, acks) = mpsc::channel(256);
        let (event_tx, events) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                let frame = match read_frame(&mut reader).await {
                    Ok(Some(frame)) => frame,
                    Ok(None) => break,
                    Err(e) => {
                        debug!(error = %e, "server read failed");
                        break;
                    }
                };
                match ServerMsg::decode(&frame) {
                    Ok(ServerMsg::Reply(Reply::Ack { id })) => {
                        if ack_tx.send(id).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerMsg::Reply(reply)) => {
                        if reply_tx.send(reply).await.is_err() {
                            break;
                        }
                    }
                    Ok(ServerMsg::Event(event)) => {
                        if event_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "malformed server message dropped");
                    }
                }
            }
        });

        Ok(Self {
            pid,
            writer,
            replies,
            acks,
            events,
        })
    }

    /// Create a window and return its server-assigned id.
    pub async fn new_window(
        &mut self,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        attr: WindowAttr,
    ) -> Result<LayerId> {
        self.send(&Request::NewWindow {
            pid: self.pid,
            x,
            y,
            width,
            height,
            attr,
        })
        .await?;
        match self.next_reply().await? {
            Reply::Creation { id } => Ok(id),
            other => bail!("unexpected reply to new_window: {other:?}"),
        }
    }

    /// Read one cell of a window's canvas back.
    pub async fn get(&mut self, id: LayerId, x: i32, y: i32) -> Result<Cell> {
        self.send(&Request::Get { id, x, y }).await?;
        match self.next_reply().await? {
            Reply::GetCell { cell } => Ok(cell),
            other => bail!("unexpected reply to get: {other:?}"),
        }
    }

    /// Query terminal size and color mode.
    pub async fn screen(&mut self, id: LayerId) -> Result<(i32, i32, OutputMode)> {
        self.send(&Request::Screen { id }).await?;
        match self.next_reply().await? {
            Reply::Screen {
                width,
                height,
                mode,
            } => Ok((width, height, mode)),
            other => bail!("unexpected reply to screen: {other:?}"),
        }
    }

    /// Blend one cell into a window's canvas. Hides the window until the
    /// next [`Connection::render`].
    pub async fn draw(&mut self, id: LayerId, x: i32, y: i32, cell: Cell) -> Result<()> {
        self.send(&Request::Draw { id, x, y, cell }).await
    }

    /// Overwrite the whole canvas with a column-major cell run whose
    /// dimensions must match the window exactly.
    pub async fn draw_fill(
        &mut self,
        id: LayerId,
        width: i32,
        height: i32,
        cells: Vec<Cell>,
    ) -> Result<()> {
        self.send(&Request::DrawFill {
            id,
            width,
            height,
            cells,
        })
        .await
    }

    /// Make the window visible and composite the screen.
    pub async fn render(&mut self, id: LayerId) -> Result<()> {
        self.send(&Request::Render { id }).await
    }

    /// Re-allocate the canvas; contents are lost.
    pub async fn resize(&mut self, id: LayerId, width: i32, height: i32) -> Result<()> {
        self.send(&Request::Resize { id, width, height }).await
    }

    /// Translate the window by a relative offset.
    pub async fn move_by(&mut self, id: LayerId, dx: i32, dy: i32) -> Result<()> {
        self.send(&Request::Move { id, dx, dy }).await
    }

    /// Raise the window within its stratum and select it.
    pub async fn focus(&mut self, id: LayerId) -> Result<()> {
        self.send(&Request::Focus { id }).await
    }

    /// Give up the selection if this window holds it.
    pub async fn unfocus(&mut self, id: LayerId) -> Result<()> {
        self.send(&Request::Unfocus { id }).await
    }

    /// Remove the window.
    pub async fn delete(&mut self, id: LayerId) -> Result<()> {
        self.send(&Request::Delete { id }).await
    }

    /// Next dispatched input event addressed to one of this client's
    /// windows.
    pub async fn next_event(&mut self) -> Result<EventMsg> {
        self.events
            .recv()
            .await
            .context("server closed the connection")
    }

    /// Next receipt acknowledgement. The server acks every mutator
    /// (draw/render/resize/move/focus/unfocus/delete) on receipt, before
    /// processing it.
    pub async fn next_ack(&mut self) -> Result<LayerId> {
        self.acks
            .recv()
            .await
            .context("server closed the connection")
    }

    async fn next_reply(&mut self) -> Result<Reply> {
        self.replies
            .recv()
            .await
            .context("server closed the connection")
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        write_frame(&mut self.writer, &request.encode())
            .await
            .context("request write failed")
    }
}
