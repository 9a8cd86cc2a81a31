//! Strata IPC protocol
//!
//! Shared wire types for communication between the `strata-server`
//! compositor daemon and its client applications.
//!
//! Every message is one length-prefixed frame (see [`frame`]) whose first
//! byte is a tag identifying the message kind; the remainder is the
//! tag-specific payload with all multi-byte integers little-endian. The only
//! unframed traffic is the connect handshake: the client's pid word and the
//! server's literal `READY`.

mod cell;
mod event;
pub mod frame;

pub use cell::{
    rgb, rgb_channels, Cell, ATTR_BOLD, ATTR_ITALIC, ATTR_REVERSE, ATTR_UNDERLINE, CELL_WIRE_LEN,
    COLOR_DEFAULT,
};
pub use event::{
    EventMsg, InputEvent, Key, EVENT_WIRE_LEN, MOD_ALT, MOD_CTRL, MOD_SHIFT,
};

use bytes::{Buf, BufMut};
use thiserror::Error;

/// Server-assigned window identifier. `0` is the "no focus" sentinel and is
/// never issued for a real window.
pub type LayerId = u32;

/// Client identifier: the pid the client reports at connect time.
pub type ClientId = u32;

/// The handshake bytes the server writes once a client's handler is
/// registered and ready for framed traffic.
pub const READY: &[u8] = b"READY";

/// Default socket path for the strata server.
pub fn socket_path() -> std::path::PathBuf {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR")
        .unwrap_or_else(|_| format!("/run/user/{}", unsafe { libc::getuid() }));
    std::path::PathBuf::from(runtime_dir).join("strata.sock")
}

// Message tags (frame byte 0).
const TAG_NEW_WINDOW: u8 = 0x01;
const TAG_REPLY_CREATION: u8 = 0x02;
const TAG_GET: u8 = 0x03;
const TAG_REPLY_GET: u8 = 0x04;
const TAG_DRAW: u8 = 0x05;
const TAG_DRAW_FILL: u8 = 0x06;
const TAG_RENDER: u8 = 0x07;
const TAG_RESIZE: u8 = 0x08;
const TAG_MOVE: u8 = 0x09;
const TAG_FOCUS: u8 = 0x0A;
const TAG_UNFOCUS: u8 = 0x0B;
const TAG_DELETE: u8 = 0x0C;
const TAG_SCREEN: u8 = 0x0D;
const TAG_REPLY_SCREEN: u8 = 0x0E;
const TAG_EVENT: u8 = 0x0F;
const TAG_ACK: u8 = 0x10;

/// Decode failure: the frame is dropped, the connection survives.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown message tag {0:#04x}")]
    UnknownTag(u8),
    #[error("truncated {0} payload")]
    Truncated(&'static str),
    #[error("invalid {field} value {value}")]
    BadValue { field: &'static str, value: u32 },
}

/// Stacking stratum of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WindowAttr {
    /// Ordinary window: raised to the front of the normal stratum on focus.
    #[default]
    Normal,
    /// Pinned beneath every normal window regardless of focus.
    Bottom,
}

impl WindowAttr {
    fn to_wire(self) -> u8 {
        match self {
            WindowAttr::Normal => 0,
            WindowAttr::Bottom => 1,
        }
    }

    fn from_wire(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(WindowAttr::Normal),
            1 => Ok(WindowAttr::Bottom),
            other => Err(DecodeError::BadValue {
                field: "window attr",
                value: other as u32,
            }),
        }
    }
}

/// Terminal color depth reported in `Reply::Screen`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Normal,
    Color256,
    Rgb,
}

impl OutputMode {
    fn to_wire(self) -> u8 {
        match self {
            OutputMode::Normal => 0,
            OutputMode::Color256 => 1,
            OutputMode::Rgb => 2,
        }
    }

    fn from_wire(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(OutputMode::Normal),
            1 => Ok(OutputMode::Color256),
            2 => Ok(OutputMode::Rgb),
            other => Err(DecodeError::BadValue {
                field: "output mode",
                value: other as u32,
            }),
        }
    }
}

// ============================================================================
// Client → Server requests
// ============================================================================

/// Requests a client sends to the compositor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Create a window; answered with `Reply::Creation`.
    NewWindow {
        pid: ClientId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        attr: WindowAttr,
    },
    /// Read one canvas cell back; answered with `Reply::GetCell`.
    Get { id: LayerId, x: i32, y: i32 },
    /// Blend one cell into the canvas.
    Draw {
        id: LayerId,
        x: i32,
        y: i32,
        cell: Cell,
    },
    /// Overwrite the whole canvas. `cells` is column-major (`x * height + y`)
    /// and must match the layer's current dimensions exactly.
    DrawFill {
        id: LayerId,
        width: i32,
        height: i32,
        cells: Vec<Cell>,
    },
    /// Mark the layer visible and composite the screen.
    Render { id: LayerId },
    /// Re-allocate the canvas; contents are lost.
    Resize {
        id: LayerId,
        width: i32,
        height: i32,
    },
    /// Translate the layer by a relative offset.
    Move { id: LayerId, dx: i32, dy: i32 },
    /// Raise within the layer's stratum and select it.
    Focus { id: LayerId },
    /// Drop the selection if this layer holds it.
    Unfocus { id: LayerId },
    /// Remove the layer.
    Delete { id: LayerId },
    /// Query screen size and color mode; answered with `Reply::Screen` to
    /// the owner of `id`.
    Screen { id: LayerId },
}

impl Request {
    /// The id the client handler acknowledges immediately on receipt, for
    /// the fire-and-forget mutators. Requests that get a real reply from the
    /// compositor return `None`.
    pub fn ack_id(&self) -> Option<LayerId> {
        match *self {
            Request::Draw { id, .. }
            | Request::DrawFill { id, .. }
            | Request::Render { id }
            | Request::Resize { id, .. }
            | Request::Move { id, .. }
            | Request::Focus { id }
            | Request::Unfocus { id }
            | Request::Delete { id } => Some(id),
            Request::NewWindow { .. } | Request::Get { .. } | Request::Screen { .. } => None,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        match self {
            Request::NewWindow {
                pid,
                x,
                y,
                width,
                height,
                attr,
            } => {
                buf.put_u8(TAG_NEW_WINDOW);
                buf.put_u32_le(*pid);
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
                buf.put_i32_le(*width);
                buf.put_i32_le(*height);
                buf.put_u8(attr.to_wire());
            }
            Request::Get { id, x, y } => {
                buf.put_u8(TAG_GET);
                buf.put_u32_le(*id);
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
            }
            Request::Draw { id, x, y, cell } => {
                buf.put_u8(TAG_DRAW);
                buf.put_u32_le(*id);
                buf.put_i32_le(*x);
                buf.put_i32_le(*y);
                cell.encode_to(&mut buf);
            }
            Request::DrawFill {
                id,
                width,
                height,
                cells,
            } => {
                buf.reserve(13 + cells.len() * CELL_WIRE_LEN);
                buf.put_u8(TAG_DRAW_FILL);
                buf.put_u32_le(*id);
                buf.put_i32_le(*width);
                buf.put_i32_le(*height);
                for cell in cells {
                    cell.encode_to(&mut buf);
                }
            }
            Request::Render { id } => {
                buf.put_u8(TAG_RENDER);
                buf.put_u32_le(*id);
            }
            Request::Resize { id, width, height } => {
                buf.put_u8(TAG_RESIZE);
                buf.put_u32_le(*id);
                buf.put_i32_le(*width);
                buf.put_i32_le(*height);
            }
            Request::Move { id, dx, dy } => {
                buf.put_u8(TAG_MOVE);
                buf.put_u32_le(*id);
                buf.put_i32_le(*dx);
                buf.put_i32_le(*dy);
            }
            Request::Focus { id } => {
                buf.put_u8(TAG_FOCUS);
                buf.put_u32_le(*id);
            }
            Request::Unfocus { id } => {
                buf.put_u8(TAG_UNFOCUS);
                buf.put_u32_le(*id);
            }
            Request::Delete { id } => {
                buf.put_u8(TAG_DELETE);
                buf.put_u32_le(*id);
            }
            Request::Screen { id } => {
                buf.put_u8(TAG_SCREEN);
                buf.put_u32_le(*id);
            }
        }
        buf
    }

    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = frame;
        let tag = take_tag(&mut buf)?;
        match tag {
            TAG_NEW_WINDOW => {
                need(&buf, 21, "new_window")?;
                let pid = buf.get_u32_le();
                let x = buf.get_i32_le();
                let y = buf.get_i32_le();
                let width = buf.get_i32_le();
                let height = buf.get_i32_le();
                let attr = WindowAttr::from_wire(buf.get_u8())?;
                check_dims(width, height)?;
                Ok(Request::NewWindow {
                    pid,
                    x,
                    y,
                    width,
                    height,
                    attr,
                })
            }
            TAG_GET => {
                need(&buf, 12, "get")?;
                Ok(Request::Get {
                    id: buf.get_u32_le(),
                    x: buf.get_i32_le(),
                    y: buf.get_i32_le(),
                })
            }
            TAG_DRAW => {
                need(&buf, 12 + CELL_WIRE_LEN, "draw")?;
                Ok(Request::Draw {
                    id: buf.get_u32_le(),
                    x: buf.get_i32_le(),
                    y: buf.get_i32_le(),
                    cell: Cell::decode_from(&mut buf)?,
                })
            }
            TAG_DRAW_FILL => {
                need(&buf, 12, "draw_fill")?;
                let id = buf.get_u32_le();
                let width = buf.get_i32_le();
                let height = buf.get_i32_le();
                check_dims(width, height)?;
                let count = width as usize * height as usize;
                if buf.remaining() != count * CELL_WIRE_LEN {
                    return Err(DecodeError::Truncated("draw_fill cells"));
                }
                let mut cells = Vec::with_capacity(count);
                for _ in 0..count {
                    cells.push(Cell::decode_from(&mut buf)?);
                }
                Ok(Request::DrawFill {
                    id,
                    width,
                    height,
                    cells,
                })
            }
            TAG_RENDER => Ok(Request::Render { id: take_id(&mut buf)? }),
            TAG_RESIZE => {
                need(&buf, 12, "resize")?;
                let id = buf.get_u32_le();
                let width = buf.get_i32_le();
                let height = buf.get_i32_le();
                check_dims(width, height)?;
                Ok(Request::Resize { id, width, height })
            }
            TAG_MOVE => {
                need(&buf, 12, "move")?;
                Ok(Request::Move {
                    id: buf.get_u32_le(),
                    dx: buf.get_i32_le(),
                    dy: buf.get_i32_le(),
                })
            }
            TAG_FOCUS => Ok(Request::Focus { id: take_id(&mut buf)? }),
            TAG_UNFOCUS => Ok(Request::Unfocus { id: take_id(&mut buf)? }),
            TAG_DELETE => Ok(Request::Delete { id: take_id(&mut buf)? }),
            TAG_SCREEN => Ok(Request::Screen { id: take_id(&mut buf)? }),
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

// ============================================================================
// Server → Client messages
// ============================================================================

/// Replies the compositor (or, for `Ack`, the client handler) sends back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The id assigned by `NewWindow`.
    Creation { id: LayerId },
    /// One canvas cell, answering `Get`.
    GetCell { cell: Cell },
    /// Screen geometry and color mode, answering `Screen`.
    Screen {
        width: i32,
        height: i32,
        mode: OutputMode,
    },
    /// Receipt acknowledgement for a fire-and-forget mutator. Indicates the
    /// request was received, not that it has been processed.
    Ack { id: LayerId },
}

impl Reply {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16);
        match self {
            Reply::Creation { id } => {
                buf.put_u8(TAG_REPLY_CREATION);
                buf.put_u32_le(*id);
            }
            Reply::GetCell { cell } => {
                buf.put_u8(TAG_REPLY_GET);
                cell.encode_to(&mut buf);
            }
            Reply::Screen {
                width,
                height,
                mode,
            } => {
                buf.put_u8(TAG_REPLY_SCREEN);
                buf.put_i32_le(*width);
                buf.put_i32_le(*height);
                buf.put_u8(mode.to_wire());
            }
            Reply::Ack { id } => {
                buf.put_u8(TAG_ACK);
                buf.put_u32_le(*id);
            }
        }
        buf
    }
}

impl EventMsg {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + EVENT_WIRE_LEN);
        buf.put_u8(TAG_EVENT);
        buf.put_u32_le(self.id);
        self.event.encode_to(&mut buf);
        buf
    }
}

/// Any message a client can receive after the handshake.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMsg {
    Reply(Reply),
    Event(EventMsg),
}

impl ServerMsg {
    pub fn decode(frame: &[u8]) -> Result<Self, DecodeError> {
        let mut buf = frame;
        let tag = take_tag(&mut buf)?;
        match tag {
            TAG_REPLY_CREATION => Ok(ServerMsg::Reply(Reply::Creation {
                id: take_id(&mut buf)?,
            })),
            TAG_REPLY_GET => Ok(ServerMsg::Reply(Reply::GetCell {
                cell: Cell::decode_from(&mut buf)?,
            })),
            TAG_REPLY_SCREEN => {
                need(&buf, 9, "reply_screen")?;
                Ok(ServerMsg::Reply(Reply::Screen {
                    width: buf.get_i32_le(),
                    height: buf.get_i32_le(),
                    mode: OutputMode::from_wire(buf.get_u8())?,
                }))
            }
            TAG_ACK => Ok(ServerMsg::Reply(Reply::Ack {
                id: take_id(&mut buf)?,
            })),
            TAG_EVENT => {
                let id = take_id(&mut buf)?;
                let event = InputEvent::decode_from(&mut buf)?;
                Ok(ServerMsg::Event(EventMsg { id, event }))
            }
            other => Err(DecodeError::UnknownTag(other)),
        }
    }
}

fn take_tag(buf: &mut &[u8]) -> Result<u8, DecodeError> {
    if buf.is_empty() {
        return Err(DecodeError::Truncated("tag"));
    }
    Ok(buf.get_u8())
}

fn take_id(buf: &mut &[u8]) -> Result<LayerId, DecodeError> {
    need(buf, 4, "id")?;
    Ok(buf.get_u32_le())
}

fn need(buf: &&[u8], n: usize, what: &'static str) -> Result<(), DecodeError> {
    if buf.remaining() < n {
        return Err(DecodeError::Truncated(what));
    }
    Ok(())
}

fn check_dims(width: i32, height: i32) -> Result<(), DecodeError> {
    if width <= 0 || height <= 0 {
        return Err(DecodeError::BadValue {
            field: "dimensions",
            value: width.min(height) as u32,
        });
    }
    Ok(())
}
