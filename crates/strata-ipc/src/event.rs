//! Input events dispatched from the server to clients.

use bytes::{Buf, BufMut};

use crate::{DecodeError, LayerId};

/// Modifier bits carried alongside key events.
pub const MOD_ALT: u8 = 1 << 0;
pub const MOD_CTRL: u8 = 1 << 1;
pub const MOD_SHIFT: u8 = 1 << 2;

/// A key identity with a protocol-stable 16-bit wire code. Printable
/// characters travel in the event's `ch` field with `Key::None` here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    None,
    MouseLeft,
    MouseMiddle,
    MouseRight,
    MouseRelease,
    MouseWheelUp,
    MouseWheelDown,
    Enter,
    Esc,
    Backspace,
    Tab,
    BackTab,
    Delete,
    Insert,
    Home,
    End,
    PageUp,
    PageDown,
    Up,
    Down,
    Left,
    Right,
    F(u8),
    /// A code this crate does not name; preserved verbatim.
    Raw(u16),
}

impl Key {
    /// True for the mouse-button keys that can start or continue a gesture.
    pub fn is_mouse_button(self) -> bool {
        matches!(self, Key::MouseLeft | Key::MouseMiddle | Key::MouseRight)
    }

    pub fn to_wire(self) -> u16 {
        match self {
            Key::None => 0,
            Key::MouseLeft => 0xFE01,
            Key::MouseMiddle => 0xFE02,
            Key::MouseRight => 0xFE03,
            Key::MouseRelease => 0xFE04,
            Key::MouseWheelUp => 0xFE05,
            Key::MouseWheelDown => 0xFE06,
            Key::Enter => 0xFF01,
            Key::Esc => 0xFF02,
            Key::Backspace => 0xFF03,
            Key::Tab => 0xFF04,
            Key::BackTab => 0xFF05,
            Key::Delete => 0xFF06,
            Key::Insert => 0xFF07,
            Key::Home => 0xFF08,
            Key::End => 0xFF09,
            Key::PageUp => 0xFF0A,
            Key::PageDown => 0xFF0B,
            Key::Up => 0xFF0C,
            Key::Down => 0xFF0D,
            Key::Left => 0xFF0E,
            Key::Right => 0xFF0F,
            Key::F(n) => 0xFD00 | n as u16,
            Key::Raw(v) => v,
        }
    }

    pub fn from_wire(v: u16) -> Key {
        match v {
            0 => Key::None,
            0xFE01 => Key::MouseLeft,
            0xFE02 => Key::MouseMiddle,
            0xFE03 => Key::MouseRight,
            0xFE04 => Key::MouseRelease,
            0xFE05 => Key::MouseWheelUp,
            0xFE06 => Key::MouseWheelDown,
            0xFF01 => Key::Enter,
            0xFF02 => Key::Esc,
            0xFF03 => Key::Backspace,
            0xFF04 => Key::Tab,
            0xFF05 => Key::BackTab,
            0xFF06 => Key::Delete,
            0xFF07 => Key::Insert,
            0xFF08 => Key::Home,
            0xFF09 => Key::End,
            0xFF0A => Key::PageUp,
            0xFF0B => Key::PageDown,
            0xFF0C => Key::Up,
            0xFF0D => Key::Down,
            0xFF0E => Key::Left,
            0xFF0F => Key::Right,
            v if v & 0xFF00 == 0xFD00 => Key::F(v as u8),
            v => Key::Raw(v),
        }
    }
}

/// An input event as produced by the terminal backend and dispatched to
/// clients. Resize carries no payload; clients query `SCREEN` for the new
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    None,
    Key { key: Key, ch: char, modifier: u8 },
    Resize,
    Mouse { key: Key, x: i32, y: i32 },
    Interrupt,
}

const KIND_NONE: u8 = 0;
const KIND_KEY: u8 = 1;
const KIND_RESIZE: u8 = 2;
const KIND_MOUSE: u8 = 3;
const KIND_INTERRUPT: u8 = 4;

/// Encoded size of an input event on the wire.
pub const EVENT_WIRE_LEN: usize = 16;

impl InputEvent {
    /// The mouse-button key of this event, if it is a mouse event.
    pub fn mouse_key(&self) -> Option<Key> {
        match self {
            InputEvent::Mouse { key, .. } => Some(*key),
            _ => None,
        }
    }

    pub(crate) fn encode_to(&self, buf: &mut impl BufMut) {
        let (kind, modifier, key, ch, x, y) = match *self {
            InputEvent::None => (KIND_NONE, 0, Key::None, 0, 0, 0),
            InputEvent::Key { key, ch, modifier } => {
                (KIND_KEY, modifier, key, ch as u32, 0, 0)
            }
            InputEvent::Resize => (KIND_RESIZE, 0, Key::None, 0, 0, 0),
            InputEvent::Mouse { key, x, y } => (KIND_MOUSE, 0, key, 0, x, y),
            InputEvent::Interrupt => (KIND_INTERRUPT, 0, Key::None, 0, 0, 0),
        };
        buf.put_u8(kind);
        buf.put_u8(modifier);
        buf.put_u16_le(key.to_wire());
        buf.put_u32_le(ch);
        buf.put_i32_le(x);
        buf.put_i32_le(y);
    }

    pub(crate) fn decode_from(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if buf.remaining() < EVENT_WIRE_LEN {
            return Err(DecodeError::Truncated("event"));
        }
        let kind = buf.get_u8();
        let modifier = buf.get_u8();
        let key = Key::from_wire(buf.get_u16_le());
        let ch = buf.get_u32_le();
        let x = buf.get_i32_le();
        let y = buf.get_i32_le();
        match kind {
            KIND_NONE => Ok(InputEvent::None),
            KIND_KEY => {
                let ch = char::from_u32(ch).ok_or(DecodeError::BadValue {
                    field: "event char",
                    value: ch,
                })?;
                Ok(InputEvent::Key { key, ch, modifier })
            }
            KIND_RESIZE => Ok(InputEvent::Resize),
            KIND_MOUSE => Ok(InputEvent::Mouse { key, x, y }),
            KIND_INTERRUPT => Ok(InputEvent::Interrupt),
            other => Err(DecodeError::BadValue {
                field: "event kind",
                value: other as u32,
            }),
        }
    }
}

/// The envelope delivered to clients: which of their layers the event is
/// addressed to, plus the event itself with mouse coordinates rewritten to
/// that layer's local space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMsg {
    pub id: LayerId,
    pub event: InputEvent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_wire_codes_roundtrip() {
        for key in [
            Key::None,
            Key::MouseLeft,
            Key::MouseRelease,
            Key::Enter,
            Key::PageDown,
            Key::Right,
            Key::F(7),
            Key::Raw(0x0042),
        ] {
            assert_eq!(Key::from_wire(key.to_wire()), key);
        }
    }

    #[test]
    fn mouse_buttons_classified() {
        assert!(Key::MouseLeft.is_mouse_button());
        assert!(Key::MouseRight.is_mouse_button());
        assert!(!Key::MouseRelease.is_mouse_button());
        assert!(!Key::Enter.is_mouse_button());
    }
}
