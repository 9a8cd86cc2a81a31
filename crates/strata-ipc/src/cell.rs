//! Attributed display cells and the compositing blend.

use bytes::{Buf, BufMut};

use crate::DecodeError;

/// Sentinel for "no color": the terminal default, treated as transparent by
/// the blend.
pub const COLOR_DEFAULT: u32 = 0;

/// Marker bit distinguishing an encoded RGB color from [`COLOR_DEFAULT`].
const COLOR_RGB_BIT: u32 = 0x0100_0000;

/// Pack an RGB triple into a cell color.
pub fn rgb(r: u8, g: u8, b: u8) -> u32 {
    COLOR_RGB_BIT | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Unpack a color produced by [`rgb`]. Returns `None` for the default color.
pub fn rgb_channels(color: u32) -> Option<(u8, u8, u8)> {
    if color & COLOR_RGB_BIT == 0 {
        return None;
    }
    Some(((color >> 16) as u8, (color >> 8) as u8, color as u8))
}

/// Style attribute bits carried in [`Cell::attr`].
pub const ATTR_BOLD: u16 = 1 << 0;
pub const ATTR_UNDERLINE: u16 = 1 << 1;
pub const ATTR_REVERSE: u16 = 1 << 2;
pub const ATTR_ITALIC: u16 = 1 << 3;

/// One display unit: a glyph codepoint plus foreground, background and a
/// style mask. `ch == 0` means "no glyph" and composes as transparent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Cell {
    pub ch: u32,
    pub fg: u32,
    pub bg: u32,
    pub attr: u16,
}

/// Encoded size of a cell on the wire.
pub const CELL_WIRE_LEN: usize = 14;

impl Cell {
    pub fn new(ch: char, fg: u32, bg: u32) -> Self {
        Self {
            ch: ch as u32,
            fg,
            bg,
            attr: 0,
        }
    }

    pub fn glyph(&self) -> Option<char> {
        if self.ch == 0 {
            None
        } else {
            char::from_u32(self.ch)
        }
    }

    /// True when the cell contributes nothing to a blend.
    pub fn is_blank(&self) -> bool {
        self.ch == 0 && self.fg == COLOR_DEFAULT && self.bg == COLOR_DEFAULT
    }

    /// Painter's-algorithm blend: `self` composited over `under`.
    ///
    /// The upper glyph wins when present and brings its style mask with it;
    /// each color independently falls through to `under` when the upper side
    /// is the default. Both ends of the wire rely on these exact semantics.
    pub fn over(self, under: Cell) -> Cell {
        let (ch, attr) = if self.ch != 0 {
            (self.ch, self.attr)
        } else {
            (under.ch, under.attr)
        };
        Cell {
            ch,
            attr,
            fg: if self.fg != COLOR_DEFAULT { self.fg } else { under.fg },
            bg: if self.bg != COLOR_DEFAULT { self.bg } else { under.bg },
        }
    }

    pub(crate) fn encode_to(&self, buf: &mut impl BufMut) {
        buf.put_u32_le(self.ch);
        buf.put_u32_le(self.fg);
        buf.put_u32_le(self.bg);
        buf.put_u16_le(self.attr);
    }

    pub(crate) fn decode_from(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if buf.remaining() < CELL_WIRE_LEN {
            return Err(DecodeError::Truncated("cell"));
        }
        Ok(Cell {
            ch: buf.get_u32_le(),
            fg: buf.get_u32_le(),
            bg: buf.get_u32_le(),
            attr: buf.get_u16_le(),
        })
    }
}
