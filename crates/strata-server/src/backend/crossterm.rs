//! Real terminal backend on crossterm.
//!
//! Keeps a front buffer of composed cells so `get_cell` can read back the
//! accumulated blend, and repaints the buffer on flush. Raw mode, the
//! alternate screen and mouse capture are claimed on construction and
//! released on drop.

use std::io::{self, Stdout, Write};
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::cursor::{Hide, MoveTo, Show};
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyEventKind,
    KeyModifiers, MouseButton, MouseEvent, MouseEventKind,
};
use crossterm::style::{
    Attribute, Attributes, Color, Print, SetAttribute, SetAttributes, SetBackgroundColor,
    SetForegroundColor,
};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{execute, queue};
use strata_ipc::{
    rgb_channels, Cell, InputEvent, Key, OutputMode, ATTR_BOLD, ATTR_ITALIC, ATTR_REVERSE,
    ATTR_UNDERLINE, MOD_ALT, MOD_CTRL, MOD_SHIFT,
};

use super::{EventSource, TerminalBackend};

pub struct CrosstermBackend {
    out: Stdout,
    width: i32,
    height: i32,
    cells: Vec<Cell>,
    events_taken: bool,
}

impl CrosstermBackend {
    pub fn new() -> Result<Self> {
        terminal::enable_raw_mode().context("failed to enable raw mode")?;
        let mut out = io::stdout();
        execute!(out, EnterAlternateScreen, EnableMouseCapture, Hide)
            .context("failed to claim terminal")?;
        let (width, height) = terminal::size().context("failed to query terminal size")?;
        let (width, height) = (width as i32, height as i32);
        Ok(Self {
            out,
            width,
            height,
            cells: vec![Cell::default(); (width * height) as usize],
            events_taken: false,
        })
    }

    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return None;
        }
        Some((y * self.width + x) as usize)
    }
}

impl TerminalBackend for CrosstermBackend {
    fn size(&self) -> (i32, i32) {
        terminal::size()
            .map(|(w, h)| (w as i32, h as i32))
            .unwrap_or((self.width, self.height))
    }

    fn clear(&mut self, fg: u32, bg: u32) {
        // Adopt the live terminal size here so a resize takes effect at the
        // next full render.
        let (width, height) = self.size();
        self.width = width;
        self.height = height;
        let blank = Cell {
            ch: 0,
            fg,
            bg,
            attr: 0,
        };
        self.cells = vec![blank; (width * height) as usize];
    }

    fn get_cell(&self, x: i32, y: i32) -> Cell {
        self.index(x, y).map(|i| self.cells[i]).unwrap_or_default()
    }

    fn set_cell(&mut self, x: i32, y: i32, cell: Cell) {
        if let Some(i) = self.index(x, y) {
            self.cells[i] = cell;
        }
    }

    fn flush(&mut self) -> Result<()> {
        for y in 0..self.height {
            queue!(self.out, MoveTo(0, y as u16))?;
            for x in 0..self.width {
                let cell = self.cells[(y * self.width + x) as usize];
                queue!(
                    self.out,
                    SetAttribute(Attribute::Reset),
                    SetForegroundColor(color(cell.fg)),
                    SetBackgroundColor(color(cell.bg)),
                    SetAttributes(attributes(cell.attr)),
                    Print(cell.glyph().unwrap_or(' '))
                )?;
            }
        }
        self.out.flush().context("terminal write failed")?;
        Ok(())
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Rgb
    }

    fn events(&mut self) -> Result<Box<dyn EventSource>> {
        if self.events_taken {
            anyhow::bail!("event source already taken");
        }
        self.events_taken = true;
        Ok(Box::new(CrosstermEvents))
    }
}

impl Drop for CrosstermBackend {
    fn drop(&mut self) {
        let _ = execute!(self.out, Show, DisableMouseCapture, LeaveAlternateScreen);
        let _ = terminal::disable_raw_mode();
    }
}

fn color(c: u32) -> Color {
    match rgb_channels(c) {
        Some((r, g, b)) => Color::Rgb { r, g, b },
        None => Color::Reset,
    }
}

fn attributes(mask: u16) -> Attributes {
    let mut attrs = Attributes::default();
    if mask & ATTR_BOLD != 0 {
        attrs.set(Attribute::Bold);
    }
    if mask & ATTR_UNDERLINE != 0 {
        attrs.set(Attribute::Underlined);
    }
    if mask & ATTR_REVERSE != 0 {
        attrs.set(Attribute::Reverse);
    }
    if mask & ATTR_ITALIC != 0 {
        attrs.set(Attribute::Italic);
    }
    attrs
}

/// Input side of the crossterm backend. Event reading in crossterm is
/// process-global, so this carries no state of its own.
struct CrosstermEvents;

impl EventSource for CrosstermEvents {
    fn poll_event(&mut self, timeout: Duration) -> Result<InputEvent> {
        if !event::poll(timeout).context("terminal event poll failed")? {
            return Ok(InputEvent::None);
        }
        let event = match event::read().context("terminal event read failed")? {
            Event::Key(key) if key.kind != KeyEventKind::Release => translate_key(key),
            Event::Mouse(mouse) => translate_mouse(mouse),
            Event::Resize(_, _) => InputEvent::Resize,
            _ => InputEvent::None,
        };
        Ok(event)
    }
}

fn translate_key(key: KeyEvent) -> InputEvent {
    let mut modifier = 0u8;
    if key.modifiers.contains(KeyModifiers::ALT) {
        modifier |= MOD_ALT;
    }
    if key.modifiers.contains(KeyModifiers::CONTROL) {
        modifier |= MOD_CTRL;
    }
    if key.modifiers.contains(KeyModifiers::SHIFT) {
        modifier |= MOD_SHIFT;
    }

    let (key, ch) = match key.code {
        KeyCode::Char(c) => (Key::None, c),
        KeyCode::Enter => (Key::Enter, '\0'),
        KeyCode::Esc => (Key::Esc, '\0'),
        KeyCode::Backspace => (Key::Backspace, '\0'),
        KeyCode::Tab => (Key::Tab, '\0'),
        KeyCode::BackTab => (Key::BackTab, '\0'),
        KeyCode::Delete => (Key::Delete, '\0'),
        KeyCode::Insert => (Key::Insert, '\0'),
        KeyCode::Home => (Key::Home, '\0'),
        KeyCode::End => (Key::End, '\0'),
        KeyCode::PageUp => (Key::PageUp, '\0'),
        KeyCode::PageDown => (Key::PageDown, '\0'),
        KeyCode::Up => (Key::Up, '\0'),
        KeyCode::Down => (Key::Down, '\0'),
        KeyCode::Left => (Key::Left, '\0'),
        KeyCode::Right => (Key::Right, '\0'),
        KeyCode::F(n) => (Key::F(n), '\0'),
        _ => return InputEvent::None,
    };
    InputEvent::Key { key, ch, modifier }
}

fn translate_mouse(mouse: MouseEvent) -> InputEvent {
    let key = match mouse.kind {
        MouseEventKind::Down(button) | MouseEventKind::Drag(button) => match button {
            MouseButton::Left => Key::MouseLeft,
            MouseButton::Middle => Key::MouseMiddle,
            MouseButton::Right => Key::MouseRight,
        },
        MouseEventKind::Up(_) => Key::MouseRelease,
        MouseEventKind::ScrollUp => Key::MouseWheelUp,
        MouseEventKind::ScrollDown => Key::MouseWheelDown,
        _ => return InputEvent::None,
    };
    InputEvent::Mouse {
        key,
        x: mouse.column as i32,
        y: mouse.row as i32,
    }
}
