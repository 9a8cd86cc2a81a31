//! Terminal backend abstraction.
//!
//! The compositor renders onto a cell grid and consumes input events
//! through these traits. The real implementation drives the controlling
//! terminal via crossterm; the memory implementation backs tests and
//! headless runs.

mod crossterm;
mod memory;

pub use self::crossterm::CrosstermBackend;
pub use self::memory::{MemoryBackend, MemoryHandle};

use std::time::Duration;

use anyhow::Result;
use strata_ipc::{Cell, InputEvent, OutputMode};

/// Blocking source of terminal input, polled from a dedicated task.
pub trait EventSource: Send {
    /// Wait up to `timeout` for the next event. Returns
    /// [`InputEvent::None`] when the timeout elapses quietly.
    fn poll_event(&mut self, timeout: Duration) -> Result<InputEvent>;
}

/// A cell grid the compositor composes onto.
///
/// `get_cell` reads back what has been composed since the last `clear`,
/// which is what makes painter's-algorithm blending work: each layer blends
/// over the accumulated result.
pub trait TerminalBackend: Send {
    /// Current grid size in cells.
    fn size(&self) -> (i32, i32);

    /// Reset every cell to the given colors. Also the point where the grid
    /// adopts a new terminal size after a resize.
    fn clear(&mut self, fg: u32, bg: u32);

    /// Read a composed cell. Out-of-range coordinates yield a blank cell.
    fn get_cell(&self, x: i32, y: i32) -> Cell;

    /// Write a composed cell. Out-of-range coordinates are ignored.
    fn set_cell(&mut self, x: i32, y: i32, cell: Cell);

    /// Present the composed grid.
    fn flush(&mut self) -> Result<()>;

    fn output_mode(&self) -> OutputMode;

    /// Hand out the input event source. Called once at startup.
    fn events(&mut self) -> Result<Box<dyn EventSource>>;
}
