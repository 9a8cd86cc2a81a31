//! In-memory backend for tests and headless runs.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use strata_ipc::{Cell, InputEvent, OutputMode};

use super::{EventSource, TerminalBackend};

#[derive(Debug)]
struct Grid {
    width: i32,
    height: i32,
    cells: Vec<Cell>,
}

impl Grid {
    fn index(&self, x: i32, y: i32) -> Option<usize> {
        if x < 0 || x >= self.width || y < 0 || y >= self.height {
            return None;
        }
        Some((y * self.width + x) as usize)
    }
}

/// A panicked holder cannot leave the grid torn (every mutation is a whole
/// guard-scoped store), so a poisoned lock is still safe to read through.
fn lock_grid(grid: &Mutex<Grid>) -> MutexGuard<'_, Grid> {
    grid.lock().unwrap_or_else(|e| e.into_inner())
}

/// A [`TerminalBackend`] over a plain in-memory grid. Created together with
/// a [`MemoryHandle`] that can inject input events and inspect the composed
/// cells from outside the compositor.
pub struct MemoryBackend {
    grid: Arc<Mutex<Grid>>,
    events: Option<Receiver<InputEvent>>,
}

impl MemoryBackend {
    pub fn new(width: i32, height: i32) -> (Self, MemoryHandle) {
        let grid = Arc::new(Mutex::new(Grid {
            width,
            height,
            cells: vec![Cell::default(); (width * height) as usize],
        }));
        let (event_tx, event_rx) = mpsc::channel();
        let backend = Self {
            grid: Arc::clone(&grid),
            events: Some(event_rx),
        };
        (backend, MemoryHandle { grid, event_tx })
    }
}

impl TerminalBackend for MemoryBackend {
    fn size(&self) -> (i32, i32) {
        let grid = lock_grid(&self.grid);
        (grid.width, grid.height)
    }

    fn clear(&mut self, fg: u32, bg: u32) {
        let mut grid = lock_grid(&self.grid);
        let blank = Cell {
            ch: 0,
            fg,
            bg,
            attr: 0,
        };
        let len = (grid.width * grid.height) as usize;
        grid.cells = vec![blank; len];
    }

    fn get_cell(&self, x: i32, y: i32) -> Cell {
        let grid = lock_grid(&self.grid);
        grid.index(x, y).map(|i| grid.cells[i]).unwrap_or_default()
    }

    fn set_cell(&mut self, x: i32, y: i32, cell: Cell) {
        let mut grid = lock_grid(&self.grid);
        if let Some(i) = grid.index(x, y) {
            grid.cells[i] = cell;
        }
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    fn output_mode(&self) -> OutputMode {
        OutputMode::Rgb
    }

    fn events(&mut self) -> Result<Box<dyn EventSource>> {
        let rx = self
            .events
            .take()
            .ok_or_else(|| anyhow::anyhow!("event source already taken"))?;
        Ok(Box::new(MemoryEvents { rx }))
    }
}

struct MemoryEvents {
    rx: Receiver<InputEvent>,
}

impl EventSource for MemoryEvents {
    fn poll_event(&mut self, timeout: Duration) -> Result<InputEvent> {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => Ok(event),
            Err(RecvTimeoutError::Timeout) => Ok(InputEvent::None),
            // All handles gone: nothing will ever arrive again.
            Err(RecvTimeoutError::Disconnected) => Ok(InputEvent::None),
        }
    }
}

/// Out-of-band handle to a [`MemoryBackend`]: event injection and cell
/// inspection for tests.
#[derive(Clone)]
pub struct MemoryHandle {
    grid: Arc<Mutex<Grid>>,
    event_tx: Sender<InputEvent>,
}

impl MemoryHandle {
    pub fn inject(&self, event: InputEvent) {
        let _ = self.event_tx.send(event);
    }

    pub fn cell(&self, x: i32, y: i32) -> Cell {
        let grid = lock_grid(&self.grid);
        grid.index(x, y).map(|i| grid.cells[i]).unwrap_or_default()
    }

    /// Change the emulated terminal size. Follow with an injected
    /// [`InputEvent::Resize`] so the compositor picks it up.
    pub fn set_size(&self, width: i32, height: i32) {
        let mut grid = lock_grid(&self.grid);
        grid.width = width;
        grid.height = height;
        grid.cells = vec![Cell::default(); (width * height) as usize];
    }

    /// The glyphs of row `y` as a string, blanks as spaces.
    pub fn row_text(&self, y: i32) -> String {
        let grid = lock_grid(&self.grid);
        (0..grid.width)
            .map(|x| {
                grid.index(x, y)
                    .map(|i| grid.cells[i])
                    .and_then(|c| c.glyph())
                    .unwrap_or(' ')
            })
            .collect()
    }
}
