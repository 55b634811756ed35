//! Terminal surface: output writer, input source and renderer together.

use crate::errors::{Result, SetupError};
use crate::menu::input::{InputSource, MenuKey, TerminalInput};
use crate::menu::render::{Line, Renderer};
use crossterm::cursor::{Hide, Show};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use std::io::{self, Write};
use std::time::Duration;

/// Raw mode + alternate screen for as long as the guard lives.
///
/// Dropping the guard restores the terminal, so every exit path (including
/// a relaunch and unwinding panics) leaves the user's shell usable.
pub struct TerminalGuard {
    active: bool,
}

impl TerminalGuard {
    pub fn acquire() -> Result<Self> {
        enable_raw_mode().map_err(|e| SetupError::Terminal(format!("raw mode: {}", e)))?;
        execute!(io::stdout(), EnterAlternateScreen, Hide)
            .map_err(|e| SetupError::Terminal(format!("alternate screen: {}", e)))?;
        Ok(Self { active: true })
    }

    pub fn release(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(e) = execute!(io::stdout(), Show, LeaveAlternateScreen) {
            tracing::warn!(error = %e, "failed to leave alternate screen");
        }
        if let Err(e) = disable_raw_mode() {
            tracing::warn!(error = %e, "failed to disable raw mode");
        }
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum SizeSource {
    Live,
    Fixed((u16, u16)),
}

pub struct Terminal {
    out: Box<dyn Write>,
    input: Box<dyn InputSource>,
    size: SizeSource,
    renderer: Renderer,
}

impl Terminal {
    /// The process terminal (pair with a [`TerminalGuard`])
    pub fn stdout() -> Self {
        Self {
            out: Box::new(io::stdout()),
            input: Box::new(TerminalInput),
            size: SizeSource::Live,
            renderer: Renderer::new(),
        }
    }

    /// A fixed-size surface driven by any input source
    pub fn headless(input: Box<dyn InputSource>, out: Box<dyn Write>, size: (u16, u16)) -> Self {
        Self {
            out,
            input,
            size: SizeSource::Fixed(size),
            renderer: Renderer::new(),
        }
    }

    pub fn size(&self) -> (u16, u16) {
        match self.size {
            SizeSource::Live => crossterm::terminal::size().unwrap_or((80, 24)),
            SizeSource::Fixed(size) => size,
        }
    }

    pub fn draw(&mut self, lines: &[Line]) -> Result<()> {
        let size = self.size();
        self.renderer
            .render(&mut self.out, lines, size)
            .map_err(|e| SetupError::Terminal(format!("render failed: {}", e)))?;
        Ok(())
    }

    pub fn invalidate(&mut self) {
        self.renderer.invalidate();
    }

    pub fn next_key(&mut self) -> Result<MenuKey> {
        let key = self.input.next_key()?;
        if key == MenuKey::Resize {
            self.invalidate();
        }
        Ok(key)
    }

    pub fn poll_key(&mut self, timeout: Duration) -> Result<Option<MenuKey>> {
        let key = self.input.poll_key(timeout)?;
        if key == Some(MenuKey::Resize) {
            self.invalidate();
        }
        Ok(key)
    }
}
