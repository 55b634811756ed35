//! Key input for the menu engine.

use crate::errors::{Result, SetupError};
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use std::collections::VecDeque;
use std::time::Duration;

/// Logical keys the engine understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MenuKey {
    Up,
    Down,
    /// Right arrow: open a submenu
    Open,
    /// Space: open, or toggle inside multi-select lists
    Select,
    /// Enter: confirm / execute
    Confirm,
    /// Esc or Left: go back, cancel
    Back,
    /// Ctrl-C
    Quit,
    /// Terminal was resized
    Resize,
    Other,
}

pub trait InputSource {
    /// Block until the next key
    fn next_key(&mut self) -> Result<MenuKey>;

    /// Wait at most `timeout` for a key
    fn poll_key(&mut self, timeout: Duration) -> Result<Option<MenuKey>>;
}

/// Reads keys from the real terminal
#[derive(Debug, Default)]
pub struct TerminalInput;

impl TerminalInput {
    fn map_event(event: Event) -> Option<MenuKey> {
        match event {
            Event::Key(key) => Self::map_key(key),
            Event::Resize(_, _) => Some(MenuKey::Resize),
            _ => None,
        }
    }

    fn map_key(key: KeyEvent) -> Option<MenuKey> {
        if key.kind == KeyEventKind::Release {
            return None;
        }
        let mapped = match key.code {
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => MenuKey::Quit,
            KeyCode::Up | KeyCode::Char('k') => MenuKey::Up,
            KeyCode::Down | KeyCode::Char('j') => MenuKey::Down,
            KeyCode::Right => MenuKey::Open,
            KeyCode::Char(' ') => MenuKey::Select,
            KeyCode::Enter => MenuKey::Confirm,
            KeyCode::Esc | KeyCode::Left | KeyCode::Backspace => MenuKey::Back,
            _ => MenuKey::Other,
        };
        Some(mapped)
    }
}

fn terminal_error(e: std::io::Error) -> SetupError {
    SetupError::Terminal(format!("failed to read input: {}", e))
}

impl InputSource for TerminalInput {
    fn next_key(&mut self) -> Result<MenuKey> {
        loop {
            if let Some(key) = Self::map_event(event::read().map_err(terminal_error)?) {
                return Ok(key);
            }
        }
    }

    fn poll_key(&mut self, timeout: Duration) -> Result<Option<MenuKey>> {
        if event::poll(timeout).map_err(terminal_error)? {
            Ok(Self::map_event(event::read().map_err(terminal_error)?))
        } else {
            Ok(None)
        }
    }
}

/// Replays a fixed key sequence; used for headless runs and tests.
///
/// Running out of keys is reported as a terminal error so a script that is
/// too short fails loudly instead of hanging.
#[derive(Debug, Default)]
pub struct ScriptedInput {
    keys: VecDeque<MenuKey>,
}

impl ScriptedInput {
    pub fn new(keys: impl IntoIterator<Item = MenuKey>) -> Self {
        Self {
            keys: keys.into_iter().collect(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.keys.len()
    }
}

impl InputSource for ScriptedInput {
    fn next_key(&mut self) -> Result<MenuKey> {
        self.keys
            .pop_front()
            .ok_or_else(|| SetupError::Terminal("input script exhausted".to_string()))
    }

    fn poll_key(&mut self, _timeout: Duration) -> Result<Option<MenuKey>> {
        Ok(self.keys.pop_front())
    }
}
