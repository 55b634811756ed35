//! Menu engine
//!
//! A cooperative, single-threaded loop over a static [`MenuNode`] tree:
//! render the active frame, block on one key, dispatch it. Actions run to
//! completion inside the loop; their failures and panics are caught at the
//! dispatch boundary and shown as an inline status.

pub mod context;
pub mod input;
pub mod navigation;
pub mod node;
pub mod render;
pub mod terminal;

pub use context::ActionContext;
pub use input::{InputSource, MenuKey, ScriptedInput, TerminalInput};
pub use navigation::{Frame, NavigationState};
pub use node::{MenuAction, MenuNode, MenuResult, NodeKind, Status, StatusLevel};
pub use render::{Line, LineStyle, Renderer, Viewport};
pub use terminal::{Terminal, TerminalGuard};

use crate::errors::Result;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;

/// Exit code used when the user presses Ctrl-C
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

const MENU_HINT: &str = "↑/↓ move · →/Space open · Enter run · Esc back";

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineOutcome {
    Exit(i32),
    /// The caller must relaunch the process
    Restart,
}

enum Flow {
    Continue,
    Stop(EngineOutcome),
}

pub struct Engine {
    terminal: Terminal,
    title: String,
    status: Option<Status>,
    exit_code: i32,
}

impl Engine {
    pub fn new(terminal: Terminal, title: &str) -> Self {
        Self {
            terminal,
            title: title.to_string(),
            status: None,
            exit_code: 0,
        }
    }

    /// Status line currently shown under the menu
    pub fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    pub async fn run(&mut self, root: &MenuNode) -> Result<EngineOutcome> {
        let mut nav = NavigationState::new(root)?;
        self.terminal.invalidate();

        loop {
            self.draw(&nav)?;

            match self.terminal.next_key()? {
                MenuKey::Up => nav.move_up(),
                MenuKey::Down => nav.move_down(),
                MenuKey::Open | MenuKey::Select | MenuKey::Confirm => {
                    if let Flow::Stop(outcome) = self.activate(&mut nav).await {
                        return Ok(outcome);
                    }
                }
                MenuKey::Back => {
                    if !nav.back() {
                        return Ok(EngineOutcome::Exit(self.exit_code));
                    }
                    self.status = None;
                }
                MenuKey::Quit => return Ok(EngineOutcome::Exit(INTERRUPTED_EXIT_CODE)),
                MenuKey::Resize | MenuKey::Other => {}
            }
        }
    }

    async fn activate<'a>(&mut self, nav: &mut NavigationState<'a>) -> Flow {
        let node = nav.selected_node();
        match &node.kind {
            NodeKind::Submenu(_) => {
                if nav.enter() {
                    self.status = None;
                }
                Flow::Continue
            }
            NodeKind::Toggle(state) => {
                state.set(!state.get());
                let word = if state.get() { "on" } else { "off" };
                self.status = Some(Status::info(format!("{}: {}", node.label, word)));
                Flow::Continue
            }
            NodeKind::Action(action) => self.dispatch(node, action.as_ref()).await,
        }
    }

    async fn dispatch(&mut self, node: &MenuNode, action: &dyn MenuAction) -> Flow {
        tracing::info!(action = %node.key, "running menu action");
        let result = {
            let mut ctx = ActionContext::new(&mut self.terminal, &node.label);
            AssertUnwindSafe(action.run(&mut ctx)).catch_unwind().await
        };
        // Actions draw their own screens; repaint the menu from scratch.
        self.terminal.invalidate();

        match result {
            Ok(Ok(MenuResult::Message(status))) => {
                if status.level == StatusLevel::Error {
                    self.exit_code = 1;
                }
                self.status = Some(status);
            }
            Ok(Ok(MenuResult::Quiet)) => self.status = None,
            Ok(Ok(MenuResult::Exit(code))) => return Flow::Stop(EngineOutcome::Exit(code)),
            Ok(Ok(MenuResult::Restart)) => {
                tracing::info!(action = %node.key, "action requested restart");
                return Flow::Stop(EngineOutcome::Restart);
            }
            Ok(Ok(MenuResult::Fatal(code))) => {
                tracing::error!(action = %node.key, code, "action reported a fatal condition");
                return Flow::Stop(EngineOutcome::Exit(code));
            }
            Ok(Err(e)) => {
                tracing::warn!(action = %node.key, error = %e, "menu action failed");
                self.exit_code = 1;
                self.status =
                    Some(Status::error(format!("{} failed", node.label)).with_detail(e.to_string()));
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(action = %node.key, panic = %message, "menu action panicked");
                self.exit_code = 1;
                self.status = Some(
                    Status::error(format!("{} crashed", node.label)).with_detail(message),
                );
            }
        }
        Flow::Continue
    }

    fn draw(&mut self, nav: &NavigationState<'_>) -> Result<()> {
        let frame = nav.current();
        let items: Vec<String> = frame.items().iter().map(MenuNode::display_label).collect();
        let height = self.terminal.size().1;

        let mut lines = vec![
            Line::new(format!(" {} ", self.title), LineStyle::Title),
            Line::new(format!(" {}", nav.breadcrumb().join(" › ")), LineStyle::Dim),
            Line::blank(),
        ];
        lines.extend(render::list_lines(&items, frame.selected, render::list_rows(height)));
        lines.push(Line::blank());

        let description = &nav.selected_node().description;
        if !description.is_empty() {
            lines.push(Line::new(format!(" Description: {}", description), LineStyle::Dim));
        }
        if let Some(status) = &self.status {
            lines.extend(status_lines(status));
        }
        lines.push(Line::new(MENU_HINT, LineStyle::Dim));

        self.terminal.draw(&lines)
    }
}

fn status_lines(status: &Status) -> Vec<Line> {
    let (symbol, style) = match status.level {
        StatusLevel::Info => ("•", LineStyle::Normal),
        StatusLevel::Success => ("✓", LineStyle::Success),
        StatusLevel::Warning => ("⚠", LineStyle::Warning),
        StatusLevel::Error => ("✗", LineStyle::Error),
    };
    let mut lines = vec![Line::new(format!(" {} {}", symbol, status.summary), style)];
    if let Some(detail) = &status.detail {
        lines.extend(detail.lines().take(3).map(|l| Line::new(format!("   {}", l), LineStyle::Dim)));
    }
    lines
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
