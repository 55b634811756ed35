//! Static menu tree

use crate::errors::Result;
use crate::menu::context::ActionContext;
use async_trait::async_trait;
use std::cell::Cell;
use std::rc::Rc;

/// Severity of a status line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Success,
    Warning,
    Error,
}

/// Result of an action, rendered in place below the menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub level: StatusLevel,
    pub summary: String,
    pub detail: Option<String>,
}

impl Status {
    pub fn new(level: StatusLevel, summary: impl Into<String>) -> Self {
        Self {
            level,
            summary: summary.into(),
            detail: None,
        }
    }

    pub fn info(summary: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, summary)
    }

    pub fn success(summary: impl Into<String>) -> Self {
        Self::new(StatusLevel::Success, summary)
    }

    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, summary)
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, summary)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.is_empty() {
            self.detail = Some(detail);
        }
        self
    }
}

/// What the engine does after an action returns
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuResult {
    /// Stay in the menu and show this status
    Message(Status),
    /// Stay in the menu, clear the status line
    Quiet,
    /// Leave the loop normally with this exit code
    Exit(i32),
    /// The environment changed; the process must be relaunched
    Restart,
    /// Unrecoverable; terminate with this exit code
    Fatal(i32),
}

/// Uniform signature for every bound action
#[async_trait(?Send)]
pub trait MenuAction {
    async fn run(&self, ctx: &mut ActionContext<'_>) -> Result<MenuResult>;
}

pub enum NodeKind {
    Submenu(Vec<MenuNode>),
    Toggle(Rc<Cell<bool>>),
    Action(Box<dyn MenuAction>),
}

/// A node is either a submenu or a leaf; `NodeKind` makes that exclusive.
pub struct MenuNode {
    pub key: String,
    pub label: String,
    pub description: String,
    pub kind: NodeKind,
}

impl MenuNode {
    pub fn submenu(key: &str, label: &str, description: &str, children: Vec<MenuNode>) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            kind: NodeKind::Submenu(children),
        }
    }

    pub fn toggle(key: &str, label: &str, description: &str, state: Rc<Cell<bool>>) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            kind: NodeKind::Toggle(state),
        }
    }

    pub fn action(
        key: &str,
        label: &str,
        description: &str,
        action: impl MenuAction + 'static,
    ) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            description: description.to_string(),
            kind: NodeKind::Action(Box::new(action)),
        }
    }

    /// Children of a submenu; empty for leaves
    pub fn children(&self) -> &[MenuNode] {
        match &self.kind {
            NodeKind::Submenu(children) => children,
            _ => &[],
        }
    }

    pub fn is_submenu(&self) -> bool {
        matches!(self.kind, NodeKind::Submenu(_))
    }

    /// Row text as shown in a list
    pub fn display_label(&self) -> String {
        match &self.kind {
            NodeKind::Submenu(_) => format!("{}  ›", self.label),
            NodeKind::Toggle(state) => {
                format!("[{}] {}", if state.get() { "x" } else { " " }, self.label)
            }
            NodeKind::Action(_) => self.label.clone(),
        }
    }
}

impl std::fmt::Debug for MenuNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            NodeKind::Submenu(children) => format!("Submenu({})", children.len()),
            NodeKind::Toggle(state) => format!("Toggle({})", state.get()),
            NodeKind::Action(_) => "Action".to_string(),
        };
        f.debug_struct("MenuNode")
            .field("key", &self.key)
            .field("kind", &kind)
            .finish()
    }
}
