//! Navigation state: a stack of open menus with a circular cursor each.

use crate::errors::{Result, SetupError};
use crate::menu::node::MenuNode;
use std::collections::HashMap;

/// One open menu level
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    pub owner: &'a MenuNode,
    pub selected: usize,
}

impl<'a> Frame<'a> {
    pub fn items(&self) -> &'a [MenuNode] {
        self.owner.children()
    }
}

/// Identity of the menu plus the cursor, not structural equality of nodes.
impl PartialEq for Frame<'_> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.owner, other.owner) && self.selected == other.selected
    }
}

impl Eq for Frame<'_> {}

#[derive(Debug, Clone)]
pub struct NavigationState<'a> {
    frames: Vec<Frame<'a>>,
    cursor_memory: HashMap<&'a str, usize>,
}

/// Cursor memory is a convenience, not part of the position.
impl PartialEq for NavigationState<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.frames == other.frames
    }
}

impl<'a> NavigationState<'a> {
    /// Start at `root`, which must be a submenu with at least one entry.
    pub fn new(root: &'a MenuNode) -> Result<Self> {
        if root.children().is_empty() {
            return Err(SetupError::Config(format!(
                "root menu '{}' has no entries",
                root.key
            )));
        }
        Ok(Self {
            frames: vec![Frame {
                owner: root,
                selected: 0,
            }],
            cursor_memory: HashMap::new(),
        })
    }

    pub fn current(&self) -> &Frame<'a> {
        // `frames` is never empty: `back` refuses to pop the root.
        &self.frames[self.frames.len() - 1]
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn selected_index(&self) -> usize {
        self.current().selected
    }

    pub fn selected_node(&self) -> &'a MenuNode {
        let frame = self.current();
        &frame.items()[frame.selected]
    }

    /// Move by `delta` rows, wrapping at both ends.
    pub fn move_by(&mut self, delta: i64) {
        let last = self.frames.len() - 1;
        let frame = &mut self.frames[last];
        let len = frame.items().len() as i64;
        let next = (frame.selected as i64 + delta).rem_euclid(len);
        frame.selected = next as usize;
    }

    pub fn move_up(&mut self) {
        self.move_by(-1);
    }

    pub fn move_down(&mut self) {
        self.move_by(1);
    }

    /// Open the selected submenu. Returns false for leaves and empty submenus.
    pub fn enter(&mut self) -> bool {
        let node = self.selected_node();
        let len = node.children().len();
        if !node.is_submenu() || len == 0 {
            return false;
        }
        let selected = self
            .cursor_memory
            .get(node.key.as_str())
            .copied()
            .filter(|&i| i < len)
            .unwrap_or(0);
        self.frames.push(Frame {
            owner: node,
            selected,
        });
        true
    }

    /// Close the active submenu. Returns false at the root.
    pub fn back(&mut self) -> bool {
        if self.frames.len() <= 1 {
            return false;
        }
        if let Some(frame) = self.frames.pop() {
            self.cursor_memory
                .insert(frame.owner.key.as_str(), frame.selected);
        }
        true
    }

    /// Labels from the root down to the active menu
    pub fn breadcrumb(&self) -> Vec<&'a str> {
        self.frames.iter().map(|f| f.owner.label.as_str()).collect()
    }
}
