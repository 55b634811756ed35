//! Modal interactions available to a running action.
//!
//! Actions borrow the engine's terminal for their duration. Everything here
//! draws through the same diffing renderer, so long operations update a
//! progress row in place instead of scrolling the screen.

use crate::errors::Result;
use crate::menu::input::MenuKey;
use crate::menu::render::{list_lines, list_rows, progress_bar, Line, LineStyle};
use crate::menu::terminal::Terminal;
use std::time::Duration;

const PICK_HINT: &str = "↑/↓ move · Enter select · Esc cancel";
const MULTI_HINT: &str = "↑/↓ move · Space toggle · Enter apply · Esc cancel";
const PAGE_HINT: &str = "↑/↓ scroll · any other key to return";

pub struct ActionContext<'t> {
    term: &'t mut Terminal,
    title: String,
}

impl<'t> ActionContext<'t> {
    pub fn new(term: &'t mut Terminal, title: &str) -> Self {
        Self {
            term,
            title: title.to_string(),
        }
    }

    fn header(&self, subtitle: &str) -> Vec<Line> {
        let mut lines = vec![Line::new(format!(" {} ", self.title), LineStyle::Title)];
        if !subtitle.is_empty() {
            lines.push(Line::plain(format!(" {}", subtitle)));
        }
        lines.push(Line::blank());
        lines
    }

    fn visible_rows(&self) -> usize {
        list_rows(self.term.size().1)
    }

    /// Choose one of `options`. `None` when cancelled.
    pub fn pick(&mut self, prompt: &str, options: &[String], initial: usize) -> Result<Option<usize>> {
        if options.is_empty() {
            return Ok(None);
        }
        let mut selected = initial.min(options.len() - 1);
        loop {
            let mut lines = self.header(prompt);
            lines.extend(list_lines(options, selected, self.visible_rows()));
            lines.push(Line::blank());
            lines.push(Line::new(PICK_HINT, LineStyle::Dim));
            self.term.draw(&lines)?;

            match self.term.next_key()? {
                MenuKey::Up => selected = (selected + options.len() - 1) % options.len(),
                MenuKey::Down => selected = (selected + 1) % options.len(),
                MenuKey::Confirm | MenuKey::Open | MenuKey::Select => return Ok(Some(selected)),
                MenuKey::Back | MenuKey::Quit => return Ok(None),
                MenuKey::Resize | MenuKey::Other => {}
            }
        }
    }

    /// Toggle any subset of `options`. `None` when cancelled; the returned
    /// indices are ascending.
    pub fn multi_pick(
        &mut self,
        prompt: &str,
        options: &[String],
        preselected: &[usize],
    ) -> Result<Option<Vec<usize>>> {
        if options.is_empty() {
            return Ok(Some(Vec::new()));
        }
        let mut checked = vec![false; options.len()];
        for &i in preselected {
            if let Some(slot) = checked.get_mut(i) {
                *slot = true;
            }
        }
        let mut selected = 0;
        loop {
            let rows: Vec<String> = options
                .iter()
                .zip(&checked)
                .map(|(opt, on)| format!("[{}] {}", if *on { "x" } else { " " }, opt))
                .collect();
            let mut lines = self.header(prompt);
            lines.extend(list_lines(&rows, selected, self.visible_rows()));
            lines.push(Line::blank());
            lines.push(Line::new(MULTI_HINT, LineStyle::Dim));
            self.term.draw(&lines)?;

            match self.term.next_key()? {
                MenuKey::Up => selected = (selected + options.len() - 1) % options.len(),
                MenuKey::Down => selected = (selected + 1) % options.len(),
                MenuKey::Select | MenuKey::Open => checked[selected] = !checked[selected],
                MenuKey::Confirm => {
                    return Ok(Some(
                        checked
                            .iter()
                            .enumerate()
                            .filter(|(_, on)| **on)
                            .map(|(i, _)| i)
                            .collect(),
                    ))
                }
                MenuKey::Back | MenuKey::Quit => return Ok(None),
                MenuKey::Resize | MenuKey::Other => {}
            }
        }
    }

    /// Yes/No question. Esc answers No.
    pub fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        let mut yes = default;
        loop {
            let mut lines = self.header("");
            lines.push(Line::new(format!(" {}", question), LineStyle::Warning));
            lines.push(Line::blank());
            for (label, is_yes) in [("Yes", true), ("No", false)] {
                if yes == is_yes {
                    lines.push(Line::new(format!(" ❯ {}", label), LineStyle::Selected));
                } else {
                    lines.push(Line::plain(format!("   {}", label)));
                }
            }
            lines.push(Line::blank());
            lines.push(Line::new(PICK_HINT, LineStyle::Dim));
            self.term.draw(&lines)?;

            match self.term.next_key()? {
                MenuKey::Up | MenuKey::Down => yes = !yes,
                MenuKey::Confirm | MenuKey::Open | MenuKey::Select => return Ok(yes),
                MenuKey::Back | MenuKey::Quit => return Ok(false),
                MenuKey::Resize | MenuKey::Other => {}
            }
        }
    }

    /// Show a scrollable report until a non-scroll key is pressed
    pub fn page(&mut self, subtitle: &str, body: &[Line]) -> Result<()> {
        let mut offset = 0usize;
        loop {
            let rows = self.visible_rows();
            let max_offset = body.len().saturating_sub(rows);
            offset = offset.min(max_offset);

            let mut lines = self.header(subtitle);
            if offset > 0 {
                lines.push(Line::new(format!("   ▲ ({}) ▲", offset), LineStyle::Dim));
            }
            lines.extend(body.iter().skip(offset).take(rows).cloned());
            let below = body.len().saturating_sub(offset + rows);
            if below > 0 {
                lines.push(Line::new(format!("   ▼ ({}) ▼", below), LineStyle::Dim));
            }
            lines.push(Line::blank());
            lines.push(Line::new(PAGE_HINT, LineStyle::Dim));
            self.term.draw(&lines)?;

            match self.term.next_key()? {
                MenuKey::Up => offset = offset.saturating_sub(1),
                MenuKey::Down => offset = (offset + 1).min(max_offset),
                MenuKey::Resize => {}
                _ => return Ok(()),
            }
        }
    }

    /// Replace the screen with a working message (no key wait)
    pub fn notice(&mut self, subtitle: &str, body: &[Line]) -> Result<()> {
        let mut lines = self.header(subtitle);
        lines.extend(body.iter().cloned());
        self.term.draw(&lines)
    }

    /// Progress screen; `fraction` is `None` when the total is unknown
    pub fn progress(&mut self, label: &str, fraction: Option<f64>, detail: &str) -> Result<()> {
        let bar = match fraction {
            Some(f) => progress_bar(30, f),
            None => "[working…]".to_string(),
        };
        let body = [
            Line::plain(format!(" {}", label)),
            Line::plain(format!(" {}", bar)),
            Line::new(format!(" {}", detail), LineStyle::Dim),
            Line::blank(),
            Line::new("Esc to cancel", LineStyle::Dim),
        ];
        self.notice("", &body)
    }

    /// Non-blocking check for Esc / Ctrl-C
    pub fn cancel_requested(&mut self) -> Result<bool> {
        Ok(matches!(
            self.term.poll_key(Duration::ZERO)?,
            Some(MenuKey::Back) | Some(MenuKey::Quit)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::menu::input::ScriptedInput;

    fn terminal(keys: Vec<MenuKey>) -> Terminal {
        Terminal::headless(Box::new(ScriptedInput::new(keys)), Box::new(std::io::sink()), (80, 24))
    }

    fn options() -> Vec<String> {
        vec!["a".to_string(), "b".to_string(), "c".to_string()]
    }

    #[test]
    fn test_pick_wraps_and_selects() {
        let mut term = terminal(vec![MenuKey::Up, MenuKey::Confirm]);
        let mut ctx = ActionContext::new(&mut term, "Pick");
        assert_eq!(ctx.pick("choose", &options(), 0).unwrap(), Some(2));
    }

    #[test]
    fn test_pick_cancel() {
        let mut term = terminal(vec![MenuKey::Down, MenuKey::Back]);
        let mut ctx = ActionContext::new(&mut term, "Pick");
        assert_eq!(ctx.pick("choose", &options(), 0).unwrap(), None);
    }

    #[test]
    fn test_multi_pick_toggles() {
        let mut term = terminal(vec![
            MenuKey::Select,
            MenuKey::Down,
            MenuKey::Down,
            MenuKey::Select,
            MenuKey::Up,
            MenuKey::Up,
            MenuKey::Select,
            MenuKey::Confirm,
        ]);
        let mut ctx = ActionContext::new(&mut term, "Fix");
        assert_eq!(ctx.multi_pick("fixes", &options(), &[1]).unwrap(), Some(vec![1, 2]));
    }

    #[test]
    fn test_confirm_default_and_escape() {
        let mut term = terminal(vec![MenuKey::Confirm, MenuKey::Down, MenuKey::Confirm, MenuKey::Back]);
        let mut ctx = ActionContext::new(&mut term, "Reset");
        assert!(!ctx.confirm("sure?", false).unwrap());
        assert!(ctx.confirm("sure?", false).unwrap());
        assert!(!ctx.confirm("sure?", true).unwrap());
    }

    #[test]
    fn test_cancel_requested_polls() {
        let mut term = terminal(vec![MenuKey::Other, MenuKey::Back]);
        let mut ctx = ActionContext::new(&mut term, "Download");
        assert!(!ctx.cancel_requested().unwrap());
        assert!(ctx.cancel_requested().unwrap());
        assert!(!ctx.cancel_requested().unwrap());
    }
}
