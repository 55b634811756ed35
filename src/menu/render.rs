//! Frame composition and flicker-free repaint.
//!
//! The renderer keeps the previously painted frame and, on the next call,
//! rewrites only the rows whose content changed. A terminal resize (or an
//! explicit `invalidate`) forces a full repaint.

use crossterm::cursor::MoveTo;
use crossterm::queue;
use crossterm::style::{
    Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor,
};
use crossterm::terminal::{Clear, ClearType};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Normal,
    Title,
    Selected,
    Dim,
    Success,
    Warning,
    Error,
}

/// One screen row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub text: String,
    pub style: LineStyle,
}

impl Line {
    pub fn new(text: impl Into<String>, style: LineStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    pub fn plain(text: impl Into<String>) -> Self {
        Self::new(text, LineStyle::Normal)
    }

    pub fn blank() -> Self {
        Self::plain("")
    }
}

/// Slice of a list that fits on screen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub start: usize,
    pub end: usize,
    pub hidden_above: usize,
    pub hidden_below: usize,
}

/// Window of at most `max_rows` rows, centered on `selected` where possible.
pub fn visible_window(len: usize, selected: usize, max_rows: usize) -> Viewport {
    let max_rows = max_rows.max(1);
    if len <= max_rows {
        return Viewport {
            start: 0,
            end: len,
            hidden_above: 0,
            hidden_below: 0,
        };
    }

    let half = max_rows / 2;
    let mut start = selected.saturating_sub(half);
    if start + max_rows > len {
        start = len - max_rows;
    }
    let end = start + max_rows;

    Viewport {
        start,
        end,
        hidden_above: start,
        hidden_below: len - end,
    }
}

/// Rows reserved around a list for title, description, status and hints
pub const CHROME_ROWS: u16 = 10;

/// Number of list rows to show for a terminal of `height` rows
pub fn list_rows(height: u16) -> usize {
    height.saturating_sub(CHROME_ROWS).max(5) as usize
}

/// List rows with the scroll indicators and the selection highlighted
pub fn list_lines(items: &[String], selected: usize, max_rows: usize) -> Vec<Line> {
    let view = visible_window(items.len(), selected, max_rows);
    let mut lines = Vec::with_capacity(view.end - view.start + 2);

    if view.hidden_above > 0 {
        lines.push(Line::new(format!("   ▲ ({}) ▲", view.hidden_above), LineStyle::Dim));
    }
    for (i, item) in items[view.start..view.end].iter().enumerate() {
        let index = view.start + i;
        if index == selected {
            lines.push(Line::new(format!(" ❯ {}", item), LineStyle::Selected));
        } else {
            lines.push(Line::plain(format!("   {}", item)));
        }
    }
    if view.hidden_below > 0 {
        lines.push(Line::new(format!("   ▼ ({}) ▼", view.hidden_below), LineStyle::Dim));
    }
    lines
}

/// Text-mode progress bar, `fraction` clamped to `[0, 1]`
pub fn progress_bar(width: usize, fraction: f64) -> String {
    let fraction = fraction.clamp(0.0, 1.0);
    let filled = (fraction * width as f64).round() as usize;
    format!(
        "[{}{}] {:>3.0}%",
        "█".repeat(filled),
        "░".repeat(width - filled),
        fraction * 100.0
    )
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

#[derive(Debug, Default)]
pub struct Renderer {
    previous: Vec<Line>,
    previous_size: Option<(u16, u16)>,
}

impl Renderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget the painted frame so the next render repaints everything
    pub fn invalidate(&mut self) {
        self.previous.clear();
        self.previous_size = None;
    }

    /// Paint `lines` for a terminal of `size` (columns, rows).
    ///
    /// Returns the number of rows written.
    pub fn render<W: Write>(
        &mut self,
        out: &mut W,
        lines: &[Line],
        size: (u16, u16),
    ) -> io::Result<usize> {
        let (width, height) = size;
        let visible = &lines[..lines.len().min(height as usize)];
        let full = self.previous_size != Some(size);

        if full {
            queue!(out, Clear(ClearType::All))?;
        }

        let rows = visible.len().max(self.previous.len());
        let mut painted = 0;
        for row in 0..rows {
            let next = visible.get(row);
            if !full && next == self.previous.get(row) {
                continue;
            }
            queue!(out, MoveTo(0, row as u16), Clear(ClearType::CurrentLine))?;
            if let Some(line) = next {
                write_styled(out, line, width as usize)?;
            }
            painted += 1;
        }

        out.flush()?;
        self.previous = visible.to_vec();
        self.previous_size = Some(size);
        Ok(painted)
    }
}

fn write_styled<W: Write>(out: &mut W, line: &Line, width: usize) -> io::Result<()> {
    let text = truncate(&line.text, width);
    match line.style {
        LineStyle::Normal => queue!(out, Print(text))?,
        LineStyle::Title => queue!(
            out,
            SetAttribute(Attribute::Bold),
            Print(text),
            SetAttribute(Attribute::Reset)
        )?,
        LineStyle::Selected => queue!(
            out,
            SetAttribute(Attribute::Reverse),
            Print(text),
            SetAttribute(Attribute::Reset)
        )?,
        LineStyle::Dim => queue!(
            out,
            SetAttribute(Attribute::Dim),
            Print(text),
            SetAttribute(Attribute::Reset)
        )?,
        LineStyle::Success => colored(out, Color::Green, text)?,
        LineStyle::Warning => colored(out, Color::Yellow, text)?,
        LineStyle::Error => colored(out, Color::Red, text)?,
    }
    Ok(())
}

fn colored<W: Write>(out: &mut W, color: Color, text: String) -> io::Result<()> {
    queue!(out, SetForegroundColor(color), Print(text), ResetColor)
}
