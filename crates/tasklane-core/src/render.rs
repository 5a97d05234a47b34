use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::NaiveDate;
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::store::TaskCounts;
use crate::task::{Priority, Task};
use crate::theme::ThemeMode;
use crate::view::StatusFilter;

const SHORT_ID_LEN: usize = 8;

/// ANSI colour codes; the dark palette uses the bright variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Palette {
    id: &'static str,
    muted: &'static str,
    danger: &'static str,
    done: &'static str,
    high: &'static str,
    medium: &'static str,
    low: &'static str,
}

const LIGHT_PALETTE: Palette = Palette {
    id: "33",
    muted: "2",
    danger: "31",
    done: "32",
    high: "31",
    medium: "33",
    low: "34",
};

const DARK_PALETTE: Palette = Palette {
    id: "93",
    muted: "90",
    danger: "91",
    done: "92",
    high: "91",
    medium: "93",
    low: "94",
};

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    palette: Palette,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, dark: bool, tz: Tz) -> anyhow::Result<Self> {
        let color = match (cfg.get_bool("color"), cfg.get("color")) {
            (Some(color), _) => color,
            (None, None) => true,
            (None, Some(other)) => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self {
            color: color && io::stdout().is_terminal(),
            palette: if dark { DARK_PALETTE } else { LIGHT_PALETTE },
            tz,
        })
    }

    /// Uncoloured output in UTC.
    #[cfg(test)]
    fn plain() -> Self {
        Self {
            color: false,
            palette: LIGHT_PALETTE,
            tz: chrono_tz::UTC,
        }
    }

    #[cfg(test)]
    fn is_dark_palette(&self) -> bool {
        self.palette == DARK_PALETTE
    }

    #[tracing::instrument(skip(self, out, tasks))]
    pub fn print_task_table<W: Write + ?Sized>(
        &self,
        out: &mut W,
        tasks: &[&Task],
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        let headers = vec![
            "ID".to_string(),
            "Done".to_string(),
            "Priority".to_string(),
            "Due".to_string(),
            "Created".to_string(),
            "Title".to_string(),
        ];

        let mut rows = Vec::with_capacity(tasks.len());
        for task in tasks {
            let id = self.paint(short_id(&task.id), self.palette.id);
            let done = if task.completed {
                self.paint("[x]", self.palette.done)
            } else {
                "[ ]".to_string()
            };
            let priority = self.paint(task.priority.label(), self.priority_code(task.priority));

            let due = task
                .due_date
                .map(|date| date.format("%Y-%m-%d").to_string())
                .unwrap_or_default();
            let due = if task.is_overdue(today) {
                self.paint(&due, self.palette.danger)
            } else {
                due
            };

            let created = task
                .created_at
                .with_timezone(&self.tz)
                .format("%b %-d, %Y")
                .to_string();

            let title = if task.completed {
                self.paint(&task.title, self.palette.muted)
            } else {
                task.title.clone()
            };

            rows.push(vec![id, done, priority, due, created, title]);
        }

        write_table(out, headers, rows)
    }

    #[tracing::instrument(skip(self, out, task))]
    pub fn print_task_info<W: Write + ?Sized>(
        &self,
        out: &mut W,
        task: &Task,
        today: NaiveDate,
    ) -> anyhow::Result<()> {
        writeln!(out, "id          {}", task.id)?;
        writeln!(out, "title       {}", task.title)?;
        writeln!(out, "description {}", task.description)?;
        writeln!(
            out,
            "status      {}",
            if task.completed { "completed" } else { "active" }
        )?;
        writeln!(out, "priority    {}", task.priority.label())?;

        match task.due_date {
            Some(due) if task.is_overdue(today) => {
                let text = format!("{} (overdue)", due.format("%Y-%m-%d"));
                writeln!(out, "due         {}", self.paint(&text, self.palette.danger))?;
            }
            Some(due) => writeln!(out, "due         {}", due.format("%Y-%m-%d"))?,
            None => writeln!(out, "due         -")?,
        }

        writeln!(
            out,
            "created     {}",
            task.created_at
                .with_timezone(&self.tz)
                .format("%Y-%m-%d %H:%M:%S %Z")
        )?;
        Ok(())
    }

    pub fn print_empty<W: Write + ?Sized>(
        &self,
        out: &mut W,
        filter: StatusFilter,
    ) -> anyhow::Result<()> {
        let (headline, hint) = filter.empty_message();
        writeln!(out, "{headline}")?;
        writeln!(out, "{}", self.paint(hint, self.palette.muted))?;
        Ok(())
    }

    pub fn print_summary<W: Write + ?Sized>(
        &self,
        out: &mut W,
        shown: usize,
        counts: TaskCounts,
    ) -> anyhow::Result<()> {
        let noun = if counts.total == 1 { "task" } else { "tasks" };
        let line = if shown == counts.total {
            format!(
                "{} {noun}, {} active, {} completed",
                counts.total, counts.active, counts.completed
            )
        } else {
            format!(
                "showing {shown} of {} {noun}, {} active, {} completed",
                counts.total, counts.active, counts.completed
            )
        };
        writeln!(out, "{}", self.paint(&line, self.palette.muted))?;
        Ok(())
    }

    pub fn print_theme<W: Write + ?Sized>(
        &self,
        out: &mut W,
        mode: ThemeMode,
        dark: bool,
    ) -> anyhow::Result<()> {
        let effective = if dark { "dark" } else { "light" };
        writeln!(out, "theme {mode} (effective: {effective})")?;
        Ok(())
    }

    fn priority_code(&self, priority: Priority) -> &'static str {
        match priority {
            Priority::High => self.palette.high,
            Priority::Medium => self.palette.medium,
            Priority::Low => self.palette.low,
        }
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

fn write_table<W: Write + ?Sized>(
    writer: &mut W,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let column_count = headers.len();
    let mut widths = vec![0usize; column_count];

    for (idx, header) in headers.iter().enumerate() {
        widths[idx] = widths[idx].max(UnicodeWidthStr::width(header.as_str()));
    }

    for row in &rows {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(UnicodeWidthStr::width(strip_ansi(cell).as_str()));
        }
    }

    let last = column_count.saturating_sub(1);
    for idx in 0..column_count {
        if idx == last {
            write!(writer, "{}", headers[idx])?;
        } else {
            write!(writer, "{:width$} ", headers[idx], width = widths[idx])?;
        }
    }
    writeln!(writer)?;

    for idx in 0..column_count {
        let sep = if idx == last { "" } else { " " };
        write!(writer, "{:-<width$}{sep}", "", width = widths[idx])?;
    }
    writeln!(writer)?;

    for row in rows {
        for idx in 0..column_count {
            let cell = &row[idx];
            if idx == last {
                write!(writer, "{cell}")?;
                continue;
            }
            let visible_width = UnicodeWidthStr::width(strip_ansi(cell).as_str());
            let padding = widths[idx].saturating_sub(visible_width);
            write!(writer, "{}{} ", cell, " ".repeat(padding))?;
        }
        writeln!(writer)?;
    }

    Ok(())
}

fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut escaped = false;

    for ch in s.chars() {
        if escaped {
            if ch == 'm' {
                escaped = false;
            }
            continue;
        }

        if ch == '\x1b' {
            escaped = true;
            continue;
        }

        out.push(ch);
    }

    out
}
