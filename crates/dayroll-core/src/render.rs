use std::io::{self, IsTerminal, Write};

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use unicode_width::UnicodeWidthStr;

use crate::config::Config;
use crate::datetime::format_local;
use crate::rollover::RolloverReport;
use crate::state::AppState;
use crate::sync::SyncStatus;
use crate::task::{BacklogTask, CategoryId, DoneRecord, RecurringTask, Settings, TaskCore};

const SHORT_ID_LEN: usize = 8;

pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(SHORT_ID_LEN) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

#[derive(Debug, Clone)]
pub struct Renderer {
    color: bool,
    tz: Tz,
}

impl Renderer {
    pub fn new(cfg: &Config, tz: Tz) -> anyhow::Result<Self> {
        let color_cfg = cfg.get("color").unwrap_or_else(|| "on".to_string());
        let color = match color_cfg.to_ascii_lowercase().as_str() {
            "on" | "yes" | "true" | "1" => true,
            "off" | "no" | "false" | "0" => false,
            other => return Err(anyhow!("invalid color setting: {other}")),
        };

        Ok(Self { color, tz })
    }

    #[tracing::instrument(skip(self, state, now))]
    pub fn print_today(&self, state: &AppState, now: DateTime<Utc>) -> anyhow::Result<()> {
        let rows = state
            .today
            .iter()
            .map(|task| {
                let mark = if task.done { "x" } else { " " };
                let mut title = self.title_cell(&task.core);
                if task.recurring_id.is_some() {
                    title.push_str(" (r)");
                }
                let snoozed = match task.snooze_until {
                    Some(until) if until > now => self.paint(&format_local(until, self.tz), "2"),
                    _ => String::new(),
                };
                vec![
                    self.paint(short_id(task.core.id.as_str()), "33"),
                    format!("[{mark}]"),
                    title,
                    category_name(state, task.core.category.as_ref()),
                    snoozed,
                ]
            })
            .collect();

        self.emit(&["ID", "", "Task", "Category", "Snoozed"], rows)
    }

    #[tracing::instrument(skip(self, state, tasks))]
    pub fn print_backlog(&self, state: &AppState, tasks: &[&BacklogTask]) -> anyhow::Result<()> {
        let rows = tasks
            .iter()
            .map(|task| {
                let count = task.added_to_backlog_count.to_string();
                let count = if task.added_to_backlog_count >= 3 {
                    self.paint(&count, "31")
                } else {
                    count
                };
                vec![
                    self.paint(short_id(task.core.id.as_str()), "33"),
                    self.title_cell(&task.core),
                    category_name(state, task.core.category.as_ref()),
                    count,
                    format_local(task.last_added_to_backlog, self.tz),
                ]
            })
            .collect();

        self.emit(&["ID", "Task", "Category", "Postponed", "Since"], rows)
    }

    #[tracing::instrument(skip(self, state, tasks))]
    pub fn print_recurring(&self, state: &AppState, tasks: &[&RecurringTask]) -> anyhow::Result<()> {
        let rows = tasks
            .iter()
            .map(|task| {
                vec![
                    self.paint(short_id(task.core.id.as_str()), "33"),
                    self.title_cell(&task.core),
                    task.recurrence.describe(),
                    task.last_added_to_today
                        .map(|at| format_local(at, self.tz))
                        .unwrap_or_default(),
                ]
            })
            .collect();

        self.emit(&["ID", "Task", "Repeats", "Last added"], rows)
    }

    #[tracing::instrument(skip(self, records))]
    pub fn print_done(&self, records: &[DoneRecord]) -> anyhow::Result<()> {
        let mut sorted: Vec<&DoneRecord> = records.iter().collect();
        sorted.sort_by_key(|record| std::cmp::Reverse(record.last_completed_at()));

        let rows = sorted
            .into_iter()
            .map(|record| {
                let times = match record {
                    DoneRecord::Once(_) => "1".to_string(),
                    DoneRecord::Recurring(agg) => agg.completion_count.to_string(),
                };
                vec![
                    self.paint(short_id(record.key().as_str()), "33"),
                    record.title().to_string(),
                    times,
                    format_local(record.last_completed_at(), self.tz),
                ]
            })
            .collect();

        self.emit(&["ID", "Task", "Times", "Completed"], rows)
    }

    pub fn print_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        writeln!(out, "day start       {}", settings.day_start)?;
        writeln!(out, "backlog order   {}", settings.backlog_sort_by)?;
        writeln!(out, "timezone        {}", self.tz)?;
        writeln!(
            out,
            "last rollover   {}",
            settings
                .last_day_reset
                .map(|at| format_local(at, self.tz))
                .unwrap_or_else(|| "never".to_string())
        )?;
        writeln!(out)?;

        let rows = settings
            .categories
            .iter()
            .map(|cat| vec![cat.id.to_string(), cat.name.clone(), cat.color.clone()])
            .collect();
        write_table(&mut out, &["Category", "Name", "Color"], rows)
    }

    pub fn print_rollover(&self, report: Option<&RolloverReport>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        match report {
            Some(report) => writeln!(
                out,
                "Rolled over at {}: {} to backlog, {} archived.",
                format_local(report.boundary, self.tz),
                report.moved_to_backlog,
                report.archived
            )?,
            None => writeln!(out, "Already rolled over for the current day.")?,
        }
        Ok(())
    }

    pub fn print_sync_status(&self, status: &SyncStatus) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        let synced = status
            .last_synced
            .map(|at| format_local(at, self.tz))
            .unwrap_or_else(|| "never".to_string());
        write!(out, "sync: {} (last synced {synced})", status.phase)?;
        if status.is_degraded() {
            write!(out, " {}", self.paint("offline, will retry", "31"))?;
        }
        if let Some(err) = &status.last_error {
            write!(out, ": {err}")?;
        }
        writeln!(out)?;
        Ok(())
    }

    fn title_cell(&self, core: &TaskCore) -> String {
        let mut title = core.title.clone();
        if core.urgent {
            title = self.paint(&format!("! {title}"), "1;31");
        }
        if !core.note.is_empty() {
            title.push_str(" +");
        }
        title
    }

    fn emit(&self, headers: &[&str], rows: Vec<Vec<String>>) -> anyhow::Result<()> {
        let mut out = io::stdout().lock();
        if rows.is_empty() {
            writeln!(out, "No tasks.")?;
            return Ok(());
        }
        write_table(&mut out, headers, rows)
    }

    fn paint(&self, text: &str, code: &str) -> String {
        if !self.color || !io::stdout().is_terminal() {
            return text.to_string();
        }
        format!("\x1b[{code}m{text}\x1b[0m")
    }
}

fn category_name(state: &AppState, id: Option<&CategoryId>) -> String {
    id.map(|id| {
        state
            .category(id)
            .map_or_else(|| id.to_string(), |cat| cat.name.clone())
    })
    .unwrap_or_default()
}

fn write_table<W: Write>(
    mut writer: W,
    headers: &[&str],
    rows: Vec<Vec<String>>,
) -> anyhow::Result<()> {
    let mut widths: Vec<usize> = headers.iter().map(|h| UnicodeWidthStr::width(*h)).collect();

    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(visible_width(cell));
        }
    }

    let header_line: Vec<String> = headers
        .iter()
        .zip(&widths)
        .map(|(h, w)| pad(h, *w))
        .collect();
    writeln!(writer, "{}", header_line.join(" ").trim_end())?;

    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    writeln!(writer, "{}", rule.join(" "))?;

    for row in rows {
        let cells: Vec<String> = row.iter().zip(&widths).map(|(c, w)| pad(c, *w)).collect();
        writeln!(writer, "{}", cells.join(" ").trim_end())?;
    }

    Ok(())
}

fn pad(cell: &str, width: usize) -> String {
    let padding = width.saturating_sub(visible_width(cell));
    format!("{cell}{}", " ".repeat(padding))
}

fn visible_width(cell: &str) -> usize {
    UnicodeWidthStr::width(strip_ansi(cell).as_str())
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
