mod sync_ops;

use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::cli::{CategoryCommand, Command, ListView, OrderedList};
use crate::clock::DayBoundaryClock;
use crate::config::Config;
use crate::datastore::LocalStateStore;
use crate::datetime::{format_local, parse_date_expr};
use crate::recurrence::{MonthDay, Recurrence, RecurrencePattern, parse_weekday_index};
use crate::render::{Renderer, short_id};
use crate::state::{AppState, Lifecycle};
use crate::task::{CategoryId, RecurringTask, TaskId};
use crate::transfer::{export_document, read_import, write_export};

const MONTH_ABBREVS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

#[instrument(skip(store, cfg, renderer, clock, now))]
pub fn dispatch(
    store: &Arc<LocalStateStore>,
    cfg: &Config,
    renderer: &Renderer,
    clock: &DayBoundaryClock,
    command: Command,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    debug!(?command, "dispatching command");

    match command {
        Command::Add {
            title,
            backlog,
            urgent,
            category,
        } => cmd_add(store, &title.join(" "), backlog, urgent, category.as_deref(), now),
        Command::List { view, sort } => {
            let state = store.snapshot();
            match view {
                ListView::Today => renderer.print_today(&state, now),
                ListView::Backlog => {
                    let order = sort.unwrap_or(state.settings.backlog_sort_by);
                    renderer.print_backlog(&state, &state.sorted_backlog(order))
                }
                ListView::Recurring => {
                    let all: Vec<&RecurringTask> = state.recurring.iter().collect();
                    renderer.print_recurring(&state, &all)
                }
                ListView::Done => renderer.print_done(&state.done),
            }
        }
        Command::Done { id } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            let done = store.mutate(|s| s.toggle_done(&id))?;
            let verb = if done { "Completed" } else { "Reopened" };
            println!("{verb} task {}.", short_id(id.as_str()));
            Ok(())
        }
        Command::Urgent { id } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            let urgent = store.mutate(|s| s.toggle_urgent(&id))?;
            let state = if urgent { "urgent" } else { "not urgent" };
            println!("Task {} is {state}.", short_id(id.as_str()));
            Ok(())
        }
        Command::Archive { id } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            store.mutate(|s| s.archive_task(&id, now))?;
            println!("Archived task {}.", short_id(id.as_str()));
            Ok(())
        }
        Command::Delete { id } => cmd_delete(store, &id),
        Command::Edit { id, title } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            store.mutate(|s| s.edit_title(&id, &title.join(" ")))?;
            println!("Renamed task {}.", short_id(id.as_str()));
            Ok(())
        }
        Command::Note { id, text } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            let text = text.join(" ");
            store.mutate(|s| s.set_note(&id, &text))?;
            if text.trim().is_empty() {
                println!("Cleared note on task {}.", short_id(id.as_str()));
            } else {
                println!("Updated note on task {}.", short_id(id.as_str()));
            }
            Ok(())
        }
        Command::Categorize { id, category } => {
            let state = store.snapshot();
            let id = resolve_id(&state, &id)?;
            let category = category
                .as_deref()
                .map(|token| resolve_category(&state, token))
                .transpose()?;
            store.mutate(|s| s.set_category(&id, category))?;
            println!("Updated category on task {}.", short_id(id.as_str()));
            Ok(())
        }
        Command::Snooze { id, when, clear } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            let until = match (clear, when) {
                (true, _) | (false, None) => None,
                (false, Some(expr)) => Some(parse_date_expr(&expr, now, clock.timezone())?),
            };
            store.mutate(|s| s.snooze(&id, until))?;
            match until {
                Some(until) => println!(
                    "Snoozed task {} until {}.",
                    short_id(id.as_str()),
                    format_local(until, clock.timezone())
                ),
                None => println!("Unsnoozed task {}.", short_id(id.as_str())),
            }
            Ok(())
        }
        Command::Postpone { id } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            store.mutate(|s| s.move_today_to_backlog(&id, now))?;
            println!("Moved task {} to the backlog.", short_id(id.as_str()));
            Ok(())
        }
        Command::Pick { id } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            store.mutate(|s| s.move_backlog_to_today(&id, now))?;
            println!("Moved task {} to today.", short_id(id.as_str()));
            Ok(())
        }
        Command::Recur { id, pattern, days } => cmd_recur(store, &id, &pattern, &days),
        Command::Ready => {
            let state = store.snapshot();
            renderer.print_recurring(&state, &state.ready_recurring(now, clock))
        }
        Command::Surface => {
            let added = store.mutate(|s| s.add_ready_recurring(now, clock))?;
            println!("Added {} recurring task(s) to today.", added.len());
            Ok(())
        }
        Command::Instance { id } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            let instance = store.mutate(|s| s.add_from_recurring(&id, now))?;
            println!("Created task {}.", short_id(instance.as_str()));
            Ok(())
        }
        Command::Unrecur { id, backlog } => {
            let id = resolve_id(&store.snapshot(), &id)?;
            if backlog {
                store.mutate(|s| s.move_recurring_to_backlog(&id, now))?;
            } else {
                store.mutate(|s| s.move_recurring_to_today(&id, now))?;
            }
            println!("Task {} no longer repeats.", short_id(id.as_str()));
            Ok(())
        }
        Command::Reorder { list, from, to } => {
            let from = zero_based(from)?;
            let to = zero_based(to)?;
            match list {
                OrderedList::Today => store.mutate(|s| s.reorder_today(from, to))?,
                OrderedList::Backlog => store.mutate(|s| s.reorder_backlog(from, to))?,
            }
            Ok(())
        }
        Command::Sort => {
            store.mutate(|s| {
                s.sort_today_by_completion();
                Ok(())
            })?;
            Ok(())
        }
        Command::Rollover => {
            let report = store.rollover(now, clock)?;
            renderer.print_rollover(report.as_ref())
        }
        Command::Export { path } => {
            let state = store.snapshot();
            write_export(&path, &export_document(&state, now))
                .with_context(|| format!("failed to export to {}", path.display()))?;
            println!("Exported to {}.", path.display());
            Ok(())
        }
        Command::Import { path } => {
            let plan = read_import(&path)
                .with_context(|| format!("failed to import {}", path.display()))?;
            info!(version = plan.version, exported_at = ?plan.exported_at, "importing");
            store.mutate(move |s| {
                plan.apply(s);
                Ok(())
            })?;
            let state = store.snapshot();
            println!(
                "Imported {} today, {} backlog, {} recurring, {} done.",
                state.today.len(),
                state.backlog.len(),
                state.recurring.len(),
                state.done.len()
            );
            Ok(())
        }
        Command::Settings { day_start, sort } => {
            if day_start.is_none() && sort.is_none() {
                return renderer.print_settings(&store.snapshot().settings);
            }
            store.mutate(|s| {
                if let Some(day_start) = day_start {
                    s.set_day_start(day_start);
                }
                if let Some(order) = sort {
                    s.set_backlog_order(order);
                }
                Ok(())
            })?;
            println!("Settings updated.");
            Ok(())
        }
        Command::Category(sub) => cmd_category(store, sub),
        Command::Login { identity, token } => sync_ops::cmd_login(store, &identity, &token),
        Command::Logout { purge } => sync_ops::cmd_logout(store, cfg, purge),
        Command::Sync => sync_ops::cmd_sync(store, cfg),
        Command::Watch => sync_ops::cmd_watch(store, cfg, renderer, clock),
    }
}

#[instrument(skip(store, now))]
fn cmd_add(
    store: &LocalStateStore,
    title: &str,
    backlog: bool,
    urgent: bool,
    category: Option<&str>,
    now: DateTime<Utc>,
) -> anyhow::Result<()> {
    let category = category
        .map(|token| resolve_category(&store.snapshot(), token))
        .transpose()?;

    let id = store.mutate(|s| {
        let id = if backlog {
            s.add_backlog(title, now)?
        } else {
            s.add_today(title, now)?
        };
        if urgent {
            s.toggle_urgent(&id)?;
        }
        if category.is_some() {
            s.set_category(&id, category)?;
        }
        Ok(id)
    })?;

    println!("Created task {}.", short_id(id.as_str()));
    Ok(())
}

fn cmd_delete(store: &LocalStateStore, token: &str) -> anyhow::Result<()> {
    let state = store.snapshot();
    let id = resolve_id(&state, token)?;
    match state.locate(&id) {
        Some(Lifecycle::Done) | None => store.mutate(|s| s.delete_done(&id))?,
        Some(from) => {
            store.mutate(|s| s.delete_task(&id))?;
            debug!(%id, %from, "deleted live task");
        }
    }
    println!("Deleted {}.", short_id(id.as_str()));
    Ok(())
}

fn cmd_recur(
    store: &LocalStateStore,
    token: &str,
    pattern: &str,
    days: &[String],
) -> anyhow::Result<()> {
    let recurrence = parse_recurrence(pattern, days)?;
    let state = store.snapshot();
    let id = resolve_id(&state, token)?;
    let described = recurrence.describe();

    match state.locate(&id) {
        Some(Lifecycle::Today) => store.mutate(|s| s.move_today_to_recurring(&id, recurrence))?,
        Some(Lifecycle::Backlog) => {
            store.mutate(|s| s.move_backlog_to_recurring(&id, recurrence))?
        }
        Some(Lifecycle::Recurring) => store.mutate(|s| s.update_recurrence(&id, recurrence))?,
        Some(Lifecycle::Done) | None => {
            return Err(anyhow!("archived task {} cannot recur", short_id(id.as_str())));
        }
    }

    println!("Task {} repeats: {described}.", short_id(id.as_str()));
    Ok(())
}

fn cmd_category(store: &LocalStateStore, sub: CategoryCommand) -> anyhow::Result<()> {
    match sub {
        CategoryCommand::Add { name, color } => {
            let id = store.mutate(|s| s.add_category(&name, &color))?;
            println!("Created category {id}.");
        }
        CategoryCommand::Rename { id, name, color } => {
            let id = resolve_category(&store.snapshot(), &id)?;
            store.mutate(|s| s.update_category(&id, &name, color.as_deref()))?;
            println!("Updated category {id}.");
        }
        CategoryCommand::Delete { id } => {
            let id = resolve_category(&store.snapshot(), &id)?;
            store.mutate(|s| s.delete_category(&id))?;
            println!("Deleted category {id}.");
        }
    }
    Ok(())
}

/// Resolve a full id or a unique id prefix across every collection.
fn resolve_id(state: &AppState, token: &str) -> anyhow::Result<TaskId> {
    let token = token.trim();
    if token.is_empty() {
        return Err(anyhow!("task id cannot be empty"));
    }

    let mut matches: Vec<&TaskId> = state
        .live_ids()
        .filter(|id| id.as_str().starts_with(token))
        .collect();
    matches.sort();
    matches.dedup();

    match matches.as_slice() {
        [] => Err(anyhow!("no task matches id {token}")),
        [only] => Ok((*only).clone()),
        many => {
            if let Some(exact) = many.iter().find(|id| id.as_str() == token) {
                return Ok((*exact).clone());
            }
            let shown: Vec<&str> = many.iter().map(|id| short_id(id.as_str())).collect();
            Err(anyhow!("id {token} is ambiguous: {}", shown.join(", ")))
        }
    }
}

/// Categories match by id first, then by case-insensitive name.
fn resolve_category(state: &AppState, token: &str) -> anyhow::Result<CategoryId> {
    let categories = &state.settings.categories;
    if let Some(cat) = categories.iter().find(|c| c.id.as_str() == token) {
        return Ok(cat.id.clone());
    }
    categories
        .iter()
        .find(|c| c.name.eq_ignore_ascii_case(token.trim()))
        .map(|c| c.id.clone())
        .ok_or_else(|| anyhow!("no category named {token}"))
}

fn zero_based(position: usize) -> anyhow::Result<usize> {
    position
        .checked_sub(1)
        .ok_or_else(|| anyhow!("positions start at 1"))
}

/// `weekly mon wed`, `monthly 1 15`, `yearly dec25` or `yearly 12-25`.
fn parse_recurrence(pattern: &str, days: &[String]) -> anyhow::Result<Recurrence> {
    let pattern: RecurrencePattern = pattern.parse()?;
    let mut raw = Vec::with_capacity(days.len());

    for token in days.iter().flat_map(|d| d.split(',')).filter(|t| !t.is_empty()) {
        let day = match pattern {
            RecurrencePattern::Weekly | RecurrencePattern::Biweekly => parse_weekday_index(token)
                .map_or_else(|| token.parse::<u32>(), Ok)
                .map_err(|_| anyhow!("not a weekday: {token}"))?,
            RecurrencePattern::Yearly => parse_month_day(token)?.encode(),
            _ => token
                .parse::<u32>()
                .map_err(|_| anyhow!("not a day number: {token}"))?,
        };
        raw.push(day);
    }

    Ok(Recurrence::from_parts(pattern, &raw)?)
}

fn parse_month_day(token: &str) -> anyhow::Result<MonthDay> {
    let lower = token.trim().to_ascii_lowercase();

    if let Some((month, day)) = lower.split_once('-').or_else(|| lower.split_once('/')) {
        let month = month.parse().map_err(|_| anyhow!("bad month in {token}"))?;
        let day = day.parse().map_err(|_| anyhow!("bad day in {token}"))?;
        return Ok(MonthDay::new(month, day)?);
    }

    let split = lower
        .find(|c: char| c.is_ascii_digit())
        .ok_or_else(|| anyhow!("expected a date like dec25 or 12-25, got {token}"))?;
    let (name, day) = lower.split_at(split);
    let month = MONTH_ABBREVS
        .iter()
        .position(|abbrev| name.starts_with(abbrev))
        .ok_or_else(|| anyhow!("unknown month in {token}"))?;
    let day = day.parse().map_err(|_| anyhow!("bad day in {token}"))?;
    Ok(MonthDay::new(month as u32 + 1, day)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recurrence_tokens_parse_per_pattern() {
        let weekly = parse_recurrence("weekly", &["mon,wed".to_string(), "5".to_string()])
            .expect("weekly");
        assert_eq!(weekly.days(), vec![1, 3, 5]);

        let yearly = parse_recurrence("yearly", &["Dec25".to_string()]).expect("yearly");
        assert_eq!(yearly.days(), vec![1225]);
        let yearly = parse_recurrence("yearly", &["3-1".to_string()]).expect("yearly");
        assert_eq!(yearly.days(), vec![301]);

        assert!(parse_recurrence("monthly", &["32".to_string()]).is_err());
        assert!(parse_recurrence("weekly", &["someday".to_string()]).is_err());
        assert!(parse_recurrence("yearly", &["feb30".to_string()]).is_err());
    }

    #[test]
    fn oversized_yearly_dates_are_errors() {
        assert!(parse_recurrence("yearly", &["99999999-1".to_string()]).is_err());
        assert!(parse_recurrence("yearly", &["dec4294967295".to_string()]).is_err());
    }

    #[test]
    fn ids_resolve_by_unique_prefix() {
        let now = Utc::now();
        let mut state = AppState::default();
        let a = state.add_today("a", now).expect("add");
        let b = state.add_backlog("b", now).expect("add");

        assert_eq!(resolve_id(&state, a.as_str()).expect("full id"), a);
        assert_eq!(resolve_id(&state, &b.as_str()[..8]).expect("prefix"), b);
        assert!(resolve_id(&state, "zzzz-not-there").is_err());
        assert!(resolve_id(&state, "").is_err());
    }

    #[test]
    fn categories_resolve_by_name() {
        let state = AppState::default();
        let work = resolve_category(&state, "Work").expect("default category");
        assert_eq!(state.category(&work).map(|c| c.name.as_str()), Some("Work"));
        assert!(resolve_category(&state, "chores").is_err());
    }
}
