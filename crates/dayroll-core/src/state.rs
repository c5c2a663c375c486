//! The full application snapshot and the named operations that mutate it.
//!
//! Operations take `&mut AppState` and are only ever run against a private
//! draft inside [`LocalStateStore::commit`](crate::datastore::LocalStateStore::commit);
//! a failed operation discards the draft, so callers never observe a
//! half-applied move.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::DayBoundaryClock;
use crate::error::StoreError;
use crate::recurrence::{Recurrence, get_ready_definitions};
use crate::task::{
    BacklogHistory, BacklogOrder, BacklogTask, Category, CategoryId, CompletedTask, DayStart,
    DoneRecord, RecurringCompletion, RecurringTask, Settings, TaskCore, TaskId, TodayTask,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Today,
    Backlog,
    Recurring,
    Done,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Today => "today",
            Self::Backlog => "backlog",
            Self::Recurring => "recurring",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub today: Vec<TodayTask>,

    #[serde(default)]
    pub backlog: Vec<BacklogTask>,

    #[serde(default)]
    pub recurring: Vec<RecurringTask>,

    #[serde(default)]
    pub done: Vec<DoneRecord>,

    #[serde(default)]
    pub settings: Settings,
}

fn clean_title(title: &str) -> Result<String, StoreError> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(StoreError::EmptyTitle);
    }
    Ok(trimmed.to_string())
}

fn move_within<T>(items: &mut Vec<T>, from: usize, to: usize) -> Result<(), StoreError> {
    let len = items.len();
    for index in [from, to] {
        if index >= len {
            return Err(StoreError::IndexOutOfRange { index, len });
        }
    }
    let item = items.remove(from);
    items.insert(to, item);
    Ok(())
}

impl AppState {
    pub fn locate(&self, id: &TaskId) -> Option<Lifecycle> {
        if self.today.iter().any(|t| &t.core.id == id) {
            Some(Lifecycle::Today)
        } else if self.backlog.iter().any(|t| &t.core.id == id) {
            Some(Lifecycle::Backlog)
        } else if self.recurring.iter().any(|t| &t.core.id == id) {
            Some(Lifecycle::Recurring)
        } else if self
            .done
            .iter()
            .any(|r| matches!(r, DoneRecord::Once(t) if &t.core.id == id))
        {
            Some(Lifecycle::Done)
        } else {
            None
        }
    }

    /// Ids that appear in more than one place across the lifecycle
    /// collections. Recurring aggregates are keyed by definition id and do
    /// not count.
    pub fn duplicate_ids(&self) -> Vec<TaskId> {
        let mut seen: BTreeMap<&TaskId, usize> = BTreeMap::new();
        let ids = self
            .today
            .iter()
            .map(|t| &t.core.id)
            .chain(self.backlog.iter().map(|t| &t.core.id))
            .chain(self.recurring.iter().map(|t| &t.core.id))
            .chain(self.done.iter().filter_map(|r| match r {
                DoneRecord::Once(t) => Some(&t.core.id),
                DoneRecord::Recurring(_) => None,
            }));
        for id in ids {
            *seen.entry(id).or_default() += 1;
        }
        seen.into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Every task id still in an editable collection, for prefix lookups.
    pub fn live_ids(&self) -> impl Iterator<Item = &TaskId> {
        self.today
            .iter()
            .map(|t| &t.core.id)
            .chain(self.backlog.iter().map(|t| &t.core.id))
            .chain(self.recurring.iter().map(|t| &t.core.id))
            .chain(self.done.iter().map(DoneRecord::key))
    }

    pub fn sorted_backlog(&self, order: BacklogOrder) -> Vec<&BacklogTask> {
        let mut sorted: Vec<&BacklogTask> = self.backlog.iter().collect();
        match order {
            BacklogOrder::Recent => {
                sorted.sort_by(|a, b| b.last_added_to_backlog.cmp(&a.last_added_to_backlog))
            }
            BacklogOrder::Postponed => {
                sorted.sort_by(|a, b| b.added_to_backlog_count.cmp(&a.added_to_backlog_count))
            }
            BacklogOrder::Oldest => sorted.sort_by(|a, b| a.core.created_at.cmp(&b.core.created_at)),
        }
        sorted
    }

    pub fn ready_recurring(
        &self,
        now: DateTime<Utc>,
        clock: &DayBoundaryClock,
    ) -> Vec<&RecurringTask> {
        get_ready_definitions(&self.recurring, now, self.settings.day_start, clock)
    }

    pub fn category(&self, id: &CategoryId) -> Option<&Category> {
        self.settings.categories.iter().find(|c| &c.id == id)
    }

    // ----- additions -----

    pub fn add_today(&mut self, title: &str, now: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let core = TaskCore::new(clean_title(title)?, now);
        let id = core.id.clone();
        self.today.push(TodayTask::from_core(core));
        debug!(%id, "added today task");
        Ok(id)
    }

    pub fn add_backlog(&mut self, title: &str, now: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let core = TaskCore::new(clean_title(title)?, now);
        let id = core.id.clone();
        self.backlog.push(BacklogTask {
            core,
            added_to_backlog_count: 1,
            last_added_to_backlog: now,
        });
        debug!(%id, "added backlog task");
        Ok(id)
    }

    pub fn add_recurring(
        &mut self,
        title: &str,
        recurrence: Recurrence,
        now: DateTime<Utc>,
    ) -> Result<TaskId, StoreError> {
        let core = TaskCore::new(clean_title(title)?, now);
        let id = core.id.clone();
        self.recurring.push(RecurringTask {
            core,
            recurrence,
            last_added_to_today: None,
        });
        debug!(%id, "added recurring definition");
        Ok(id)
    }

    // ----- edits -----

    fn core_mut(&mut self, id: &TaskId) -> Result<&mut TaskCore, StoreError> {
        if let Some(task) = self.today.iter_mut().find(|t| &t.core.id == id) {
            return Ok(&mut task.core);
        }
        if let Some(task) = self.backlog.iter_mut().find(|t| &t.core.id == id) {
            return Ok(&mut task.core);
        }
        if let Some(task) = self.recurring.iter_mut().find(|t| &t.core.id == id) {
            return Ok(&mut task.core);
        }
        Err(StoreError::TaskNotFound(id.clone()))
    }

    fn today_mut(&mut self, id: &TaskId) -> Result<&mut TodayTask, StoreError> {
        self.today
            .iter_mut()
            .find(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))
    }

    pub fn edit_title(&mut self, id: &TaskId, title: &str) -> Result<(), StoreError> {
        let title = clean_title(title)?;
        self.core_mut(id)?.title = title;
        Ok(())
    }

    pub fn set_note(&mut self, id: &TaskId, note: &str) -> Result<(), StoreError> {
        self.core_mut(id)?.note = note.trim().to_string();
        Ok(())
    }

    pub fn toggle_urgent(&mut self, id: &TaskId) -> Result<bool, StoreError> {
        let core = self.core_mut(id)?;
        core.urgent = !core.urgent;
        Ok(core.urgent)
    }

    pub fn set_category(
        &mut self,
        id: &TaskId,
        category: Option<CategoryId>,
    ) -> Result<(), StoreError> {
        if let Some(category) = &category
            && self.category(category).is_none()
        {
            return Err(StoreError::CategoryNotFound(category.clone()));
        }
        self.core_mut(id)?.category = category;
        Ok(())
    }

    pub fn toggle_done(&mut self, id: &TaskId) -> Result<bool, StoreError> {
        let task = self.today_mut(id)?;
        task.done = !task.done;
        Ok(task.done)
    }

    pub fn snooze(
        &mut self,
        id: &TaskId,
        until: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        self.today_mut(id)?.snooze_until = until;
        Ok(())
    }

    pub fn update_recurrence(
        &mut self,
        id: &TaskId,
        recurrence: Recurrence,
    ) -> Result<(), StoreError> {
        let definition = self
            .recurring
            .iter_mut()
            .find(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        definition.recurrence = recurrence;
        Ok(())
    }

    // ----- removals -----

    pub fn delete_task(&mut self, id: &TaskId) -> Result<Lifecycle, StoreError> {
        if let Some(idx) = self.today.iter().position(|t| &t.core.id == id) {
            self.today.remove(idx);
            return Ok(Lifecycle::Today);
        }
        if let Some(idx) = self.backlog.iter().position(|t| &t.core.id == id) {
            self.backlog.remove(idx);
            return Ok(Lifecycle::Backlog);
        }
        if let Some(idx) = self.recurring.iter().position(|t| &t.core.id == id) {
            self.recurring.remove(idx);
            return Ok(Lifecycle::Recurring);
        }
        Err(StoreError::TaskNotFound(id.clone()))
    }

    pub fn delete_done(&mut self, key: &TaskId) -> Result<(), StoreError> {
        let idx = self
            .done
            .iter()
            .position(|r| r.key() == key)
            .ok_or_else(|| StoreError::TaskNotFound(key.clone()))?;
        self.done.remove(idx);
        Ok(())
    }

    // ----- cross-collection moves -----

    fn take_today(&mut self, id: &TaskId) -> Result<TodayTask, StoreError> {
        let idx = self
            .today
            .iter()
            .position(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        Ok(self.today.remove(idx))
    }

    fn take_backlog(&mut self, id: &TaskId) -> Result<BacklogTask, StoreError> {
        let idx = self
            .backlog
            .iter()
            .position(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        Ok(self.backlog.remove(idx))
    }

    fn take_recurring(&mut self, id: &TaskId) -> Result<RecurringTask, StoreError> {
        let idx = self
            .recurring
            .iter()
            .position(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        Ok(self.recurring.remove(idx))
    }

    /// Insert a task leaving today into the backlog, bumping the postpone
    /// count when the id is already there or the task carries history.
    pub(crate) fn push_to_backlog(&mut self, task: TodayTask, now: DateTime<Utc>) {
        if let Some(existing) = self.backlog.iter_mut().find(|t| t.core.id == task.core.id) {
            existing.added_to_backlog_count = existing.added_to_backlog_count.saturating_add(1);
            existing.last_added_to_backlog = now;
            debug!(id = %existing.core.id, count = existing.added_to_backlog_count, "backlog count bumped");
            return;
        }

        let count = task
            .backlog_history
            .map_or(1, |history| history.added_to_backlog_count.saturating_add(1));
        debug!(id = %task.core.id, count, "task entered backlog");
        self.backlog.push(BacklogTask {
            core: task.core,
            added_to_backlog_count: count,
            last_added_to_backlog: now,
        });
    }

    /// File a finished today task in the archive. Completions of recurring
    /// instances fold into one aggregate per definition.
    pub(crate) fn push_to_done(&mut self, task: TodayTask, now: DateTime<Utc>) {
        let Some(recurring_id) = task.recurring_id else {
            self.done.push(DoneRecord::Once(CompletedTask {
                core: task.core,
                completed_at: now,
            }));
            return;
        };

        let existing = self.done.iter_mut().find_map(|r| match r {
            DoneRecord::Recurring(agg) if agg.recurring_id == recurring_id => Some(agg),
            _ => None,
        });
        match existing {
            Some(agg) => {
                agg.completion_count = agg.completion_count.saturating_add(1);
                agg.last_completed_at = agg.last_completed_at.max(now);
                agg.title = task.core.title;
            }
            None => self.done.push(DoneRecord::Recurring(RecurringCompletion {
                recurring_id,
                title: task.core.title,
                category: task.core.category,
                completion_count: 1,
                first_completed_at: now,
                last_completed_at: now,
            })),
        }
    }

    pub fn archive_task(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let task = self
            .today
            .iter()
            .find(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        if !task.done {
            return Err(StoreError::NotDone(id.clone()));
        }
        let task = self.take_today(id)?;
        self.push_to_done(task, now);
        Ok(())
    }

    pub fn move_today_to_backlog(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let task = self.take_today(id)?;
        self.push_to_backlog(task, now);
        Ok(())
    }

    pub fn move_backlog_to_today(&mut self, id: &TaskId, _now: DateTime<Utc>) -> Result<(), StoreError> {
        let task = self.take_backlog(id)?;
        let mut today = TodayTask::from_core(task.core);
        today.backlog_history = Some(BacklogHistory {
            added_to_backlog_count: task.added_to_backlog_count,
            last_added_to_backlog: task.last_added_to_backlog,
        });
        self.today.push(today);
        Ok(())
    }

    /// Done state, snooze and history are dropped; only the shared task
    /// fields survive into the definition.
    pub fn move_today_to_recurring(
        &mut self,
        id: &TaskId,
        recurrence: Recurrence,
    ) -> Result<(), StoreError> {
        let task = self.take_today(id)?;
        self.recurring.push(RecurringTask {
            core: task.core,
            recurrence,
            last_added_to_today: None,
        });
        Ok(())
    }

    pub fn move_backlog_to_recurring(
        &mut self,
        id: &TaskId,
        recurrence: Recurrence,
    ) -> Result<(), StoreError> {
        let task = self.take_backlog(id)?;
        self.recurring.push(RecurringTask {
            core: task.core,
            recurrence,
            last_added_to_today: None,
        });
        Ok(())
    }

    /// Turn a definition back into a one-off task on today's list.
    pub fn move_recurring_to_today(&mut self, id: &TaskId, _now: DateTime<Utc>) -> Result<(), StoreError> {
        let definition = self.take_recurring(id)?;
        self.today.push(TodayTask::from_core(definition.core));
        Ok(())
    }

    pub fn move_recurring_to_backlog(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<(), StoreError> {
        let definition = self.take_recurring(id)?;
        self.backlog.push(BacklogTask {
            core: definition.core,
            added_to_backlog_count: 1,
            last_added_to_backlog: now,
        });
        Ok(())
    }

    /// Put a fresh instance of a definition on today's list. The definition
    /// stays where it is and remembers when it was last surfaced.
    pub fn add_from_recurring(&mut self, id: &TaskId, now: DateTime<Utc>) -> Result<TaskId, StoreError> {
        let definition = self
            .recurring
            .iter_mut()
            .find(|t| &t.core.id == id)
            .ok_or_else(|| StoreError::TaskNotFound(id.clone()))?;
        definition.last_added_to_today = Some(now);

        let mut core = TaskCore::new(definition.core.title.clone(), now);
        core.category = definition.core.category.clone();
        core.urgent = definition.core.urgent;
        core.note = definition.core.note.clone();
        let instance_id = core.id.clone();

        let mut instance = TodayTask::from_core(core);
        instance.recurring_id = Some(definition.core.id.clone());
        self.today.push(instance);
        debug!(definition = %id, instance = %instance_id, "recurring instance added");
        Ok(instance_id)
    }

    pub fn add_ready_recurring(
        &mut self,
        now: DateTime<Utc>,
        clock: &DayBoundaryClock,
    ) -> Result<Vec<TaskId>, StoreError> {
        let ready: Vec<TaskId> = self
            .ready_recurring(now, clock)
            .into_iter()
            .map(|d| d.core.id.clone())
            .collect();
        ready
            .iter()
            .map(|id| self.add_from_recurring(id, now))
            .collect()
    }

    // ----- ordering -----

    /// Stable partition: unfinished tasks first, finished ones after.
    pub fn sort_today_by_completion(&mut self) {
        self.today.sort_by_key(|t| t.done);
    }

    pub fn reorder_today(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        move_within(&mut self.today, from, to)
    }

    pub fn reorder_backlog(&mut self, from: usize, to: usize) -> Result<(), StoreError> {
        move_within(&mut self.backlog, from, to)
    }

    // ----- settings -----

    pub fn add_category(&mut self, name: &str, color: &str) -> Result<CategoryId, StoreError> {
        let name = clean_title(name)?;
        let id = CategoryId::generate();
        self.settings.categories.push(Category {
            id: id.clone(),
            name,
            color: color.trim().to_string(),
        });
        Ok(id)
    }

    pub fn update_category(
        &mut self,
        id: &CategoryId,
        name: &str,
        color: Option<&str>,
    ) -> Result<(), StoreError> {
        let name = clean_title(name)?;
        let category = self
            .settings
            .categories
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| StoreError::CategoryNotFound(id.clone()))?;
        category.name = name;
        if let Some(color) = color {
            category.color = color.trim().to_string();
        }
        Ok(())
    }

    /// Removes the category and clears it from every task that used it.
    pub fn delete_category(&mut self, id: &CategoryId) -> Result<(), StoreError> {
        let before = self.settings.categories.len();
        self.settings.categories.retain(|c| &c.id != id);
        if self.settings.categories.len() == before {
            return Err(StoreError::CategoryNotFound(id.clone()));
        }

        let cores = self
            .today
            .iter_mut()
            .map(|t| &mut t.core)
            .chain(self.backlog.iter_mut().map(|t| &mut t.core))
            .chain(self.recurring.iter_mut().map(|t| &mut t.core));
        for core in cores {
            if core.category.as_ref() == Some(id) {
                core.category = None;
            }
        }
        for record in &mut self.done {
            let category = match record {
                DoneRecord::Once(task) => &mut task.core.category,
                DoneRecord::Recurring(agg) => &mut agg.category,
            };
            if category.as_ref() == Some(id) {
                *category = None;
            }
        }
        Ok(())
    }

    pub fn set_day_start(&mut self, day_start: DayStart) {
        self.settings.day_start = day_start;
    }

    pub fn set_backlog_order(&mut self, order: BacklogOrder) {
        self.settings.backlog_sort_by = order;
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::recurrence::RecurrencePattern;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 10, 0, 0).unwrap()
    }

    #[test]
    fn backlog_round_trips_increment_the_postpone_count() {
        let mut state = AppState::default();
        let id = state.add_today("call the bank", now()).unwrap();

        for trip in 1..=5u32 {
            state
                .move_today_to_backlog(&id, now() + Duration::hours(trip.into()))
                .unwrap();
            assert_eq!(state.backlog.len(), 1);
            assert_eq!(state.backlog[0].core.id, id);
            assert_eq!(state.backlog[0].added_to_backlog_count, trip);
            assert!(state.duplicate_ids().is_empty());

            state.move_backlog_to_today(&id, now()).unwrap();
            assert!(state.backlog.is_empty());
            assert_eq!(state.locate(&id), Some(Lifecycle::Today));
        }
    }

    #[test]
    fn today_to_backlog_bumps_existing_entry_instead_of_duplicating() {
        let mut state = AppState::default();
        let id = state.add_backlog("stale", now()).unwrap();
        let mut copy = TodayTask::from_core(state.backlog[0].core.clone());
        copy.done = false;
        state.today.push(copy);

        state.move_today_to_backlog(&id, now()).unwrap();
        assert_eq!(state.backlog.len(), 1);
        assert_eq!(state.backlog[0].added_to_backlog_count, 2);
    }

    #[test]
    fn moving_to_recurring_drops_today_only_fields() {
        let mut state = AppState::default();
        let id = state.add_today("stretch", now()).unwrap();
        state.toggle_done(&id).unwrap();
        state.snooze(&id, Some(now() + Duration::hours(2))).unwrap();

        let rec = Recurrence::from_parts(RecurrencePattern::Weekly, &[1]).unwrap();
        state.move_today_to_recurring(&id, rec.clone()).unwrap();
        assert!(state.today.is_empty());
        assert_eq!(state.recurring[0].core.id, id);
        assert_eq!(state.recurring[0].recurrence, rec);
        assert_eq!(state.locate(&id), Some(Lifecycle::Recurring));
    }

    #[test]
    fn recurring_instances_fold_into_one_archive_row() {
        let mut state = AppState::default();
        let def = state.add_recurring("meditate", Recurrence::Daily, now()).unwrap();

        for day in 0..3 {
            let at = now() + Duration::days(day);
            let instance = state.add_from_recurring(&def, at).unwrap();
            assert_ne!(instance, def);
            state.toggle_done(&instance).unwrap();
            state.archive_task(&instance, at).unwrap();
        }

        assert_eq!(state.done.len(), 1);
        match &state.done[0] {
            DoneRecord::Recurring(agg) => {
                assert_eq!(agg.recurring_id, def);
                assert_eq!(agg.completion_count, 3);
                assert_eq!(agg.first_completed_at, now());
                assert_eq!(agg.last_completed_at, now() + Duration::days(2));
            }
            other => panic!("expected aggregate, got {other:?}"),
        }
        assert_eq!(
            state.recurring[0].last_added_to_today,
            Some(now() + Duration::days(2))
        );
    }

    #[test]
    fn archive_requires_done() {
        let mut state = AppState::default();
        let id = state.add_today("open mail", now()).unwrap();
        assert!(matches!(state.archive_task(&id, now()), Err(StoreError::NotDone(_))));
        assert_eq!(state.today.len(), 1);
    }

    #[test]
    fn empty_titles_are_rejected() {
        let mut state = AppState::default();
        assert!(matches!(state.add_today("   ", now()), Err(StoreError::EmptyTitle)));
        let id = state.add_backlog("x", now()).unwrap();
        assert!(matches!(state.edit_title(&id, ""), Err(StoreError::EmptyTitle)));
    }

    #[test]
    fn deleting_a_category_clears_task_references() {
        let mut state = AppState::default();
        let id = state.add_today("gym", now()).unwrap();
        let health = CategoryId::from("health");
        state.set_category(&id, Some(health.clone())).unwrap();

        state.delete_category(&health).unwrap();
        assert!(state.category(&health).is_none());
        assert_eq!(state.today[0].core.category, None);
        assert!(matches!(
            state.set_category(&id, Some(health)),
            Err(StoreError::CategoryNotFound(_))
        ));
    }

    #[test]
    fn sort_by_completion_is_stable() {
        let mut state = AppState::default();
        let a = state.add_today("a", now()).unwrap();
        let b = state.add_today("b", now()).unwrap();
        let c = state.add_today("c", now()).unwrap();
        state.toggle_done(&a).unwrap();

        state.sort_today_by_completion();
        let order: Vec<&TaskId> = state.today.iter().map(|t| &t.core.id).collect();
        assert_eq!(order, vec![&b, &c, &a]);
    }

    #[test]
    fn reorder_rejects_out_of_range_positions() {
        let mut state = AppState::default();
        state.add_today("a", now()).unwrap();
        state.add_today("b", now()).unwrap();
        state.reorder_today(1, 0).unwrap();
        assert_eq!(state.today[0].core.title, "b");
        assert!(matches!(
            state.reorder_today(0, 2),
            Err(StoreError::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn backlog_orders() {
        let mut state = AppState::default();
        let old = state.add_backlog("old", now() - Duration::days(5)).unwrap();
        let fresh = state.add_backlog("fresh", now()).unwrap();
        state.backlog[0].added_to_backlog_count = 4;

        let recent = state.sorted_backlog(BacklogOrder::Recent);
        assert_eq!(recent[0].core.id, fresh);
        let postponed = state.sorted_backlog(BacklogOrder::Postponed);
        assert_eq!(postponed[0].core.id, old);
        let oldest = state.sorted_backlog(BacklogOrder::Oldest);
        assert_eq!(oldest[0].core.id, old);
    }
}
