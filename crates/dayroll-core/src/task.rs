use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::recurrence::Recurrence;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CategoryId(String);

impl CategoryId {
    pub fn generate() -> Self {
        let raw = Uuid::new_v4().simple().to_string();
        Self(raw[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CategoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CategoryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Fields every task carries regardless of the collection it lives in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskCore {
    pub id: TaskId,

    pub title: String,

    #[serde(default)]
    pub category: Option<CategoryId>,

    #[serde(default)]
    pub urgent: bool,

    #[serde(default)]
    pub note: String,

    pub created_at: DateTime<Utc>,
}

impl TaskCore {
    pub fn new(title: String, now: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::generate(),
            title,
            category: None,
            urgent: false,
            note: String::new(),
            created_at: now,
        }
    }
}

/// Backlog bookkeeping carried by a task while it sits on the today list,
/// so that sending it back continues the postpone count.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogHistory {
    pub added_to_backlog_count: u32,
    pub last_added_to_backlog: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayTask {
    #[serde(flatten)]
    pub core: TaskCore,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub snooze_until: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recurring_id: Option<TaskId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backlog_history: Option<BacklogHistory>,
}

impl TodayTask {
    pub fn from_core(core: TaskCore) -> Self {
        Self {
            core,
            done: false,
            snooze_until: None,
            recurring_id: None,
            backlog_history: None,
        }
    }

    pub fn is_snoozed(&self, now: DateTime<Utc>) -> bool {
        self.snooze_until.map(|until| until > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BacklogTask {
    #[serde(flatten)]
    pub core: TaskCore,

    pub added_to_backlog_count: u32,

    pub last_added_to_backlog: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringTask {
    #[serde(flatten)]
    pub core: TaskCore,

    #[serde(flatten)]
    pub recurrence: Recurrence,

    #[serde(default)]
    pub last_added_to_today: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedTask {
    #[serde(flatten)]
    pub core: TaskCore,

    pub completed_at: DateTime<Utc>,
}

/// All completions of one recurring definition folded into a single row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurringCompletion {
    pub recurring_id: TaskId,

    pub title: String,

    #[serde(default)]
    pub category: Option<CategoryId>,

    pub completion_count: u32,

    pub first_completed_at: DateTime<Utc>,

    pub last_completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DoneRecord {
    Once(CompletedTask),
    Recurring(RecurringCompletion),
}

impl DoneRecord {
    pub fn title(&self) -> &str {
        match self {
            DoneRecord::Once(task) => &task.core.title,
            DoneRecord::Recurring(agg) => &agg.title,
        }
    }

    /// The task id for one-off records, the definition id for aggregates.
    pub fn key(&self) -> &TaskId {
        match self {
            DoneRecord::Once(task) => &task.core.id,
            DoneRecord::Recurring(agg) => &agg.recurring_id,
        }
    }

    pub fn last_completed_at(&self) -> DateTime<Utc> {
        match self {
            DoneRecord::Once(task) => task.completed_at,
            DoneRecord::Recurring(agg) => agg.last_completed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: CategoryId,
    pub name: String,
    pub color: String,
}

pub fn default_categories() -> Vec<Category> {
    [
        ("work", "Work", "#BBDEFB"),
        ("personal", "Personal", "#F3E5F5"),
        ("health", "Health", "#C8E6C9"),
        ("hobby", "Hobby", "#FFE0B2"),
    ]
    .into_iter()
    .map(|(id, name, color)| Category {
        id: CategoryId::from(id),
        name: name.to_string(),
        color: color.to_string(),
    })
    .collect()
}

/// Time of day at which a new logical day begins, serialized as `HH:MM`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DayStart(NaiveTime);

impl DayStart {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn time(&self) -> NaiveTime {
        self.0
    }
}

impl Default for DayStart {
    fn default() -> Self {
        Self(NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN))
    }
}

impl FromStr for DayStart {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|err| format!("invalid day start {s:?} (expected HH:MM): {err}"))
    }
}

impl TryFrom<String> for DayStart {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<DayStart> for String {
    fn from(value: DayStart) -> Self {
        value.to_string()
    }
}

impl fmt::Display for DayStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BacklogOrder {
    #[default]
    Recent,
    Postponed,
    Oldest,
}

impl FromStr for BacklogOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "recent" => Ok(Self::Recent),
            "postponed" => Ok(Self::Postponed),
            "oldest" => Ok(Self::Oldest),
            other => Err(format!(
                "unknown backlog order {other:?} (expected recent, postponed or oldest)"
            )),
        }
    }
}

impl fmt::Display for BacklogOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Recent => "recent",
            Self::Postponed => "postponed",
            Self::Oldest => "oldest",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub day_start: DayStart,

    #[serde(default)]
    pub last_day_reset: Option<DateTime<Utc>>,

    #[serde(default = "default_categories")]
    pub categories: Vec<Category>,

    #[serde(default)]
    pub backlog_sort_by: BacklogOrder,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            day_start: DayStart::default(),
            last_day_reset: None,
            categories: default_categories(),
            backlog_sort_by: BacklogOrder::default(),
        }
    }
}
