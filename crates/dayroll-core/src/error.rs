use thiserror::Error;

use crate::task::{CategoryId, TaskId};

/// Rejections from a named store operation. A rejected operation leaves the
/// committed snapshot untouched.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task title cannot be empty")]
    EmptyTitle,

    #[error("task {0} is not marked done")]
    NotDone(TaskId),

    #[error("cannot move task {id}: {reason}")]
    InvalidMove { id: TaskId, reason: String },

    #[error("category not found: {0}")]
    CategoryNotFound(CategoryId),

    #[error("position {index} is out of range for a list of {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("local snapshot was changed by another process")]
    ChangedOnDisk,

    #[error("failed to persist local snapshot")]
    Persist(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum RecurrenceError {
    #[error("unknown recurrence pattern: {0}")]
    UnknownPattern(String),

    #[error("weekday index {0} is out of range (0 = Sunday .. 6 = Saturday)")]
    InvalidWeekday(u32),

    #[error("day of month {0} is out of range (1..=31)")]
    InvalidMonthDayIndex(u32),

    #[error("invalid yearly date {0} (expected month * 100 + day)")]
    InvalidMonthDay(u32),

    #[error("yearly recurrence takes a single date, got {0}")]
    TooManyYearlyDates(usize),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SyncError {
    #[error("not signed in")]
    AuthRequired,

    #[error("network unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("remote document belongs to {received}, expected {expected}")]
    IdentityMismatch { expected: String, received: String },

    #[error("remote document is malformed: {0}")]
    MalformedRemote(String),

    #[error("remote replica answered {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("failed to apply pulled document locally: {0}")]
    LocalApply(String),
}

impl SyncError {
    /// Transient failures leave local state unsynced until the next
    /// mutation or reconnect.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkUnavailable(_) | Self::Remote { status: 500..=599, .. })
    }
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("malformed import: {0}")]
    MalformedImport(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
