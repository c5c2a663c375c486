use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use crate::clock::DayBoundaryClock;
use crate::datastore::LocalStateStore;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RolloverReport {
    pub boundary: DateTime<Utc>,
    pub moved_to_backlog: usize,
    pub archived: usize,
}

pub fn rollover_due(state: &AppState, now: DateTime<Utc>, clock: &DayBoundaryClock) -> bool {
    let boundary = clock.most_recent_boundary(now, state.settings.day_start);
    state
        .settings
        .last_day_reset
        .is_none_or(|last| last < boundary)
}

/// Compute the post-rollover snapshot, or `None` when the current day
/// window has already been rolled.
///
/// Unfinished today tasks go to the backlog, finished ones to the archive,
/// and `lastDayReset` becomes `now`. The input is never modified.
#[instrument(skip(state, clock), fields(day_start = %state.settings.day_start))]
pub fn maybe_rollover(
    state: &AppState,
    now: DateTime<Utc>,
    clock: &DayBoundaryClock,
) -> Option<(AppState, RolloverReport)> {
    let boundary = clock.most_recent_boundary(now, state.settings.day_start);
    if !rollover_due(state, now, clock) {
        debug!(%boundary, "rollover not due");
        return None;
    }

    let mut next = state.clone();
    let leaving = std::mem::take(&mut next.today);
    let mut report = RolloverReport {
        boundary,
        moved_to_backlog: 0,
        archived: 0,
    };

    for task in leaving {
        if task.done {
            next.push_to_done(task, now);
            report.archived += 1;
        } else {
            next.push_to_backlog(task, now);
            report.moved_to_backlog += 1;
        }
    }
    next.settings.last_day_reset = Some(now);

    info!(
        %boundary,
        moved_to_backlog = report.moved_to_backlog,
        archived = report.archived,
        "day rolled over"
    );
    Some((next, report))
}

/// Periodically asks the store to roll the day over.
pub struct DayTicker {
    store: Arc<LocalStateStore>,
    clock: DayBoundaryClock,
    period: Duration,
    cancel: CancellationToken,
}

impl DayTicker {
    pub fn new(
        store: Arc<LocalStateStore>,
        clock: DayBoundaryClock,
        period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            clock,
            period,
            cancel,
        }
    }

    /// Tick until cancelled. The first tick fires immediately.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(period_secs = self.period.as_secs(), "day ticker started");

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("day ticker cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.store.rollover(Utc::now(), &self.clock) {
                        error!(error = %err, "rollover tick failed");
                    }
                }
            }
        }
    }
}
