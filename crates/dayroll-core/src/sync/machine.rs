//! Debounce and ordering rules for sync, with no I/O.
//!
//! The coordinator feeds events in and asks [`SyncMachine::poll`] for the
//! next piece of work. Only one piece of work is ever in flight, so a push
//! and a pull never overlap.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncPhase {
    Idle,
    PendingPush,
    Pushing,
    Pulling,
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::PendingPush => "pending-push",
            Self::Pushing => "pushing",
            Self::Pulling => "pulling",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullReason {
    /// First pull after sign-in or start-up; may migrate local data.
    Initial,
    RemoteChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncCommand {
    Push,
    Pull(PullReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTimings {
    pub push_debounce: Duration,
    pub pull_debounce: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            push_debounce: Duration::from_millis(2000),
            pull_debounce: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Baseline {
    /// Initial pull has to run before anything else.
    Due,
    /// Initial pull failed; retried on the next mutation, reconnect or
    /// manual sync.
    Failed,
    Known,
}

#[derive(Debug, Clone)]
pub struct SyncMachine {
    timings: SyncTimings,
    signed_in: bool,
    online: bool,
    baseline: Baseline,
    push_at: Option<Instant>,
    pull_at: Option<Instant>,
    in_flight: Option<SyncCommand>,
}

impl SyncMachine {
    pub fn new(timings: SyncTimings) -> Self {
        Self {
            timings,
            signed_in: false,
            online: true,
            baseline: Baseline::Due,
            push_at: None,
            pull_at: None,
            in_flight: None,
        }
    }

    pub fn phase(&self) -> SyncPhase {
        match self.in_flight {
            Some(SyncCommand::Push) => SyncPhase::Pushing,
            Some(SyncCommand::Pull(_)) => SyncPhase::Pulling,
            None if self.push_at.is_some() => SyncPhase::PendingPush,
            None => SyncPhase::Idle,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.signed_in
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn signed_in(&mut self) {
        self.signed_in = true;
        self.baseline = Baseline::Due;
        self.push_at = None;
        self.pull_at = None;
        debug!("sync armed for initial pull");
    }

    pub fn signed_out(&mut self) {
        self.signed_in = false;
        self.push_at = None;
        self.pull_at = None;
        debug!("sync disarmed");
    }

    /// A local commit. Restarts the push debounce window.
    pub fn local_mutation(&mut self, now: Instant) {
        if !self.signed_in {
            return;
        }
        self.push_at = Some(now + self.timings.push_debounce);
    }

    /// Another device wrote the remote document. Restarts the pull
    /// debounce window, unless the initial pull has not finished yet.
    pub fn remote_changed(&mut self, now: Instant) {
        if !self.signed_in || self.baseline != Baseline::Known {
            return;
        }
        if self.in_flight == Some(SyncCommand::Pull(PullReason::Initial)) {
            return;
        }
        self.pull_at = Some(now + self.timings.pull_debounce);
    }

    pub fn set_online(&mut self, online: bool, now: Instant) {
        let reconnected = online && !self.online;
        self.online = online;
        if reconnected && self.signed_in {
            self.request_push(now);
        }
    }

    /// Push as soon as nothing else is in flight.
    pub fn request_push(&mut self, now: Instant) {
        if !self.signed_in {
            return;
        }
        if self.baseline == Baseline::Failed {
            self.baseline = Baseline::Due;
        } else {
            self.push_at = Some(now);
        }
    }

    /// When the next piece of work becomes due, if any is scheduled.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.signed_in || !self.online || self.in_flight.is_some() {
            return None;
        }
        match (self.push_at, self.pull_at) {
            (Some(push), Some(pull)) => Some(push.min(pull)),
            (push, pull) => push.or(pull),
        }
    }

    pub fn has_immediate_work(&self) -> bool {
        self.signed_in && self.online && self.in_flight.is_none() && self.baseline == Baseline::Due
    }

    /// Claim the next due piece of work. A due push always goes before a
    /// due pull.
    pub fn poll(&mut self, now: Instant) -> Option<SyncCommand> {
        if !self.signed_in || !self.online || self.in_flight.is_some() {
            return None;
        }

        let command = if self.baseline == Baseline::Due {
            self.push_at = None;
            self.pull_at = None;
            SyncCommand::Pull(PullReason::Initial)
        } else if self.push_at.is_some_and(|at| at <= now) {
            self.push_at = None;
            if self.baseline == Baseline::Failed {
                SyncCommand::Pull(PullReason::Initial)
            } else {
                SyncCommand::Push
            }
        } else if self.pull_at.is_some_and(|at| at <= now) {
            self.pull_at = None;
            SyncCommand::Pull(PullReason::RemoteChange)
        } else {
            return None;
        };

        self.in_flight = Some(command);
        debug!(?command, "sync work dispatched");
        Some(command)
    }

    /// Report the outcome of the work handed out by the last `poll`.
    pub fn finish(&mut self, succeeded: bool) {
        let Some(command) = self.in_flight.take() else {
            return;
        };
        if command == SyncCommand::Pull(PullReason::Initial) {
            self.baseline = if succeeded {
                Baseline::Known
            } else {
                Baseline::Failed
            };
        }
        debug!(?command, succeeded, phase = %self.phase(), "sync work finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timings() -> SyncTimings {
        SyncTimings {
            push_debounce: Duration::from_secs(2),
            pull_debounce: Duration::from_millis(500),
        }
    }

    fn ready_machine(now: Instant) -> SyncMachine {
        let mut machine = SyncMachine::new(timings());
        machine.signed_in();
        assert_eq!(machine.poll(now), Some(SyncCommand::Pull(PullReason::Initial)));
        machine.finish(true);
        machine
    }

    #[test]
    fn signed_out_machine_ignores_everything() {
        let now = Instant::now();
        let mut machine = SyncMachine::new(timings());
        machine.local_mutation(now);
        machine.remote_changed(now);
        machine.request_push(now);
        assert_eq!(machine.poll(now + Duration::from_secs(10)), None);
        assert_eq!(machine.phase(), SyncPhase::Idle);
    }

    #[test]
    fn initial_pull_runs_before_any_push() {
        let now = Instant::now();
        let mut machine = SyncMachine::new(timings());
        machine.signed_in();
        machine.local_mutation(now);
        assert!(machine.has_immediate_work());
        assert_eq!(machine.poll(now), Some(SyncCommand::Pull(PullReason::Initial)));
        assert_eq!(machine.phase(), SyncPhase::Pulling);
        assert_eq!(machine.poll(now), None);
    }

    #[test]
    fn mutations_reset_the_push_window() {
        let start = Instant::now();
        let mut machine = ready_machine(start);
        machine.local_mutation(start);
        machine.local_mutation(start + Duration::from_millis(1500));
        assert_eq!(machine.phase(), SyncPhase::PendingPush);
        assert_eq!(machine.poll(start + Duration::from_secs(2)), None);
        assert_eq!(
            machine.next_deadline(),
            Some(start + Duration::from_millis(3500))
        );
        assert_eq!(
            machine.poll(start + Duration::from_millis(3500)),
            Some(SyncCommand::Push)
        );
        assert_eq!(machine.phase(), SyncPhase::Pushing);
        machine.finish(false);
        assert_eq!(machine.phase(), SyncPhase::Idle);
        assert_eq!(machine.poll(start + Duration::from_secs(60)), None);
    }

    #[test]
    fn notifications_collapse_into_one_pull() {
        let start = Instant::now();
        let mut machine = ready_machine(start);
        for ms in [0, 100, 200, 300] {
            machine.remote_changed(start + Duration::from_millis(ms));
        }
        assert_eq!(machine.poll(start + Duration::from_millis(700)), None);
        assert_eq!(
            machine.poll(start + Duration::from_millis(800)),
            Some(SyncCommand::Pull(PullReason::RemoteChange))
        );
        machine.finish(true);
        assert_eq!(machine.poll(start + Duration::from_secs(5)), None);
    }

    #[test]
    fn notifications_during_initial_pull_are_dropped() {
        let now = Instant::now();
        let mut machine = SyncMachine::new(timings());
        machine.signed_in();
        machine.remote_changed(now);
        assert_eq!(machine.poll(now), Some(SyncCommand::Pull(PullReason::Initial)));
        machine.remote_changed(now);
        machine.finish(true);
        assert_eq!(machine.next_deadline(), None);
    }

    #[test]
    fn due_push_goes_before_due_pull() {
        let start = Instant::now();
        let mut machine = ready_machine(start);
        machine.remote_changed(start);
        machine.local_mutation(start);
        let later = start + Duration::from_secs(3);
        assert_eq!(machine.poll(later), Some(SyncCommand::Push));
        machine.finish(true);
        assert_eq!(
            machine.poll(later),
            Some(SyncCommand::Pull(PullReason::RemoteChange))
        );
    }

    #[test]
    fn mutation_while_pushing_schedules_another_push() {
        let start = Instant::now();
        let mut machine = ready_machine(start);
        machine.request_push(start);
        assert_eq!(machine.poll(start), Some(SyncCommand::Push));
        machine.local_mutation(start);
        assert_eq!(machine.poll(start), None);
        machine.finish(true);
        assert_eq!(machine.phase(), SyncPhase::PendingPush);
    }

    #[test]
    fn reconnect_pushes_once() {
        let start = Instant::now();
        let mut machine = ready_machine(start);
        machine.set_online(false, start);
        machine.local_mutation(start);
        assert_eq!(machine.poll(start + Duration::from_secs(5)), None);

        machine.set_online(true, start + Duration::from_secs(6));
        assert_eq!(
            machine.poll(start + Duration::from_secs(6)),
            Some(SyncCommand::Push)
        );
        machine.finish(true);
        machine.set_online(true, start + Duration::from_secs(7));
        assert_eq!(machine.poll(start + Duration::from_secs(7)), None);
    }

    #[test]
    fn failed_initial_pull_is_retried_instead_of_pushing() {
        let start = Instant::now();
        let mut machine = SyncMachine::new(timings());
        machine.signed_in();
        assert_eq!(machine.poll(start), Some(SyncCommand::Pull(PullReason::Initial)));
        machine.finish(false);
        assert!(!machine.has_immediate_work());

        machine.local_mutation(start);
        assert_eq!(
            machine.poll(start + Duration::from_secs(2)),
            Some(SyncCommand::Pull(PullReason::Initial))
        );
        machine.finish(true);

        machine.local_mutation(start);
        assert_eq!(
            machine.poll(start + Duration::from_secs(2)),
            Some(SyncCommand::Push)
        );
    }
}
