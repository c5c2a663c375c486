//! Executes [`SyncMachine`] decisions against a remote replica.
//!
//! The coordinator is a single task. Local commits reach it through the
//! store's revision channel, remote changes through the replica's change
//! channel, and everything else through [`SyncHandle`]. Work runs inline in
//! the loop, so a push and a pull can never overlap.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::machine::{PullReason, SyncCommand, SyncMachine, SyncPhase, SyncTimings};
use super::policy::{ConflictPolicy, Resolution};
use super::remote::{RemoteChange, RemoteReplica};
use super::session::{Identity, Session};
use crate::datastore::{CommitOrigin, LocalStateStore};
use crate::error::SyncError;

const EVENT_CHANNEL_CAPACITY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    SignIn(Session),
    SignOut,
    RemoteChanged(Identity),
    Online(bool),
    SyncNow,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub signed_in: bool,
    pub online: bool,
    pub last_synced: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_error: Option<SyncError>,
}

impl SyncStatus {
    fn initial() -> Self {
        Self {
            phase: SyncPhase::Idle,
            signed_in: false,
            online: true,
            last_synced: None,
            last_seen: None,
            last_error: None,
        }
    }

    /// Local changes may not have reached the remote yet.
    pub fn is_degraded(&self) -> bool {
        self.signed_in && (!self.online || self.last_error.is_some())
    }
}

/// What a pull did to the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    Applied(DateTime<Utc>),
    AlreadyCurrent,
    Migrated(DateTime<Utc>),
    /// Another session created the remote document first; it was left alone.
    MigrationSkipped,
    NoRemote,
}

impl PullOutcome {
    pub fn stamp(self) -> Option<DateTime<Utc>> {
        match self {
            Self::Applied(at) | Self::Migrated(at) => Some(at),
            _ => None,
        }
    }
}

/// Send the full local snapshot. Returns the remote's stamp for it.
#[tracing::instrument(skip_all, fields(identity = %session.identity))]
pub async fn push_snapshot(
    store: &LocalStateStore,
    remote: &dyn RemoteReplica,
    session: &Session,
) -> Result<DateTime<Utc>, SyncError> {
    store
        .refresh()
        .map_err(|err| SyncError::LocalApply(format!("{err:#}")))?;
    let snapshot = store.snapshot();
    let stamp = remote.upsert(session, &snapshot).await?;
    info!(updated_at = %stamp, "pushed local snapshot");
    Ok(stamp)
}

/// One-time upload of local data for an identity with no remote document.
/// Never overwrites a document that already exists.
#[tracing::instrument(skip_all, fields(identity = %session.identity))]
pub async fn migrate_local(
    store: &LocalStateStore,
    remote: &dyn RemoteReplica,
    session: &Session,
) -> Result<PullOutcome, SyncError> {
    if remote.fetch(session).await?.is_some() {
        info!("remote document already exists; migration skipped");
        return Ok(PullOutcome::MigrationSkipped);
    }
    let stamp = push_snapshot(store, remote, session).await?;
    info!("migrated local data to remote");
    Ok(PullOutcome::Migrated(stamp))
}

/// Fetch the remote document and reconcile it with `policy`. An initial
/// pull that finds nothing migrates local data.
#[tracing::instrument(skip(store, remote, policy, session), fields(identity = %session.identity))]
pub async fn pull_and_merge(
    store: &LocalStateStore,
    remote: &dyn RemoteReplica,
    policy: &dyn ConflictPolicy,
    session: &Session,
    last_seen: Option<DateTime<Utc>>,
    reason: PullReason,
) -> Result<PullOutcome, SyncError> {
    let document = remote.fetch(session).await?;
    match policy.resolve(&session.identity, document, last_seen)? {
        Resolution::Replace { data, updated_at } => {
            store
                .replace(*data, CommitOrigin::Remote)
                .map_err(|err| SyncError::LocalApply(format!("{err:#}")))?;
            info!(%updated_at, "applied remote document");
            Ok(PullOutcome::Applied(updated_at))
        }
        Resolution::KeepLocal => Ok(PullOutcome::AlreadyCurrent),
        Resolution::NoRemote if reason == PullReason::Initial => {
            migrate_local(store, remote, session).await
        }
        Resolution::NoRemote => {
            debug!("remote document is gone; keeping local state");
            Ok(PullOutcome::NoRemote)
        }
    }
}

/// Control surface of a running coordinator.
pub struct SyncHandle {
    events: mpsc::Sender<SyncEvent>,
    status: watch::Receiver<SyncStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SyncHandle {
    async fn send(&self, event: SyncEvent) {
        if self.events.send(event).await.is_err() {
            warn!("sync coordinator has stopped; event dropped");
        }
    }

    pub async fn sign_in(&self, session: Session) {
        self.send(SyncEvent::SignIn(session)).await;
    }

    pub async fn sign_out(&self) {
        self.send(SyncEvent::SignOut).await;
    }

    pub async fn remote_changed(&self, identity: Identity) {
        self.send(SyncEvent::RemoteChanged(identity)).await;
    }

    pub async fn set_online(&self, online: bool) {
        self.send(SyncEvent::Online(online)).await;
    }

    pub async fn sync_now(&self) {
        self.send(SyncEvent::SyncNow).await;
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(err) = self.task.await {
            error!(error = %err, "sync coordinator task failed");
        }
    }
}

pub struct SyncCoordinator {
    store: Arc<LocalStateStore>,
    remote: Arc<dyn RemoteReplica>,
    policy: Arc<dyn ConflictPolicy>,
    machine: SyncMachine,
    session: Option<Session>,
    last_seen: Option<DateTime<Utc>>,
    last_synced: Option<DateTime<Utc>>,
    last_error: Option<SyncError>,
    status: watch::Sender<SyncStatus>,
}

impl SyncCoordinator {
    pub fn new(
        store: Arc<LocalStateStore>,
        remote: Arc<dyn RemoteReplica>,
        policy: Arc<dyn ConflictPolicy>,
        timings: SyncTimings,
    ) -> Self {
        let (status, _) = watch::channel(SyncStatus::initial());
        Self {
            store,
            remote,
            policy,
            machine: SyncMachine::new(timings),
            session: None,
            last_seen: None,
            last_synced: None,
            last_error: None,
            status,
        }
    }

    /// Start the coordinator task, signed in when `session` is given.
    pub fn spawn(mut self, session: Option<Session>, cancel: CancellationToken) -> SyncHandle {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let status = self.status.subscribe();
        let changes = session.and_then(|session| self.sign_in(session));
        let task = tokio::spawn(self.run(events_rx, changes, cancel.clone()));
        SyncHandle {
            events: events_tx,
            status,
            cancel,
            task,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<SyncEvent>,
        mut changes: Option<broadcast::Receiver<RemoteChange>>,
        cancel: CancellationToken,
    ) {
        let mut revisions = self.store.subscribe();
        let mut last_local_seq = revisions.borrow_and_update().local_seq;
        info!("sync coordinator started");

        loop {
            self.publish_status();
            if let Some(command) = self.machine.poll(Instant::now()) {
                self.publish_status();
                self.execute(command).await;
                continue;
            }

            let deadline = self.machine.next_deadline();
            tokio::select! {
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if let Some(next) = self.handle_event(event) {
                        changes = next;
                    }
                }
                changed = revisions.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let revision = *revisions.borrow_and_update();
                    if revision.local_seq > last_local_seq {
                        last_local_seq = revision.local_seq;
                        self.machine.local_mutation(Instant::now());
                    }
                }
                change = next_change(&mut changes) => match change {
                    Ok(change) => self.on_remote_change(&change.identity),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "change notifications lagged");
                        if let Some(identity) = self.session.as_ref().map(|s| s.identity.clone()) {
                            self.on_remote_change(&identity);
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("remote change channel closed");
                        changes = None;
                    }
                },
                () = sleep_until_deadline(deadline) => {}
            }
        }

        info!("sync coordinator stopped");
    }

    /// Returns a replacement change receiver when the session changed.
    fn handle_event(
        &mut self,
        event: SyncEvent,
    ) -> Option<Option<broadcast::Receiver<RemoteChange>>> {
        let now = Instant::now();
        match event {
            SyncEvent::SignIn(session) => Some(self.sign_in(session)),
            SyncEvent::SignOut => {
                info!("signed out; sync disabled");
                self.session = None;
                self.last_seen = None;
                self.last_error = None;
                self.machine.signed_out();
                Some(None)
            }
            SyncEvent::RemoteChanged(identity) => {
                self.on_remote_change(&identity);
                None
            }
            SyncEvent::Online(online) => {
                info!(online, "connectivity changed");
                self.machine.set_online(online, now);
                None
            }
            SyncEvent::SyncNow => {
                if self.session.is_none() {
                    self.last_error = Some(SyncError::AuthRequired);
                }
                self.machine.request_push(now);
                None
            }
        }
    }

    fn sign_in(&mut self, session: Session) -> Option<broadcast::Receiver<RemoteChange>> {
        info!(identity = %session.identity, "signed in; initial pull scheduled");
        let changes = self.remote.subscribe(&session);
        self.last_seen = session.last_seen;
        self.session = Some(session);
        self.last_error = None;
        self.machine.signed_in();
        changes
    }

    fn on_remote_change(&mut self, identity: &Identity) {
        match &self.session {
            Some(session) if &session.identity == identity => {
                self.machine.remote_changed(Instant::now());
            }
            Some(session) => {
                warn!(expected = %session.identity, received = %identity, "ignoring change for another identity");
            }
            None => debug!("ignoring remote change while signed out"),
        }
    }

    async fn execute(&mut self, command: SyncCommand) {
        let Some(session) = self.session.clone() else {
            self.machine.finish(false);
            return;
        };

        let result = match command {
            SyncCommand::Push => push_snapshot(&self.store, &*self.remote, &session)
                .await
                .map(Some),
            SyncCommand::Pull(reason) => pull_and_merge(
                &self.store,
                &*self.remote,
                &*self.policy,
                &session,
                self.last_seen,
                reason,
            )
            .await
            .map(|outcome| {
                debug!(?outcome, "pull finished");
                outcome.stamp()
            }),
        };

        match result {
            Ok(stamp) => {
                if let Some(stamp) = stamp {
                    self.last_seen = Some(self.last_seen.map_or(stamp, |seen| seen.max(stamp)));
                }
                self.last_synced = Some(Utc::now());
                self.last_error = None;
                self.machine.finish(true);
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(?command, error = %err, "sync failed; local changes kept, will retry");
                } else {
                    error!(?command, error = %err, "sync failed");
                }
                self.last_error = Some(err);
                self.machine.finish(false);
            }
        }
    }

    fn publish_status(&self) {
        let next = SyncStatus {
            phase: self.machine.phase(),
            signed_in: self.machine.is_signed_in(),
            online: self.machine.is_online(),
            last_synced: self.last_synced,
            last_seen: self.last_seen,
            last_error: self.last_error.clone(),
        };
        self.status.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}

async fn next_change(
    changes: &mut Option<broadcast::Receiver<RemoteChange>>,
) -> Result<RemoteChange, broadcast::error::RecvError> {
    match changes {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
