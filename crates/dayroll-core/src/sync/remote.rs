use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::debug;

use super::SCHEMA_VERSION;
use super::session::{Identity, Session};
use crate::error::SyncError;
use crate::state::AppState;

const CHANGE_CHANNEL_CAPACITY: usize = 16;

/// One stored document per identity.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteDocument {
    pub identity: Identity,
    pub data: AppState,
    pub schema_version: u32,
    pub updated_at: DateTime<Utc>,
}

/// "Your document changed" notification. Carries no payload; the receiver
/// re-pulls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteChange {
    pub identity: Identity,
}

/// The single remote replica shared by every device of an identity.
#[async_trait]
pub trait RemoteReplica: Send + Sync {
    async fn fetch(&self, session: &Session) -> Result<Option<RemoteDocument>, SyncError>;

    /// Store `data` as the identity's document. Returns the replica's
    /// `updatedAt` stamp for the write.
    async fn upsert(&self, session: &Session, data: &AppState) -> Result<DateTime<Utc>, SyncError>;

    async fn delete(&self, session: &Session) -> Result<(), SyncError>;

    /// Change notifications for `session`'s identity, if the replica can
    /// push them. Callers that get `None` have to poll.
    fn subscribe(&self, session: &Session) -> Option<broadcast::Receiver<RemoteChange>>;
}

/// In-process replica. Multiple local stores can share one to act as
/// separate devices of the same account.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    documents: Mutex<HashMap<Identity, RemoteDocument>>,
    channels: Mutex<HashMap<Identity, broadcast::Sender<RemoteChange>>>,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
    offline: AtomicBool,
    upserts: AtomicUsize,
    fetches: AtomicUsize,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate losing connectivity. Every call fails with
    /// `NetworkUnavailable` until reconnected.
    pub fn set_reachable(&self, reachable: bool) {
        self.offline.store(!reachable, Ordering::SeqCst);
    }

    pub fn upsert_count(&self) -> usize {
        self.upserts.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn document(&self, identity: &Identity) -> Option<RemoteDocument> {
        self.documents.lock().get(identity).cloned()
    }

    /// Store a document under `key` as-is, whatever identity it claims.
    pub fn put_document(&self, key: &Identity, document: RemoteDocument) {
        self.documents.lock().insert(key.clone(), document);
        self.notify(key);
    }

    /// A timestamp strictly after every earlier one, even within the same
    /// clock tick.
    pub fn next_stamp(&self) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock();
        let now = Utc::now();
        let stamp = match *last {
            Some(prev) if prev >= now => prev + Duration::microseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    fn check(&self, session: &Session) -> Result<(), SyncError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(SyncError::NetworkUnavailable("memory remote is offline".to_string()));
        }
        if session.access_token.is_empty() {
            return Err(SyncError::AuthRequired);
        }
        Ok(())
    }

    fn notify(&self, identity: &Identity) {
        if let Some(sender) = self.channels.lock().get(identity) {
            // no subscribers is fine
            let receivers = sender
                .send(RemoteChange {
                    identity: identity.clone(),
                })
                .unwrap_or(0);
            debug!(%identity, receivers, "remote change broadcast");
        }
    }
}

#[async_trait]
impl RemoteReplica for MemoryRemote {
    async fn fetch(&self, session: &Session) -> Result<Option<RemoteDocument>, SyncError> {
        self.check(session)?;
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.documents.lock().get(&session.identity).cloned())
    }

    async fn upsert(&self, session: &Session, data: &AppState) -> Result<DateTime<Utc>, SyncError> {
        self.check(session)?;
        let updated_at = self.next_stamp();
        self.documents.lock().insert(
            session.identity.clone(),
            RemoteDocument {
                identity: session.identity.clone(),
                data: data.clone(),
                schema_version: SCHEMA_VERSION,
                updated_at,
            },
        );
        self.upserts.fetch_add(1, Ordering::SeqCst);
        self.notify(&session.identity);
        Ok(updated_at)
    }

    async fn delete(&self, session: &Session) -> Result<(), SyncError> {
        self.check(session)?;
        if self.documents.lock().remove(&session.identity).is_some() {
            self.notify(&session.identity);
        }
        Ok(())
    }

    fn subscribe(&self, session: &Session) -> Option<broadcast::Receiver<RemoteChange>> {
        let mut channels = self.channels.lock();
        let sender = channels
            .entry(session.identity.clone())
            .or_insert_with(|| broadcast::channel(CHANGE_CHANNEL_CAPACITY).0);
        Some(sender.subscribe())
    }
}
