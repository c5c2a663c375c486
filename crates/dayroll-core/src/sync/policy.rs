use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};

use super::SCHEMA_VERSION;
use super::remote::RemoteDocument;
use super::session::Identity;
use crate::error::SyncError;
use crate::state::AppState;

/// What a pull should do to the local store.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Replace every local collection and the settings.
    Replace {
        data: Box<AppState>,
        updated_at: DateTime<Utc>,
    },
    /// The remote copy is one this device already has.
    KeepLocal,
    /// The identity has no remote document yet.
    NoRemote,
}

/// Decides how a pulled document is reconciled with local state. Only
/// consulted on pull; a push always sends the full local snapshot.
pub trait ConflictPolicy: Send + Sync {
    /// `last_seen` is the `updatedAt` of the last document this device
    /// pushed or applied.
    fn resolve(
        &self,
        identity: &Identity,
        remote: Option<RemoteDocument>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<Resolution, SyncError>;
}

/// Whole-document last-write-wins keyed by the remote `updatedAt`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LastWriteWins;

impl ConflictPolicy for LastWriteWins {
    fn resolve(
        &self,
        identity: &Identity,
        remote: Option<RemoteDocument>,
        last_seen: Option<DateTime<Utc>>,
    ) -> Result<Resolution, SyncError> {
        let Some(document) = remote else {
            return Ok(Resolution::NoRemote);
        };

        if &document.identity != identity {
            error!(
                expected = %identity,
                received = %document.identity,
                "pulled document belongs to another identity; discarding"
            );
            return Err(SyncError::IdentityMismatch {
                expected: identity.to_string(),
                received: document.identity.to_string(),
            });
        }

        if document.schema_version != SCHEMA_VERSION {
            warn!(
                remote = document.schema_version,
                local = SCHEMA_VERSION,
                "schema version mismatch; applying document as-is"
            );
        }

        if last_seen.is_some_and(|seen| document.updated_at <= seen) {
            debug!(updated_at = %document.updated_at, "remote document already applied");
            return Ok(Resolution::KeepLocal);
        }

        Ok(Resolution::Replace {
            data: Box::new(document.data),
            updated_at: document.updated_at,
        })
    }
}
