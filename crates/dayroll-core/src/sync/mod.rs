//! Keeping the local store consistent with one remote replica per
//! identity.

pub mod coordinator;
pub mod http;
pub mod machine;
pub mod policy;
pub mod remote;
pub mod session;

pub use coordinator::{
    PullOutcome, SyncCoordinator, SyncEvent, SyncHandle, SyncStatus, migrate_local,
    pull_and_merge, push_snapshot,
};
pub use http::HttpRemote;
pub use machine::{PullReason, SyncCommand, SyncMachine, SyncPhase, SyncTimings};
pub use policy::{ConflictPolicy, LastWriteWins, Resolution};
pub use remote::{MemoryRemote, RemoteChange, RemoteDocument, RemoteReplica};
pub use session::{Identity, Session, clear_session, load_session, save_session};

/// Version stamped on every pushed document.
pub const SCHEMA_VERSION: u32 = 1;
