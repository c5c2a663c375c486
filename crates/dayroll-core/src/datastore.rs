use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::clock::DayBoundaryClock;
use crate::error::StoreError;
use crate::rollover::{RolloverReport, maybe_rollover};
use crate::state::AppState;

const SNAPSHOT_FILE: &str = "state.json";

/// Who produced a commit. Only local commits schedule a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOrigin {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Revision {
    /// Bumped on every commit.
    pub seq: u64,
    /// Bumped on local commits only.
    pub local_seq: u64,
}

/// Sole owner of the task collections and settings.
///
/// Readers get an `Arc` of the last committed snapshot. Writers go through
/// [`commit`](Self::commit), which runs the operation on a private copy,
/// writes it to disk and only then swaps it in.
///
/// Other processes may write the same data dir. Before every write the
/// snapshot file is compared with what this store last wrote; a differing
/// file is adopted as a local mutation.
#[derive(Debug)]
pub struct LocalStateStore {
    pub data_dir: PathBuf,
    pub snapshot_path: PathBuf,
    current: Mutex<Current>,
    revisions: watch::Sender<Revision>,
}

#[derive(Debug)]
struct Current {
    state: Arc<AppState>,
    /// Exact file contents of the last load or save.
    on_disk: String,
}

impl LocalStateStore {
    #[tracing::instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> anyhow::Result<Self> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir)
            .with_context(|| format!("failed to create {}", data_dir.display()))?;

        let snapshot_path = data_dir.join(SNAPSHOT_FILE);
        let (state, on_disk) = match load_snapshot(&snapshot_path)? {
            Some(loaded) => loaded,
            None => {
                let state = AppState::default();
                let raw = save_snapshot_atomic(&snapshot_path, &state)?;
                (state, raw)
            }
        };

        let duplicates = state.duplicate_ids();
        if !duplicates.is_empty() {
            warn!(?duplicates, "snapshot holds ids in more than one collection");
        }

        info!(
            data_dir = %data_dir.display(),
            snapshot = %snapshot_path.display(),
            today = state.today.len(),
            backlog = state.backlog.len(),
            recurring = state.recurring.len(),
            done = state.done.len(),
            "opened local store"
        );

        let (revisions, _) = watch::channel(Revision::default());
        Ok(Self {
            data_dir,
            snapshot_path,
            current: Mutex::new(Current {
                state: Arc::new(state),
                on_disk,
            }),
            revisions,
        })
    }

    pub fn snapshot(&self) -> Arc<AppState> {
        Arc::clone(&self.current.lock().state)
    }

    pub fn subscribe(&self) -> watch::Receiver<Revision> {
        self.revisions.subscribe()
    }

    /// Apply `op` as one atomic step. On error nothing is written and the
    /// committed snapshot is unchanged.
    ///
    /// A snapshot file changed by another process is adopted first. A remote
    /// commit is then refused with [`StoreError::ChangedOnDisk`] so the newer
    /// local edit gets pushed instead of overwritten.
    pub fn commit<T, F>(&self, origin: CommitOrigin, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut AppState) -> Result<T, StoreError>,
    {
        let mut current = self.current.lock();
        let adopted = self.adopt_external(&mut current)?;
        if adopted && origin == CommitOrigin::Remote {
            drop(current);
            self.publish(CommitOrigin::Local);
            return Err(StoreError::ChangedOnDisk);
        }

        let mut draft = AppState::clone(&current.state);
        let out = match op(&mut draft) {
            Ok(out) => out,
            Err(err) => {
                drop(current);
                if adopted {
                    self.publish(CommitOrigin::Local);
                }
                return Err(err);
            }
        };

        let raw = save_snapshot_atomic(&self.snapshot_path, &draft).map_err(StoreError::Persist)?;
        current.state = Arc::new(draft);
        current.on_disk = raw;
        drop(current);

        self.publish(if adopted { CommitOrigin::Local } else { origin });
        Ok(out)
    }

    /// Adopt the snapshot file if another process changed it. Returns
    /// whether anything was adopted.
    pub fn refresh(&self) -> Result<bool, StoreError> {
        let mut current = self.current.lock();
        let adopted = self.adopt_external(&mut current)?;
        drop(current);
        if adopted {
            self.publish(CommitOrigin::Local);
        }
        Ok(adopted)
    }

    fn adopt_external(&self, current: &mut Current) -> Result<bool, StoreError> {
        let Some((state, raw)) = load_snapshot(&self.snapshot_path).map_err(StoreError::Persist)?
        else {
            return Ok(false);
        };
        if raw == current.on_disk {
            return Ok(false);
        }

        info!(
            snapshot = %self.snapshot_path.display(),
            today = state.today.len(),
            backlog = state.backlog.len(),
            "snapshot changed by another process; adopting it"
        );
        current.state = Arc::new(state);
        current.on_disk = raw;
        Ok(true)
    }

    fn publish(&self, origin: CommitOrigin) {
        self.revisions.send_modify(|rev| {
            rev.seq += 1;
            if origin == CommitOrigin::Local {
                rev.local_seq += 1;
            }
        });
        debug!(?origin, "committed snapshot");
    }

    /// Shorthand for a user-initiated commit.
    pub fn mutate<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut AppState) -> Result<T, StoreError>,
    {
        self.commit(CommitOrigin::Local, op)
    }

    pub fn replace(&self, state: AppState, origin: CommitOrigin) -> Result<(), StoreError> {
        self.commit(origin, move |draft| {
            *draft = state;
            Ok(())
        })
    }

    /// Run the rollover check against the committed snapshot. Nothing is
    /// written, and no push is scheduled, unless a rollover was due or the
    /// file was changed by another process.
    #[tracing::instrument(skip(self, clock))]
    pub fn rollover(
        &self,
        now: DateTime<Utc>,
        clock: &DayBoundaryClock,
    ) -> Result<Option<RolloverReport>, StoreError> {
        let mut current = self.current.lock();
        let adopted = self.adopt_external(&mut current)?;
        let Some((next, report)) = maybe_rollover(&current.state, now, clock) else {
            drop(current);
            if adopted {
                self.publish(CommitOrigin::Local);
            }
            return Ok(None);
        };

        let raw = save_snapshot_atomic(&self.snapshot_path, &next).map_err(StoreError::Persist)?;
        current.state = Arc::new(next);
        current.on_disk = raw;
        drop(current);

        self.publish(CommitOrigin::Local);
        Ok(Some(report))
    }
}

#[tracing::instrument(skip(path))]
fn load_snapshot(path: &Path) -> anyhow::Result<Option<(AppState, String)>> {
    if !path.exists() {
        return Ok(None);
    }
    debug!(file = %path.display(), "loading snapshot");
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    let state: AppState = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing {}", path.display()))?;
    Ok(Some((state, raw)))
}

/// Returns the exact contents written.
#[tracing::instrument(skip(path, state))]
fn save_snapshot_atomic(path: &Path, state: &AppState) -> anyhow::Result<String> {
    debug!(file = %path.display(), "saving snapshot atomically");

    let mut raw = serde_json::to_string_pretty(state)?;
    raw.push('\n');

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(raw.as_bytes())?;
    temp.flush()?;

    temp.persist(path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    Ok(raw)
}
