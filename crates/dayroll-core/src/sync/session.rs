use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, info};

const SESSION_FILE: &str = "session.toml";

/// The authenticated account a remote document belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub identity: Identity,
    pub access_token: String,
    /// Newest remote stamp this device has pushed or applied.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(identity: impl Into<Identity>, access_token: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            access_token: access_token.into(),
            last_seen: None,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.identity)
            .field("access_token", &"<redacted>")
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

pub fn session_path(data_dir: &Path) -> PathBuf {
    data_dir.join(SESSION_FILE)
}

#[tracing::instrument(skip(data_dir))]
pub fn load_session(data_dir: &Path) -> anyhow::Result<Option<Session>> {
    let path = session_path(data_dir);
    if !path.exists() {
        debug!(file = %path.display(), "no session file");
        return Ok(None);
    }

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading {}", path.display()))?;
    let session: Session =
        toml::from_str(&raw).with_context(|| format!("failed parsing {}", path.display()))?;
    debug!(identity = %session.identity, "loaded session");
    Ok(Some(session))
}

#[tracing::instrument(skip(data_dir, session), fields(identity = %session.identity))]
pub fn save_session(data_dir: &Path, session: &Session) -> anyhow::Result<()> {
    let path = session_path(data_dir);
    let body = toml::to_string(session).context("failed serializing session")?;

    let mut temp = NamedTempFile::new_in(data_dir)?;
    temp.write_all(body.as_bytes())?;
    temp.flush()?;
    temp.persist(&path)
        .map_err(|err| anyhow!("failed to persist {}: {}", path.display(), err))?;

    info!(file = %path.display(), "signed in");
    Ok(())
}

/// Remove the session file. Returns whether one existed.
pub fn clear_session(data_dir: &Path) -> anyhow::Result<bool> {
    let path = session_path(data_dir);
    if !path.exists() {
        return Ok(false);
    }
    fs::remove_file(&path).with_context(|| format!("failed removing {}", path.display()))?;
    info!(file = %path.display(), "signed out");
    Ok(true)
}
