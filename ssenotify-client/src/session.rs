//! Stable session id for a client installation

use ssenotify_core::SessionId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::Result;

/// Storage key (file name) the session id is persisted under
pub const SESSION_ID_KEY: &str = "session_id";

/// Supplies the session id a client subscribes and fires with.
pub trait SessionIdSource: Send + Sync {
    fn session_id(&self) -> Result<SessionId>;
}

/// Session id generated once and persisted to a file.
///
/// Every call returns the same id until the file is removed. An unreadable
/// or blank file is replaced with a fresh id.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store under `<dir>/session_id`
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(SESSION_ID_KEY))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Option<SessionId>> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => Ok(SessionId::parse(contents.trim()).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, session_id: &SessionId) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, session_id.as_str())?;
        Ok(())
    }
}

impl SessionIdSource for FileSessionStore {
    fn session_id(&self) -> Result<SessionId> {
        match self.load() {
            Ok(Some(session_id)) => {
                debug!(path = %self.path.display(), "Reusing persisted session id");
                return Ok(session_id);
            }
            Ok(None) => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read session id, generating a new one");
            }
        }

        let session_id = SessionId::generate();
        self.store(&session_id)?;
        info!(path = %self.path.display(), session_id = %session_id, "Generated new session id");
        Ok(session_id)
    }
}

/// Fixed session id
#[derive(Debug, Clone)]
pub struct StaticSessionId(pub SessionId);

impl SessionIdSource for StaticSessionId {
    fn session_id(&self) -> Result<SessionId> {
        Ok(self.0.clone())
    }
}
