//! Persisted identity - a small JSON blob on disk
//!
//! The engine reads the session once at startup and never writes to it.
//! Login and logout (save/clear) are driven by the binary.

use crate::domain::types::{UserId, ZoneConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session io error on {path}: {source}")]
    Io { path: String, source: std::io::Error },
    #[error("corrupt session file {path}: {source}")]
    Json { path: String, source: serde_json::Error },
    #[error("session save task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Authenticated identity plus the zone snapshot it was issued with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: UserId,
    #[serde(default)]
    pub zone: ZoneConfig,
}

/// File-backed key-value blob store for the session
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_err(&self, source: std::io::Error) -> SessionError {
        SessionError::Io { path: self.path.display().to_string(), source }
    }

    /// Load the stored session; `Ok(None)` if nobody is logged in
    pub fn load(&self) -> Result<Option<Session>, SessionError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "session_not_found");
                return Ok(None);
            }
            Err(e) => return Err(self.io_err(e)),
        };

        let session = serde_json::from_str(&content)
            .map_err(|source| SessionError::Json { path: self.path.display().to_string(), source })?;
        Ok(Some(session))
    }

    /// Persist the session, replacing any previous one atomically
    pub fn save(&self, session: &Session) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| self.io_err(e))?;
            }
        }

        let json = serde_json::to_vec_pretty(session)
            .map_err(|source| SessionError::Json { path: self.path.display().to_string(), source })?;

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, json).map_err(|e| self.io_err(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err(e))?;

        info!(path = %self.path.display(), user_id = %session.user_id, "session_saved");
        Ok(())
    }

    /// `save` on the blocking pool, for callers on the async runtime
    pub async fn save_blocking(&self, session: Session) -> Result<(), SessionError> {
        let store = self.clone();
        tokio::task::spawn_blocking(move || store.save(&session)).await?
    }

    /// Remove the stored session; clearing an empty store is not an error
    pub fn clear(&self) -> Result<(), SessionError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "session_cleared");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_session() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_load_clear() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("nested/session.json"));
        let session = Session { user_id: UserId(42), zone: ZoneConfig::circle(34.0, 35.0, 50.0) };

        store.save(&session).unwrap();
        assert_eq!(store.load().unwrap(), Some(session));

        store.clear().unwrap();
        assert_eq!(store.load().unwrap(), None);
        // Second clear is a no-op
        store.clear().unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 1)]
    async fn test_save_blocking_from_runtime() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        let session = Session { user_id: UserId(7), zone: ZoneConfig::circle(1.0, 2.0, 30.0) };

        store.save_blocking(session.clone()).await.unwrap();
        assert_eq!(store.load().unwrap(), Some(session));
        assert!(!dir.path().join("session.tmp").exists());
    }

    #[test]
    fn test_session_without_zone_defaults_to_none() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, r#"{"user_id": 9}"#).unwrap();

        let session = SessionStore::new(&path).load().unwrap().unwrap();
        assert_eq!(session.user_id, UserId(9));
        assert_eq!(session.zone, ZoneConfig::None);
    }

    #[test]
    fn test_corrupt_session_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("session.json");
        fs::write(&path, "{not json").unwrap();

        assert!(matches!(SessionStore::new(&path).load(), Err(SessionError::Json { .. })));
    }
}
