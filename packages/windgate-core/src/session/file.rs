//! Session provider keeping one marker file per live session.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use super::{SessionMirror, SessionProvider};
use crate::context::SimulationSupport;
use crate::error::{GateError, Result, SessionFailure};
use crate::profile::SessionProfile;

const MARKER_EXTENSION: &str = "session";

/// Sessions as marker files under `directory`.
///
/// Acquisitions are tracked in-process; a session opened twice by the same
/// provider fails with [`SessionFailure::Acquired`].
#[derive(Debug, Clone)]
pub struct FileSessionProvider {
    directory: PathBuf,
    acquired: Arc<Mutex<HashSet<String>>>,
}

impl FileSessionProvider {
    pub const KEY: &'static str = "file";
    pub const KEY_DIRECTORY: &'static str = "directory";

    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            acquired: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Reads `session.directory` (with `${...}` expanded).
    pub fn from_profile(profile: &SessionProfile) -> Result<Self> {
        let directory = profile.expanded(Self::KEY_DIRECTORY)?.ok_or_else(|| {
            GateError::config(format!(
                "session.{} must be set for the \"{}\" session provider",
                Self::KEY_DIRECTORY,
                Self::KEY
            ))
        })?;
        Ok(Self::new(directory))
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn marker(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{}.{}", id, MARKER_EXTENSION))
    }

    fn acquire(&self, id: &str) -> Result<FileSession> {
        validate_id(id)?;
        if !self.acquired.lock().insert(id.to_string()) {
            return Err(GateError::session(id, SessionFailure::Acquired));
        }
        Ok(FileSession {
            id: id.to_string(),
            marker: self.marker(id),
            acquired: self.acquired.clone(),
            released: false,
        })
    }
}

impl SimulationSupport for FileSessionProvider {}

#[async_trait]
impl SessionProvider for FileSessionProvider {
    async fn create(&self, id: &str) -> Result<Box<dyn SessionMirror>> {
        let session = self.acquire(id)?;
        tokio::fs::create_dir_all(&self.directory).await?;
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&session.marker)
            .await
        {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(GateError::session(id, SessionFailure::AlreadyExists));
            }
            Err(e) => return Err(e.into()),
        }
        info!("Created session: {}", id);
        Ok(Box::new(session))
    }

    async fn open(&self, id: &str) -> Result<Box<dyn SessionMirror>> {
        let session = self.acquire(id)?;
        match tokio::fs::metadata(&session.marker).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Err(GateError::session(id, SessionFailure::Broken)),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(GateError::session(id, SessionFailure::NotExist));
            }
            Err(e) => return Err(e.into()),
        }
        debug!("Opened session: {}", id);
        Ok(Box::new(session))
    }

    async fn created_ids(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.directory).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(MARKER_EXTENSION) {
                continue;
            }
            if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Session acquired from a [`FileSessionProvider`]. Dropping it releases the
/// acquisition.
#[derive(Debug)]
struct FileSession {
    id: String,
    marker: PathBuf,
    acquired: Arc<Mutex<HashSet<String>>>,
    released: bool,
}

impl FileSession {
    fn release(&mut self) {
        if !self.released {
            self.acquired.lock().remove(&self.id);
            self.released = true;
        }
    }
}

impl Drop for FileSession {
    fn drop(&mut self) {
        self.release();
    }
}

#[async_trait]
impl SessionMirror for FileSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn complete(&mut self) -> Result<()> {
        match tokio::fs::remove_file(&self.marker).await {
            Ok(()) => {
                info!("Completed session: {}", self.id);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(GateError::session(&self.id, SessionFailure::Broken))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn abort(&mut self) -> Result<()> {
        match tokio::fs::remove_file(&self.marker).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Aborted session: {}", self.id);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.release();
        Ok(())
    }
}

fn validate_id(id: &str) -> Result<()> {
    let valid = !id.is_empty()
        && !id.starts_with('.')
        && !id.contains(|c: char| c == '/' || c == '\\' || c.is_control());
    if valid {
        Ok(())
    } else {
        Err(GateError::config(format!("Invalid session id: {:?}", id)))
    }
}
