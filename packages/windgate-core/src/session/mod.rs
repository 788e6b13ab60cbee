//! Session SPI: a transaction-scoped id shared by every resource of one gate run.

pub mod file;

use async_trait::async_trait;
use tracing::debug;

use crate::context::SimulationSupport;
use crate::error::Result;

/// Creates and opens sessions by id.
#[async_trait]
pub trait SessionProvider: SimulationSupport + Send + Sync {
    /// Creates a new session and acquires it.
    /// Fails with `SessionFailure::AlreadyExists` if the id is taken.
    async fn create(&self, id: &str) -> Result<Box<dyn SessionMirror>>;

    /// Acquires an existing session.
    /// Fails with `SessionFailure::NotExist` if there is no such session.
    async fn open(&self, id: &str) -> Result<Box<dyn SessionMirror>>;

    /// Ids of sessions that were created and neither completed nor aborted.
    async fn created_ids(&self) -> Result<Vec<String>>;
}

/// An acquired session.
#[async_trait]
pub trait SessionMirror: Send + Sync {
    fn id(&self) -> &str;

    /// Marks the session as successfully completed.
    async fn complete(&mut self) -> Result<()>;

    /// Discards the session.
    async fn abort(&mut self) -> Result<()>;

    /// Releases the acquisition. Called on every exit path.
    async fn close(&mut self) -> Result<()>;
}

/// Session held by a running task.
///
/// `Simulated` stands in when the session provider cannot execute in the
/// current runtime mode; every operation on it is a no-op.
pub enum AttachedSession {
    Live(Box<dyn SessionMirror>),
    Simulated { id: String },
}

impl AttachedSession {
    pub fn id(&self) -> &str {
        match self {
            AttachedSession::Live(mirror) => mirror.id(),
            AttachedSession::Simulated { id } => id,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, AttachedSession::Simulated { .. })
    }

    pub async fn complete(&mut self) -> Result<()> {
        match self {
            AttachedSession::Live(mirror) => mirror.complete().await,
            AttachedSession::Simulated { id } => {
                debug!("Skipped completing simulated session: {}", id);
                Ok(())
            }
        }
    }

    pub async fn abort(&mut self) -> Result<()> {
        match self {
            AttachedSession::Live(mirror) => mirror.abort().await,
            AttachedSession::Simulated { id } => {
                debug!("Skipped aborting simulated session: {}", id);
                Ok(())
            }
        }
    }

    pub async fn close(&mut self) -> Result<()> {
        match self {
            AttachedSession::Live(mirror) => mirror.close().await,
            AttachedSession::Simulated { .. } => Ok(()),
        }
    }
}

impl std::fmt::Debug for AttachedSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachedSession::Live(mirror) => f.debug_tuple("Live").field(&mirror.id()).finish(),
            AttachedSession::Simulated { id } => {
                f.debug_struct("Simulated").field("id", id).finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simulated_session_is_noop() {
        let mut session = AttachedSession::Simulated {
            id: "s1".to_string(),
        };
        assert_eq!(session.id(), "s1");
        assert!(session.is_simulated());
        session.complete().await.unwrap();
        session.abort().await.unwrap();
        session.close().await.unwrap();
    }
}
