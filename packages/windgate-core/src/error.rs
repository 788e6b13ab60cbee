use thiserror::Error;

use crate::gate::Phase;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    /// Invalid profile, script, or task arguments. Raised eagerly, never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session \"{id}\" {reason}")]
    Session { id: String, reason: SessionFailure },

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Resource \"{resource}\" failed in {phase} (session={session_id}): {source}")]
    Resource {
        resource: String,
        phase: Phase,
        session_id: String,
        #[source]
        source: Box<GateError>,
    },

    #[error("Process {process} failed: source={source_resource} -> drain={drain_resource} (session={session_id}): {source}")]
    Process {
        process: String,
        source_resource: String,
        drain_resource: String,
        session_id: String,
        #[source]
        source: Box<GateError>,
    },

    /// Aggregate failure of one phase, raised after every unit was attempted.
    #[error("{phase} failed in session \"{session_id}\" ({failures} failure(s))")]
    Phase {
        phase: Phase,
        session_id: String,
        failures: usize,
    },

    #[error("Failed to abort session \"{session_id}\" ({failures} failure(s))")]
    Abort { session_id: String, failures: usize },

    #[error("Interrupted while waiting for {0}")]
    Interrupted(Phase),

    #[error("Worker pool is already shut down")]
    PoolClosed,

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GateError {
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn session(id: impl Into<String>, reason: SessionFailure) -> Self {
        Self::Session {
            id: id.into(),
            reason,
        }
    }

    pub fn resource(
        resource: impl Into<String>,
        phase: Phase,
        session_id: impl Into<String>,
        source: GateError,
    ) -> Self {
        Self::Resource {
            resource: resource.into(),
            phase,
            session_id: session_id.into(),
            source: Box::new(source),
        }
    }

    pub fn phase(phase: Phase, session_id: impl Into<String>, failures: usize) -> Self {
        Self::Phase {
            phase,
            session_id: session_id.into(),
            failures,
        }
    }

    /// The reason of a session failure, if this is one.
    pub fn session_failure(&self) -> Option<SessionFailure> {
        match self {
            GateError::Session { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Whether this is the "session does not exist" flavour of session failure.
    pub fn is_session_not_found(&self) -> bool {
        self.session_failure() == Some(SessionFailure::NotExist)
    }
}

/// Why a session operation was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionFailure {
    NotExist,
    AlreadyExists,
    /// Held by another execution.
    Acquired,
    Broken,
}

impl SessionFailure {
    /// Stable identifier, used as the `reason` field of log events.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionFailure::NotExist => "not_exist",
            SessionFailure::AlreadyExists => "already_exists",
            SessionFailure::Acquired => "acquired",
            SessionFailure::Broken => "broken",
        }
    }

    fn describe(&self) -> &'static str {
        match self {
            SessionFailure::NotExist => "does not exist",
            SessionFailure::AlreadyExists => "already exists",
            SessionFailure::Acquired => "is acquired by another process",
            SessionFailure::Broken => "is broken",
        }
    }
}

impl std::fmt::Display for SessionFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.describe())
    }
}
