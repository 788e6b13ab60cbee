/*
 * WindGate Core - gate execution runtime
 *
 * Moves data between external resources (files, databases, ...) inside a
 * transactional session.
 *
 * Architecture:
 * - Profiles: which session/resource/process providers serve a gate
 * - Scripts: which processes (source -> drain) a gate runs
 * - GateTask: phased execution on a bounded worker pool
 * - AbortTask: best-effort rollback of one or all sessions
 * - Provider SPI: pluggable sessions, resources and processes
 */

// Public modules
pub mod abort;
pub mod context;
pub mod error;
pub mod gate;
pub mod logging;
pub mod parameter;
pub mod pool;
pub mod process;
pub mod profile;
pub mod resource;
pub mod script;
pub mod session;

// Re-exports
pub use abort::AbortTask;
pub use context::{ExecutionMode, ProfileContext, RuntimeContext, ServiceResolver, SimulationSupport};
pub use error::{GateError, Result, SessionFailure};
pub use gate::{GateTask, Phase};
pub use parameter::ParameterList;
pub use pool::{PendingTask, WorkerPool};
pub use process::{PlainProcessProvider, ProcessProvider};
pub use profile::{
    CoreProfile, GateProfile, ProcessProfile, Properties, ResourceProfile, SessionProfile,
};
pub use resource::{
    DataModel, DrainDriver, DriverRepository, ResourceMirror, ResourceProvider, SourceDriver,
};
pub use script::{DriverKind, DriverScript, GateScript, ProcessScript};
pub use session::file::FileSessionProvider;
pub use session::{AttachedSession, SessionMirror, SessionProvider};
