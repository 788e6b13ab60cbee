//! Gate execution: runs every process of a script against the resources of a
//! profile within one session.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, FutureExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::context::RuntimeContext;
use crate::error::{GateError, Result};
use crate::parameter::ParameterList;
use crate::pool::{cancel_pending, wait_for_complete, WorkerPool};
use crate::process::ProcessProvider;
use crate::profile::GateProfile;
use crate::resource::{DriverRepository, ResourceMirror, ResourceProvider};
use crate::script::GateScript;
use crate::session::{AttachedSession, SessionProvider};

/// Name of the worker pool owned by each task.
pub const POOL_NAME: &str = "windgate";

/// Steps of a gate or abort execution, used in logs and errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    AttachSession,
    CreateResources,
    SessionCreated,
    Prepare,
    RunProcesses,
    SessionCompleting,
    CompleteSession,
    Abort,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::AttachSession => "attaching session",
            Phase::CreateResources => "creating resources",
            Phase::SessionCreated => "initializing resources",
            Phase::Prepare => "preparing resources",
            Phase::RunProcesses => "running processes",
            Phase::SessionCompleting => "finalizing resources",
            Phase::CompleteSession => "completing session",
            Phase::Abort => "aborting resources",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type Unit = (String, BoxFuture<'static, Result<()>>);

/// Executes one gate script in one session.
///
/// Phases run strictly one after another; the units inside a phase run on a
/// worker pool bounded by `core.maxProcesses`:
///
/// 1. attach the session (create or open)
/// 2. create a mirror per resource, sequentially
/// 3. if the session was created: transactional resources in order, then the
///    rest in parallel
/// 4. prepare every resource
/// 5. run every process
/// 6. if the session is to be completed: non-transactional resources in
///    parallel, then transactional ones in order, then the session itself
///
/// Resources and the session are closed on every exit path.
pub struct GateTask {
    profile: GateProfile,
    script: Arc<GateScript>,
    session_id: String,
    create_session: bool,
    complete_session: bool,
    arguments: ParameterList,
    session_provider: Arc<dyn SessionProvider>,
    resource_providers: Vec<(String, Arc<dyn ResourceProvider>)>,
    process_providers: HashMap<String, Arc<dyn ProcessProvider>>,
    runtime: RuntimeContext,
    pool: WorkerPool,
    interrupt: CancellationToken,
}

impl GateTask {
    /// Builds every provider named by `profile`.
    ///
    /// Fails if a provider cannot be built or a process of `script` has no
    /// matching process profile.
    pub fn new(
        profile: GateProfile,
        script: GateScript,
        session_id: impl Into<String>,
        create_session: bool,
        complete_session: bool,
        arguments: ParameterList,
    ) -> Result<Self> {
        let session_id = session_id.into();
        debug!("Loading session provider for gate {}", profile.name());
        let session_provider = profile.session().create_provider()?;

        let resource_providers = profile
            .resources()
            .iter()
            .map(|r| Ok((r.name().to_string(), r.create_provider()?)))
            .collect::<Result<Vec<_>>>()?;

        let process_providers = profile
            .processes()
            .iter()
            .map(|p| Ok((p.name().to_string(), p.create_provider()?)))
            .collect::<Result<HashMap<_, _>>>()?;

        if let Some(process) = script
            .processes()
            .iter()
            .find(|p| !process_providers.contains_key(p.process_type()))
        {
            return Err(GateError::config(format!(
                "Process \"{}\" in script {} has unknown type \"{}\"",
                process.name(),
                script.name(),
                process.process_type()
            )));
        }

        let pool = WorkerPool::new(POOL_NAME, profile.core().max_processes());
        Ok(Self {
            profile,
            script: Arc::new(script),
            session_id,
            create_session,
            complete_session,
            arguments,
            session_provider,
            resource_providers,
            process_providers,
            runtime: RuntimeContext::from_env(),
            pool,
            interrupt: CancellationToken::new(),
        })
    }

    pub fn with_runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Token that interrupts a running [`GateTask::execute`] when cancelled.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Shuts down the worker pool. Later executions fail with `PoolClosed`.
    pub fn close(&self) {
        self.pool.shutdown();
    }

    pub async fn execute(&self) -> Result<()> {
        let span = info_span!(
            "gate",
            session_id = %self.session_id,
            profile = %self.profile.name(),
            script = %self.script.name()
        );
        async {
            let started = Instant::now();
            info!(
                "Starting gate (create_session={}, complete_session={}, max_processes={})",
                self.create_session,
                self.complete_session,
                self.pool.size()
            );

            let mut session = self.attach_session().await?;
            let outcome = AssertUnwindSafe(self.run_with_session(&mut session))
                .catch_unwind()
                .await;
            if let Err(e) = session.close().await {
                warn!("Failed to close session: {}", e);
            }
            let result = match outcome {
                Ok(result) => result,
                Err(panic) => {
                    error!("Gate panicked after {:?}", started.elapsed());
                    std::panic::resume_unwind(panic);
                }
            };

            match &result {
                Ok(()) => info!("Gate finished in {:?}", started.elapsed()),
                Err(e) => error!("Gate failed after {:?}: {}", started.elapsed(), e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn attach_session(&self) -> Result<AttachedSession> {
        if !self.runtime.can_execute(self.session_provider.as_ref()) {
            info!("Simulating session");
            return Ok(AttachedSession::Simulated {
                id: self.session_id.clone(),
            });
        }
        let attached = if self.create_session {
            debug!("Creating session");
            self.session_provider.create(&self.session_id).await
        } else {
            debug!("Opening session");
            self.session_provider.open(&self.session_id).await
        };
        match attached {
            Ok(mirror) => Ok(AttachedSession::Live(mirror)),
            Err(e) => {
                error!(
                    reason = e.session_failure().map(|r| r.as_str()),
                    "Failed {}: {}",
                    Phase::AttachSession,
                    e
                );
                Err(e)
            }
        }
    }

    async fn run_with_session(&self, session: &mut AttachedSession) -> Result<()> {
        let resources = self.create_resources().await?;
        let outcome = AssertUnwindSafe(self.run_phases(session, &resources))
            .catch_unwind()
            .await;
        close_resources(&resources).await;
        match outcome {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    async fn run_phases(
        &self,
        session: &mut AttachedSession,
        resources: &[Arc<dyn ResourceMirror>],
    ) -> Result<()> {
        if self.create_session {
            self.fire_session_created(resources).await?;
        }
        self.prepare_resources(resources).await?;
        self.run_processes(resources).await?;
        if self.complete_session {
            self.fire_session_completing(resources).await?;
            info!("Completing session");
            session.complete().await.map_err(|e| {
                error!("Failed {}: {}", Phase::CompleteSession, e);
                e
            })?;
        }
        Ok(())
    }

    async fn create_resources(&self) -> Result<Vec<Arc<dyn ResourceMirror>>> {
        let mut mirrors = Vec::with_capacity(self.resource_providers.len());
        for (name, provider) in &self.resource_providers {
            debug!("Creating resource \"{}\"", name);
            match provider.create(&self.session_id, &self.arguments).await {
                Ok(mirror) => mirrors.push(mirror),
                Err(e) => {
                    error!("Failed to create resource \"{}\": {}", name, e);
                    close_resources(&mirrors).await;
                    return Err(GateError::resource(
                        name.as_str(),
                        Phase::CreateResources,
                        self.session_id.as_str(),
                        e,
                    ));
                }
            }
        }
        Ok(mirrors)
    }

    async fn fire_session_created(&self, resources: &[Arc<dyn ResourceMirror>]) -> Result<()> {
        let phase = Phase::SessionCreated;
        for resource in resources.iter().filter(|r| r.is_transactional()) {
            self.run_sync(phase, resource, |r| async move { r.on_session_created().await })
                .await?;
        }
        let units = resources
            .iter()
            .filter(|r| !r.is_transactional())
            .map(|r| self.resource_unit(phase, r, |r| async move { r.on_session_created().await }))
            .collect();
        self.run_parallel(phase, units).await
    }

    async fn prepare_resources(&self, resources: &[Arc<dyn ResourceMirror>]) -> Result<()> {
        let phase = Phase::Prepare;
        let units = resources
            .iter()
            .map(|r| {
                let script = self.script.clone();
                self.resource_unit(phase, r, move |r| async move { r.prepare(&script).await })
            })
            .collect();
        self.run_parallel(phase, units).await
    }

    async fn run_processes(&self, resources: &[Arc<dyn ResourceMirror>]) -> Result<()> {
        let phase = Phase::RunProcesses;
        let drivers = Arc::new(DriverRepository::new(resources.iter().cloned()));
        let mut units: Vec<Unit> = Vec::with_capacity(self.script.processes().len());
        for process in self.script.processes() {
            let provider = self
                .process_providers
                .get(process.process_type())
                .cloned()
                .ok_or_else(|| {
                    GateError::config(format!("Unknown process type: {}", process.process_type()))
                })?;
            let label = format!("process:{}", process.name());
            let process = process.clone();
            let drivers = drivers.clone();
            let session_id = self.session_id.clone();
            let runtime = self.runtime;
            let work = async move {
                if !runtime.can_execute(provider.as_ref()) {
                    debug!("Skipped process {} (simulation)", process.name());
                    return Ok(());
                }
                debug!("Starting process {}", process.name());
                provider
                    .execute(&drivers, &process)
                    .await
                    .map_err(|e| GateError::Process {
                        process: process.name().to_string(),
                        source_resource: process.source_script().resource_name().to_string(),
                        drain_resource: process.drain_script().resource_name().to_string(),
                        session_id,
                        source: Box::new(e),
                    })
            }
            .boxed();
            units.push((label, work));
        }
        self.run_parallel(phase, units).await
    }

    async fn fire_session_completing(&self, resources: &[Arc<dyn ResourceMirror>]) -> Result<()> {
        let phase = Phase::SessionCompleting;
        let units = resources
            .iter()
            .filter(|r| !r.is_transactional())
            .map(|r| {
                self.resource_unit(phase, r, |r| async move { r.on_session_completing().await })
            })
            .collect();
        self.run_parallel(phase, units).await?;
        for resource in resources.iter().filter(|r| r.is_transactional()) {
            self.run_sync(phase, resource, |r| async move { r.on_session_completing().await })
                .await?;
        }
        Ok(())
    }

    /// Runs one transactional hook on the calling task; the first failure
    /// aborts the phase.
    async fn run_sync<F, Fut>(
        &self,
        phase: Phase,
        resource: &Arc<dyn ResourceMirror>,
        action: F,
    ) -> Result<()>
    where
        F: FnOnce(Arc<dyn ResourceMirror>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if !self.runtime.can_execute(resource.as_ref()) {
            debug!("Skipped {} for \"{}\" (simulation)", phase, resource.name());
            return Ok(());
        }
        debug!("{} for transactional resource \"{}\"", phase, resource.name());
        action(resource.clone()).await.map_err(|e| {
            error!("Failed {} for \"{}\": {}", phase, resource.name(), e);
            GateError::resource(resource.name(), phase, self.session_id.as_str(), e)
        })
    }

    fn resource_unit<F, Fut>(
        &self,
        phase: Phase,
        resource: &Arc<dyn ResourceMirror>,
        action: F,
    ) -> Unit
    where
        F: FnOnce(Arc<dyn ResourceMirror>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let resource = resource.clone();
        let label = format!("resource:{}", resource.name());
        let session_id = self.session_id.clone();
        let runtime = self.runtime;
        let work = async move {
            if !runtime.can_execute(resource.as_ref()) {
                debug!("Skipped {} for \"{}\" (simulation)", phase, resource.name());
                return Ok(());
            }
            debug!("{} \"{}\"", phase, resource.name());
            let name = resource.name().to_string();
            action(resource)
                .await
                .map_err(|e| GateError::resource(name, phase, session_id, e))
        }
        .boxed();
        (label, work)
    }

    /// Submits `units` to the pool, waits for all of them, and fails the phase
    /// if any unit failed.
    async fn run_parallel(&self, phase: Phase, units: Vec<Unit>) -> Result<()> {
        if units.is_empty() {
            return Ok(());
        }
        let mut tasks = Vec::with_capacity(units.len());
        for (label, work) in units {
            match self.pool.submit(label, work) {
                Ok(task) => tasks.push(task),
                Err(e) => {
                    error!("Failed {}: {}", phase, e);
                    cancel_pending(tasks).await;
                    return Err(e);
                }
            }
        }
        let failures = wait_for_complete(phase, tasks, &self.interrupt).await?;
        if failures > 0 {
            error!("Failed {}: {} failure(s)", phase, failures);
            return Err(GateError::phase(phase, self.session_id.as_str(), failures));
        }
        debug!("Finished {}", phase);
        Ok(())
    }
}

impl Drop for GateTask {
    fn drop(&mut self) {
        self.pool.shutdown();
    }
}

impl fmt::Debug for GateTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateTask")
            .field("profile", &self.profile.name())
            .field("script", &self.script.name())
            .field("session_id", &self.session_id)
            .field("create_session", &self.create_session)
            .field("complete_session", &self.complete_session)
            .field("runtime", &self.runtime)
            .finish()
    }
}

/// Closes every mirror; failures are only logged.
async fn close_resources(resources: &[Arc<dyn ResourceMirror>]) {
    for resource in resources {
        debug!("Closing resource \"{}\"", resource.name());
        if let Err(e) = resource.close().await {
            warn!("Failed to close resource \"{}\": {}", resource.name(), e);
        }
    }
}
