//! Rolls back sessions left behind by failed or interrupted gates.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::context::RuntimeContext;
use crate::error::{GateError, Result};
use crate::gate::Phase;
use crate::profile::GateProfile;
use crate::resource::ResourceProvider;
use crate::session::{AttachedSession, SessionProvider};

/// Aborts one session, or every created session when no id is given.
///
/// Aborting is best effort: each resource is attempted even if another one
/// fails, and in bulk mode each session is attempted even if another one
/// fails. The failures are reported together at the end.
pub struct AbortTask {
    profile: GateProfile,
    session_id: Option<String>,
    session_provider: Arc<dyn SessionProvider>,
    resource_providers: Vec<(String, Arc<dyn ResourceProvider>)>,
    runtime: RuntimeContext,
}

impl AbortTask {
    pub fn new(profile: GateProfile, session_id: Option<String>) -> Result<Self> {
        debug!("Loading session provider for abort {}", profile.name());
        let session_provider = profile.session().create_provider()?;
        let resource_providers = profile
            .resources()
            .iter()
            .map(|r| Ok((r.name().to_string(), r.create_provider()?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            profile,
            session_id,
            session_provider,
            resource_providers,
            runtime: RuntimeContext::from_env(),
        })
    }

    pub fn with_runtime(mut self, runtime: RuntimeContext) -> Self {
        self.runtime = runtime;
        self
    }

    pub async fn execute(&self) -> Result<()> {
        let target = self.session_id.as_deref().unwrap_or("*");
        let span = info_span!("abort", profile = %self.profile.name(), session_id = %target);
        async {
            let started = Instant::now();
            let result = match &self.session_id {
                Some(id) => self.abort_session(id).await.map(|_| ()),
                None => self.abort_all().await,
            };
            match &result {
                Ok(()) => info!("Abort finished in {:?}", started.elapsed()),
                Err(e) => error!("Abort failed after {:?}: {}", started.elapsed(), e),
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn abort_all(&self) -> Result<()> {
        let ids = if self.runtime.can_execute(self.session_provider.as_ref()) {
            self.session_provider.created_ids().await?
        } else {
            info!("Skipped listing sessions (simulation)");
            Vec::new()
        };
        info!("Aborting {} session(s)", ids.len());

        let mut failures = 0;
        for id in &ids {
            if let Err(e) = self.abort_session(id).await {
                error!(
                    reason = e.session_failure().map(|r| r.as_str()),
                    "Failed to abort session \"{}\": {}",
                    id,
                    e
                );
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(GateError::Abort {
                session_id: "*".to_string(),
                failures,
            });
        }
        Ok(())
    }

    /// Aborts `id`. Returns `false` if the session does not exist.
    pub async fn abort_session(&self, id: &str) -> Result<bool> {
        let mut session = match self.open_session(id).await {
            Ok(session) => session,
            Err(e) if e.is_session_not_found() => {
                info!("Session \"{}\" does not exist; nothing to abort", id);
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let result = self.abort_attached(&mut session).await;
        if let Err(e) = session.close().await {
            warn!("Failed to close session \"{}\": {}", id, e);
        }
        result.map(|()| true)
    }

    async fn open_session(&self, id: &str) -> Result<AttachedSession> {
        if !self.runtime.can_execute(self.session_provider.as_ref()) {
            return Ok(AttachedSession::Simulated { id: id.to_string() });
        }
        debug!("Opening session \"{}\"", id);
        Ok(AttachedSession::Live(self.session_provider.open(id).await?))
    }

    async fn abort_attached(&self, session: &mut AttachedSession) -> Result<()> {
        let id = session.id().to_string();
        let mut failures = 0;
        for (name, provider) in &self.resource_providers {
            if !self.runtime.can_execute(provider.as_ref()) {
                debug!("Skipped aborting resource \"{}\" (simulation)", name);
                continue;
            }
            debug!("Aborting resource \"{}\" for session \"{}\"", name, id);
            if let Err(e) = provider.abort(&id).await {
                error!(
                    "{}",
                    GateError::resource(name.as_str(), Phase::Abort, id.as_str(), e)
                );
                failures += 1;
            }
        }
        if failures > 0 {
            return Err(GateError::Abort {
                session_id: id,
                failures,
            });
        }
        info!("Aborting session \"{}\"", id);
        session.abort().await
    }
}

impl fmt::Debug for AbortTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AbortTask")
            .field("profile", &self.profile.name())
            .field("session_id", &self.session_id)
            .field("runtime", &self.runtime)
            .finish()
    }
}
