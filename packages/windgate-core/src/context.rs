//! Contexts shared by profiles and tasks.
//!
//! - [`ServiceResolver`]: string-keyed factories for session, resource and
//!   process providers, plus the set of known data classes
//! - [`ProfileContext`]: resolver + context parameters + typed resources handed
//!   to provider factories
//! - [`RuntimeContext`]: decides whether a component really executes or is
//!   skipped because the gate runs as a simulation

use std::any::{Any, TypeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::parameter::ParameterList;
use crate::process::{PlainProcessProvider, ProcessProvider};
use crate::profile::{ProcessProfile, ResourceProfile, SessionProfile};
use crate::resource::ResourceProvider;
use crate::session::file::FileSessionProvider;
use crate::session::SessionProvider;

pub type SessionFactory =
    Arc<dyn Fn(&SessionProfile) -> Result<Arc<dyn SessionProvider>> + Send + Sync>;
pub type ResourceFactory =
    Arc<dyn Fn(&ResourceProfile) -> Result<Arc<dyn ResourceProvider>> + Send + Sync>;
pub type ProcessFactory =
    Arc<dyn Fn(&ProcessProfile) -> Result<Arc<dyn ProcessProvider>> + Send + Sync>;

/// Registry of provider factories keyed by the provider name used in profiles.
#[derive(Clone, Default)]
pub struct ServiceResolver {
    sessions: HashMap<String, SessionFactory>,
    resources: HashMap<String, ResourceFactory>,
    processes: HashMap<String, ProcessFactory>,
    data_classes: BTreeSet<String>,
}

impl ServiceResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver with the providers bundled in this crate
    /// (`file` session provider, `plain` process provider).
    pub fn with_builtins() -> Self {
        Self::new()
            .register_session(FileSessionProvider::KEY, |profile| {
                Ok(Arc::new(FileSessionProvider::from_profile(profile)?) as Arc<dyn SessionProvider>)
            })
            .register_process(PlainProcessProvider::KEY, |_| {
                Ok(Arc::new(PlainProcessProvider::new()) as Arc<dyn ProcessProvider>)
            })
    }

    pub fn register_session<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&SessionProfile) -> Result<Arc<dyn SessionProvider>> + Send + Sync + 'static,
    {
        self.sessions.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn register_resource<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ResourceProfile) -> Result<Arc<dyn ResourceProvider>> + Send + Sync + 'static,
    {
        self.resources.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn register_process<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ProcessProfile) -> Result<Arc<dyn ProcessProvider>> + Send + Sync + 'static,
    {
        self.processes.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn register_data_class(mut self, name: impl Into<String>) -> Self {
        self.data_classes.insert(name.into());
        self
    }

    pub fn session_factory(&self, key: &str) -> Option<&SessionFactory> {
        self.sessions.get(key)
    }

    pub fn resource_factory(&self, key: &str) -> Option<&ResourceFactory> {
        self.resources.get(key)
    }

    pub fn process_factory(&self, key: &str) -> Option<&ProcessFactory> {
        self.processes.get(key)
    }

    pub fn has_data_class(&self, name: &str) -> bool {
        self.data_classes.contains(name)
    }
}

impl fmt::Debug for ServiceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut sessions: Vec<_> = self.sessions.keys().collect();
        let mut resources: Vec<_> = self.resources.keys().collect();
        let mut processes: Vec<_> = self.processes.keys().collect();
        sessions.sort();
        resources.sort();
        processes.sort();
        f.debug_struct("ServiceResolver")
            .field("sessions", &sessions)
            .field("resources", &resources)
            .field("processes", &processes)
            .field("data_classes", &self.data_classes)
            .finish()
    }
}

/// Context handed to every profile and, through it, to provider factories.
#[derive(Clone)]
pub struct ProfileContext {
    resolver: Arc<ServiceResolver>,
    parameters: ParameterList,
    resources: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl ProfileContext {
    pub fn new(resolver: Arc<ServiceResolver>, parameters: ParameterList) -> Self {
        Self {
            resolver,
            parameters,
            resources: Arc::new(HashMap::new()),
        }
    }

    /// Context whose parameters are the process environment variables.
    pub fn system(resolver: Arc<ServiceResolver>) -> Self {
        Self::new(resolver, ParameterList::from_env())
    }

    pub fn resolver(&self) -> &ServiceResolver {
        &self.resolver
    }

    pub fn parameters(&self) -> &ParameterList {
        &self.parameters
    }

    /// Returns a copy of this context with `value` bound to its type.
    /// The receiver is left untouched.
    pub fn with_resource<T: Any + Send + Sync>(&self, value: T) -> Self {
        let mut resources = (*self.resources).clone();
        resources.insert(TypeId::of::<T>(), Arc::new(value));
        Self {
            resolver: self.resolver.clone(),
            parameters: self.parameters.clone(),
            resources: Arc::new(resources),
        }
    }

    pub fn resource<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.resources
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|r| r.downcast::<T>().ok())
    }
}

impl fmt::Debug for ProfileContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProfileContext")
            .field("resolver", &self.resolver)
            .field("parameters", &self.parameters.pairs().len())
            .field("resources", &self.resources.len())
            .finish()
    }
}

/// Components that may still run while the gate is a simulation.
pub trait SimulationSupport {
    fn supports_simulation(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    #[default]
    Production,
    Simulation,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeContext {
    mode: ExecutionMode,
}

impl RuntimeContext {
    pub const ENV_SIMULATION: &'static str = "WINDGATE_SIMULATION";

    pub fn new(mode: ExecutionMode) -> Self {
        Self { mode }
    }

    pub fn simulation() -> Self {
        Self::new(ExecutionMode::Simulation)
    }

    /// Reads `WINDGATE_SIMULATION` (`true`/`1` enables simulation).
    pub fn from_env() -> Self {
        let simulated = std::env::var(Self::ENV_SIMULATION)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);
        if simulated {
            Self::simulation()
        } else {
            Self::default()
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn is_simulation(&self) -> bool {
        self.mode == ExecutionMode::Simulation
    }

    pub fn can_execute<C: SimulationSupport + ?Sized>(&self, component: &C) -> bool {
        !self.is_simulation() || component.supports_simulation()
    }
}
