//! Resource SPI: external systems that data is read from or written to.
//!
//! A [`ResourceProvider`] is built once per profile entry. For every task it
//! creates a [`ResourceMirror`] bound to the session; processes then obtain
//! [`SourceDriver`]s and [`DrainDriver`]s from the mirrors through a
//! [`DriverRepository`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::SimulationSupport;
use crate::error::{GateError, Result};
use crate::parameter::ParameterList;
use crate::script::{DriverKind, GateScript, ProcessScript};

/// Record type moved between drivers.
pub type DataModel = serde_json::Value;

#[async_trait]
pub trait ResourceProvider: SimulationSupport + Send + Sync {
    /// Creates a mirror of this resource bound to `session_id`.
    async fn create(
        &self,
        session_id: &str,
        arguments: &ParameterList,
    ) -> Result<Arc<dyn ResourceMirror>>;

    /// Rolls back whatever this resource did for `session_id`.
    async fn abort(&self, session_id: &str) -> Result<()>;
}

/// A resource bound to one session.
///
/// Mirrors are shared by every process of a run; `create_source` and
/// `create_drain` may be called concurrently.
#[async_trait]
pub trait ResourceMirror: SimulationSupport + Send + Sync {
    fn name(&self) -> &str;

    /// Transactional resources run their session hooks one by one in profile
    /// order, outside the parallel group.
    fn is_transactional(&self) -> bool {
        false
    }

    async fn on_session_created(&self) -> Result<()> {
        Ok(())
    }

    async fn prepare(&self, script: &GateScript) -> Result<()>;

    async fn create_source(&self, process: &ProcessScript) -> Result<Box<dyn SourceDriver>>;

    async fn create_drain(&self, process: &ProcessScript) -> Result<Box<dyn DrainDriver>>;

    async fn on_session_completing(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait SourceDriver: Send {
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Next record, or `None` once the source is exhausted.
    async fn next(&mut self) -> Result<Option<DataModel>>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
pub trait DrainDriver: Send {
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    async fn put(&mut self, record: DataModel) -> Result<()>;

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Read-only lookup from resource name to mirror, shared by every process of
/// one run.
#[derive(Clone)]
pub struct DriverRepository {
    mirrors: HashMap<String, Arc<dyn ResourceMirror>>,
}

impl DriverRepository {
    pub fn new<I>(mirrors: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn ResourceMirror>>,
    {
        Self {
            mirrors: mirrors
                .into_iter()
                .map(|m| (m.name().to_string(), m))
                .collect(),
        }
    }

    pub fn mirror(&self, name: &str) -> Result<&Arc<dyn ResourceMirror>> {
        self.mirrors
            .get(name)
            .ok_or_else(|| GateError::ResourceNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.mirrors.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Source driver from the resource named by `process`'s source script.
    pub async fn create_source(&self, process: &ProcessScript) -> Result<Box<dyn SourceDriver>> {
        let name = process.driver_script(DriverKind::Source).resource_name();
        self.mirror(name)?.create_source(process).await
    }

    /// Drain driver from the resource named by `process`'s drain script.
    pub async fn create_drain(&self, process: &ProcessScript) -> Result<Box<dyn DrainDriver>> {
        let name = process.driver_script(DriverKind::Drain).resource_name();
        self.mirror(name)?.create_drain(process).await
    }
}

impl std::fmt::Debug for DriverRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.mirrors.keys().collect();
        names.sort();
        f.debug_struct("DriverRepository")
            .field("resources", &names)
            .finish()
    }
}
