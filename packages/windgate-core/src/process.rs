//! Process SPI: moves records from a source driver to a drain driver.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::context::SimulationSupport;
use crate::error::Result;
use crate::resource::{DrainDriver, DriverRepository, SourceDriver};
use crate::script::ProcessScript;

#[async_trait]
pub trait ProcessProvider: SimulationSupport + Send + Sync {
    /// Executes `script` with drivers taken from `drivers`.
    async fn execute(&self, drivers: &DriverRepository, script: &ProcessScript) -> Result<()>;
}

/// Copies every record from the source to the drain.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainProcessProvider;

impl PlainProcessProvider {
    pub const KEY: &'static str = "plain";

    pub fn new() -> Self {
        Self
    }
}

impl SimulationSupport for PlainProcessProvider {}

#[async_trait]
impl ProcessProvider for PlainProcessProvider {
    async fn execute(&self, drivers: &DriverRepository, script: &ProcessScript) -> Result<()> {
        debug!("Opening source driver: {}", script.name());
        let mut source = drivers.create_source(script).await?;
        debug!("Opening drain driver: {}", script.name());
        let mut drain = match drivers.create_drain(script).await {
            Ok(drain) => drain,
            Err(e) => {
                close_source(script, source.as_mut()).await;
                return Err(e);
            }
        };

        let transferred = transfer(source.as_mut(), drain.as_mut()).await;

        // the drain is closed first so it can flush what it received
        let drain_closed = drain.close().await;
        close_source(script, source.as_mut()).await;

        let count = transferred?;
        drain_closed?;
        info!("Process {} transferred {} record(s)", script.name(), count);
        Ok(())
    }
}

async fn transfer(source: &mut dyn SourceDriver, drain: &mut dyn DrainDriver) -> Result<u64> {
    source.prepare().await?;
    drain.prepare().await?;
    let mut count = 0;
    while let Some(record) = source.next().await? {
        drain.put(record).await?;
        count += 1;
    }
    Ok(count)
}

async fn close_source(script: &ProcessScript, source: &mut dyn SourceDriver) {
    if let Err(e) = source.close().await {
        warn!("Failed to close source of {}: {}", script.name(), e);
    }
}
