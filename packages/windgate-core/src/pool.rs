//! Bounded worker pool shared by every phase of one task.
//!
//! Units of work run as tokio tasks; a semaphore with `max_processes` permits
//! bounds how many of them execute at once. The orchestrator drains each
//! phase with [`wait_for_complete`] before submitting the next one.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::error::{GateError, Result};
use crate::gate::Phase;

/// How long one pending unit is awaited before the next one is inspected.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    workers: AtomicUsize,
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, size: usize) -> Self {
        let size = size.max(1);
        Self {
            name: name.into(),
            size,
            permits: Arc::new(Semaphore::new(size)),
            workers: AtomicUsize::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shutdown(&self) -> bool {
        self.permits.is_closed()
    }

    /// Spawns `work`; it starts running once a permit is free.
    pub fn submit<F>(&self, label: impl Into<String>, work: F) -> Result<PendingTask>
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(GateError::PoolClosed);
        }
        let label = label.into();
        let worker = self.workers.fetch_add(1, Ordering::Relaxed) + 1;
        let span = info_span!("worker", pool = %self.name, worker, unit = %label);
        let permits = self.permits.clone();
        let handle = tokio::spawn(
            async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| GateError::PoolClosed)?;
                work.await
            }
            .instrument(span),
        );
        Ok(PendingTask { label, handle })
    }

    /// Refuses new work. Units waiting for a permit fail with `PoolClosed`;
    /// running units are left to finish.
    pub fn shutdown(&self) {
        if !self.permits.is_closed() {
            debug!("Shutting down worker pool: {}", self.name);
            self.permits.close();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A submitted unit of work.
#[derive(Debug)]
pub struct PendingTask {
    label: String,
    handle: JoinHandle<Result<()>>,
}

impl PendingTask {
    pub fn label(&self) -> &str {
        &self.label
    }

    fn cancel(&self) {
        self.handle.abort();
    }
}

/// Drains `tasks` and returns how many of them failed.
///
/// Each unit is awaited for at most [`POLL_INTERVAL`] before it is requeued,
/// so `interrupt` is observed promptly. A failing unit cancels every
/// outstanding unit; the queue is still drained so each cancelled unit is
/// counted as a failure too. On interrupt the same cancellation happens and
/// `Interrupted` is returned. A panicking unit cancels the rest and the panic
/// is resumed on the caller.
pub async fn wait_for_complete(
    phase: Phase,
    tasks: Vec<PendingTask>,
    interrupt: &CancellationToken,
) -> Result<usize> {
    let mut queue: VecDeque<PendingTask> = tasks.into();
    let mut failures = 0;
    let mut interrupted = false;

    while let Some(mut task) = queue.pop_front() {
        let waited = tokio::select! {
            biased;
            _ = interrupt.cancelled(), if !interrupted => None,
            result = tokio::time::timeout(POLL_INTERVAL, &mut task.handle) => Some(result),
        };
        match waited {
            None => {
                warn!(%phase, "Interrupted; cancelling {} pending unit(s)", queue.len() + 1);
                interrupted = true;
                queue.push_back(task);
                cancel_all(&queue);
            }
            Some(Err(_elapsed)) => queue.push_back(task),
            Some(Ok(Ok(Ok(())))) => {}
            Some(Ok(Ok(Err(e)))) => {
                failures += 1;
                error!(%phase, unit = %task.label, "Unit failed: {}", e);
                if !queue.is_empty() {
                    warn!(%phase, "Cancelling {} pending unit(s)", queue.len());
                    cancel_all(&queue);
                }
            }
            Some(Ok(Err(join))) if join.is_panic() => {
                error!(%phase, unit = %task.label, "Unit panicked");
                cancel_all(&queue);
                std::panic::resume_unwind(join.into_panic());
            }
            Some(Ok(Err(_cancelled))) => {
                failures += 1;
                info!(%phase, unit = %task.label, "Unit was cancelled");
            }
        }
    }

    if interrupted {
        return Err(GateError::Interrupted(phase));
    }
    Ok(failures)
}

fn cancel_all(queue: &VecDeque<PendingTask>) {
    for task in queue {
        task.cancel();
    }
}

/// Cancels `tasks` and waits until each of them has stopped.
///
/// Used when a phase gives up before its units were handed to
/// [`wait_for_complete`], so nothing keeps running in the background.
pub async fn cancel_pending(tasks: Vec<PendingTask>) {
    for task in &tasks {
        task.cancel();
    }
    for task in tasks {
        if let Err(join) = task.handle.await {
            if join.is_panic() {
                warn!(unit = %task.label, "Unit panicked while being cancelled");
            }
        }
    }
}
