//! Task queue and worker pool for non-blocking execution.
//!
//! The engine pushes [`Task`] values onto a bounded mpsc channel. A fixed
//! number of worker tasks share the receiving end and run each task's
//! pipeline against the store. When the shutdown signal flips the queue is
//! closed to new work and the workers drain what is already queued before
//! exiting.
//!
//! A prepare task that keeps failing with a fatal error is retried a few
//! times, then its reservation is failed with the last error as the reason.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use vmgrid_agent::InfrastructureAgent;
use vmgrid_core::{vm_count, Parameters};
use vmgrid_state::ReservationStore;

use crate::error::{EngineError, EngineResult};
use crate::pipeline;

/// Attempts a worker makes at one prepare task.
pub const MAX_PREPARE_ATTEMPTS: u32 = 3;

/// Pause before the second attempt; grows linearly after that.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

/// A unit of deferred work. Parameters are an immutable snapshot of the request.
pub enum Task {
    PrepareVms {
        agent: Arc<dyn InfrastructureAgent>,
        parameters: Parameters,
        reservation_id: String,
    },
    SynchronizeVms {
        agent: Arc<dyn InfrastructureAgent>,
        parameters: Parameters,
    },
}

impl Task {
    pub fn opcode(&self) -> &'static str {
        match self {
            Task::PrepareVms { .. } => "prepare_vms",
            Task::SynchronizeVms { .. } => "synchronize_vms",
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Task::PrepareVms { agent, reservation_id, .. } => f
                .debug_struct("PrepareVms")
                .field("agent", &agent.name())
                .field("reservation_id", reservation_id)
                .finish(),
            Task::SynchronizeVms { agent, .. } => f
                .debug_struct("SynchronizeVms")
                .field("agent", &agent.name())
                .finish(),
        }
    }
}

/// Sending half of the task channel.
#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
}

impl TaskQueue {
    /// Create a queue holding at most `capacity` pending tasks.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Task>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Enqueue without waiting. A full or closed queue is a dispatch error.
    pub fn dispatch(&self, task: Task) -> EngineResult<()> {
        let opcode = task.opcode();
        self.tx.try_send(task).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                EngineError::Dispatch(format!("task queue full, dropped {opcode}"))
            }
            mpsc::error::TrySendError::Closed(_) => {
                EngineError::Dispatch(format!("task queue closed, dropped {opcode}"))
            }
        })?;
        debug!(%opcode, "task dispatched");
        Ok(())
    }
}

/// Worker tasks draining a [`TaskQueue`].
pub struct TaskWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl TaskWorkers {
    /// Spawn `count` workers sharing `receiver`.
    pub fn spawn(
        count: usize,
        receiver: mpsc::Receiver<Task>,
        store: Arc<dyn ReservationStore>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let receiver = Arc::new(Mutex::new(receiver));
        let handles = (0..count.max(1))
            .map(|worker| {
                let receiver = receiver.clone();
                let store = store.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(run_worker(worker, receiver, store, shutdown))
            })
            .collect::<Vec<_>>();
        info!(workers = handles.len(), "task workers started");
        Self { handles }
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "task worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<Task>>>,
    store: Arc<dyn ReservationStore>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker, "task worker starting");
    let mut draining = false;
    loop {
        let task = if draining {
            receiver.lock().await.recv().await
        } else {
            tokio::select! {
                task = async { receiver.lock().await.recv().await } => task,
                _ = shutdown.changed() => {
                    debug!(worker, "shutdown requested, draining task queue");
                    receiver.lock().await.close();
                    draining = true;
                    continue;
                }
            }
        };
        match task {
            Some(task) => execute(task, store.as_ref()).await,
            None => {
                debug!(worker, "task queue closed");
                break;
            }
        }
    }
}

/// Run one task to completion. Errors never leave the worker.
pub async fn execute(task: Task, store: &dyn ReservationStore) {
    let opcode = task.opcode();
    match task {
        Task::PrepareVms { agent, parameters, reservation_id } => {
            let count = vm_count(&parameters).unwrap_or_default();
            let mut attempt = 1;
            loop {
                let result =
                    pipeline::prepare_vms(store, agent.as_ref(), count, &parameters, &reservation_id)
                        .await;
                let e = match result {
                    Ok(_) => break,
                    Err(e) => e,
                };
                if attempt < MAX_PREPARE_ATTEMPTS {
                    warn!(%opcode, %reservation_id, attempt, error = %e, "task failed, retrying");
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                    continue;
                }
                error!(%opcode, %reservation_id, attempts = attempt, error = %e, "task failed, giving up");
                let reason = format!("provisioning failed after {attempt} attempts: {e}");
                if let Err(e) = pipeline::fail_reservation(store, &reservation_id, &reason) {
                    error!(%reservation_id, error = %e, "failed to record abandoned reservation");
                }
                break;
            }
        }
        Task::SynchronizeVms { agent, parameters } => {
            if let Err(e) = pipeline::synchronize_vms(store, agent.as_ref(), &parameters).await {
                error!(%opcode, agent = agent.name(), error = %e, "task failed");
            }
        }
    }
}
