//! Rate-limited reconciliation of tracked VM state against the provider.
//!
//! The last reconciliation time lives in the store so the rate limit holds
//! across restarts. Reading the marker, deciding and stamping it happen
//! under one async mutex, so concurrent triggers cannot both claim the same
//! window.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use vmgrid_agent::AgentFactory;
use vmgrid_core::{Parameters, PARAM_INFRASTRUCTURE};
use vmgrid_state::{epoch_secs, ReservationStore};

use crate::engine::ExecutionMode;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::{self, SyncReport};
use crate::queue::Task;
use crate::validate::non_empty_str;

/// Assumed age of a marker that was never written.
const NEVER_SYNCED_AGE_SECS: u64 = 24 * 60 * 60;

/// What a trigger did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// Ran inline because the caller forced it.
    Forced(SyncReport),
    /// Ran inline in blocking mode.
    Completed(SyncReport),
    /// Handed to the task queue.
    Scheduled,
    /// The previous run is too recent.
    Skipped { elapsed_secs: u64 },
}

pub struct Reconciler {
    store: Arc<dyn ReservationStore>,
    factory: Arc<AgentFactory>,
    mode: ExecutionMode,
    min_interval: Duration,
    gate: Mutex<()>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        factory: Arc<AgentFactory>,
        mode: ExecutionMode,
        min_interval: Duration,
    ) -> Self {
        Self {
            store,
            factory,
            mode,
            min_interval,
            gate: Mutex::new(()),
        }
    }

    /// Reconcile the provider named by `infrastructure` if the interval has
    /// passed, or unconditionally when `force` is set.
    ///
    /// A missing provider name is `BadArguments`; an unknown one is an agent
    /// configuration error. A store failure reading the marker is fatal.
    pub async fn trigger(&self, params: &Parameters, force: bool) -> EngineResult<SyncOutcome> {
        let infrastructure = non_empty_str(params, PARAM_INFRASTRUCTURE)
            .ok_or_else(|| EngineError::BadArguments(format!("no {PARAM_INFRASTRUCTURE}")))?;
        let agent = self.factory.create_agent(infrastructure)?;

        let _gate = self.gate.lock().await;

        let now = epoch_secs();
        let last = self
            .store
            .last_sync()?
            .unwrap_or_else(|| now.saturating_sub(NEVER_SYNCED_AGE_SECS));
        let elapsed_secs = now.saturating_sub(last);

        if force {
            let report = pipeline::synchronize_vms(self.store.as_ref(), agent.as_ref(), params).await?;
            self.store.set_last_sync(epoch_secs())?;
            info!(%infrastructure, "forced reconciliation complete");
            return Ok(SyncOutcome::Forced(report));
        }

        if elapsed_secs < self.min_interval.as_secs() {
            debug!(%infrastructure, elapsed_secs, "reconciliation skipped, last run too recent");
            return Ok(SyncOutcome::Skipped { elapsed_secs });
        }

        // Claim the window before the work runs so a queued task still counts.
        self.store.set_last_sync(now)?;

        match &self.mode {
            ExecutionMode::Blocking => {
                let report =
                    pipeline::synchronize_vms(self.store.as_ref(), agent.as_ref(), params).await?;
                Ok(SyncOutcome::Completed(report))
            }
            ExecutionMode::NonBlocking(queue) => {
                queue.dispatch(Task::SynchronizeVms {
                    agent,
                    parameters: params.clone(),
                })?;
                info!(%infrastructure, "reconciliation scheduled");
                Ok(SyncOutcome::Scheduled)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vmgrid_agent::{AgentError, ObservedState};
    use vmgrid_state::StateStore;

    use crate::queue::TaskQueue;
    use crate::test_support::*;

    fn sync_params() -> Parameters {
        json!({ "infrastructure": SCRIPTED }).as_object().cloned().unwrap()
    }

    fn reconciler(store: Arc<dyn ReservationStore>, mode: ExecutionMode) -> Reconciler {
        let agent = Arc::new(
            ScriptedAgent::succeeding(two_vms())
                .with_observed(vec![observed("i-9", ObservedState::Running)]),
        );
        Reconciler::new(
            store,
            Arc::new(scripted_factory(agent)),
            mode,
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn runs_at_most_once_per_interval() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let rec = reconciler(store.clone(), ExecutionMode::Blocking);

        let first = rec.trigger(&sync_params(), false).await.unwrap();
        assert_eq!(
            first,
            SyncOutcome::Completed(SyncReport { updated: 0, added: 1, lost: 0 })
        );
        assert!(store.last_sync().unwrap().is_some());

        let second = rec.trigger(&sync_params(), false).await.unwrap();
        assert!(matches!(second, SyncOutcome::Skipped { elapsed_secs } if elapsed_secs < 60));
    }

    #[tokio::test]
    async fn force_always_runs() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let rec = reconciler(store.clone(), ExecutionMode::Blocking);

        rec.trigger(&sync_params(), false).await.unwrap();
        let forced = rec.trigger(&sync_params(), true).await.unwrap();
        assert!(matches!(forced, SyncOutcome::Forced(_)));
        let forced = rec.trigger(&sync_params(), true).await.unwrap();
        assert!(matches!(forced, SyncOutcome::Forced(_)));
    }

    #[tokio::test]
    async fn stale_marker_allows_run() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        store.set_last_sync(epoch_secs() - 3600).unwrap();
        let rec = reconciler(store.clone(), ExecutionMode::Blocking);

        let outcome = rec.trigger(&sync_params(), false).await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn non_blocking_claims_window_and_enqueues() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let (queue, mut rx) = TaskQueue::new(4);
        let rec = reconciler(store.clone(), ExecutionMode::NonBlocking(queue));

        let outcome = rec.trigger(&sync_params(), false).await.unwrap();
        assert_eq!(outcome, SyncOutcome::Scheduled);

        let task = rx.try_recv().unwrap();
        assert_eq!(task.opcode(), "synchronize_vms");

        // Marker was stamped at dispatch, so the next trigger is skipped
        // even though the task never ran.
        let again = rec.trigger(&sync_params(), false).await.unwrap();
        assert!(matches!(again, SyncOutcome::Skipped { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unreadable_marker_is_fatal() {
        let rec = reconciler(Arc::new(UnreachableStore), ExecutionMode::Blocking);
        let err = rec.trigger(&sync_params(), false).await.unwrap_err();
        assert!(matches!(err, EngineError::State(_)));

        let err = rec.trigger(&sync_params(), true).await.unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }

    #[tokio::test]
    async fn requires_known_infrastructure() {
        let store = Arc::new(StateStore::open_in_memory().unwrap());
        let rec = reconciler(store.clone(), ExecutionMode::Blocking);

        let err = rec.trigger(&Parameters::new(), false).await.unwrap_err();
        assert!(matches!(err, EngineError::BadArguments(ref r) if r == "no infrastructure"));

        let params = json!({ "infrastructure": "nimbus" }).as_object().cloned().unwrap();
        let err = rec.trigger(&params, false).await.unwrap_err();
        assert!(matches!(err, EngineError::Agent(AgentError::Configuration(_))));
        assert_eq!(store.last_sync().unwrap(), None);
    }

    #[test]
    fn outcome_serializes_with_tag() {
        let value = serde_json::to_value(SyncOutcome::Skipped { elapsed_secs: 5 }).unwrap();
        assert_eq!(value, json!({ "outcome": "skipped", "elapsed_secs": 5 }));

        let value = serde_json::to_value(SyncOutcome::Forced(SyncReport::default())).unwrap();
        assert_eq!(
            value,
            json!({ "outcome": "forced", "updated": 0, "added": 0, "lost": 0 })
        );
    }
}
