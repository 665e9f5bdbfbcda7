//! LifecycleEngine: request entry points for the reservation lifecycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use vmgrid_agent::{AgentError, AgentFactory, InfrastructureAgent, Operation};
use vmgrid_core::*;
use vmgrid_state::{ReservationStatus, ReservationStore};

use crate::error::{EngineError, EngineResult};
use crate::pipeline;
use crate::queue::{Task, TaskQueue};
use crate::reconcile::Reconciler;
use crate::response::*;
use crate::validate::*;

/// What [`LifecycleEngine::resume_pending`] did at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub resumed: usize,
    pub failed: usize,
}

/// Where pipelines run.
#[derive(Clone)]
pub enum ExecutionMode {
    /// On the caller's task; the response carries the final record.
    Blocking,
    /// On the task workers; the response only acknowledges acceptance.
    NonBlocking(TaskQueue),
}

pub struct LifecycleEngine {
    store: Arc<dyn ReservationStore>,
    factory: Arc<AgentFactory>,
    mode: ExecutionMode,
    reconciler: Reconciler,
}

impl LifecycleEngine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        factory: Arc<AgentFactory>,
        mode: ExecutionMode,
        min_sync_interval: Duration,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), factory.clone(), mode.clone(), min_sync_interval);
        Self {
            store,
            factory,
            mode,
            reconciler,
        }
    }

    /// Accept a reservation and provision its VMs.
    ///
    /// Every validation failure is a `success: false` envelope and leaves no
    /// record behind. Once the pending record is written the reservation
    /// ends in exactly one terminal state.
    pub async fn prepare(&self, params: &Parameters) -> EngineResult<Response> {
        if let Err(reason) = require_params(params, PREPARE_REQUIRED_PARAMS) {
            debug!(%reason, "prepare rejected");
            return Ok(Response::fail(reason));
        }
        let (Some(reservation_id), Some(infrastructure)) = (
            non_empty_str(params, PARAM_RESERVATION_ID),
            non_empty_str(params, PARAM_INFRASTRUCTURE),
        ) else {
            return Ok(Response::fail(REASON_BAD_ARGUMENTS));
        };

        let agent = match self.factory.create_agent(infrastructure) {
            Ok(agent) => agent,
            Err(e) => return rejection(e),
        };
        if let Err(e) = agent.assert_required_parameters(params, Operation::Prepare) {
            return rejection(e);
        }
        if get_str(params, PARAM_KEYNAME).is_none() {
            return Ok(Response::fail(REASON_BAD_ARGUMENTS));
        }
        let count = match vm_count(params) {
            Some(count) if count > 0 => count,
            _ => return Ok(Response::fail(REASON_BAD_VM_COUNT)),
        };

        if !self
            .store
            .create_reservation(&ReservationStatus::pending(reservation_id), params)?
        {
            warn!(%reservation_id, "duplicate reservation rejected");
            return Ok(Response::fail(REASON_RESERVATION_EXISTS));
        }
        info!(%reservation_id, %infrastructure, count, "reservation accepted");

        match &self.mode {
            ExecutionMode::Blocking => {
                let status = pipeline::prepare_vms(
                    self.store.as_ref(),
                    agent.as_ref(),
                    count,
                    params,
                    reservation_id,
                )
                .await?;
                Ok(Response::from_status(&status))
            }
            ExecutionMode::NonBlocking(queue) => {
                let task = Task::PrepareVms {
                    agent,
                    parameters: params.clone(),
                    reservation_id: reservation_id.to_string(),
                };
                if let Err(e) = queue.dispatch(task) {
                    self.abandon(reservation_id, &e);
                    return Err(e);
                }
                Ok(Response::ok().with(PARAM_RESERVATION_ID, reservation_id))
            }
        }
    }

    /// Mark a reservation failed when its task could not be queued.
    fn abandon(&self, reservation_id: &str, cause: &EngineError) {
        if let Err(e) = pipeline::fail_reservation(self.store.as_ref(), reservation_id, &cause.to_string()) {
            error!(%reservation_id, error = %e, "failed to record undispatched reservation");
        }
    }

    /// Pick up reservations a previous process accepted but never finished.
    ///
    /// A pending record with a saved request is provisioned again, inline or
    /// through the queue depending on the mode. One without a saved request,
    /// or whose provider can no longer be resolved, is failed. Run once at
    /// startup, before requests are served.
    pub async fn resume_pending(&self) -> EngineResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        for status in self.store.list_reservations()? {
            if status.is_terminal() {
                continue;
            }
            if self.resume(&status.reservation_id).await? {
                report.resumed += 1;
            } else {
                report.failed += 1;
            }
        }
        if report != RecoveryReport::default() {
            info!(resumed = report.resumed, failed = report.failed, "pending reservations recovered");
        }
        Ok(report)
    }

    /// Returns false when the reservation was failed instead of resumed.
    async fn resume(&self, reservation_id: &str) -> EngineResult<bool> {
        let Some(request) = self.store.pending_request(reservation_id)? else {
            pipeline::fail_reservation(self.store.as_ref(), reservation_id, REASON_INTERRUPTED)?;
            return Ok(false);
        };
        let agent = match non_empty_str(&request, PARAM_INFRASTRUCTURE) {
            Some(infrastructure) => self.factory.create_agent(infrastructure),
            None => Err(AgentError::Configuration(REASON_BAD_ARGUMENTS.to_string())),
        };
        let agent = match agent {
            Ok(agent) => agent,
            Err(e) => {
                let reason = format!("{REASON_INTERRUPTED}: {e}");
                pipeline::fail_reservation(self.store.as_ref(), reservation_id, &reason)?;
                return Ok(false);
            }
        };
        let count = vm_count(&request).unwrap_or_default();
        warn!(%reservation_id, agent = agent.name(), "resuming interrupted reservation");

        let outcome = match &self.mode {
            ExecutionMode::Blocking => {
                pipeline::prepare_vms(self.store.as_ref(), agent.as_ref(), count, &request, reservation_id)
                    .await
                    .map(drop)
            }
            ExecutionMode::NonBlocking(queue) => queue.dispatch(Task::PrepareVms {
                agent,
                parameters: request,
                reservation_id: reservation_id.to_string(),
            }),
        };
        match outcome {
            Ok(()) => Ok(true),
            Err(e @ EngineError::State(_)) => Err(e),
            Err(e) => {
                let reason = format!("{REASON_INTERRUPTED}: {e}");
                pipeline::fail_reservation(self.store.as_ref(), reservation_id, &reason)?;
                Ok(false)
            }
        }
    }

    /// Live query of the provider for instances whose id starts with `prefix`.
    pub async fn describe(&self, params: &Parameters, prefix: &str) -> EngineResult<Response> {
        let agent = match self.agent_for(params)? {
            Ok(agent) => agent,
            Err(rejected) => return Ok(rejected),
        };
        let payload = match agent.describe_instances(params, prefix).await {
            Ok(payload) => payload,
            Err(e) => return rejection(e),
        };
        let response = match payload {
            Value::Object(map) => Response::build(true, REASON_NONE, Some(map)),
            other => Response::ok().with("result", other),
        };
        Ok(response)
    }

    /// Stored record for `reservation_id`.
    pub async fn status(&self, params: &Parameters) -> EngineResult<Response> {
        if let Err(reason) = require_params(params, STATUS_REQUIRED_PARAMS) {
            return Ok(Response::fail(reason));
        }
        let Some(reservation_id) = non_empty_str(params, PARAM_RESERVATION_ID) else {
            return Ok(Response::fail(REASON_BAD_ARGUMENTS));
        };
        Ok(match self.store.get_reservation(reservation_id)? {
            Some(status) => Response::from_status(&status),
            None => Response::fail(REASON_RESERVATION_NOT_FOUND),
        })
    }

    /// Release instances, terminating them when `terminate` is set.
    ///
    /// In non-blocking mode the call returns before the provider is
    /// contacted and agent failures only reach the log.
    pub async fn deregister(&self, params: &Parameters, terminate: bool) -> EngineResult<Response> {
        let agent = match self.agent_for(params)? {
            Ok(agent) => agent,
            Err(rejected) => return Ok(rejected),
        };
        if let Err(e) = agent.assert_required_parameters(params, Operation::Terminate) {
            return rejection(e);
        }

        match &self.mode {
            ExecutionMode::Blocking => {
                match pipeline::deregister_vms(agent.as_ref(), params, terminate).await {
                    Ok(()) => {}
                    Err(EngineError::Agent(e)) => return rejection(e),
                    Err(e) => return Err(e),
                }
            }
            ExecutionMode::NonBlocking(_) => {
                let params = params.clone();
                tokio::spawn(async move {
                    if let Err(e) = pipeline::deregister_vms(agent.as_ref(), &params, terminate).await {
                        error!(agent = agent.name(), terminate, error = %e, "deregister failed");
                    }
                });
            }
        }
        Ok(Response::ok())
    }

    /// Ask the provider whether `credentials` are usable. Nothing is persisted.
    pub async fn validate_credentials(&self, params: &Parameters) -> EngineResult<Response> {
        if let Err(reason) = require_params(params, CREDENTIALS_REQUIRED_PARAMS) {
            return Ok(Response::fail(reason));
        }
        let agent = match self.agent_for(params)? {
            Ok(agent) => agent,
            Err(rejected) => return Ok(rejected),
        };
        let credentials = params.get(PARAM_CREDENTIALS).unwrap_or(&Value::Null);
        match agent.validate_credentials(credentials).await {
            Ok(valid) => Ok(Response::ok().with("valid", valid)),
            Err(e) => rejection(e),
        }
    }

    /// Trigger reconciliation for the provider named in `params`.
    pub async fn synchronize(&self, params: &Parameters, force: bool) -> EngineResult<Response> {
        if let Err(reason) = require_params(params, AGENT_REQUIRED_PARAMS) {
            return Ok(Response::fail(reason));
        }
        match self.reconciler.trigger(params, force).await {
            Ok(outcome) => {
                let extra = match serde_json::to_value(&outcome) {
                    Ok(Value::Object(map)) => Some(map),
                    _ => None,
                };
                Ok(Response::build(true, REASON_NONE, extra))
            }
            Err(EngineError::BadArguments(reason)) => Ok(Response::fail(reason)),
            Err(EngineError::Agent(e)) => rejection(e),
            Err(e) => Err(e),
        }
    }

    /// Resolve the agent named by `infrastructure`, or the envelope that
    /// rejects the request.
    fn agent_for(
        &self,
        params: &Parameters,
    ) -> EngineResult<Result<Arc<dyn InfrastructureAgent>, Response>> {
        if let Err(reason) = require_params(params, AGENT_REQUIRED_PARAMS) {
            return Ok(Err(Response::fail(reason)));
        }
        let Some(infrastructure) = non_empty_str(params, PARAM_INFRASTRUCTURE) else {
            return Ok(Err(Response::fail(REASON_BAD_ARGUMENTS)));
        };
        match self.factory.create_agent(infrastructure) {
            Ok(agent) => Ok(Ok(agent)),
            Err(e) => rejection(e).map(Err),
        }
    }
}

/// Configuration and runtime agent errors become envelopes; internal ones stay fatal.
fn rejection(err: AgentError) -> EngineResult<Response> {
    match err {
        AgentError::Configuration(reason) | AgentError::Runtime(reason) => {
            debug!(%reason, "request rejected by agent");
            Ok(Response::fail(reason))
        }
        AgentError::Internal(_) => Err(err.into()),
    }
}
