//! Scripted agent and store fixtures shared by the engine tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use vmgrid_agent::*;
use vmgrid_core::Parameters;
use vmgrid_state::*;

pub const SCRIPTED: &str = "scripted";

/// What `prepare_instances` does.
#[derive(Clone)]
pub enum Outcome {
    Succeed(PreparedInstances),
    Fail(String),
    Crash(String),
}

/// Agent whose provisioning outcome is fixed up front and whose calls are counted.
pub struct ScriptedAgent {
    outcome: Outcome,
    observed: Vec<ObservedInstance>,
    delay: Option<Duration>,
    prepare_calls: AtomicUsize,
    deregister_calls: AtomicUsize,
}

impl ScriptedAgent {
    fn new(outcome: Outcome) -> Self {
        Self {
            outcome,
            observed: Vec::new(),
            delay: None,
            prepare_calls: AtomicUsize::new(0),
            deregister_calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(prepared: PreparedInstances) -> Self {
        Self::new(Outcome::Succeed(prepared))
    }

    pub fn failing(reason: &str) -> Self {
        Self::new(Outcome::Fail(reason.to_string()))
    }

    pub fn crashing(reason: &str) -> Self {
        Self::new(Outcome::Crash(reason.to_string()))
    }

    pub fn with_observed(mut self, observed: Vec<ObservedInstance>) -> Self {
        self.observed = observed;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prepare_calls(&self) -> usize {
        self.prepare_calls.load(Ordering::SeqCst)
    }

    pub fn deregister_calls(&self) -> usize {
        self.deregister_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InfrastructureAgent for ScriptedAgent {
    fn name(&self) -> &str {
        SCRIPTED
    }

    fn assert_required_parameters(&self, params: &Parameters, operation: Operation) -> AgentResult<()> {
        if operation == Operation::Prepare && !params.contains_key("region") {
            return Err(AgentError::Configuration("no region".to_string()));
        }
        Ok(())
    }

    async fn configure_instance_security(&self, params: &Parameters) -> AgentResult<SecurityContext> {
        Ok(SecurityContext {
            keyname: vmgrid_core::get_str(params, "keyname").unwrap_or_default().to_string(),
            group: Some("vmgrid".to_string()),
        })
    }

    async fn prepare_instances(
        &self,
        _count: usize,
        _params: &Parameters,
        _security: &SecurityContext,
    ) -> AgentResult<PreparedInstances> {
        self.prepare_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.outcome {
            Outcome::Succeed(prepared) => Ok(prepared.clone()),
            Outcome::Fail(reason) => Err(AgentError::Runtime(reason.clone())),
            Outcome::Crash(reason) => Err(AgentError::Internal(anyhow::anyhow!("{reason}"))),
        }
    }

    async fn deregister_instances(&self, _params: &Parameters, _terminate: bool) -> AgentResult<()> {
        self.deregister_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn describe_instances(&self, _params: &Parameters, prefix: &str) -> AgentResult<Value> {
        Ok(json!({ "prefix": prefix, "instances": [] }))
    }

    async fn validate_credentials(&self, credentials: &Value) -> AgentResult<bool> {
        Ok(credentials.get("token").and_then(Value::as_str) == Some("secret"))
    }

    async fn observed_instances(&self, _params: &Parameters) -> AgentResult<Vec<ObservedInstance>> {
        Ok(self.observed.clone())
    }
}

/// Factory that always hands out the same shared agent under [`SCRIPTED`].
pub fn scripted_factory(agent: Arc<ScriptedAgent>) -> AgentFactory {
    AgentFactory::new().with_agent(SCRIPTED, move || agent.clone() as Arc<dyn InfrastructureAgent>)
}

pub fn two_vms() -> PreparedInstances {
    PreparedInstances {
        instance_ids: vec!["i-1".into(), "i-2".into()],
        public_ips: vec!["1.2.3.4".into(), "1.2.3.5".into()],
        private_ips: vec!["10.0.0.1".into(), "10.0.0.2".into()],
    }
}

pub fn observed(instance_id: &str, state: ObservedState) -> ObservedInstance {
    ObservedInstance {
        instance_id: instance_id.to_string(),
        public_ip: "1.2.3.4".to_string(),
        private_ip: "10.0.0.1".to_string(),
        state,
    }
}

pub fn prepare_params(reservation_id: &str) -> Parameters {
    json!({
        "reservation_id": reservation_id,
        "infrastructure": SCRIPTED,
        "keyname": "k",
        "region": "eu-west-1",
        "vms": [{ "name": "v1" }, { "name": "v2" }],
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// Store whose every call fails, standing in for an unreachable backend.
pub struct UnreachableStore;

impl ReservationStore for UnreachableStore {
    fn get_reservation(&self, _id: &str) -> StateResult<Option<ReservationStatus>> {
        Err(StateError::Read("store unreachable".to_string()))
    }

    fn put_reservation(&self, _status: &ReservationStatus) -> StateResult<()> {
        Err(StateError::Write("store unreachable".to_string()))
    }

    fn create_reservation(&self, _status: &ReservationStatus, _request: &Parameters) -> StateResult<bool> {
        Err(StateError::Write("store unreachable".to_string()))
    }

    fn pending_request(&self, _id: &str) -> StateResult<Option<Parameters>> {
        Err(StateError::Read("store unreachable".to_string()))
    }

    fn list_reservations(&self) -> StateResult<Vec<ReservationStatus>> {
        Err(StateError::Read("store unreachable".to_string()))
    }

    fn last_sync(&self) -> StateResult<Option<u64>> {
        Err(StateError::Read("store unreachable".to_string()))
    }

    fn set_last_sync(&self, _epoch: u64) -> StateResult<()> {
        Err(StateError::Write("store unreachable".to_string()))
    }

    fn put_vm(&self, _vm: &TrackedVm) -> StateResult<()> {
        Err(StateError::Write("store unreachable".to_string()))
    }

    fn list_vms(&self, _infrastructure: &str) -> StateResult<Vec<TrackedVm>> {
        Err(StateError::Read("store unreachable".to_string()))
    }
}
