//! The capability contract every provider agent satisfies.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vmgrid_core::Parameters;

use crate::error::AgentResult;

/// Operation whose provider-specific parameters are being asserted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Prepare,
    Terminate,
}

/// Network and credential prerequisites established before provisioning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecurityContext {
    /// Keypair the new VMs accept.
    pub keyname: String,
    /// Firewall / security group, for providers that have one.
    pub group: Option<String>,
}

/// Result of a successful `prepare_instances` call.
///
/// The three sequences are position-correlated: index `i` is the same VM.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedInstances {
    pub instance_ids: Vec<String>,
    pub public_ips: Vec<String>,
    pub private_ips: Vec<String>,
}

impl PreparedInstances {
    pub fn len(&self) -> usize {
        self.instance_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instance_ids.is_empty()
    }
}

/// Provider-reported state of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservedState {
    Running,
    Stopped,
    Terminated,
}

/// One instance as the provider currently sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedInstance {
    pub instance_id: String,
    pub public_ip: String,
    pub private_ip: String,
    pub state: ObservedState,
}

/// A provider backend.
///
/// Agents are stateless between calls; the factory may hand out a fresh
/// instance per request. Blocking provider calls run to completion, and
/// timeouts are the agent's own concern.
#[async_trait]
pub trait InfrastructureAgent: Send + Sync {
    /// Provider name this agent is registered under.
    fn name(&self) -> &str;

    /// Fail with [`AgentError::Configuration`](crate::AgentError::Configuration)
    /// naming the first missing or invalid provider-specific field.
    fn assert_required_parameters(&self, params: &Parameters, operation: Operation) -> AgentResult<()>;

    /// Ensure keypairs, firewall rules and similar exist. Must be idempotent.
    async fn configure_instance_security(&self, params: &Parameters) -> AgentResult<SecurityContext>;

    /// Bring up `count` VMs and wait until they are usable.
    async fn prepare_instances(
        &self,
        count: usize,
        params: &Parameters,
        security: &SecurityContext,
    ) -> AgentResult<PreparedInstances>;

    /// Remove VMs from the provider's bookkeeping; destroy them only when `terminate` is set.
    async fn deregister_instances(&self, params: &Parameters, terminate: bool) -> AgentResult<()>;

    /// Provider-specific status payload for instances whose id starts with `prefix`.
    async fn describe_instances(&self, params: &Parameters, prefix: &str) -> AgentResult<Value>;

    async fn validate_credentials(&self, credentials: &Value) -> AgentResult<bool>;

    /// Authoritative list of the provider's instances, used by reconciliation.
    async fn observed_instances(&self, params: &Parameters) -> AgentResult<Vec<ObservedInstance>>;
}
