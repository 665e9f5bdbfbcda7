//! Flex agent: "flex cloud" of machines the operator already owns.
//!
//! Nothing is created or destroyed: preparing claims machines from the
//! `flex_cloud_machine_info` list in the request, and deregistering only
//! drops them from the manager's view.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};
use vmgrid_core::{get_str, Parameters, PARAM_KEYNAME};

use crate::agent::*;
use crate::error::{AgentError, AgentResult};

/// Request key listing the available machines.
pub const PARAM_FLEX_MACHINES: &str = "flex_cloud_machine_info";

/// One pre-provisioned machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlexMachine {
    pub ip: String,
    pub username: String,
    pub keyfile: String,
    /// Address on the internal network, defaults to `ip`.
    #[serde(default)]
    pub private_ip: Option<String>,
}

impl FlexMachine {
    pub fn instance_id(&self) -> String {
        format!("flex-{}", self.ip)
    }

    fn private_ip(&self) -> &str {
        self.private_ip.as_deref().unwrap_or(&self.ip)
    }

    fn is_complete(&self) -> bool {
        !self.ip.is_empty() && !self.username.is_empty() && !self.keyfile.is_empty()
    }
}

#[derive(Debug, Default, Clone)]
pub struct FlexAgent;

impl FlexAgent {
    pub const NAME: &'static str = "flex";

    pub fn new() -> Self {
        Self
    }

    fn machines(value: Option<&Value>) -> AgentResult<Vec<FlexMachine>> {
        let value = value.ok_or_else(|| AgentError::Configuration(format!("no {PARAM_FLEX_MACHINES}")))?;
        serde_json::from_value(value.clone())
            .map_err(|e| AgentError::Configuration(format!("invalid {PARAM_FLEX_MACHINES}: {e}")))
    }
}

#[async_trait]
impl InfrastructureAgent for FlexAgent {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn assert_required_parameters(&self, params: &Parameters, operation: Operation) -> AgentResult<()> {
        let machines = Self::machines(params.get(PARAM_FLEX_MACHINES))?;
        if machines.is_empty() {
            return Err(AgentError::Configuration(format!("no {PARAM_FLEX_MACHINES}")));
        }
        // Presence only: a malformed keyname is the engine's "bad arguments".
        if operation == Operation::Prepare && !params.contains_key(PARAM_KEYNAME) {
            return Err(AgentError::Configuration(format!("no {PARAM_KEYNAME}")));
        }
        Ok(())
    }

    async fn configure_instance_security(&self, params: &Parameters) -> AgentResult<SecurityContext> {
        let keyname = get_str(params, PARAM_KEYNAME)
            .ok_or_else(|| AgentError::Configuration(format!("no {PARAM_KEYNAME}")))?;
        // Machines are reached with their own keyfiles; nothing to create.
        Ok(SecurityContext {
            keyname: keyname.to_string(),
            group: None,
        })
    }

    async fn prepare_instances(
        &self,
        count: usize,
        params: &Parameters,
        _security: &SecurityContext,
    ) -> AgentResult<PreparedInstances> {
        let machines = Self::machines(params.get(PARAM_FLEX_MACHINES))?;
        if count > machines.len() {
            return Err(AgentError::Runtime(format!(
                "requested {count} machines but only {} flex machines are available",
                machines.len()
            )));
        }
        if let Some(bad) = machines.iter().take(count).find(|m| !m.is_complete()) {
            return Err(AgentError::Runtime(format!(
                "flex machine {} is missing ip, username or keyfile",
                bad.instance_id()
            )));
        }

        let mut prepared = PreparedInstances::default();
        for machine in machines.iter().take(count) {
            prepared.instance_ids.push(machine.instance_id());
            prepared.public_ips.push(machine.ip.clone());
            prepared.private_ips.push(machine.private_ip().to_string());
        }
        info!(count, "flex machines claimed");
        Ok(prepared)
    }

    async fn deregister_instances(&self, params: &Parameters, terminate: bool) -> AgentResult<()> {
        let machines = Self::machines(params.get(PARAM_FLEX_MACHINES))?;
        // Flex machines are never destroyed, terminate or not.
        info!(count = machines.len(), terminate, "flex machines deregistered");
        Ok(())
    }

    async fn describe_instances(&self, params: &Parameters, prefix: &str) -> AgentResult<Value> {
        let machines = Self::machines(params.get(PARAM_FLEX_MACHINES))?;
        let instances: Vec<Value> = machines
            .iter()
            .filter(|m| m.instance_id().starts_with(prefix))
            .map(|m| {
                json!({
                    "instance_id": m.instance_id(),
                    "public_ip": m.ip,
                    "private_ip": m.private_ip(),
                    "state": "running",
                })
            })
            .collect();
        debug!(prefix, count = instances.len(), "flex machines described");
        Ok(json!({ "infrastructure": Self::NAME, "instances": instances }))
    }

    async fn validate_credentials(&self, credentials: &Value) -> AgentResult<bool> {
        let machines = match Self::machines(credentials.get(PARAM_FLEX_MACHINES)) {
            Ok(machines) => machines,
            Err(_) => return Ok(false),
        };
        Ok(!machines.is_empty() && machines.iter().all(FlexMachine::is_complete))
    }

    async fn observed_instances(&self, params: &Parameters) -> AgentResult<Vec<ObservedInstance>> {
        let machines = Self::machines(params.get(PARAM_FLEX_MACHINES))?;
        Ok(machines
            .iter()
            .map(|m| ObservedInstance {
                instance_id: m.instance_id(),
                public_ip: m.ip.clone(),
                private_ip: m.private_ip().to_string(),
                state: ObservedState::Running,
            })
            .collect())
    }
}
