//! Agent factory: resolves a provider name to an agent instance.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::agent::InfrastructureAgent;
use crate::error::{AgentError, AgentResult};
use crate::flex::FlexAgent;

/// Constructor registered for a provider name.
pub type AgentConstructor = Arc<dyn Fn() -> Arc<dyn InfrastructureAgent> + Send + Sync>;

/// Registry of provider agents keyed by the `infrastructure` parameter.
#[derive(Clone, Default)]
pub struct AgentFactory {
    constructors: HashMap<String, AgentConstructor>,
}

impl AgentFactory {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with every agent shipped in this crate.
    pub fn with_builtin() -> Self {
        Self::new().with_agent(FlexAgent::NAME, || Arc::new(FlexAgent::new()) as Arc<dyn InfrastructureAgent>)
    }

    /// Register (or replace) the constructor for `name`.
    pub fn with_agent<F>(mut self, name: &str, constructor: F) -> Self
    where
        F: Fn() -> Arc<dyn InfrastructureAgent> + Send + Sync + 'static,
    {
        self.constructors.insert(name.to_string(), Arc::new(constructor));
        self
    }

    /// Build a fresh agent for `infrastructure`.
    pub fn create_agent(&self, infrastructure: &str) -> AgentResult<Arc<dyn InfrastructureAgent>> {
        let constructor = self.constructors.get(infrastructure).ok_or_else(|| {
            AgentError::Configuration(format!("unknown infrastructure: {infrastructure}"))
        })?;
        debug!(%infrastructure, "agent created");
        Ok(constructor())
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }
}
