//! vmgrid-agent: the provider side of VMGrid.
//!
//! Every IaaS backend plugs in by implementing [`InfrastructureAgent`] and
//! registering a constructor with the [`AgentFactory`] under its provider
//! name (the `infrastructure` request parameter).
//!
//! # Components
//!
//! - **`agent`**: capability contract and the value types it exchanges
//! - **`error`**: configuration / runtime / internal error taxonomy
//! - **`factory`**: provider-name registry
//! - **`flex`**: agent for pre-provisioned machines

pub mod agent;
pub mod error;
pub mod factory;
pub mod flex;

pub use agent::{
    InfrastructureAgent, ObservedInstance, ObservedState, Operation, PreparedInstances,
    SecurityContext,
};
pub use error::{AgentError, AgentResult};
pub use factory::AgentFactory;
pub use flex::{FlexAgent, FlexMachine, PARAM_FLEX_MACHINES};
