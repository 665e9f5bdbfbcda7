//! Agent error types.

use thiserror::Error;

/// Errors raised by provider agents and the agent factory.
#[derive(Debug, Error)]
pub enum AgentError {
    /// A required parameter is missing or invalid, or the provider name is unknown.
    #[error("{0}")]
    Configuration(String),

    /// The provider rejected or failed a call made with valid parameters.
    #[error("{0}")]
    Runtime(String),

    /// Anything else; never recorded as a provisioning outcome.
    #[error("agent internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

pub type AgentResult<T> = Result<T, AgentError>;
