//! Engine error types.

use thiserror::Error;
use vmgrid_agent::AgentError;
use vmgrid_state::{StateError, TransitionError};

/// Faults that escape an operation instead of becoming a response envelope.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("bad arguments: {0}")]
    BadArguments(String),

    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("dispatch error: {0}")]
    Dispatch(String),

    #[error("invalid reservation transition: {0}")]
    Transition(#[from] TransitionError),
}

pub type EngineResult<T> = Result<T, EngineError>;
