//! vmgrid-engine: the reservation lifecycle engine.
//!
//! Accepts prepare / describe / deregister requests, resolves the provider
//! agent, and either runs the pipeline inline (blocking mode) or hands it to
//! the task queue (non-blocking mode). Every prepare ends in exactly one
//! persisted terminal state: running with VM addresses, or failed with a
//! reason.
//!
//! # Architecture
//!
//! ```text
//! LifecycleEngine
//!   ├── validate (required fields, before any side effect)
//!   ├── AgentFactory (provider name → InfrastructureAgent)
//!   ├── ReservationStore (pending record + request at accept, terminal record at completion)
//!   ├── ExecutionMode
//!   │   ├── Blocking → pipeline on the caller's task
//!   │   └── NonBlocking(TaskQueue) → TaskWorkers → pipeline
//!   ├── Reconciler (rate-limited provider/store resync)
//!   └── resume_pending (startup pickup of reservations left pending)
//! ```
//!
//! Callers always get a [`Response`] envelope back. Bad input and unknown
//! providers become `success: false` envelopes; store and dispatch faults
//! surface as [`EngineError`].

pub mod engine;
pub mod error;
pub mod pipeline;
pub mod queue;
pub mod reconcile;
pub mod response;
pub mod validate;

#[cfg(test)]
mod test_support;

pub use engine::{ExecutionMode, LifecycleEngine, RecoveryReport};
pub use error::{EngineError, EngineResult};
pub use pipeline::SyncReport;
pub use queue::{Task, TaskQueue, TaskWorkers};
pub use reconcile::{Reconciler, SyncOutcome};
pub use response::Response;
