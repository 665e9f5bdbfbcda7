//! vmgrid-api: REST API for VMGrid.
//!
//! Thin axum layer over [`LifecycleEngine`]. Request bodies are the JSON
//! parameter object; responses are the engine's envelope.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/instances/prepare` | Accept a reservation and provision its VMs |
//! | POST | `/api/v1/instances/describe?prefix=` | Live provider listing |
//! | POST | `/api/v1/instances/deregister?terminate=` | Release instances |
//! | GET | `/api/v1/reservations/{id}` | Stored reservation record |
//! | POST | `/api/v1/credentials/validate` | Check provider credentials |
//! | POST | `/api/v1/synchronize?force=` | Trigger reconciliation |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use vmgrid_engine::LifecycleEngine;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<LifecycleEngine>,
}

/// Build the complete API router.
pub fn build_router(engine: Arc<LifecycleEngine>) -> Router {
    let api_state = ApiState { engine };

    let api_routes = Router::new()
        .route("/instances/prepare", post(handlers::prepare))
        .route("/instances/describe", post(handlers::describe))
        .route("/instances/deregister", post(handlers::deregister))
        .route("/reservations/{id}", get(handlers::reservation_status))
        .route("/credentials/validate", post(handlers::validate_credentials))
        .route("/synchronize", post(handlers::synchronize))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
