//! REST API handlers.
//!
//! Each handler forwards the JSON body to the engine. Envelopes, including
//! rejected requests, are returned with 200; engine faults become 500.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::error;

use vmgrid_core::{Parameters, PARAM_RESERVATION_ID};
use vmgrid_engine::{EngineResult, Response as Envelope};

use crate::ApiState;

fn reply(result: EngineResult<Envelope>) -> axum::response::Response {
    match result {
        Ok(envelope) => Json(envelope).into_response(),
        Err(e) => {
            error!(error = %e, "request failed");
            (StatusCode::INTERNAL_SERVER_ERROR, Json(Envelope::fail(e.to_string()))).into_response()
        }
    }
}

/// Query string of the describe route.
#[derive(Debug, Default, Deserialize)]
pub struct DescribeQuery {
    #[serde(default)]
    pub prefix: String,
}

/// Query string of the deregister route.
#[derive(Debug, Default, Deserialize)]
pub struct DeregisterQuery {
    #[serde(default)]
    pub terminate: bool,
}

/// Query string of the synchronize route.
#[derive(Debug, Default, Deserialize)]
pub struct SynchronizeQuery {
    #[serde(default)]
    pub force: bool,
}

// ── Instances ──────────────────────────────────────────────────

/// POST /api/v1/instances/prepare
pub async fn prepare(
    State(state): State<ApiState>,
    Json(params): Json<Parameters>,
) -> impl IntoResponse {
    reply(state.engine.prepare(&params).await)
}

/// POST /api/v1/instances/describe?prefix=
pub async fn describe(
    State(state): State<ApiState>,
    Query(query): Query<DescribeQuery>,
    Json(params): Json<Parameters>,
) -> impl IntoResponse {
    reply(state.engine.describe(&params, &query.prefix).await)
}

/// POST /api/v1/instances/deregister?terminate=
pub async fn deregister(
    State(state): State<ApiState>,
    Query(query): Query<DeregisterQuery>,
    Json(params): Json<Parameters>,
) -> impl IntoResponse {
    reply(state.engine.deregister(&params, query.terminate).await)
}

// ── Reservations ───────────────────────────────────────────────

/// GET /api/v1/reservations/{id}
pub async fn reservation_status(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let mut params = Parameters::new();
    params.insert(PARAM_RESERVATION_ID.to_string(), id.into());
    reply(state.engine.status(&params).await)
}

// ── Providers ──────────────────────────────────────────────────

/// POST /api/v1/credentials/validate
pub async fn validate_credentials(
    State(state): State<ApiState>,
    Json(params): Json<Parameters>,
) -> impl IntoResponse {
    reply(state.engine.validate_credentials(&params).await)
}

/// POST /api/v1/synchronize?force=
pub async fn synchronize(
    State(state): State<ApiState>,
    Query(query): Query<SynchronizeQuery>,
    Json(params): Json<Parameters>,
) -> impl IntoResponse {
    reply(state.engine.synchronize(&params, query.force).await)
}
