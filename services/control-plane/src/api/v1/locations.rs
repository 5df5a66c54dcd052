//! Location API endpoints.
//!
//! Listing a location's machine pool and reserving out of it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use suds_id::JobId;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::coordinator::CoordinatorError;
use crate::state::AppState;

use super::machines::{map_coordinator_error, parse_location_id, MachineResponse};

/// Create location routes.
///
/// Locations are top-level resources: /v1/locations
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/{location_id}/machines", get(list_machines))
        .route("/{location_id}/reservations", post(reserve_machine))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to reserve a machine at a location.
#[derive(Debug, Deserialize)]
pub struct ReserveMachineRequest {
    /// The job the machine is reserved for.
    pub job_id: JobId,
}

/// Response for a location's machine pool.
#[derive(Debug, Serialize)]
pub struct MachineListResponse {
    pub machines: Vec<MachineResponse>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List all machines at a location, in listing order.
async fn list_machines(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(location_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let location_id = parse_location_id(&location_id, &ctx)?;

    let records = state
        .coordinator()
        .list_at_location(location_id)
        .await
        .map_err(|e| map_coordinator_error(e, &ctx))?;

    Ok(Json(MachineListResponse {
        machines: records.iter().map(MachineResponse::from).collect(),
    }))
}

/// Reserve an available machine at a location for a job.
async fn reserve_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(location_id): Path<String>,
    Json(req): Json<ReserveMachineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let location_id = parse_location_id(&location_id, &ctx)?;

    let record = state
        .coordinator()
        .reserve(location_id, req.job_id)
        .await
        .map_err(|e| match e {
            CoordinatorError::NotFound => ApiError::not_found(
                "no_available_machine",
                "no available machine at this location",
            )
            .with_request_id(ctx.request_id.clone()),
            other => map_coordinator_error(other, &ctx),
        })?;

    Ok((StatusCode::CREATED, Json(MachineResponse::from(&record))))
}
