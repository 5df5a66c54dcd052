//! Machine API endpoints.
//!
//! Enrollment, state reads, start-cycle, and release. Reservation lives
//! under the location routes, since it selects across a location's pool.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use suds_id::{JobId, LocationId, MachineId};
use tracing::error;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::coordinator::CoordinatorError;
use crate::lifecycle::MachineStatus;
use crate::state::AppState;
use crate::store::MachineRecord;

/// Create machine routes.
///
/// Machines are top-level resources: /v1/machines
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(enroll_machine))
        .route("/{machine_id}", get(get_machine))
        .route("/{machine_id}/start", post(start_machine))
        .route("/{machine_id}/release", post(release_machine))
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Request to enroll a new machine.
#[derive(Debug, Deserialize)]
pub struct EnrollMachineRequest {
    /// Location the machine is installed at.
    pub location_id: LocationId,
}

/// Request to release a reservation hold.
#[derive(Debug, Deserialize)]
pub struct ReleaseMachineRequest {
    /// The job holding the machine. Only the holder may release.
    pub job_id: JobId,
}

/// Response for a single machine.
#[derive(Debug, Serialize)]
pub struct MachineResponse {
    /// Machine ID.
    pub id: String,

    /// Location ID.
    pub location_id: String,

    /// Lifecycle status.
    pub status: MachineStatus,

    /// Job currently holding the machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// When the current reservation was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserved_at: Option<DateTime<Utc>>,
}

impl From<&MachineRecord> for MachineResponse {
    fn from(record: &MachineRecord) -> Self {
        Self {
            id: record.machine_id.to_string(),
            location_id: record.location_id.to_string(),
            status: record.status,
            job_id: record.job_id.map(|j| j.to_string()),
            reserved_at: record.reserved_at,
        }
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Enroll a new machine. It starts available.
async fn enroll_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(req): Json<EnrollMachineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .coordinator()
        .enroll(req.location_id)
        .await
        .map_err(|e| map_coordinator_error(e, &ctx))?;

    Ok((StatusCode::CREATED, Json(MachineResponse::from(&record))))
}

/// Current state of a machine (read-through: cache, then store).
async fn get_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let machine_id = parse_machine_id(&machine_id, &ctx)?;

    let record = state
        .coordinator()
        .get_state(machine_id)
        .await
        .map_err(|e| map_coordinator_error(e, &ctx))?;

    Ok(Json(MachineResponse::from(&record)))
}

/// Start the physical cycle on a reserved machine.
async fn start_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(machine_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let machine_id = parse_machine_id(&machine_id, &ctx)?;

    let record = state
        .coordinator()
        .start_cycle(machine_id)
        .await
        .map_err(|e| map_coordinator_error(e, &ctx))?;

    Ok(Json(MachineResponse::from(&record)))
}

/// Release a reservation hold.
async fn release_machine(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(machine_id): Path<String>,
    Json(req): Json<ReleaseMachineRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let machine_id = parse_machine_id(&machine_id, &ctx)?;

    let record = state
        .coordinator()
        .release(machine_id, req.job_id)
        .await
        .map_err(|e| map_coordinator_error(e, &ctx))?;

    Ok(Json(MachineResponse::from(&record)))
}

// =============================================================================
// Helpers
// =============================================================================

pub(super) fn parse_machine_id(raw: &str, ctx: &RequestContext) -> Result<MachineId, ApiError> {
    raw.parse::<MachineId>().map_err(|e| {
        ApiError::bad_request("invalid_machine_id", e.to_string())
            .with_request_id(ctx.request_id.clone())
    })
}

pub(super) fn parse_location_id(raw: &str, ctx: &RequestContext) -> Result<LocationId, ApiError> {
    raw.parse::<LocationId>().map_err(|e| {
        ApiError::bad_request("invalid_location_id", e.to_string())
            .with_request_id(ctx.request_id.clone())
    })
}

/// Map coordinator outcomes onto problem responses.
///
/// `invalid_state` and `hardware_error` carry the machine's current record
/// so the caller can display it.
pub(super) fn map_coordinator_error(err: CoordinatorError, ctx: &RequestContext) -> ApiError {
    let api_error = match err {
        CoordinatorError::NotFound => {
            ApiError::not_found("machine_not_found", "no machine matched the request")
        }
        CoordinatorError::InvalidState { record } => ApiError::bad_request(
            "invalid_state",
            format!(
                "machine {} is {} and cannot accept this operation",
                record.machine_id, record.status
            ),
        )
        .with_machine(&record),
        CoordinatorError::Hardware { record } => ApiError::bad_gateway(
            "hardware_error",
            format!(
                "the start command for machine {} failed; the machine is in error state",
                record.machine_id
            ),
        )
        .with_machine(&record),
        CoordinatorError::Internal(message) => {
            error!(error = %message, "Store inconsistency");
            ApiError::internal("store_inconsistent", message)
        }
        CoordinatorError::Store(e) => {
            error!(error = %e, "Machine store failure");
            ApiError::internal("store_error", "machine store unavailable")
        }
    };

    api_error.with_request_id(ctx.request_id.clone())
}
