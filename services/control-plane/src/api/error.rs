use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::MachineRecord;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
    /// The machine's current record, for state-carrying failures
    /// (`invalid_state`, `hardware_error`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<serde_json::Value>,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://suds.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            code,
            request_id: "unknown".to_string(),
            retryable: false,
            machine: None,
        }
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::BAD_REQUEST;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::NOT_FOUND;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::UNAUTHORIZED;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    /// The device gateway failed; retrying after operator attention is
    /// plausible, so the problem is marked retryable.
    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::BAD_GATEWAY;
        let mut problem = Box::new(ProblemDetails::new(status, code, message));
        problem.retryable = true;
        Self { status, problem }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.request_id = request_id.into();
        self
    }

    pub fn with_machine(mut self, record: &MachineRecord) -> Self {
        self.problem.machine = serde_json::to_value(record).ok();
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::MachineStatus;
    use suds_id::{LocationId, MachineId};

    #[test]
    fn problem_carries_code_and_request_id() {
        let err = ApiError::not_found("machine_not_found", "no such machine")
            .with_request_id("req_test");
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.problem.code, "machine_not_found");
        assert_eq!(err.problem.request_id, "req_test");
        assert!(!err.problem.retryable);
    }

    #[test]
    fn bad_gateway_is_retryable_and_carries_machine() {
        let record = MachineRecord {
            machine_id: MachineId::new(),
            location_id: LocationId::new(),
            status: MachineStatus::Error,
            job_id: None,
            reserved_at: None,
        };
        let err =
            ApiError::bad_gateway("hardware_error", "start command failed").with_machine(&record);
        assert!(err.problem.retryable);
        let machine = err.problem.machine.unwrap();
        assert_eq!(machine["status"], "error");
    }
}
