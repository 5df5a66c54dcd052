//! Request-scoped context extracted from HTTP requests.
//!
//! Token validation happens here: a request either carries a valid bearer
//! token (or the boundary is open) and gets a context, or it is rejected
//! with a typed `unauthorized` problem.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use sha2::{Digest, Sha256};
use suds_id::RequestId;

use crate::api::error::ApiError;
use crate::state::AppState;

pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub actor_id: String,
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn bearer_token(headers: &HeaderMap, request_id: &str) -> Result<Option<String>, ApiError> {
    let Some(auth_value) = header_string(headers, AUTHORIZATION_HEADER) else {
        return Ok(None);
    };

    let auth_value = auth_value.trim();
    let Some(token) = auth_value.strip_prefix("Bearer ") else {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization must be a Bearer token",
        )
        .with_request_id(request_id.to_string()));
    };

    let token = token.trim();
    if token.is_empty() {
        return Err(ApiError::unauthorized(
            "invalid_authorization",
            "Authorization Bearer token cannot be empty",
        )
        .with_request_id(request_id.to_string()));
    }

    Ok(Some(token.to_string()))
}

/// Derive a stable, non-secret actor id from a token.
/// Important: never persist or log bearer tokens.
fn actor_id_for(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex = format!("{digest:x}");
    let short = hex.get(..32).unwrap_or(&hex);
    format!("usr_{short}")
}

impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, REQUEST_ID_HEADER)
            .unwrap_or_else(|| RequestId::new().to_string());

        let token = bearer_token(&parts.headers, &request_id)?;

        let actor_id = match token {
            Some(token) => {
                if !state.authenticator().validate_token(&token) {
                    return Err(ApiError::unauthorized(
                        "invalid_token",
                        "The presented token is not valid",
                    )
                    .with_request_id(request_id));
                }
                actor_id_for(&token)
            }
            None => {
                if !state.authenticator().allows_anonymous() {
                    return Err(ApiError::unauthorized(
                        "missing_token",
                        "A Bearer token is required",
                    )
                    .with_request_id(request_id));
                }
                "anonymous".to_string()
            }
        };

        Ok(Self {
            request_id,
            actor_id,
        })
    }
}
