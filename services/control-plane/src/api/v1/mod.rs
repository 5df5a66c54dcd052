//! API v1 routes.

mod locations;
mod machines;

use axum::Router;

use crate::state::AppState;

/// Create the v1 API router.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/machines", machines::routes())
        .nest("/locations", locations::routes())
}
