//! Application state shared across request handlers.

use std::sync::Arc;

use crate::auth::Authenticator;
use crate::coordinator::ReservationCoordinator;
use crate::store::MachineStore;

/// Shared application state.
///
/// This is passed to all request handlers via Axum's state extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    coordinator: Arc<ReservationCoordinator>,
    store: Arc<dyn MachineStore>,
    authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        coordinator: Arc<ReservationCoordinator>,
        store: Arc<dyn MachineStore>,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                coordinator,
                store,
                authenticator,
            }),
        }
    }

    /// Get the reservation coordinator.
    pub fn coordinator(&self) -> &ReservationCoordinator {
        &self.inner.coordinator
    }

    /// Get the machine store (health checks only; all mutation goes
    /// through the coordinator).
    pub fn store(&self) -> &dyn MachineStore {
        self.inner.store.as_ref()
    }

    /// Get the token validator.
    pub fn authenticator(&self) -> &dyn Authenticator {
        self.inner.authenticator.as_ref()
    }
}
