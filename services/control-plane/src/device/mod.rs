//! Device controller interface.
//!
//! The device controller issues the physical "start cycle" command for a
//! machine. The coordinator only cares about the success/failure outcome;
//! the controller's internal retry protocol is out of scope.

mod http;

pub use http::{DeviceConfig, HttpDeviceController};

use async_trait::async_trait;
use suds_id::MachineId;
use thiserror::Error;

/// Device command errors.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// The gateway answered with a non-success status.
    #[error("device command rejected: {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The gateway could not be reached, or the request timed out.
    /// A timeout is classified the same as a command failure.
    #[error("device gateway unreachable: {0}")]
    Transport(String),
}

/// Issues physical commands to machines.
#[async_trait]
pub trait DeviceController: Send + Sync {
    /// Start the physical cycle on a machine. Fails on hardware or
    /// communication error.
    async fn start_cycle(&self, machine_id: MachineId) -> Result<(), DeviceError>;
}
