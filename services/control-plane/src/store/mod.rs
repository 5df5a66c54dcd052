//! Machine record store.
//!
//! This module provides:
//! - The durable `MachineRecord` shape
//! - The `MachineStore` trait the coordinator runs against
//! - A Postgres implementation (production) and an in-memory implementation
//!   (tests and `SUDS_STORE=memory` dev runs)
//!
//! The store owns the authoritative record; the read-through cache holds a
//! copy that is written only after the store has accepted a transition.

mod memory;
mod postgres;

pub use memory::MemoryMachineStore;
pub use postgres::PgMachineStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use suds_id::{JobId, LocationId, MachineId};
use thiserror::Error;

use crate::lifecycle::MachineStatus;

/// The persisted state of one physical machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineRecord {
    /// Stable unique identifier, immutable after enrollment.
    pub machine_id: MachineId,

    /// The physical site grouping, immutable.
    pub location_id: LocationId,

    /// Lifecycle status; mutated only by the coordinator.
    pub status: MachineStatus,

    /// The job currently holding the machine, if any.
    pub job_id: Option<JobId>,

    /// When the current reservation was taken; cleared on release.
    pub reserved_at: Option<DateTime<Utc>>,
}

impl MachineRecord {
    /// A freshly enrolled machine: available, no job bound.
    pub fn enrolled(machine_id: MachineId, location_id: LocationId) -> Self {
        Self {
            machine_id,
            location_id,
            status: MachineStatus::Available,
            job_id: None,
            reserved_at: None,
        }
    }

    /// The core invariant: an available machine has no job bound.
    pub fn invariant_holds(&self) -> bool {
        self.status != MachineStatus::Available
            || (self.job_id.is_none() && self.reserved_at.is_none())
    }
}

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failed to connect to the database.
    #[error("failed to connect to database: {0}")]
    Connect(#[source] sqlx::Error),

    /// Failed to execute a query.
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Failed to run migrations.
    #[error("migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),

    /// Migration directory not found in the current environment.
    #[error("migration directory not found; tried {tried}. Last error: {last_error}. Run from repo root or services/control-plane.")]
    MigrationDirNotFound { tried: String, last_error: String },

    /// A stored row could not be decoded into a record.
    #[error("corrupt machine row: {0}")]
    Decode(String),
}

/// Durable key-value store of machine records, queryable by id and by
/// location, with conditional compound updates for claim and release.
#[async_trait]
pub trait MachineStore: Send + Sync {
    /// Insert a freshly enrolled record.
    async fn insert(&self, record: &MachineRecord) -> Result<(), StoreError>;

    /// All records at a location, in the store's listing order.
    async fn list_at_location(
        &self,
        location_id: LocationId,
    ) -> Result<Vec<MachineRecord>, StoreError>;

    /// Look up one record by machine id.
    async fn get_by_id(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, StoreError>;

    /// Overwrite the status field.
    async fn update_status(
        &self,
        machine_id: MachineId,
        status: MachineStatus,
    ) -> Result<(), StoreError>;

    /// Overwrite the job binding.
    async fn update_job_id(
        &self,
        machine_id: MachineId,
        job_id: Option<JobId>,
    ) -> Result<(), StoreError>;

    /// Conditional claim: in one compound update, move the record to
    /// `awaiting_dropoff` and bind the job, but only if the record is still
    /// `available`. Returns the updated record, or `None` if the guard
    /// failed (the machine was taken or does not exist).
    async fn claim_available(
        &self,
        machine_id: MachineId,
        job_id: JobId,
        reserved_at: DateTime<Utc>,
    ) -> Result<Option<MachineRecord>, StoreError>;

    /// Compound un-claim: return the record to `available` and clear the
    /// job binding and reservation timestamp in one update. Returns the
    /// updated record, or `None` if the machine does not exist.
    async fn release(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, StoreError>;

    /// Records in `awaiting_dropoff` whose reservation is older than the
    /// cutoff. Used by the opt-in reclaim worker.
    async fn list_reserved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MachineRecord>, StoreError>;

    /// Check that the store is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Database connection URL.
    pub database_url: String,

    /// Maximum number of connections in the pool.
    pub max_connections: u32,

    /// Minimum number of idle connections.
    pub min_connections: u32,

    /// Connection acquire timeout.
    pub acquire_timeout: std::time::Duration,

    /// Idle connection timeout.
    pub idle_timeout: std::time::Duration,

    /// Maximum lifetime of a connection.
    pub max_lifetime: std::time::Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/suds".to_string(),
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: std::time::Duration::from_secs(5),
            idle_timeout: std::time::Duration::from_secs(600),
            max_lifetime: std::time::Duration::from_secs(1800),
        }
    }
}

impl DbConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/suds".to_string());

        let max_connections = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(10);

        let min_connections = std::env::var("DB_MIN_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);

        Self {
            database_url,
            max_connections,
            min_connections,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_config_defaults() {
        let config = DbConfig::default();
        assert_eq!(config.max_connections, 10);
        assert_eq!(config.min_connections, 1);
    }

    #[test]
    fn enrolled_record_satisfies_invariant() {
        let record = MachineRecord::enrolled(MachineId::new(), LocationId::new());
        assert_eq!(record.status, MachineStatus::Available);
        assert!(record.invariant_holds());
    }

    #[test]
    fn available_with_job_violates_invariant() {
        let mut record = MachineRecord::enrolled(MachineId::new(), LocationId::new());
        record.job_id = Some(JobId::new());
        assert!(!record.invariant_holds());
    }
}
