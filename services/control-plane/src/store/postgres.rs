//! Postgres-backed machine store.
//!
//! Uses SQLx with Postgres. Claim and release are single compound UPDATE
//! statements with a `RETURNING` clause, so the guard, the field writes,
//! and the read-back are one atomic statement.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use suds_id::{JobId, LocationId, MachineId};
use tracing::info;

use crate::lifecycle::MachineStatus;

use super::{DbConfig, MachineRecord, MachineStore, StoreError};

const RECORD_COLUMNS: &str = "machine_id, location_id, status, job_id, reserved_at";

/// Machine store backed by a Postgres connection pool.
#[derive(Clone)]
pub struct PgMachineStore {
    pool: PgPool,
}

impl PgMachineStore {
    /// Create a new store with a fresh connection pool.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            "Connecting to database"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout)
            .idle_timeout(Some(config.idle_timeout))
            .max_lifetime(Some(config.max_lifetime))
            .connect(&config.database_url)
            .await
            .map_err(StoreError::Connect)?;

        info!("Database connection pool established");

        Ok(Self { pool })
    }

    /// Get a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// Note: In production, migrations should be run via a separate migration
    /// tool or as part of deployment. This method uses runtime migration
    /// loading.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        info!("Running database migrations");

        let candidates = vec![
            std::path::PathBuf::from("./migrations"),
            std::path::PathBuf::from("services/control-plane/migrations"),
            std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("migrations"),
        ];
        let mut last_error: Option<sqlx::migrate::MigrateError> = None;

        for dir in &candidates {
            match sqlx::migrate::Migrator::new(dir.clone()).await {
                Ok(migrator) => {
                    info!(migrations_dir = %dir.display(), "Loaded migrations");
                    migrator
                        .run(&self.pool)
                        .await
                        .map_err(StoreError::Migration)?;
                    info!("Database migrations complete");
                    return Ok(());
                }
                Err(e) => {
                    last_error = Some(e);
                }
            }
        }

        let tried = candidates
            .iter()
            .map(|dir| dir.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");

        Err(StoreError::MigrationDirNotFound {
            tried,
            last_error: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown error".to_string()),
        })
    }
}

#[async_trait]
impl MachineStore for PgMachineStore {
    async fn insert(&self, record: &MachineRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO machines (machine_id, location_id, status, job_id, reserved_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.machine_id.to_string())
        .bind(record.location_id.to_string())
        .bind(record.status.as_str())
        .bind(record.job_id.map(|j| j.to_string()))
        .bind(record.reserved_at)
        .execute(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        Ok(())
    }

    async fn list_at_location(
        &self,
        location_id: LocationId,
    ) -> Result<Vec<MachineRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MachineRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM machines
            WHERE location_id = $1
            ORDER BY machine_id
            "#
        ))
        .bind(location_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.into_iter().map(MachineRow::into_record).collect()
    }

    async fn get_by_id(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, StoreError> {
        let row = sqlx::query_as::<_, MachineRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM machines
            WHERE machine_id = $1
            "#
        ))
        .bind(machine_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.map(MachineRow::into_record).transpose()
    }

    async fn update_status(
        &self,
        machine_id: MachineId,
        status: MachineStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE machines SET status = $2 WHERE machine_id = $1")
            .bind(machine_id.to_string())
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        Ok(())
    }

    async fn update_job_id(
        &self,
        machine_id: MachineId,
        job_id: Option<JobId>,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE machines SET job_id = $2 WHERE machine_id = $1")
            .bind(machine_id.to_string())
            .bind(job_id.map(|j| j.to_string()))
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;

        Ok(())
    }

    async fn claim_available(
        &self,
        machine_id: MachineId,
        job_id: JobId,
        reserved_at: DateTime<Utc>,
    ) -> Result<Option<MachineRecord>, StoreError> {
        let row = sqlx::query_as::<_, MachineRow>(&format!(
            r#"
            UPDATE machines
            SET status = $2, job_id = $3, reserved_at = $4
            WHERE machine_id = $1 AND status = $5
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(machine_id.to_string())
        .bind(MachineStatus::AwaitingDropoff.as_str())
        .bind(job_id.to_string())
        .bind(reserved_at)
        .bind(MachineStatus::Available.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.map(MachineRow::into_record).transpose()
    }

    async fn release(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, StoreError> {
        let row = sqlx::query_as::<_, MachineRow>(&format!(
            r#"
            UPDATE machines
            SET status = $2, job_id = NULL, reserved_at = NULL
            WHERE machine_id = $1
            RETURNING {RECORD_COLUMNS}
            "#
        ))
        .bind(machine_id.to_string())
        .bind(MachineStatus::Available.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        row.map(MachineRow::into_record).transpose()
    }

    async fn list_reserved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MachineRecord>, StoreError> {
        let rows = sqlx::query_as::<_, MachineRow>(&format!(
            r#"
            SELECT {RECORD_COLUMNS}
            FROM machines
            WHERE status = $1 AND reserved_at < $2
            ORDER BY reserved_at
            "#
        ))
        .bind(MachineStatus::AwaitingDropoff.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::Query)?;

        rows.into_iter().map(MachineRow::into_record).collect()
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(StoreError::Query)?;
        Ok(())
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(Debug)]
struct MachineRow {
    machine_id: String,
    location_id: String,
    status: String,
    job_id: Option<String>,
    reserved_at: Option<DateTime<Utc>>,
}

impl MachineRow {
    fn into_record(self) -> Result<MachineRecord, StoreError> {
        let machine_id = self
            .machine_id
            .parse::<MachineId>()
            .map_err(|e| StoreError::Decode(format!("machine_id '{}': {e}", self.machine_id)))?;
        let location_id = self
            .location_id
            .parse::<LocationId>()
            .map_err(|e| StoreError::Decode(format!("location_id '{}': {e}", self.location_id)))?;
        let status = self
            .status
            .parse::<MachineStatus>()
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let job_id = self
            .job_id
            .map(|j| {
                j.parse::<JobId>()
                    .map_err(|e| StoreError::Decode(format!("job_id '{j}': {e}")))
            })
            .transpose()?;

        Ok(MachineRecord {
            machine_id,
            location_id,
            status,
            job_id,
            reserved_at: self.reserved_at,
        })
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for MachineRow {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(Self {
            machine_id: row.try_get("machine_id")?,
            location_id: row.try_get("location_id")?,
            status: row.try_get("status")?,
            job_id: row.try_get("job_id")?,
            reserved_at: row.try_get("reserved_at")?,
        })
    }
}
