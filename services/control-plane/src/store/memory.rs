//! In-memory machine store.
//!
//! Backs unit and integration tests, and `SUDS_STORE=memory` dev runs.
//! Records are kept in a `BTreeMap` keyed by machine id, so the listing
//! order is deterministic (ULIDs are time-ordered), matching the ORDER BY
//! of the Postgres store.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use suds_id::{JobId, LocationId, MachineId};

use crate::lifecycle::MachineStatus;

use super::{MachineRecord, MachineStore, StoreError};

/// Machine store held entirely in process memory.
#[derive(Default)]
pub struct MemoryMachineStore {
    records: RwLock<BTreeMap<MachineId, MachineRecord>>,
}

impl MemoryMachineStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<MachineId, MachineRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<MachineId, MachineRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MachineStore for MemoryMachineStore {
    async fn insert(&self, record: &MachineRecord) -> Result<(), StoreError> {
        self.write().insert(record.machine_id, record.clone());
        Ok(())
    }

    async fn list_at_location(
        &self,
        location_id: LocationId,
    ) -> Result<Vec<MachineRecord>, StoreError> {
        Ok(self
            .read()
            .values()
            .filter(|r| r.location_id == location_id)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, StoreError> {
        Ok(self.read().get(&machine_id).cloned())
    }

    async fn update_status(
        &self,
        machine_id: MachineId,
        status: MachineStatus,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.write().get_mut(&machine_id) {
            record.status = status;
        }
        Ok(())
    }

    async fn update_job_id(
        &self,
        machine_id: MachineId,
        job_id: Option<JobId>,
    ) -> Result<(), StoreError> {
        if let Some(record) = self.write().get_mut(&machine_id) {
            record.job_id = job_id;
        }
        Ok(())
    }

    async fn claim_available(
        &self,
        machine_id: MachineId,
        job_id: JobId,
        reserved_at: DateTime<Utc>,
    ) -> Result<Option<MachineRecord>, StoreError> {
        let mut records = self.write();
        match records.get_mut(&machine_id) {
            Some(record) if record.status == MachineStatus::Available => {
                record.status = MachineStatus::AwaitingDropoff;
                record.job_id = Some(job_id);
                record.reserved_at = Some(reserved_at);
                Ok(Some(record.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn release(&self, machine_id: MachineId) -> Result<Option<MachineRecord>, StoreError> {
        let mut records = self.write();
        match records.get_mut(&machine_id) {
            Some(record) => {
                record.status = MachineStatus::Available;
                record.job_id = None;
                record.reserved_at = None;
                Ok(Some(record.clone()))
            }
            None => Ok(None),
        }
    }

    async fn list_reserved_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MachineRecord>, StoreError> {
        Ok(self
            .read()
            .values()
            .filter(|r| {
                r.status == MachineStatus::AwaitingDropoff
                    && r.reserved_at.is_some_and(|at| at < cutoff)
            })
            .cloned()
            .collect())
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
