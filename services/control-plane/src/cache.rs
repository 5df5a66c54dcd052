//! Read-through cache of machine records.
//!
//! One instance per process, shared by every handler through the
//! coordinator. Maps machine id to the last-observed record. Entries are
//! created on first read-through or on any write touching the record, and
//! overwritten on every subsequent write. There is no TTL and no eviction;
//! the cache is not authoritative and must be written only after the store
//! has accepted a transition (strict write-through).
//!
//! The cache itself makes no atomicity promise across a get-then-put
//! sequence; the coordinator's per-machine locks serialize writers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use suds_id::MachineId;

use crate::store::MachineRecord;

/// Process-wide machine record cache.
#[derive(Clone, Default)]
pub struct MachineCache {
    inner: Arc<RwLock<HashMap<MachineId, MachineRecord>>>,
}

impl MachineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last-observed record for a machine, if any.
    pub fn get(&self, machine_id: MachineId) -> Option<MachineRecord> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&machine_id)
            .cloned()
    }

    /// Overwrite the entry for a machine.
    pub fn put(&self, record: MachineRecord) {
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.machine_id, record);
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
