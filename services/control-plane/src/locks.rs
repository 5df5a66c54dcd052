//! Keyed async locks.
//!
//! The coordinator serializes read-modify-write sequences per machine and
//! the selection step of reserve per location. Guards are owned so they can
//! be held across await points (the device-start call happens under the
//! machine lock).
//!
//! Lock ordering: location before machine. Reserve takes both in that
//! order; every other path takes only the machine lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use suds_id::{LocationId, MachineId};
use tokio::sync::OwnedMutexGuard;

/// Registry of named async mutexes, created on first use.
///
/// Entries are never removed; the key space is bounded by the machine and
/// location population.
#[derive(Default)]
pub struct LockRegistry {
    slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for an arbitrary key, waiting if it is held.
    pub async fn acquire(&self, key: impl Into<String>) -> OwnedMutexGuard<()> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(slots.entry(key.into()).or_default())
        };
        slot.lock_owned().await
    }

    /// Per-machine mutual exclusion.
    pub async fn acquire_machine(&self, machine_id: MachineId) -> OwnedMutexGuard<()> {
        self.acquire(format!("machine:{machine_id}")).await
    }

    /// Per-location serialization of reservation selection.
    pub async fn acquire_location(&self, location_id: LocationId) -> OwnedMutexGuard<()> {
        self.acquire(format!("location:{location_id}")).await
    }
}
