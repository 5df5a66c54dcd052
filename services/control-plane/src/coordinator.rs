//! Reservation coordinator.
//!
//! Owns every status transition: selects an available machine at a
//! location, performs the reserve transition, and manages the start-cycle
//! transition with failure recovery. All store writes happen here, and the
//! cache is written only after the store has accepted a transition.
//!
//! Concurrency discipline:
//! - per-machine lock around every read-modify-write sequence, held for the
//!   whole read → device call → write → cache-write window
//! - per-location lock around the selection step of reserve
//! - the store's conditional claim as the second line of defense, so two
//!   racing reserves cannot both bind one machine even across processes

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, instrument, warn};

use suds_id::{JobId, LocationId, MachineId};

use crate::cache::MachineCache;
use crate::device::DeviceController;
use crate::lifecycle::MachineStatus;
use crate::locks::LockRegistry;
use crate::store::{MachineRecord, MachineStore, StoreError};

/// Result type for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;

/// Classified outcomes of coordinator operations.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No machine (or no available machine) matched the request.
    #[error("no matching machine")]
    NotFound,

    /// The machine's current status does not permit the operation.
    /// Carries the current record so the caller can see why.
    #[error("machine {} is {}", record.machine_id, record.status)]
    InvalidState { record: MachineRecord },

    /// The device start command failed; the machine was moved to `error`.
    /// Carries the error-state record.
    #[error("device start failed for machine {}", record.machine_id)]
    Hardware { record: MachineRecord },

    /// A record vanished between an update and its re-read.
    #[error("store inconsistency: {0}")]
    Internal(String),

    /// The store itself failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Coordinates reservations and lifecycle transitions for machines.
pub struct ReservationCoordinator {
    store: Arc<dyn MachineStore>,
    device: Arc<dyn DeviceController>,
    cache: MachineCache,
    locks: LockRegistry,
}

impl ReservationCoordinator {
    /// Create a new coordinator over the given collaborators.
    pub fn new(
        store: Arc<dyn MachineStore>,
        device: Arc<dyn DeviceController>,
        cache: MachineCache,
    ) -> Self {
        Self {
            store,
            device,
            cache,
            locks: LockRegistry::new(),
        }
    }

    /// Enroll a new machine at a location. It starts available.
    #[instrument(skip(self))]
    pub async fn enroll(&self, location_id: LocationId) -> CoordinatorResult<MachineRecord> {
        let record = MachineRecord::enrolled(MachineId::new(), location_id);
        self.store.insert(&record).await?;
        self.cache.put(record.clone());
        info!(machine_id = %record.machine_id, location_id = %location_id, "Machine enrolled");
        Ok(record)
    }

    /// All records at a location, straight from the store.
    pub async fn list_at_location(
        &self,
        location_id: LocationId,
    ) -> CoordinatorResult<Vec<MachineRecord>> {
        Ok(self.store.list_at_location(location_id).await?)
    }

    /// Reserve an available machine at a location for a job.
    ///
    /// Candidates are tried in the store's listing order; the first
    /// successful conditional claim wins. No candidate (or every claim
    /// lost) is `NotFound`.
    #[instrument(skip(self))]
    pub async fn reserve(
        &self,
        location_id: LocationId,
        job_id: JobId,
    ) -> CoordinatorResult<MachineRecord> {
        let _location = self.locks.acquire_location(location_id).await;

        let candidates = self.store.list_at_location(location_id).await?;
        for candidate in candidates
            .iter()
            .filter(|r| r.status == MachineStatus::Available)
        {
            let _machine = self.locks.acquire_machine(candidate.machine_id).await;
            let claimed = self
                .store
                .claim_available(candidate.machine_id, job_id, Utc::now())
                .await?;
            if let Some(record) = claimed {
                self.cache.put(record.clone());
                info!(
                    machine_id = %record.machine_id,
                    location_id = %location_id,
                    job_id = %job_id,
                    "Machine reserved"
                );
                return Ok(record);
            }
            // Claim lost to a racer outside this process; try the next one.
        }

        Err(CoordinatorError::NotFound)
    }

    /// Current state of a machine: cache hit wins unconditionally, a miss
    /// falls back to the store and re-populates the cache.
    pub async fn get_state(&self, machine_id: MachineId) -> CoordinatorResult<MachineRecord> {
        if let Some(record) = self.cache.get(machine_id) {
            return Ok(record);
        }

        let record = self
            .store
            .get_by_id(machine_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;
        self.cache.put(record.clone());
        Ok(record)
    }

    /// Start the physical cycle on a reserved machine.
    ///
    /// Reads the authoritative record from the store (never the cache),
    /// gates on `awaiting_dropoff`, then issues the device command. The
    /// success and failure branches are symmetric: write the target status,
    /// re-read, write through to cache; only the target status and outcome
    /// classification differ. Once the device command has been issued the
    /// status-write path runs to completion.
    #[instrument(skip(self))]
    pub async fn start_cycle(&self, machine_id: MachineId) -> CoordinatorResult<MachineRecord> {
        let _machine = self.locks.acquire_machine(machine_id).await;

        let record = self
            .store
            .get_by_id(machine_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        if !record.status.can_start() {
            return Err(CoordinatorError::InvalidState { record });
        }

        match self.device.start_cycle(machine_id).await {
            Ok(()) => {
                let record = self
                    .finish_transition(machine_id, MachineStatus::Running)
                    .await?;
                info!(machine_id = %machine_id, "Cycle started");
                Ok(record)
            }
            Err(err) => {
                warn!(machine_id = %machine_id, error = %err, "Device start command failed");
                let record = self
                    .finish_transition(machine_id, MachineStatus::Error)
                    .await?;
                Err(CoordinatorError::Hardware { record })
            }
        }
    }

    /// Apply a status transition: write the target status to the store,
    /// re-read the authoritative record, and write it through to the cache.
    /// If the record vanished between the write and the re-read, the outcome
    /// is `Internal`.
    async fn finish_transition(
        &self,
        machine_id: MachineId,
        status: MachineStatus,
    ) -> CoordinatorResult<MachineRecord> {
        self.store.update_status(machine_id, status).await?;
        let record = self
            .store
            .get_by_id(machine_id)
            .await?
            .ok_or_else(|| {
                CoordinatorError::Internal(format!(
                    "machine {machine_id} missing during transition"
                ))
            })?;
        self.cache.put(record.clone());
        Ok(record)
    }

    /// Release a reservation hold: the machine returns to available and the
    /// job binding is cleared. Only the holder may release, and only while
    /// the machine is still awaiting drop-off.
    #[instrument(skip(self))]
    pub async fn release(
        &self,
        machine_id: MachineId,
        job_id: JobId,
    ) -> CoordinatorResult<MachineRecord> {
        let _machine = self.locks.acquire_machine(machine_id).await;

        let record = self
            .store
            .get_by_id(machine_id)
            .await?
            .ok_or(CoordinatorError::NotFound)?;

        if !record.status.can_release() || record.job_id != Some(job_id) {
            return Err(CoordinatorError::InvalidState { record });
        }

        let released = self.store.release(machine_id).await?.ok_or_else(|| {
            CoordinatorError::Internal(format!("machine {machine_id} missing during release"))
        })?;
        self.cache.put(released.clone());
        info!(machine_id = %machine_id, job_id = %job_id, "Reservation released");
        Ok(released)
    }

    /// Release every hold older than `max_hold`. Returns the number of
    /// machines reclaimed. Each machine is revalidated under its lock, so a
    /// hold that progressed to running in the meantime is left alone.
    #[instrument(skip(self))]
    pub async fn reclaim_expired(
        &self,
        max_hold: std::time::Duration,
    ) -> CoordinatorResult<usize> {
        let cutoff = Utc::now() - chrono::Duration::seconds(max_hold.as_secs() as i64);
        let overdue = self.store.list_reserved_before(cutoff).await?;

        let mut reclaimed = 0;
        for stale in overdue {
            let _machine = self.locks.acquire_machine(stale.machine_id).await;

            let Some(current) = self.store.get_by_id(stale.machine_id).await? else {
                continue;
            };
            let still_overdue = current.status == MachineStatus::AwaitingDropoff
                && current.reserved_at.is_some_and(|at| at < cutoff);
            if !still_overdue {
                continue;
            }

            if let Some(released) = self.store.release(current.machine_id).await? {
                self.cache.put(released.clone());
                reclaimed += 1;
                info!(
                    machine_id = %current.machine_id,
                    job_id = ?current.job_id,
                    "Reclaimed overdue hold"
                );
            }
        }

        Ok(reclaimed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceError;
    use crate::store::MemoryMachineStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Device controller double: counts calls, fails on demand.
    #[derive(Default)]
    struct MockDevice {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl MockDevice {
        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl DeviceController for MockDevice {
        async fn start_cycle(&self, _machine_id: MachineId) -> Result<(), DeviceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                Err(DeviceError::Transport("drum controller offline".into()))
            } else {
                Ok(())
            }
        }
    }

    struct Harness {
        coordinator: ReservationCoordinator,
        store: Arc<MemoryMachineStore>,
        device: Arc<MockDevice>,
        cache: MachineCache,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryMachineStore::new());
        let device = Arc::new(MockDevice::default());
        let cache = MachineCache::new();
        let coordinator = ReservationCoordinator::new(
            Arc::clone(&store) as Arc<dyn MachineStore>,
            Arc::clone(&device) as Arc<dyn DeviceController>,
            cache.clone(),
        );
        Harness {
            coordinator,
            store,
            device,
            cache,
        }
    }

    async fn seed(h: &Harness, location: LocationId, status: MachineStatus) -> MachineRecord {
        let mut record = MachineRecord::enrolled(MachineId::new(), location);
        record.status = status;
        if status == MachineStatus::AwaitingDropoff {
            record.job_id = Some(JobId::new());
            record.reserved_at = Some(Utc::now());
        }
        h.store.insert(&record).await.unwrap();
        record
    }

    // One available and one running machine; reserve picks the available
    // one and binds the job.
    #[tokio::test]
    async fn reserve_picks_first_available_machine() {
        let h = harness();
        let location = LocationId::new();
        let m1 = seed(&h, location, MachineStatus::Available).await;
        let _m2 = seed(&h, location, MachineStatus::Running).await;

        let job = JobId::new();
        let reserved = h.coordinator.reserve(location, job).await.unwrap();

        assert_eq!(reserved.machine_id, m1.machine_id);
        assert_eq!(reserved.status, MachineStatus::AwaitingDropoff);
        assert_eq!(reserved.job_id, Some(job));
    }

    #[tokio::test]
    async fn reserve_with_no_candidates_is_not_found() {
        let h = harness();
        let location = LocationId::new();
        seed(&h, location, MachineStatus::Running).await;

        let result = h.coordinator.reserve(location, JobId::new()).await;
        assert!(matches!(result, Err(CoordinatorError::NotFound)));
    }

    #[tokio::test]
    async fn reserve_writes_through_cache() {
        let h = harness();
        let location = LocationId::new();
        let machine = seed(&h, location, MachineStatus::Available).await;

        let reserved = h.coordinator.reserve(location, JobId::new()).await.unwrap();
        let cached = h.cache.get(machine.machine_id).unwrap();
        assert_eq!(cached, reserved);
    }

    // Available machines never carry a job binding, after every reserve,
    // across all machines at the location.
    #[tokio::test]
    async fn invariant_holds_after_reserve() {
        let h = harness();
        let location = LocationId::new();
        for _ in 0..4 {
            seed(&h, location, MachineStatus::Available).await;
        }

        h.coordinator.reserve(location, JobId::new()).await.unwrap();
        h.coordinator.reserve(location, JobId::new()).await.unwrap();

        let records = h.store.list_at_location(location).await.unwrap();
        assert!(records.iter().all(|r| r.invariant_holds()));
    }

    // N concurrent reserves against one available machine: exactly one
    // success, the rest NotFound. Never two successes.
    #[tokio::test]
    async fn concurrent_reserves_yield_one_winner() {
        let h = harness();
        let location = LocationId::new();
        seed(&h, location, MachineStatus::Available).await;

        let coordinator = Arc::new(h.coordinator);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let coordinator = Arc::clone(&coordinator);
            handles.push(tokio::spawn(async move {
                coordinator.reserve(location, JobId::new()).await
            }));
        }

        let mut successes = 0;
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => successes += 1,
                Err(CoordinatorError::NotFound) => not_found += 1,
                Err(other) => panic!("unexpected outcome: {other:?}"),
            }
        }

        assert_eq!(successes, 1);
        assert_eq!(not_found, 15);
    }

    #[tokio::test]
    async fn get_state_reads_cache_then_store() {
        let h = harness();
        let location = LocationId::new();
        let machine = seed(&h, location, MachineStatus::Available).await;

        // Cold: falls through to the store and populates the cache.
        let fetched = h.coordinator.get_state(machine.machine_id).await.unwrap();
        assert_eq!(fetched, machine);
        assert_eq!(h.cache.get(machine.machine_id), Some(machine.clone()));

        // Hot: served from the cache even if the store entry changes
        // underneath (no freshness check by design).
        h.store
            .update_status(machine.machine_id, MachineStatus::Running)
            .await
            .unwrap();
        let cached = h.coordinator.get_state(machine.machine_id).await.unwrap();
        assert_eq!(cached.status, MachineStatus::Available);
    }

    // An unknown machine is NotFound and leaves no cache entry behind.
    #[tokio::test]
    async fn get_state_unknown_machine_leaves_no_cache_entry() {
        let h = harness();
        let unknown = MachineId::new();

        let result = h.coordinator.get_state(unknown).await;
        assert!(matches!(result, Err(CoordinatorError::NotFound)));
        assert!(h.cache.is_empty());
    }

    // Device succeeds: machine moves to running.
    #[tokio::test]
    async fn start_cycle_success_moves_to_running() {
        let h = harness();
        let location = LocationId::new();
        let machine = seed(&h, location, MachineStatus::AwaitingDropoff).await;

        let record = h.coordinator.start_cycle(machine.machine_id).await.unwrap();
        assert_eq!(record.status, MachineStatus::Running);
        assert_eq!(h.device.call_count(), 1);

        // Write-through: cache and a follow-up read both see the transition.
        assert_eq!(
            h.cache.get(machine.machine_id).unwrap().status,
            MachineStatus::Running
        );
        let state = h.coordinator.get_state(machine.machine_id).await.unwrap();
        assert_eq!(state.status, MachineStatus::Running);
    }

    // Device fails: machine moves to error, outcome is Hardware and
    // carries the error-state record.
    #[tokio::test]
    async fn start_cycle_failure_moves_to_error() {
        let h = harness();
        let location = LocationId::new();
        let machine = seed(&h, location, MachineStatus::AwaitingDropoff).await;
        h.device.set_failing(true);

        let result = h.coordinator.start_cycle(machine.machine_id).await;
        match result {
            Err(CoordinatorError::Hardware { record }) => {
                assert_eq!(record.machine_id, machine.machine_id);
                assert_eq!(record.status, MachineStatus::Error);
            }
            other => panic!("expected Hardware, got {other:?}"),
        }

        assert_eq!(
            h.cache.get(machine.machine_id).unwrap().status,
            MachineStatus::Error
        );
    }

    // A running machine is rejected before the controller is ever invoked,
    // and nothing is written.
    #[tokio::test]
    async fn start_cycle_on_running_machine_is_invalid_state() {
        let h = harness();
        let location = LocationId::new();
        let machine = seed(&h, location, MachineStatus::Running).await;

        let result = h.coordinator.start_cycle(machine.machine_id).await;
        match result {
            Err(CoordinatorError::InvalidState { record }) => {
                assert_eq!(record.machine_id, machine.machine_id);
                assert_eq!(record.status, MachineStatus::Running);
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }

        assert_eq!(h.device.call_count(), 0);
        // No transition, no cache write.
        assert!(h.cache.get(machine.machine_id).is_none());
        let stored = h.store.get_by_id(machine.machine_id).await.unwrap().unwrap();
        assert_eq!(stored.status, MachineStatus::Running);
    }

    #[tokio::test]
    async fn start_cycle_unknown_machine_is_not_found() {
        let h = harness();
        let result = h.coordinator.start_cycle(MachineId::new()).await;
        assert!(matches!(result, Err(CoordinatorError::NotFound)));
        assert_eq!(h.device.call_count(), 0);
    }

    #[tokio::test]
    async fn release_by_holder_returns_machine_to_available() {
        let h = harness();
        let location = LocationId::new();
        seed(&h, location, MachineStatus::Available).await;

        let job = JobId::new();
        let reserved = h.coordinator.reserve(location, job).await.unwrap();
        let released = h
            .coordinator
            .release(reserved.machine_id, job)
            .await
            .unwrap();

        assert_eq!(released.status, MachineStatus::Available);
        assert_eq!(released.job_id, None);
        assert!(released.invariant_holds());
        assert_eq!(h.cache.get(reserved.machine_id), Some(released));
    }

    #[tokio::test]
    async fn release_by_non_holder_is_rejected() {
        let h = harness();
        let location = LocationId::new();
        seed(&h, location, MachineStatus::Available).await;

        let reserved = h.coordinator.reserve(location, JobId::new()).await.unwrap();
        let result = h.coordinator.release(reserved.machine_id, JobId::new()).await;

        assert!(matches!(result, Err(CoordinatorError::InvalidState { .. })));
        let stored = h
            .store
            .get_by_id(reserved.machine_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, MachineStatus::AwaitingDropoff);
    }

    #[tokio::test]
    async fn release_of_running_machine_is_rejected() {
        let h = harness();
        let location = LocationId::new();
        let machine = seed(&h, location, MachineStatus::Running).await;

        let result = h.coordinator.release(machine.machine_id, JobId::new()).await;
        assert!(matches!(result, Err(CoordinatorError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn reclaim_releases_only_overdue_holds() {
        let h = harness();
        let location = LocationId::new();

        let overdue = seed(&h, location, MachineStatus::Available).await;
        let fresh = seed(&h, location, MachineStatus::Available).await;

        // An overdue hold: claim with a reservation timestamp two hours old.
        h.store
            .claim_available(
                overdue.machine_id,
                JobId::new(),
                Utc::now() - chrono::Duration::hours(2),
            )
            .await
            .unwrap();
        // A fresh hold.
        h.store
            .claim_available(fresh.machine_id, JobId::new(), Utc::now())
            .await
            .unwrap();

        let reclaimed = h
            .coordinator
            .reclaim_expired(std::time::Duration::from_secs(3600))
            .await
            .unwrap();
        assert_eq!(reclaimed, 1);

        let overdue_now = h
            .store
            .get_by_id(overdue.machine_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(overdue_now.status, MachineStatus::Available);
        assert_eq!(overdue_now.job_id, None);

        let fresh_now = h.store.get_by_id(fresh.machine_id).await.unwrap().unwrap();
        assert_eq!(fresh_now.status, MachineStatus::AwaitingDropoff);
    }

    #[tokio::test]
    async fn enroll_starts_available_and_cached() {
        let h = harness();
        let location = LocationId::new();

        let record = h.coordinator.enroll(location).await.unwrap();
        assert_eq!(record.status, MachineStatus::Available);
        assert_eq!(record.job_id, None);
        assert_eq!(h.cache.get(record.machine_id), Some(record.clone()));
        assert_eq!(
            h.store.get_by_id(record.machine_id).await.unwrap(),
            Some(record)
        );
    }
}
