//! Reservation reclaim.
//!
//! Opt-in background worker that releases reservation holds older than the
//! configured max hold duration. With no max hold configured, no timeout
//! policy exists and reserved machines stay reserved until released.

mod worker;

pub use worker::ReclaimWorker;
