//! Persistence property suite
//!
//! End-to-end properties of the persistence subsystem, run against the
//! in-memory store:
//!
//! - round trip: persist then rebuild yields the same graph
//! - idempotent persist and truncation on shrink
//! - restore failure isolation (incomplete records, ports taken)
//! - ownership guard of the change-notification listener
//! - lock discipline between persist and restore
//! - role-aware connect
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test persistence_properties
//! ```

mod test_utils;

mod concurrency_tests;
mod connect_tests;
mod layout_tests;
mod notify_tests;
mod restore_failure_tests;
mod round_trip_tests;
