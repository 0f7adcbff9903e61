//! possync: offline-first sync core for a point-of-sale system.
//!
//! Local mutations are versioned with per-device vector clocks, persisted to
//! SQLite together with a queued sync operation, and drained to the remote
//! side by a single dispatcher. Remote snapshots are classified against the
//! local copy; concurrent edits are recorded as conflicts.

pub mod config;
pub mod db;
pub mod device;
pub mod sync;

pub use possync_core as core;
