//! Magnetar Rebalancer - Periodic rebalancing and migration execution
//!
//! This crate provides:
//! - The rebalancer controller (snapshot, strategies, capped dispatch)
//! - The migration executor (preference steering and recreate-then-evict)
//! - The label-driven migration state machine and retry path
//! - The periodic cleanup worker for transient migration resources

pub mod cleanup;
pub mod controller;
pub mod error;
pub mod evictable;
pub mod executor;
pub mod naming;
pub mod state;
pub mod steering;
pub mod strategy;

// Re-export commonly used types
pub use cleanup::CleanupWorker;
pub use controller::{run_reservation_sweeper, RebalancerController};
pub use error::{RebalancerError, Result};
pub use executor::{detect_ownership, MigrationExecutor, Ownership};
pub use state::{MigrationStateWorker, MAX_MIGRATION_RETRIES};
pub use strategy::Decision;
