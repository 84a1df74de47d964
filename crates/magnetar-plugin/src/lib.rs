//! Magnetar Plugin - Placement hooks for the host scheduling framework
//!
//! This crate provides:
//! - The `Rescheduler` placement plugin (Filter, Score, Reserve, PreBind)
//! - The reservation ledger tracking in-flight placements
//! - The recent-target map biasing scores after migrations

pub mod ledger;
pub mod plugin;
pub mod recent;
pub mod types;

// Re-export commonly used types
pub use ledger::{Reservation, ReservationLedger};
pub use plugin::{PlacementPlugin, PLUGIN_NAME};
pub use recent::RecentTargets;
pub use types::{PlacementStatus, StatusCode};
