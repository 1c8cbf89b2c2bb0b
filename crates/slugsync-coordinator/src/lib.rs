//! Subscription coordinator for slugsync replicas.
//!
//! Listens for registry changes, keeps a desired subscription set, and
//! drives the local feed connection toward it. Change notifications are
//! best-effort; periodic full reconciliation repairs anything they miss.

pub mod config;
pub mod coordinator;
pub mod stats;

pub use config::CoordinatorConfig;
pub use coordinator::{Coordinator, ReconcileTrigger};
pub use stats::{CoordinatorStats, DesiredSetView, StatsSnapshot};
