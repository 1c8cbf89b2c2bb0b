//! Coordinator timing.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Window, measured from the first buffered event, within which change
    /// events are coalesced into one pass.
    pub debounce: Duration,
    /// Period of the self-healing full reconciliation.
    pub reconcile_interval: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(250),
            reconcile_interval: Duration::from_secs(30),
        }
    }
}

impl CoordinatorConfig {
    pub fn from_millis(debounce_ms: u64, reconcile_interval_ms: u64) -> Self {
        Self {
            debounce: Duration::from_millis(debounce_ms),
            // A zero period would make the ticker spin
            reconcile_interval: Duration::from_millis(reconcile_interval_ms.max(1)),
        }
    }
}
