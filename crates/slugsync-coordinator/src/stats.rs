//! Coordinator observability: counters and the read-only desired set.

use parking_lot::RwLock;
use slugsync_core::SlugSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters updated by the coordinator task.
#[derive(Debug, Default)]
pub struct CoordinatorStats {
    passes: AtomicU64,
    debounced_passes: AtomicU64,
    full_reconciliations: AtomicU64,
    skipped_cycles: AtomicU64,
    events_received: AtomicU64,
    stream_resubscriptions: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Every pass, delta or full.
    pub passes: u64,
    pub debounced_passes: u64,
    /// Passes driven by a successful `list()`.
    pub full_reconciliations: u64,
    /// Full passes abandoned because the registry was unreachable.
    pub skipped_cycles: u64,
    pub events_received: u64,
    /// Change streams reopened after being lost.
    pub stream_resubscriptions: u64,
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_pass(&self) {
        self.passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_debounced_pass(&self) {
        self.debounced_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_full_reconciliation(&self) {
        self.full_reconciliations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_skipped(&self) {
        self.skipped_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_event(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_resubscription(&self) {
        self.stream_resubscriptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            debounced_passes: self.debounced_passes.load(Ordering::Relaxed),
            full_reconciliations: self.full_reconciliations.load(Ordering::Relaxed),
            skipped_cycles: self.skipped_cycles.load(Ordering::Relaxed),
            events_received: self.events_received.load(Ordering::Relaxed),
            stream_resubscriptions: self.stream_resubscriptions.load(Ordering::Relaxed),
        }
    }
}

/// Read-only view of the coordinator's desired subscription set.
///
/// Only the coordinator writes through it; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct DesiredSetView {
    inner: Arc<RwLock<SlugSet>>,
}

impl DesiredSetView {
    pub fn snapshot(&self) -> SlugSet {
        self.inner.read().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.inner.read().contains(slug)
    }

    pub(crate) fn replace(&self, slugs: SlugSet) {
        *self.inner.write() = slugs;
    }
}
