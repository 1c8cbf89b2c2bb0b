//! Upstream subscription tracking.
//!
//! The tracker holds the slugs the upstream *should* be streaming for this
//! connection. It is written only by the connection task, so commands,
//! replays, and the tracked set can never disagree. Readers get snapshots.

use crate::feed_handle::FeedCommand;
use parking_lot::RwLock;
use slugsync_core::{SetDiff, SlugSet};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    active: Arc<RwLock<SlugSet>>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a command into the tracked set.
    ///
    /// Returns the change that actually happened. Redundant requests
    /// (subscribing a tracked slug, unsubscribing an untracked one) produce
    /// an empty diff and therefore no frame.
    pub fn apply(&self, command: &FeedCommand) -> SetDiff {
        let mut active = self.active.write();
        let diff = match command {
            FeedCommand::Subscribe(slugs) => SetDiff {
                to_unsubscribe: SlugSet::new(),
                to_subscribe: slugs.difference(&*active).cloned().collect(),
            },
            FeedCommand::Unsubscribe(slugs) => SetDiff {
                to_unsubscribe: slugs.intersection(&*active).cloned().collect(),
                to_subscribe: SlugSet::new(),
            },
            FeedCommand::Sync(desired) => SetDiff::between(&*active, desired),
        };
        diff.apply_to(&mut *active);
        debug!(
            added = diff.to_subscribe.len(),
            removed = diff.to_unsubscribe.len(),
            total = active.len(),
            "Subscription set updated"
        );
        diff
    }

    /// Everything that must be sent after a fresh connect.
    pub fn active_subscriptions(&self) -> SlugSet {
        self.active.read().clone()
    }

    pub fn len(&self) -> usize {
        self.active.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.read().is_empty()
    }

    pub fn contains(&self, slug: &str) -> bool {
        self.active.read().contains(slug)
    }
}
