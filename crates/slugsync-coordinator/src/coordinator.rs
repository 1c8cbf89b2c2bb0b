//! Subscription coordinator.
//!
//! One task per replica. It owns the desired subscription set and is the
//! only writer of it. Three inputs drive it:
//! - registry change events, buffered and applied as deltas once the
//!   debounce window closes
//! - a periodic timer that re-reads the registry and repairs any drift
//! - feed state transitions, where every (re)connect triggers a full pass
//!
//! Within a pass all unsubscribes are queued before all subscribes. A
//! successful full pass discards any buffered events, since the listing it
//! just applied already reflects them.

use crate::config::CoordinatorConfig;
use crate::stats::{CoordinatorStats, DesiredSetView, StatsSnapshot};
use slugsync_core::{ChangeEvent, ChangeKind, SetDiff, SlugSet};
use slugsync_registry::{ChangeStream, SlugRegistry};
use slugsync_telemetry::Metrics;
use slugsync_ws::{ConnectionState, FeedHandle};
use std::sync::Arc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a reconciliation pass ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    Startup,
    Debounce,
    Interval,
    Reconnect,
    Replace,
}

impl ReconcileTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Startup => "startup",
            Self::Debounce => "debounce",
            Self::Interval => "interval",
            Self::Reconnect => "reconnect",
            Self::Replace => "replace",
        }
    }
}

pub struct Coordinator {
    registry: Arc<dyn SlugRegistry>,
    feed: FeedHandle,
    config: CoordinatorConfig,
    desired: DesiredSetView,
    stats: Arc<CoordinatorStats>,
}

impl Coordinator {
    pub fn new(registry: Arc<dyn SlugRegistry>, feed: FeedHandle, config: CoordinatorConfig) -> Self {
        Self {
            registry,
            feed,
            config,
            desired: DesiredSetView::default(),
            stats: Arc::new(CoordinatorStats::new()),
        }
    }

    /// Read-only view of the desired set.
    pub fn desired(&self) -> DesiredSetView {
        self.desired.clone()
    }

    pub fn stats(&self) -> Arc<CoordinatorStats> {
        self.stats.clone()
    }

    pub fn stats_snapshot(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Run until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            debounce_ms = self.config.debounce.as_millis() as u64,
            reconcile_interval_ms = self.config.reconcile_interval.as_millis() as u64,
            "Coordinator starting"
        );

        // Subscribe before the first list so nothing falls between the two
        let mut changes = self.open_change_stream().await;
        self.reconcile(ReconcileTrigger::Startup).await;

        let mut state_rx = self.feed.state_watch();
        let mut was_connected = *state_rx.borrow_and_update() == ConnectionState::Connected;
        let mut feed_alive = true;

        let period = self.config.reconcile_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut pending: Vec<ChangeEvent> = Vec::new();
        let mut deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("Coordinator shutdown requested");
                    break;
                }

                event = next_change(&mut changes) => match event {
                    Some(event) => {
                        self.stats.record_event();
                        Metrics::change_event(event.kind.as_str());
                        debug!(kind = %event.kind, slug = ?event.slug, origin = ?event.origin, "Change event received");
                        if pending.is_empty() {
                            deadline = Some(Instant::now() + self.config.debounce);
                        }
                        pending.push(event);
                    }
                    None => {
                        warn!("Change stream lost, resubscribing on next tick");
                        changes = None;
                    }
                },

                () = debounce_elapsed(deadline) => {
                    deadline = None;
                    let events = std::mem::take(&mut pending);
                    self.apply_events(events).await;
                }

                _ = ticker.tick() => {
                    if changes.is_none() {
                        changes = self.open_change_stream().await;
                        if changes.is_some() {
                            self.stats.record_resubscription();
                        }
                    }
                    if self.reconcile(ReconcileTrigger::Interval).await {
                        discard_pending(&mut pending, &mut deadline);
                    }
                }

                changed = state_rx.changed(), if feed_alive => match changed {
                    Ok(()) => {
                        let connected = *state_rx.borrow_and_update() == ConnectionState::Connected;
                        if connected && !was_connected {
                            info!("Feed (re)connected, running full reconciliation");
                            if self.reconcile(ReconcileTrigger::Reconnect).await {
                                discard_pending(&mut pending, &mut deadline);
                            }
                        }
                        was_connected = connected;
                    }
                    Err(_) => {
                        warn!("Feed connection gone, no longer watching its state");
                        feed_alive = false;
                    }
                },
            }
        }

        info!(stats = ?self.stats.snapshot(), "Coordinator stopped");
    }

    async fn open_change_stream(&self) -> Option<ChangeStream> {
        match self.registry.subscribe_changes().await {
            Ok(stream) => {
                info!("Subscribed to registry changes");
                Some(stream)
            }
            Err(e) => {
                warn!(error = %e, "Change subscription failed, retrying on next tick");
                None
            }
        }
    }

    /// Debounced pass: fold buffered events onto the desired set.
    ///
    /// A `Replaced` event invalidates the deltas, so the whole set is
    /// re-read instead.
    async fn apply_events(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        if events.iter().any(ChangeEvent::requires_full_reload) {
            self.reconcile(ReconcileTrigger::Replace).await;
            return;
        }

        let current = self.desired.snapshot();
        let mut next = current.clone();
        for event in &events {
            let Some(slug) = &event.slug else { continue };
            match event.kind {
                ChangeKind::Added => {
                    next.insert(slug.clone());
                }
                ChangeKind::Removed => {
                    next.remove(slug);
                }
                ChangeKind::Replaced => {}
            }
        }

        self.stats.record_debounced_pass();
        debug!(events = events.len(), "Applying debounced change events");
        self.apply(&current, next, ReconcileTrigger::Debounce).await;
    }

    /// Full pass: re-read the registry and converge on it.
    ///
    /// Returns false when the registry could not be listed and the desired
    /// set was left as it was.
    pub async fn reconcile(&self, trigger: ReconcileTrigger) -> bool {
        let authoritative = match self.registry.list().await {
            Ok(slugs) => slugs,
            Err(e) => {
                self.stats.record_skipped();
                Metrics::reconcile_skipped(trigger.as_str());
                warn!(
                    trigger = trigger.as_str(),
                    error = %e,
                    "Registry unavailable, skipping reconciliation"
                );
                return false;
            }
        };

        self.stats.record_full_reconciliation();
        let current = self.desired.snapshot();
        self.apply(&current, authoritative.clone(), trigger).await;

        // Also converge the connection's own tracked set, which can drift
        // if an earlier command never reached it.
        if let Err(e) = self.feed.sync(authoritative).await {
            warn!(error = %e, "Feed sync not queued");
        }
        true
    }

    async fn apply(&self, current: &SlugSet, next: SlugSet, trigger: ReconcileTrigger) {
        self.stats.record_pass();
        Metrics::reconcile_pass(trigger.as_str());

        let diff = SetDiff::between(current, &next);
        if diff.is_empty() {
            debug!(trigger = trigger.as_str(), "Subscriptions already converged");
            return;
        }

        info!(
            trigger = trigger.as_str(),
            unsubscribe = diff.to_unsubscribe.len(),
            subscribe = diff.to_subscribe.len(),
            "Reconciling subscriptions"
        );

        if let Err(e) = self.feed.unsubscribe(diff.to_unsubscribe).await {
            warn!(error = %e, "Unsubscribe not queued");
        }
        if let Err(e) = self.feed.subscribe(diff.to_subscribe).await {
            warn!(error = %e, "Subscribe not queued");
        }

        Metrics::desired_slugs(next.len());
        self.desired.replace(next);
    }
}

async fn next_change(changes: &mut Option<ChangeStream>) -> Option<ChangeEvent> {
    match changes {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Drop buffered events made stale by a fresh listing.
fn discard_pending(pending: &mut Vec<ChangeEvent>, deadline: &mut Option<Instant>) {
    if !pending.is_empty() {
        debug!(events = pending.len(), "Discarding events superseded by full reconciliation");
        pending.clear();
    }
    *deadline = None;
}

async fn debounce_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
