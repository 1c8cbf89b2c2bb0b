//! Test doubles for coordinator tests.
//!
//! `FakeFeed` stands in for the feed connection: it drains the command
//! queue, records every command, and folds them into a tracker so tests can
//! read back what the upstream would be streaming.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use slugsync_core::{ChangeEvent, Slug, SlugSet};
use slugsync_coordinator::{Coordinator, CoordinatorConfig};
use slugsync_registry::{ChangeStream, MemoryRegistry, RegistryResult, SlugRegistry};
use slugsync_ws::{ConnectionState, FeedCommand, FeedHandle, SubscriptionTracker};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const LIMIT: Duration = Duration::from_secs(5);

pub fn slug(s: &str) -> Slug {
    Slug::new(s).unwrap()
}

pub fn slugs(items: &[&str]) -> SlugSet {
    items.iter().map(|s| slug(s)).collect()
}

pub struct FakeFeed {
    pub handle: FeedHandle,
    state_tx: watch::Sender<ConnectionState>,
    commands: Arc<Mutex<Vec<FeedCommand>>>,
    tracker: Arc<SubscriptionTracker>,
}

impl FakeFeed {
    pub fn start(initial: ConnectionState) -> Self {
        let (tx, mut rx) = mpsc::channel(256);
        let (state_tx, state_rx) = watch::channel(initial);
        let commands = Arc::new(Mutex::new(Vec::new()));
        let tracker = Arc::new(SubscriptionTracker::new());

        let commands_clone = commands.clone();
        let tracker_clone = tracker.clone();
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                tracker_clone.apply(&command);
                commands_clone.lock().push(command);
            }
        });

        Self {
            handle: FeedHandle::new(tx, state_rx),
            state_tx,
            commands,
            tracker,
        }
    }

    pub fn commands(&self) -> Vec<FeedCommand> {
        self.commands.lock().clone()
    }

    /// Subscribe/unsubscribe commands only.
    pub fn deltas(&self) -> Vec<FeedCommand> {
        self.commands()
            .into_iter()
            .filter(|c| !matches!(c, FeedCommand::Sync(_)))
            .collect()
    }

    /// What the upstream would be streaming after every command so far.
    pub fn upstream(&self) -> SlugSet {
        self.tracker.active_subscriptions()
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }
}

pub struct Running {
    pub coordinator: Arc<Coordinator>,
    pub token: CancellationToken,
    pub task: JoinHandle<()>,
}

impl Running {
    pub async fn stop(self) {
        self.token.cancel();
        tokio::time::timeout(LIMIT, self.task)
            .await
            .expect("coordinator stops within timeout")
            .expect("coordinator task did not panic");
    }
}

pub fn spawn_coordinator(
    registry: Arc<dyn SlugRegistry>,
    feed: &FakeFeed,
    config: CoordinatorConfig,
) -> Running {
    let coordinator = Arc::new(Coordinator::new(registry, feed.handle.clone(), config));
    let token = CancellationToken::new();
    let runner = coordinator.clone();
    let run_token = token.clone();
    let task = tokio::spawn(async move { runner.run(run_token).await });
    Running {
        coordinator,
        token,
        task,
    }
}

/// Poll `check` until it returns true or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    tokio::time::timeout(limit, async {
        loop {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .is_ok()
}

/// Registry whose change stream never delivers anything.
///
/// Every notification is "missed", so only reconciliation can keep a
/// coordinator correct.
#[derive(Default)]
pub struct SilentRegistry {
    pub inner: MemoryRegistry,
    keepalive: Mutex<Vec<mpsc::Sender<ChangeEvent>>>,
}

#[async_trait]
impl SlugRegistry for SilentRegistry {
    async fn add(&self, slug: &Slug) -> RegistryResult<bool> {
        self.inner.add(slug).await
    }

    async fn remove(&self, slug: &Slug) -> RegistryResult<bool> {
        self.inner.remove(slug).await
    }

    async fn list(&self) -> RegistryResult<SlugSet> {
        self.inner.list().await
    }

    async fn replace_all(&self, slugs: &SlugSet) -> RegistryResult<()> {
        self.inner.replace_all(slugs).await
    }

    async fn subscribe_changes(&self) -> RegistryResult<ChangeStream> {
        let (tx, stream) = ChangeStream::channel(1);
        self.keepalive.lock().push(tx);
        Ok(stream)
    }
}
