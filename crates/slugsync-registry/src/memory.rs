//! In-process registry backend.
//!
//! Holds the set under a lock and fans change events out through a
//! `tokio::sync::broadcast` channel, so each subscriber gets its own copy and
//! a lagging subscriber loses events instead of blocking publishers.

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{ChangeStream, SlugRegistry, DEFAULT_STREAM_CAPACITY};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use slugsync_core::{ChangeEvent, Slug, SlugSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// In-memory slug registry.
pub struct MemoryRegistry {
    slugs: RwLock<SlugSet>,
    events: broadcast::Sender<ChangeEvent>,
    /// Simulated store reachability.
    available: AtomicBool,
    /// Cancelled to cut every open change stream.
    subscribers: Mutex<CancellationToken>,
    origin: Option<String>,
}

impl MemoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(DEFAULT_STREAM_CAPACITY);
        Self {
            slugs: RwLock::new(SlugSet::new()),
            events,
            available: AtomicBool::new(true),
            subscribers: Mutex::new(CancellationToken::new()),
            origin: None,
        }
    }

    /// Tag published events with a replica id.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Toggle simulated store reachability.
    ///
    /// While unavailable every operation fails with `StoreUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// End every open change stream, as a dropped pub/sub connection would.
    pub fn disconnect_subscribers(&self) {
        let mut token = self.subscribers.lock();
        token.cancel();
        *token = CancellationToken::new();
    }

    /// Number of live change-stream receivers.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn ensure_available(&self) -> RegistryResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(RegistryError::StoreUnavailable(
                "memory registry marked unavailable".to_string(),
            ))
        }
    }

    fn publish(&self, event: ChangeEvent) {
        let event = match &self.origin {
            Some(origin) => event.with_origin(origin.clone()),
            None => event,
        };
        match self.events.send(event) {
            Ok(receivers) => debug!(receivers, "Change event published"),
            Err(_) => debug!("Change event published with no subscribers"),
        }
    }
}

impl Default for MemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SlugRegistry for MemoryRegistry {
    async fn add(&self, slug: &Slug) -> RegistryResult<bool> {
        self.ensure_available()?;
        let added = self.slugs.write().insert(slug.clone());
        if added {
            self.publish(ChangeEvent::added(slug.clone()));
        }
        Ok(added)
    }

    async fn remove(&self, slug: &Slug) -> RegistryResult<bool> {
        self.ensure_available()?;
        let removed = self.slugs.write().remove(slug);
        if removed {
            self.publish(ChangeEvent::removed(slug.clone()));
        }
        Ok(removed)
    }

    async fn list(&self) -> RegistryResult<SlugSet> {
        self.ensure_available()?;
        Ok(self.slugs.read().clone())
    }

    async fn replace_all(&self, slugs: &SlugSet) -> RegistryResult<()> {
        self.ensure_available()?;
        *self.slugs.write() = slugs.clone();
        self.publish(ChangeEvent::replaced());
        Ok(())
    }

    async fn subscribe_changes(&self) -> RegistryResult<ChangeStream> {
        self.ensure_available()?;

        let mut rx = self.events.subscribe();
        let cut = self.subscribers.lock().child_token();
        let (tx, stream) = ChangeStream::channel(DEFAULT_STREAM_CAPACITY);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cut.cancelled() => {
                        debug!("Change stream disconnected");
                        break;
                    }
                    () = tx.closed() => break,
                    received = rx.recv() => match received {
                        Ok(event) => {
                            if tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Change stream lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
        });

        Ok(stream)
    }
}
