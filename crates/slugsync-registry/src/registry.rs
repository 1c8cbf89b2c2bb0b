//! Registry contract shared by all backends.

use crate::error::RegistryResult;
use async_trait::async_trait;
use slugsync_core::{ChangeEvent, Slug, SlugSet};
use tokio::sync::mpsc;

/// Default buffer between a backend's notification source and its reader.
pub const DEFAULT_STREAM_CAPACITY: usize = 256;

/// Durable shared set of slugs plus change notification.
///
/// Mutations are idempotent and publish a `ChangeEvent` only when they
/// actually changed the set. `list` is read-your-writes for the calling
/// process and eventually consistent across processes.
#[async_trait]
pub trait SlugRegistry: Send + Sync {
    /// Add a slug. Returns true if it was not present before.
    async fn add(&self, slug: &Slug) -> RegistryResult<bool>;

    /// Remove a slug. Returns true if it was present.
    async fn remove(&self, slug: &Slug) -> RegistryResult<bool>;

    /// Authoritative current set.
    async fn list(&self) -> RegistryResult<SlugSet>;

    /// Atomically replace the whole set and publish one `Replaced` event.
    async fn replace_all(&self, slugs: &SlugSet) -> RegistryResult<()>;

    /// Open a live, best-effort change stream.
    ///
    /// Events published while the stream is not connected are lost. When the
    /// backend loses the subscription, the stream ends and must be reopened.
    async fn subscribe_changes(&self) -> RegistryResult<ChangeStream>;
}

/// Receiving end of a registry change subscription.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::Receiver<ChangeEvent>,
}

impl ChangeStream {
    /// Wrap an existing receiver.
    pub fn new(rx: mpsc::Receiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Create a bounded stream and the sender that feeds it.
    pub fn channel(capacity: usize) -> (mpsc::Sender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self::new(rx))
    }

    /// Next event, or `None` once the subscription is gone.
    pub async fn next(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let (tx, mut stream) = ChangeStream::channel(4);
        let slug = Slug::new("a").unwrap();
        tx.send(ChangeEvent::added(slug.clone())).await.unwrap();
        drop(tx);

        let event = stream.next().await.unwrap();
        assert_eq!(event.slug, Some(slug));
        assert!(stream.next().await.is_none());
    }
}
