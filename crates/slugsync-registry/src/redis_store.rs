//! Redis-backed registry.
//!
//! The slug set lives in a Redis SET, and every effective mutation is
//! published on a pub/sub channel. Redis pub/sub has no replay: a subscriber
//! that is disconnected when an event is published never sees it.

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{ChangeStream, SlugRegistry, DEFAULT_STREAM_CAPACITY};
use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use slugsync_core::{ChangeEvent, Slug, SlugSet};
use tracing::{debug, info, warn};

/// Redis registry configuration.
#[derive(Debug, Clone)]
pub struct RedisRegistryConfig {
    /// Connection URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Key of the SET holding the slugs.
    pub set_key: String,
    /// Pub/sub channel for change events.
    pub events_channel: String,
}

impl Default for RedisRegistryConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            set_key: "slugsync:slugs".to_string(),
            events_channel: "slugsync:slugs:events".to_string(),
        }
    }
}

/// Slug registry on a shared Redis instance.
pub struct RedisRegistry {
    config: RedisRegistryConfig,
    client: redis::Client,
    /// Multiplexed command connection, reconnects on its own after failures.
    conn: ConnectionManager,
    origin: Option<String>,
}

impl RedisRegistry {
    /// Connect to Redis.
    ///
    /// Fails with `StoreUnavailable` if the server cannot be reached.
    pub async fn connect(config: RedisRegistryConfig) -> RegistryResult<Self> {
        let client = redis::Client::open(config.url.as_str()).map_err(map_redis_error)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(map_redis_error)?;

        info!(
            set_key = %config.set_key,
            channel = %config.events_channel,
            "Connected to Redis registry"
        );

        Ok(Self {
            config,
            client,
            conn,
            origin: None,
        })
    }

    /// Tag published events with a replica id.
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Publish an event. The mutation has already applied, so a failed
    /// publish is logged and left to periodic reconciliation.
    async fn publish(&self, event: ChangeEvent) {
        let event = match &self.origin {
            Some(origin) => event.with_origin(origin.clone()),
            None => event,
        };
        let payload = match event.encode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(?e, "Failed to encode change event");
                return;
            }
        };

        let mut conn = self.conn.clone();
        let published: Result<i64, _> = conn
            .publish(&self.config.events_channel, payload)
            .await;
        match published {
            Ok(receivers) => debug!(receivers, kind = %event.kind, "Change event published"),
            Err(e) => warn!(?e, kind = %event.kind, "Failed to publish change event"),
        }
    }
}

#[async_trait]
impl SlugRegistry for RedisRegistry {
    async fn add(&self, slug: &Slug) -> RegistryResult<bool> {
        let mut conn = self.conn.clone();
        let added: i64 = conn
            .sadd(&self.config.set_key, slug.as_str())
            .await
            .map_err(map_redis_error)?;

        if added > 0 {
            self.publish(ChangeEvent::added(slug.clone())).await;
        }
        Ok(added > 0)
    }

    async fn remove(&self, slug: &Slug) -> RegistryResult<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn
            .srem(&self.config.set_key, slug.as_str())
            .await
            .map_err(map_redis_error)?;

        if removed > 0 {
            self.publish(ChangeEvent::removed(slug.clone())).await;
        }
        Ok(removed > 0)
    }

    async fn list(&self) -> RegistryResult<SlugSet> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn
            .smembers(&self.config.set_key)
            .await
            .map_err(map_redis_error)?;

        Ok(parse_members(members))
    }

    async fn replace_all(&self, slugs: &SlugSet) -> RegistryResult<()> {
        let members: Vec<&str> = slugs.iter().map(Slug::as_str).collect();

        let mut pipe = redis::pipe();
        pipe.atomic().del(&self.config.set_key).ignore();
        if !members.is_empty() {
            pipe.sadd(&self.config.set_key, members).ignore();
        }

        let mut conn = self.conn.clone();
        let (): () = pipe
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;

        self.publish(ChangeEvent::replaced()).await;
        Ok(())
    }

    async fn subscribe_changes(&self) -> RegistryResult<ChangeStream> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(map_redis_error)?;
        pubsub
            .subscribe(&self.config.events_channel)
            .await
            .map_err(map_redis_error)?;

        let channel = self.config.events_channel.clone();
        let (tx, stream) = ChangeStream::channel(DEFAULT_STREAM_CAPACITY);
        info!(%channel, "Subscribed to registry change events");

        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            loop {
                tokio::select! {
                    () = tx.closed() => {
                        debug!(%channel, "Change stream reader dropped");
                        return;
                    }
                    msg = messages.next() => {
                        let Some(msg) = msg else {
                            break;
                        };
                        let payload: String = match msg.get_payload() {
                            Ok(payload) => payload,
                            Err(e) => {
                                warn!(?e, "Unreadable change event payload");
                                continue;
                            }
                        };
                        match ChangeEvent::decode(&payload) {
                            Ok(event) => {
                                if tx.send(event).await.is_err() {
                                    return;
                                }
                            }
                            Err(e) => warn!(?e, %payload, "Dropping malformed change event"),
                        }
                    }
                }
            }
            warn!(%channel, "Registry change stream ended");
        });

        Ok(stream)
    }
}

/// Convert raw SET members, skipping values that are not valid slugs.
fn parse_members(members: Vec<String>) -> SlugSet {
    members
        .into_iter()
        .filter_map(|raw| match Slug::new(&raw) {
            Ok(slug) => Some(slug),
            Err(e) => {
                warn!(?e, %raw, "Ignoring invalid slug stored in registry");
                None
            }
        })
        .collect()
}

/// Map transport-level failures to `StoreUnavailable`, everything else to
/// `Backend`.
fn map_redis_error(err: redis::RedisError) -> RegistryError {
    if err.is_io_error()
        || err.is_connection_refusal()
        || err.is_connection_dropped()
        || err.is_timeout()
    {
        RegistryError::StoreUnavailable(err.to_string())
    } else {
        RegistryError::Backend(err.to_string())
    }
}
