//! Handler contract and per-message context.

use crate::error::HandlerResult;
use async_trait::async_trait;
use serde_json::Value;
use slugsync_core::Slug;
use slugsync_ws::FeedMessage;
use std::collections::HashMap;

/// State shared by every handler for one message.
///
/// Handlers read the message and may leave annotations for handlers later
/// in the chain. The message itself is immutable.
#[derive(Debug)]
pub struct MessageContext {
    message: FeedMessage,
    annotations: HashMap<String, Value>,
}

impl MessageContext {
    pub fn new(message: FeedMessage) -> Self {
        Self {
            message,
            annotations: HashMap::new(),
        }
    }

    pub fn message(&self) -> &FeedMessage {
        &self.message
    }

    pub fn event_type(&self) -> &str {
        &self.message.event_type
    }

    /// Slug the message originated from, if the upstream named one.
    pub fn slug(&self) -> Option<&Slug> {
        self.message.slug.as_ref()
    }

    /// Leave a value for downstream handlers. Overwrites any earlier value.
    pub fn annotate(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.annotations.insert(key.into(), value.into());
    }

    pub fn annotation(&self, key: &str) -> Option<&Value> {
        self.annotations.get(key)
    }

    pub fn annotations(&self) -> &HashMap<String, Value> {
        &self.annotations
    }
}

/// A pluggable consumer of feed messages.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Stable name used in logs and metrics.
    fn name(&self) -> &str;

    /// Whether this handler wants the message. Defaults to everything.
    fn can_handle(&self, _message: &FeedMessage) -> bool {
        true
    }

    async fn handle(&self, ctx: &mut MessageContext) -> HandlerResult<()>;
}
