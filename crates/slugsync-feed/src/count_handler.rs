//! Built-in handler that tallies messages per event type.

use crate::error::HandlerResult;
use crate::handler::{MessageContext, MessageHandler};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::trace;

/// Annotation key carrying the running count for the message's event type.
pub const EVENT_COUNT_ANNOTATION: &str = "event_count";

#[derive(Debug, Default)]
pub struct EventCountHandler {
    counts: Mutex<BTreeMap<String, u64>>,
}

impl EventCountHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, event_type: &str) -> u64 {
        self.counts.lock().get(event_type).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.lock().values().sum()
    }

    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for EventCountHandler {
    fn name(&self) -> &str {
        "event_count"
    }

    async fn handle(&self, ctx: &mut MessageContext) -> HandlerResult<()> {
        let count = {
            let mut counts = self.counts.lock();
            let entry = counts.entry(ctx.event_type().to_string()).or_insert(0);
            *entry += 1;
            *entry
        };
        trace!(event_type = ctx.event_type(), count, "Counted message");
        ctx.annotate(EVENT_COUNT_ANNOTATION, count);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use chrono::Utc;
    use serde_json::Value;
    use slugsync_ws::FeedMessage;
    use std::sync::Arc;

    fn message(event_type: &str) -> FeedMessage {
        FeedMessage {
            event_type: event_type.to_string(),
            slug: None,
            market: None,
            timestamp: None,
            payload: Value::Null,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_counts_per_event_type() {
        let counter = Arc::new(EventCountHandler::new());
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).with_handler(counter.clone());

        for event_type in ["book", "price_change", "book"] {
            dispatcher.dispatch(message(event_type)).await;
        }

        assert_eq!(counter.count("book"), 2);
        assert_eq!(counter.count("price_change"), 1);
        assert_eq!(counter.count("tick_size_change"), 0);
        assert_eq!(counter.total(), 3);
        assert_eq!(counter.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_annotates_running_count() {
        let counter = EventCountHandler::new();
        let mut ctx = MessageContext::new(message("book"));
        counter.handle(&mut ctx).await.unwrap();
        counter.handle(&mut ctx).await.unwrap();
        assert_eq!(ctx.annotation(EVENT_COUNT_ANNOTATION), Some(&Value::from(2u64)));
    }
}
