//! Message dispatcher.
//!
//! Drains the feed message channel one message at a time and runs the
//! handler chain over it. A handler that errors, panics, or overruns its
//! time budget is logged and skipped; the rest of the chain still runs.

use crate::error::HandlerError;
use crate::handler::{MessageContext, MessageHandler};
use futures_util::FutureExt;
use slugsync_telemetry::Metrics;
use slugsync_ws::FeedMessage;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Budget for a single handler invocation. `None` = unbounded.
    pub per_handler_timeout: Option<Duration>,
}

/// Outcome of dispatching one message.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that completed successfully.
    pub handled: usize,
    /// Handlers that declined the message.
    pub skipped: usize,
    pub failures: Vec<(String, HandlerError)>,
}

impl DispatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Dispatcher {
    handlers: Vec<Arc<dyn MessageHandler>>,
    config: DispatcherConfig,
}

impl Dispatcher {
    pub fn new(config: DispatcherConfig) -> Self {
        Self {
            handlers: Vec::new(),
            config,
        }
    }

    /// Append a handler to the end of the chain.
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.register(handler);
        self
    }

    pub fn register(&mut self, handler: Arc<dyn MessageHandler>) {
        info!(handler = handler.name(), "Registered message handler");
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Run the handler chain over one message, in registration order.
    pub async fn dispatch(&self, message: FeedMessage) -> DispatchReport {
        let mut ctx = MessageContext::new(message);
        let mut report = DispatchReport::default();

        for handler in &self.handlers {
            if !handler.can_handle(ctx.message()) {
                report.skipped += 1;
                continue;
            }

            match self.invoke(handler.as_ref(), &mut ctx).await {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    let name = handler.name();
                    match &e {
                        HandlerError::Panicked(_) => {
                            error!(handler = name, event_type = ctx.event_type(), error = %e, "Handler panicked")
                        }
                        _ => {
                            warn!(handler = name, event_type = ctx.event_type(), error = %e, "Handler failed")
                        }
                    }
                    Metrics::handler_failed(name, e.reason());
                    report.failures.push((name.to_string(), e));
                }
            }
        }

        if report.handled == 0 && report.is_clean() {
            debug!(event_type = ctx.event_type(), "No handler accepted message");
        }
        report
    }

    async fn invoke(
        &self,
        handler: &dyn MessageHandler,
        ctx: &mut MessageContext,
    ) -> Result<(), HandlerError> {
        let guarded = AssertUnwindSafe(handler.handle(ctx)).catch_unwind();

        let outcome = match self.config.per_handler_timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(outcome) => outcome,
                Err(_) => return Err(HandlerError::Timeout(limit)),
            },
            None => guarded.await,
        };

        match outcome {
            Ok(result) => result,
            Err(panic) => Err(HandlerError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    /// Drain `rx` until it closes or `shutdown` fires.
    ///
    /// On shutdown, messages already queued are still dispatched. Returns
    /// the number of messages processed.
    pub async fn run(&self, mut rx: mpsc::Receiver<FeedMessage>, shutdown: CancellationToken) -> u64 {
        info!(handlers = self.handlers.len(), "Dispatcher started");
        let mut processed = 0u64;

        loop {
            tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    rx.close();
                    while let Some(message) = rx.recv().await {
                        self.dispatch(message).await;
                        processed += 1;
                    }
                    info!(processed, "Dispatcher drained and stopped");
                    return processed;
                }

                message = rx.recv() => match message {
                    Some(message) => {
                        self.dispatch(message).await;
                        processed += 1;
                    }
                    None => {
                        info!(processed, "Message channel closed, dispatcher stopping");
                        return processed;
                    }
                },
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerResult;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use serde_json::Value;
    use slugsync_core::Slug;

    fn message(event_type: &str) -> FeedMessage {
        FeedMessage {
            event_type: event_type.to_string(),
            slug: Some(Slug::new("btc-up").unwrap()),
            market: None,
            timestamp: None,
            payload: Value::Null,
            received_at: Utc::now(),
        }
    }

    /// Records what it saw, including annotations left upstream.
    struct Recorder {
        name: &'static str,
        only: Option<&'static str>,
        seen: Mutex<Vec<(String, Option<Value>)>>,
    }

    impl Recorder {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                only: None,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn only(name: &'static str, event_type: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                only: Some(event_type),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(String, Option<Value>)> {
            self.seen.lock().clone()
        }
    }

    #[async_trait]
    impl MessageHandler for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn can_handle(&self, message: &FeedMessage) -> bool {
            self.only.map_or(true, |t| t == message.event_type)
        }

        async fn handle(&self, ctx: &mut MessageContext) -> HandlerResult<()> {
            self.seen.lock().push((
                ctx.event_type().to_string(),
                ctx.annotation("tag").cloned(),
            ));
            ctx.annotate("tag", self.name);
            Ok(())
        }
    }

    enum Misbehaviour {
        Fail,
        Panic,
        Hang,
    }

    struct Faulty(Misbehaviour);

    #[async_trait]
    impl MessageHandler for Faulty {
        fn name(&self) -> &str {
            match self.0 {
                Misbehaviour::Fail => "fail",
                Misbehaviour::Panic => "panic",
                Misbehaviour::Hang => "hang",
            }
        }

        async fn handle(&self, _ctx: &mut MessageContext) -> HandlerResult<()> {
            match self.0 {
                Misbehaviour::Fail => Err(HandlerError::failed("boom")),
                Misbehaviour::Panic => panic!("handler exploded"),
                Misbehaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            }
        }
    }

    #[tokio::test]
    async fn test_chain_runs_in_order_with_annotations() {
        let first = Recorder::new("first");
        let second = Recorder::new("second");
        let dispatcher = Dispatcher::new(DispatcherConfig::default())
            .with_handler(first.clone())
            .with_handler(second.clone());
        assert_eq!(dispatcher.handler_count(), 2);

        let report = dispatcher.dispatch(message("book")).await;

        assert_eq!(report.handled, 2);
        assert!(report.is_clean());
        assert_eq!(first.seen(), vec![("book".to_string(), None)]);
        assert_eq!(
            second.seen(),
            vec![("book".to_string(), Some(Value::from("first")))]
        );
    }

    #[tokio::test]
    async fn test_can_handle_filters() {
        let trades = Recorder::only("trades", "last_trade_price");
        let dispatcher =
            Dispatcher::new(DispatcherConfig::default()).with_handler(trades.clone());

        let report = dispatcher.dispatch(message("book")).await;
        assert_eq!(report.skipped, 1);
        assert_eq!(report.handled, 0);

        dispatcher.dispatch(message("last_trade_price")).await;
        assert_eq!(trades.seen().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let tail = Recorder::new("tail");
        let dispatcher = Dispatcher::new(DispatcherConfig {
            per_handler_timeout: Some(Duration::from_millis(50)),
        })
        .with_handler(Arc::new(Faulty(Misbehaviour::Fail)))
        .with_handler(Arc::new(Faulty(Misbehaviour::Panic)))
        .with_handler(Arc::new(Faulty(Misbehaviour::Hang)))
        .with_handler(tail.clone());

        let report = dispatcher.dispatch(message("book")).await;

        assert_eq!(report.handled, 1);
        assert_eq!(tail.seen().len(), 1);

        let reasons: Vec<(&str, &str)> = report
            .failures
            .iter()
            .map(|(name, e)| (name.as_str(), e.reason()))
            .collect();
        assert_eq!(
            reasons,
            vec![("fail", "error"), ("panic", "panic"), ("hang", "timeout")]
        );
        assert!(matches!(
            &report.failures[1].1,
            HandlerError::Panicked(msg) if msg.contains("handler exploded")
        ));
    }

    #[tokio::test]
    async fn test_run_preserves_order_and_drains_on_shutdown() {
        let recorder = Recorder::new("rec");
        let dispatcher = Dispatcher::new(DispatcherConfig::default()).with_handler(recorder.clone());

        let (tx, rx) = mpsc::channel(16);
        for event_type in ["a", "b", "c"] {
            tx.send(message(event_type)).await.unwrap();
        }

        let token = CancellationToken::new();
        token.cancel();
        let processed = dispatcher.run(rx, token).await;

        assert_eq!(processed, 3);
        let order: Vec<String> = recorder.seen().into_iter().map(|(t, _)| t).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_run_stops_when_channel_closes() {
        let dispatcher = Dispatcher::new(DispatcherConfig::default());
        let (tx, rx) = mpsc::channel(4);
        tx.send(message("book")).await.unwrap();
        drop(tx);

        let processed = dispatcher.run(rx, CancellationToken::new()).await;
        assert_eq!(processed, 1);
    }
}
