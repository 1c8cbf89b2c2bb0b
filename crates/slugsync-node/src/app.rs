//! Main application orchestration.
//!
//! One `Application` is one replica: it opens the shared registry, then runs
//! the feed connection, the coordinator and the dispatcher until shutdown.

use crate::config::{AppConfig, RegistryBackend};
use crate::error::{AppError, AppResult};
use slugsync_coordinator::Coordinator;
use slugsync_feed::{Dispatcher, EventCountHandler};
use slugsync_registry::{MemoryRegistry, RedisRegistry, SlugRegistry};
use slugsync_telemetry::Metrics;
use slugsync_ws::FeedConnection;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Main application.
pub struct Application {
    config: AppConfig,
    replica_id: String,
}

impl Application {
    /// Create a new application with a fresh replica id.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            replica_id: uuid::Uuid::new_v4().to_string(),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Id stamped on change events this replica publishes.
    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    /// Open the configured registry once, without retrying.
    pub async fn open_registry(&self) -> AppResult<Arc<dyn SlugRegistry>> {
        match self.config.registry.backend {
            RegistryBackend::Redis => {
                let registry = RedisRegistry::connect(self.config.registry.clone().into())
                    .await?
                    .with_origin(self.replica_id.clone());
                Ok(Arc::new(registry))
            }
            RegistryBackend::Memory => {
                warn!("Using in-memory registry, state is not shared with other replicas");
                Ok(Arc::new(
                    MemoryRegistry::new().with_origin(self.replica_id.clone()),
                ))
            }
        }
    }

    /// Open the registry, retrying with backoff while the store is
    /// unreachable. Returns `AppError::Shutdown` if cancelled first.
    async fn open_registry_with_retry(
        &self,
        shutdown: &CancellationToken,
    ) -> AppResult<Arc<dyn SlugRegistry>> {
        let base_ms = self.config.registry.connect_retry_base_ms.max(1);
        let max_ms = self.config.registry.connect_retry_max_ms.max(base_ms);
        let mut attempt: u32 = 0;

        loop {
            let result = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Err(AppError::Shutdown),
                result = self.open_registry() => result,
            };

            match result {
                Ok(registry) => return Ok(registry),
                Err(AppError::Registry(e)) if e.is_retryable() => {
                    attempt = attempt.saturating_add(1);
                    let delay = retry_delay(attempt, base_ms, max_ms);
                    warn!(
                        error = %e,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "Registry unreachable, retrying"
                    );
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => return Err(AppError::Shutdown),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> AppResult<()> {
        let shutdown = CancellationToken::new();

        let signal_token = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl-C, shutting down"),
                Err(e) => error!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
            }
            signal_token.cancel();
        });

        self.run_until(shutdown).await
    }

    /// Open the registry, then run until `shutdown` is cancelled.
    pub async fn run_until(&self, shutdown: CancellationToken) -> AppResult<()> {
        let registry = match self.open_registry_with_retry(&shutdown).await {
            Ok(registry) => registry,
            Err(AppError::Shutdown) => {
                info!("Shutdown before the registry was reachable");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        self.run_with_registry(registry, shutdown).await
    }

    /// Run every component against an already-open registry until
    /// `shutdown` is cancelled or the feed connection gives up.
    pub async fn run_with_registry(
        &self,
        registry: Arc<dyn SlugRegistry>,
        shutdown: CancellationToken,
    ) -> AppResult<()> {
        Metrics::init();

        info!(
            replica_id = %self.replica_id,
            feed_url = %self.config.feed.url,
            backend = ?self.config.registry.backend,
            "Starting replica"
        );

        let (message_tx, message_rx) = mpsc::channel(self.config.feed.message_buffer.max(1));
        let connection = Arc::new(FeedConnection::new(
            self.config.feed.clone().into(),
            message_tx,
            &shutdown,
        ));
        let coordinator = Arc::new(Coordinator::new(
            registry,
            connection.handle(),
            self.config.coordinator.clone().into(),
        ));
        let counter = Arc::new(EventCountHandler::new());
        let dispatcher = Arc::new(
            Dispatcher::new(self.config.dispatcher.clone().into()).with_handler(counter.clone()),
        );

        info!(handlers = dispatcher.handler_count(), "Dispatcher ready");

        let mut feed_task = {
            let connection = connection.clone();
            tokio::spawn(async move { connection.run().await })
        };
        let coordinator_task = {
            let coordinator = coordinator.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { coordinator.run(token).await })
        };
        let dispatcher_task = {
            let dispatcher = dispatcher.clone();
            let token = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(message_rx, token).await })
        };

        let mut status = status_interval(self.config.telemetry.status_interval_secs);

        let early_exit = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break None;
                }
                result = &mut feed_task => {
                    error!("Feed connection stopped, shutting down replica");
                    shutdown.cancel();
                    break Some(result);
                }
                _ = status_tick(&mut status) => {
                    let stats = coordinator.stats_snapshot();
                    info!(
                        state = %connection.state(),
                        desired = coordinator.desired().len(),
                        subscribed = connection.active_subscriptions().len(),
                        passes = stats.passes,
                        skipped_cycles = stats.skipped_cycles,
                        messages = counter.total(),
                        "Replica status"
                    );
                }
            }
        };

        let feed_result = match early_exit {
            Some(result) => result,
            None => feed_task.await,
        };
        if let Err(e) = coordinator_task.await {
            error!(error = %e, "Coordinator task failed");
        }
        match dispatcher_task.await {
            Ok(dispatched) => info!(dispatched, "Dispatcher stopped"),
            Err(e) => error!(error = %e, "Dispatcher task failed"),
        }

        match Metrics::gather_text() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to gather metrics"),
        }

        feed_result
            .map_err(|e| AppError::Task(e.to_string()))?
            .map_err(Box::new)?;

        info!("Replica stopped");
        Ok(())
    }
}

/// Exponential startup retry delay, capped at `max_ms`.
fn retry_delay(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_millis(base_ms.saturating_mul(1u64 << exponent).min(max_ms))
}

fn status_interval(secs: u64) -> Option<Interval> {
    if secs == 0 {
        return None;
    }
    let period = Duration::from_secs(secs);
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn status_tick(status: &mut Option<Interval>) {
    match status {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
