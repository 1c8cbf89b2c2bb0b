//! Feed connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, and replay of the tracked subscription set after reconnection.
//!
//! The connection task is the only writer of the socket. Subscription
//! changes arrive through [`FeedHandle`] and are folded into the
//! [`SubscriptionTracker`] whether or not a socket is up; a fresh socket
//! always starts with one replay of the full tracked set.

use crate::error::{WsError, WsResult};
use crate::feed_handle::{FeedCommand, FeedHandle};
use crate::heartbeat::HeartbeatManager;
use crate::message::{decode_frame, is_pong_text, FeedMessage, Operation, SubscriptionRequest};
use crate::subscription::SubscriptionTracker;
use futures_util::{SinkExt, StreamExt};
use slugsync_core::SlugSet;
use slugsync_telemetry::Metrics;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch, Mutex as TokioMutex};
use tokio::time::{interval, sleep_until, timeout, MissedTickBehavior};
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsSink =
    futures_util::stream::SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum consecutive failed sessions (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Upper bound of the random jitter added to every backoff.
    pub reconnect_jitter_ms: u64,
    pub connect_timeout_ms: u64,
    /// Silence after which a ping is sent.
    pub heartbeat_interval_ms: u64,
    /// Heartbeat timeout (pong must arrive within this).
    pub heartbeat_timeout_ms: u64,
    /// Consecutive undecodable frames tolerated before reconnecting (0 = never).
    pub max_consecutive_protocol_errors: u32,
    /// Split subscription frames above this many slugs (0 = never split).
    pub max_slugs_per_frame: usize,
    pub command_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60000,
            reconnect_jitter_ms: 1000,
            connect_timeout_ms: 10000,
            heartbeat_interval_ms: 20000,
            heartbeat_timeout_ms: 30000,
            max_consecutive_protocol_errors: 10,
            max_slugs_per_frame: 0,
            command_buffer: 256,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the reconnect delay.
    Backoff,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Backoff => "backoff",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a connected session ended without an error.
enum SessionEnd {
    Shutdown,
    Closed,
}

/// Feed connection manager.
pub struct FeedConnection {
    config: ConnectionConfig,
    state_tx: watch::Sender<ConnectionState>,
    tracker: Arc<SubscriptionTracker>,
    heartbeat: HeartbeatManager,
    message_tx: mpsc::Sender<FeedMessage>,
    /// Command sender (for FeedHandle).
    command_tx: mpsc::Sender<FeedCommand>,
    /// Command receiver, held by `run` for its whole lifetime.
    command_rx: TokioMutex<mpsc::Receiver<FeedCommand>>,
    /// Consecutive failed sessions; reset on every successful connect.
    reconnect_count: AtomicU32,
    shutdown_token: CancellationToken,
}

impl FeedConnection {
    /// Create a new connection manager.
    ///
    /// Cancelling `parent_token` stops the connection; [`Self::shutdown`]
    /// stops only this connection.
    pub fn new(
        config: ConnectionConfig,
        message_tx: mpsc::Sender<FeedMessage>,
        parent_token: &CancellationToken,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            heartbeat: HeartbeatManager::new(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ),
            config,
            state_tx,
            tracker: Arc::new(SubscriptionTracker::new()),
            message_tx,
            command_tx,
            command_rx: TokioMutex::new(command_rx),
            reconnect_count: AtomicU32::new(0),
            shutdown_token: parent_token.child_token(),
        }
    }

    /// Get a handle for queueing subscription changes.
    pub fn handle(&self) -> FeedHandle {
        FeedHandle::new(self.command_tx.clone(), self.state_tx.subscribe())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Snapshot of what the upstream should be streaming.
    pub fn active_subscriptions(&self) -> SlugSet {
        self.tracker.active_subscriptions()
    }

    pub fn reconnect_count(&self) -> u32 {
        self.reconnect_count.load(Ordering::SeqCst)
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!("Feed connection shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect and keep the connection alive until shutdown.
    ///
    /// Returns `Ok(())` on shutdown and an error only when the reconnect
    /// budget is exhausted.
    pub async fn run(&self) -> WsResult<()> {
        let mut commands = self.command_rx.lock().await;

        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            let outcome = self.try_connect(&mut commands).await;
            Metrics::feed_disconnected();
            match outcome {
                Ok(SessionEnd::Shutdown) => {
                    info!("Feed connection shut down");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Ok(SessionEnd::Closed) => {
                    info!("Feed stream ended");
                    Metrics::feed_reconnect("closed");
                }
                Err(e) => {
                    error!(?e, "Feed connection error");
                    Metrics::feed_reconnect(e.reason());
                }
            }

            self.set_state(ConnectionState::Disconnected);

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                return Ok(());
            }

            let attempt = self.reconnect_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(attempt, "Max reconnection attempts reached");
                return Err(WsError::MaxReconnectAttempts(attempt));
            }

            self.set_state(ConnectionState::Backoff);
            let delay = self.calculate_backoff_delay(attempt);
            warn!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting");

            if !self.wait_backoff(&mut commands, delay).await {
                info!("Shutdown requested during backoff, exiting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }
        }
    }

    /// Sleep out the backoff while still folding commands into the tracker.
    ///
    /// Returns `false` if shutdown was requested.
    async fn wait_backoff(
        &self,
        commands: &mut mpsc::Receiver<FeedCommand>,
        delay: Duration,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + delay;
        let mut commands_open = true;

        loop {
            tokio::select! {
                () = sleep_until(deadline) => return true,
                () = self.shutdown_token.cancelled() => return false,
                command = commands.recv(), if commands_open => match command {
                    Some(command) => {
                        self.tracker.apply(&command);
                        Metrics::subscribed_slugs(self.tracker.len());
                    }
                    None => commands_open = false,
                },
            }
        }
    }

    async fn try_connect(
        &self,
        commands: &mut mpsc::Receiver<FeedCommand>,
    ) -> WsResult<SessionEnd> {
        info!(url = %self.config.url, "Connecting to feed");
        let started = Instant::now();

        // TCP_NODELAY on: subscription frames are small and latency-sensitive
        let handshake = timeout(
            Duration::from_millis(self.config.connect_timeout_ms),
            connect_async_tls_with_config(self.config.url.as_str(), None, true, None),
        );
        let ws_stream = tokio::select! {
            result = handshake => match result {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => return Err(WsError::Connect(e.to_string())),
                Err(_) => {
                    return Err(WsError::Connect(format!(
                        "handshake timed out after {}ms",
                        self.config.connect_timeout_ms
                    )))
                }
            },
            () = self.shutdown_token.cancelled() => return Ok(SessionEnd::Shutdown),
        };
        let (mut write, mut read) = ws_stream.split();

        self.reconnect_count.store(0, Ordering::SeqCst);
        self.heartbeat.reset();
        self.set_state(ConnectionState::Connected);
        Metrics::feed_connected();
        Metrics::setup_latency(started.elapsed().as_secs_f64());
        info!(
            setup_ms = started.elapsed().as_millis() as u64,
            "Feed connected"
        );

        self.replay_subscriptions(&mut write).await?;

        let mut heartbeat_tick = interval(self.heartbeat.check_period());
        heartbeat_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        heartbeat_tick.tick().await;

        let mut protocol_errors = 0u32;
        let mut commands_open = true;

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(SessionEnd::Shutdown);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text, &mut protocol_errors).await?;
                        }
                        Some(Ok(Message::Binary(_))) => {
                            self.heartbeat.record_message();
                            self.record_protocol_error(&mut protocol_errors, "binary frame")?;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await.map_err(send_error)?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "Feed closed by server");
                            return Err(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Ok(Message::Frame(_))) => {}
                        Some(Err(e)) => {
                            error!(?e, "Feed read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("Feed stream ended");
                            return Ok(SessionEnd::Closed);
                        }
                    }
                }

                command = commands.recv(), if commands_open => {
                    match command {
                        Some(command) => self.apply_command(&mut write, command).await?,
                        None => commands_open = false,
                    }
                }

                _ = heartbeat_tick.tick() => {
                    if self.heartbeat.is_timed_out() {
                        error!(
                            silent_ms = self.heartbeat.time_since_last_message().as_millis() as u64,
                            "Heartbeat timeout"
                        );
                        return Err(WsError::HeartbeatTimeout);
                    }

                    // Only ping after a full interval of silence
                    if self.heartbeat.should_send_heartbeat() {
                        write.send(Message::Ping(Vec::new())).await.map_err(send_error)?;
                        self.heartbeat.record_ping();
                        debug!("Sent heartbeat ping");
                    }
                }
            }
        }
    }

    async fn handle_text_message(&self, text: &str, protocol_errors: &mut u32) -> WsResult<()> {
        self.heartbeat.record_message();

        if is_pong_text(text) {
            debug!("Received text pong");
            return Ok(());
        }

        match decode_frame(text) {
            Ok(messages) => {
                *protocol_errors = 0;
                for message in messages {
                    Metrics::feed_message(&message.event_type);
                    if self.message_tx.send(message).await.is_err() {
                        warn!("Message receiver dropped");
                        break;
                    }
                }
                Ok(())
            }
            Err(e) => self.record_protocol_error(protocol_errors, &e.to_string()),
        }
    }

    fn record_protocol_error(&self, consecutive: &mut u32, detail: &str) -> WsResult<()> {
        *consecutive += 1;
        Metrics::protocol_error();
        warn!(consecutive = *consecutive, %detail, "Dropped undecodable frame");

        let limit = self.config.max_consecutive_protocol_errors;
        if limit > 0 && *consecutive >= limit {
            return Err(WsError::Protocol(format!(
                "{} consecutive undecodable frames",
                consecutive
            )));
        }
        Ok(())
    }

    async fn apply_command(&self, write: &mut WsSink, command: FeedCommand) -> WsResult<()> {
        let diff = self.tracker.apply(&command);
        Metrics::subscribed_slugs(self.tracker.len());

        if diff.is_empty() {
            debug!(?command, "Command produced no subscription change");
            return Ok(());
        }

        // Unsubscribes go out first so a replace never overshoots
        self.send_requests(write, Operation::Unsubscribe, &diff.to_unsubscribe)
            .await?;
        self.send_requests(write, Operation::Subscribe, &diff.to_subscribe)
            .await
    }

    async fn replay_subscriptions(&self, write: &mut WsSink) -> WsResult<()> {
        let slugs = self.tracker.active_subscriptions();
        Metrics::subscribed_slugs(slugs.len());

        if slugs.is_empty() {
            info!("No subscriptions to replay");
            return Ok(());
        }

        info!(count = slugs.len(), "Replaying subscriptions");
        self.send_requests(write, Operation::Subscribe, &slugs).await
    }

    async fn send_requests(
        &self,
        write: &mut WsSink,
        operation: Operation,
        slugs: &SlugSet,
    ) -> WsResult<()> {
        if slugs.is_empty() {
            return Ok(());
        }

        for request in
            SubscriptionRequest::chunked(operation, slugs, self.config.max_slugs_per_frame)
        {
            let text = request.to_text()?;
            write.send(Message::Text(text)).await.map_err(send_error)?;
            Metrics::frame_sent(operation.as_str());
        }

        info!(
            operation = operation.as_str(),
            count = slugs.len(),
            "Subscription frames sent"
        );
        Ok(())
    }

    fn set_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            Metrics::feed_state_set(state.as_str());
            debug!(%state, "Feed state changed");
        }
    }

    fn calculate_backoff_delay(&self, attempt: u32) -> Duration {
        backoff_delay(
            attempt,
            self.config.reconnect_base_delay_ms,
            self.config.reconnect_max_delay_ms,
            self.config.reconnect_jitter_ms,
        )
    }
}

fn send_error(e: tokio_tungstenite::tungstenite::Error) -> WsError {
    WsError::Send(e.to_string())
}

/// Exponential backoff: `base * 2^(attempt-1)`, capped at `max`, plus jitter
/// in `0..=jitter_ms`.
fn backoff_delay(attempt: u32, base_ms: u64, max_ms: u64, jitter_ms: u64) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(1u64 << exponent).min(max_ms);
    Duration::from_millis(delay.saturating_add(rand_jitter(jitter_ms)))
}

/// Generate random jitter in `0..=max_ms`.
fn rand_jitter(max_ms: u64) -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    if max_ms == 0 {
        return 0;
    }
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    u64::from(nanos) % (max_ms + 1)
}
