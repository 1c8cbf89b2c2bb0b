//! Heartbeat monitoring for the feed connection.
//!
//! A ping goes out only after a full interval of silence, and the
//! connection is considered dead if the pong does not arrive in time.
//! Any inbound frame counts as proof of life.

use parking_lot::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug)]
struct HeartbeatState {
    last_ping: Option<Instant>,
    last_message: Instant,
    waiting_for_pong: bool,
}

#[derive(Debug)]
pub struct HeartbeatManager {
    interval: Duration,
    timeout: Duration,
    state: Mutex<HeartbeatState>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms.max(1)),
            timeout: Duration::from_millis(timeout_ms),
            state: Mutex::new(HeartbeatState {
                last_ping: None,
                last_message: Instant::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset on every new connection.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.last_ping = None;
        state.last_message = Instant::now();
        state.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut state = self.state.lock();
        state.last_ping = Some(Instant::now());
        state.waiting_for_pong = true;
        debug!("Recorded ping");
    }

    /// A pong restarts the silence interval like any other frame.
    pub fn record_pong(&self) {
        let mut state = self.state.lock();
        state.waiting_for_pong = false;
        state.last_message = Instant::now();
        if let Some(ping) = state.last_ping {
            debug!(rtt_ms = ping.elapsed().as_millis() as u64, "Received pong");
        }
    }

    /// Any inbound frame. Also clears an outstanding ping.
    pub fn record_message(&self) {
        let mut state = self.state.lock();
        state.last_message = Instant::now();
        state.waiting_for_pong = false;
    }

    pub fn is_timed_out(&self) -> bool {
        let state = self.state.lock();
        match (state.waiting_for_pong, state.last_ping) {
            (true, Some(ping)) => ping.elapsed() > self.timeout,
            _ => false,
        }
    }

    pub fn should_send_heartbeat(&self) -> bool {
        let state = self.state.lock();
        !state.waiting_for_pong && state.last_message.elapsed() >= self.interval
    }

    /// How often the connection loop should evaluate heartbeat state.
    pub fn check_period(&self) -> Duration {
        (self.interval / 2)
            .min(self.timeout.max(Duration::from_millis(2)) / 2)
            .max(Duration::from_millis(1))
    }

    pub fn time_since_last_message(&self) -> Duration {
        self.state.lock().last_message.elapsed()
    }
}
