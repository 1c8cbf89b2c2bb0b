//! Command handle for the feed connection.
//!
//! All subscribe/unsubscribe traffic goes through one queue drained by the
//! connection task, which is the only writer of the socket. Commands issued
//! while disconnected are folded into the tracked set and go out with the
//! replay on the next connect.

use crate::connection::ConnectionState;
use slugsync_core::SlugSet;
use tokio::sync::{mpsc, watch};

/// Command for the connection task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedCommand {
    Subscribe(SlugSet),
    Unsubscribe(SlugSet),
    /// Converge the tracked set to exactly this set.
    Sync(SlugSet),
}

/// Error type for queueing commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedSendError {
    /// Connection task has exited.
    ChannelClosed,
}

impl std::fmt::Display for FeedSendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ChannelClosed => write!(f, "channel closed"),
        }
    }
}

impl std::error::Error for FeedSendError {}

/// Cloneable handle for queueing subscription changes.
#[derive(Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<FeedCommand>,
    state: watch::Receiver<ConnectionState>,
}

impl FeedHandle {
    pub fn new(tx: mpsc::Sender<FeedCommand>, state: watch::Receiver<ConnectionState>) -> Self {
        Self { tx, state }
    }

    /// Queue a subscribe. Empty sets are dropped here.
    pub async fn subscribe(&self, slugs: SlugSet) -> Result<(), FeedSendError> {
        if slugs.is_empty() {
            return Ok(());
        }
        self.send(FeedCommand::Subscribe(slugs)).await
    }

    /// Queue an unsubscribe. Empty sets are dropped here.
    pub async fn unsubscribe(&self, slugs: SlugSet) -> Result<(), FeedSendError> {
        if slugs.is_empty() {
            return Ok(());
        }
        self.send(FeedCommand::Unsubscribe(slugs)).await
    }

    /// Queue a full convergence to `desired`.
    pub async fn sync(&self, desired: SlugSet) -> Result<(), FeedSendError> {
        self.send(FeedCommand::Sync(desired)).await
    }

    async fn send(&self, command: FeedCommand) -> Result<(), FeedSendError> {
        self.tx
            .send(command)
            .await
            .map_err(|_| FeedSendError::ChannelClosed)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that wakes on every state transition.
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
