//! Feed connection error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    /// Handshake or transport setup failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    /// A frame could not be written.
    #[error("Send failed: {0}")]
    Send(String),

    /// Inbound frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Max reconnection attempts reached: {0}")]
    MaxReconnectAttempts(u32),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short label used for the reconnect reason metric.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::ConnectionClosed { .. } => "closed",
            Self::Send(_) => "send",
            Self::Protocol(_) => "protocol",
            Self::HeartbeatTimeout => "heartbeat",
            Self::MaxReconnectAttempts(_) => "max_attempts",
            Self::Tungstenite(_) => "transport",
            Self::Json(_) => "json",
        }
    }
}

pub type WsResult<T> = Result<T, WsError>;
