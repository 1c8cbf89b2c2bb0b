//! Upstream feed connection for slugsync replicas.
//!
//! Owns the single websocket a replica keeps to the market-data endpoint:
//! - Automatic reconnection with bounded exponential backoff and jitter
//! - Subscription tracking with full replay after every reconnect
//! - Single-writer command queue (`FeedHandle`) for subscribe/unsubscribe
//! - Heartbeat monitoring (ping on silence, pong timeout detection)
//! - Inbound frame decoding, forwarded in wire order

pub mod connection;
pub mod error;
pub mod feed_handle;
pub mod heartbeat;
pub mod message;
pub mod subscription;

pub use connection::{ConnectionConfig, ConnectionState, FeedConnection};
pub use error::{WsError, WsResult};
pub use feed_handle::{FeedCommand, FeedHandle, FeedSendError};
pub use message::{decode_frame, is_pong_text, FeedMessage, Operation, SubscriptionRequest};
pub use subscription::SubscriptionTracker;
