//! slugsync replica node.
//!
//! Wires one replica together:
//! - Shared slug registry (Redis or in-memory)
//! - Upstream feed connection
//! - Subscription coordinator
//! - Inbound message dispatcher

pub mod app;
pub mod config;
pub mod error;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
