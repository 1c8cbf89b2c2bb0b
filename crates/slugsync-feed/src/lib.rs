//! Inbound feed message dispatch for slugsync.
//!
//! Routes each decoded feed message, in wire order, through a chain of
//! pluggable handlers. Failures are isolated per handler.

pub mod count_handler;
pub mod dispatcher;
pub mod error;
pub mod handler;

pub use count_handler::{EventCountHandler, EVENT_COUNT_ANNOTATION};
pub use dispatcher::{DispatchReport, Dispatcher, DispatcherConfig};
pub use error::{HandlerError, HandlerResult};
pub use handler::{MessageContext, MessageHandler};
