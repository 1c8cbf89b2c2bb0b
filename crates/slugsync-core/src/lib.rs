//! Core domain types for slugsync.
//!
//! This crate provides the types shared by every replica component:
//! - `Slug`: Validated market identifier, the unit of subscription
//! - `SlugSet`, `SetDiff`: Deterministically ordered sets and their deltas
//! - `ChangeEvent`: Best-effort notification that the registry changed

pub mod error;
pub mod event;
pub mod slug;

pub use error::{CoreError, Result};
pub use event::{ChangeEvent, ChangeKind};
pub use slug::{SetDiff, Slug, SlugSet};
