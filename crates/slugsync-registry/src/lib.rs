//! Shared slug registry for slugsync replicas.
//!
//! The registry is the only state shared across processes. It exposes a
//! narrow CRUD contract plus a best-effort change stream:
//! - `RedisRegistry`: set + pub/sub channel on a shared Redis
//! - `MemoryRegistry`: in-process backend for single-node runs and tests

pub mod error;
pub mod memory;
pub mod redis_store;
pub mod registry;

pub use error::{RegistryError, RegistryResult};
pub use memory::MemoryRegistry;
pub use redis_store::{RedisRegistry, RedisRegistryConfig};
pub use registry::{ChangeStream, SlugRegistry, DEFAULT_STREAM_CAPACITY};
