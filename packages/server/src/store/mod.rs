//! Shared key/value store behind presence mirroring and ticket
//! consumption.
//!
//! Multiple server processes never coordinate with each other directly;
//! they coordinate through this store. The trait seam keeps the rest of
//! the core testable without a Redis instance and gives the process a
//! degraded single-node mode when no store is configured.

mod memory;
mod redis_store;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::StoreError;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Write a key with a TTL, overwriting any previous value.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically fetch and delete a key. `None` when absent/expired.
    async fn get_del(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Whether a key currently exists (expired keys do not).
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    async fn set_add(&self, set: &str, member: &str) -> Result<(), StoreError>;

    async fn set_remove(&self, set: &str, member: &str) -> Result<(), StoreError>;

    async fn set_members(&self, set: &str) -> Result<Vec<String>, StoreError>;
}
