//! Key-value store abstraction for LarkRelay.
//!
//! Two namespaces live here: the single global tenant-token key and one
//! session key per (chat, sender) pair, each with its own TTL. The store is
//! assumed to provide atomic get/set/delete at the key level; nothing above
//! it takes locks.
//!
//! Backends:
//! - [`RedisKv`] for deployment (connection-manager handles reconnects)
//! - [`MemoryKv`] for development and tests (state lost on restart)

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors from the key-value layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store connection failed: {0}")]
    Connection(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("stored value could not be encoded: {0}")]
    Serialization(String),
}

/// Atomic key-value operations with per-key expiry.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a key. Absent and expired keys both read as `None`.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a key with a TTL in seconds. A TTL of zero means the entry
    /// is already expired.
    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError>;

    /// Delete a key unconditionally. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Liveness probe for readiness checks.
    async fn is_healthy(&self) -> bool;
}

// ============================================================================
// Redis Backend
// ============================================================================

/// Redis-backed store using a shared connection manager.
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    /// Connect to Redis at the given URL.
    ///
    /// The connection is established once here; the connection manager
    /// reconnects on its own afterwards.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Connection(format!("invalid redis url: {e}")))?;

        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        tracing::info!("Connected to Redis store");
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.manager.clone();
        conn.get(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        if ttl_secs == 0 {
            // SET EX 0 is a Redis error; an already-expired write is a delete.
            let _: () = conn
                .del(key)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            return Ok(());
        }
        conn.set_ex(key, value, ttl_secs)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let _: () = conn
            .del(key)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .is_ok()
    }
}

// ============================================================================
// In-Memory Backend
// ============================================================================

struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory store for development and tests.
///
/// Expiry is checked on read; expired entries are removed lazily.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<HashMap<String, MemoryEntry>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.expires_at > Instant::now() => {
                    return Ok(Some(entry.value.clone()));
                }
                Some(_) => {} // expired, fall through to remove
            }
        }

        self.entries.write().await.remove(key);
        Ok(None)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<(), StoreError> {
        let mut entries = self.entries.write().await;
        if ttl_secs == 0 {
            entries.remove(key);
            return Ok(());
        }
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + Duration::from_secs(ttl_secs),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}
