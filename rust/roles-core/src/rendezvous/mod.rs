// rust/roles-core/src/rendezvous/mod.rs

//! Rendezvous store used once at startup for peer discovery.
//!
//! The store is a linearizable key-value service with three operations:
//!
//! - `put` writes a key exactly once and fails with
//!   [`RoleError::KeyExists`](crate::RoleError::KeyExists) afterwards,
//! - `get` returns the value of a key, or `None` if it was never written,
//! - `add` atomically adds to an integer counter and returns the new value.
//!
//! Two implementations are provided: [`InMemoryStore`] for workers sharing a
//! process (simulations and tests) and [`TcpStoreClient`] for talking to the
//! `roles-rendezvous` service.
//!
//! # Example
//!
//! ```no_run
//! use roles_core::rendezvous::{InMemoryStore, RendezvousStore};
//!
//! # async fn example() -> roles_core::Result<()> {
//! let store = InMemoryStore::new();
//! store.put("roles/rank/0", "w0".into()).await?;
//! assert_eq!(store.get("roles/rank/0").await?.as_deref(), Some(&b"w0"[..]));
//! assert_eq!(store.add("roles/joined", 1).await?, 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::RendezvousConfig;
use crate::error::{Result, RoleError};

mod memory;
pub mod protocol;
mod tcp;

pub use memory::InMemoryStore;
pub use tcp::TcpStoreClient;

#[async_trait]
pub trait RendezvousStore: Send + Sync {
    /// Writes `value` under `key` if the key does not exist yet.
    async fn put(&self, key: &str, value: Bytes) -> Result<()>;

    /// Reads the value stored under `key`.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Adds `delta` to the counter stored under `key`, creating it at zero,
    /// and returns the updated value. `delta == 0` reads the counter.
    async fn add(&self, key: &str, delta: i64) -> Result<i64>;
}

/// Connects to the rendezvous store named by the configuration.
///
/// # Errors
///
/// Returns an error if no address is configured or the store cannot be
/// reached within the configured number of attempts.
pub async fn connect(config: &RendezvousConfig) -> Result<Arc<dyn RendezvousStore>> {
    let address = config
        .address
        .as_deref()
        .ok_or_else(|| RoleError::config("rendezvous.address is required to connect"))?;
    let client = TcpStoreClient::connect_with_retry(address, config).await?;
    Ok(Arc::new(client))
}

pub(crate) fn parse_counter(key: &str, value: &[u8]) -> Result<i64> {
    std::str::from_utf8(value)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| RoleError::rendezvous(format!("key '{}' does not hold a counter", key)))
}
