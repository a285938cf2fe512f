// rust/roles-core/src/rendezvous/memory.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{parse_counter, RendezvousStore};
use crate::error::{Result, RoleError};

/// In-process rendezvous store.
///
/// Clones share the same underlying map, so one store can be handed to
/// several simulated workers. Every operation takes the map lock once, which
/// makes the store linearizable.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<RwLock<HashMap<String, Bytes>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl RendezvousStore for InMemoryStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        let mut entries = self.entries.write().await;
        if entries.contains_key(key) {
            return Err(RoleError::key_exists(key));
        }
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn add(&self, key: &str, delta: i64) -> Result<i64> {
        let mut entries = self.entries.write().await;
        let current = match entries.get(key) {
            Some(value) => parse_counter(key, value)?,
            None => 0,
        };
        let updated = current.checked_add(delta).ok_or_else(|| {
            RoleError::rendezvous(format!(
                "counter {} overflows when adding {} to {}",
                key, delta, current
            ))
        })?;
        entries.insert(key.to_string(), Bytes::from(updated.to_string()));
        Ok(updated)
    }
}
