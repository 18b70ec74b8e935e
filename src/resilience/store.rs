//! Shared key-value store holding circuit state.
//!
//! # Responsibilities
//! - Define the primitives the breaker needs from its store
//! - Provide the in-process fallback used when Redis is not configured or not reachable
//!
//! # Design Decisions
//! - `increment` and `compare_and_swap` must be atomic in every implementation
//! - Values are strings; the breaker owns their encoding

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;

/// Errors surfaced by a state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("state store unavailable: {0}")]
    Unavailable(String),

    #[error("value under {key} is not an integer: {value}")]
    NotAnInteger { key: String, value: String },
}

/// Primitives a circuit breaker requires from its shared store.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read a key.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite a key.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Atomically add one to an integer key (missing = 0) and return the new value.
    async fn increment(&self, key: &str) -> Result<i64, StoreError>;

    /// Remove a key. Removing a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically replace the value of `key` with `new` if it currently equals
    /// `expected` (`None` = key absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError>;

    /// Short label for health reporting.
    fn kind(&self) -> &'static str;
}

/// In-process store backed by a concurrent map.
///
/// State is shared by every clone within one process only.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently held.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.inner.get(key).map(|r| r.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn increment(&self, key: &str) -> Result<i64, StoreError> {
        let mut entry = self
            .inner
            .entry(key.to_string())
            .or_insert_with(|| "0".to_string());
        let current: i64 = entry.parse().map_err(|_| StoreError::NotAnInteger {
            key: key.to_string(),
            value: entry.clone(),
        })?;
        let next = current + 1;
        *entry = next.to_string();
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key);
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: &str,
    ) -> Result<bool, StoreError> {
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if expected == Some(occupied.get().as_str()) {
                    occupied.insert(new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(new.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
