//! Durable state store for connection actors.
//!
//! Given a state name and an actor identity, the store reads and writes
//! serialized state with ETag-based optimistic concurrency. The connection
//! actor is the only writer of its own record, so ETag conflicts indicate a
//! second activation of the same key, which the catalog never creates.
//!
//! # Orleans Reference
//!
//! Corresponds to `IGrainStorage`: `read_state` / `write_state` /
//! `clear_state` map to `ReadStateAsync` / `WriteStateAsync` /
//! `ClearStateAsync`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Errors from state store operations.
#[derive(Debug, thiserror::Error)]
pub enum StateStoreError {
    /// Write or clear rejected because the stored ETag differs from the expected one.
    #[error("ETag mismatch: expected {expected:?}, found {actual:?}")]
    ETagMismatch {
        /// The ETag the caller expected.
        expected: String,
        /// The ETag currently in the store (empty if absent).
        actual: String,
    },

    /// Serialization or deserialization of the state failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing store is unavailable or failed.
    #[error("store error: {0}")]
    Store(String),
}

/// A stored state entry: serialized bytes plus their ETag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredState {
    /// Serialized state bytes.
    pub data: Vec<u8>,
    /// Optimistic concurrency token.
    pub etag: String,
}

/// Key-value store holding durable actor state.
///
/// Implementations must give read-after-write consistency to the writer.
#[async_trait::async_trait]
pub trait ConnectionStateStore: fmt::Debug + Send + Sync {
    /// Read the stored state, `Ok(None)` if nothing was ever written.
    async fn read_state(
        &self,
        state_name: &str,
        identity: &str,
    ) -> Result<Option<StoredState>, StateStoreError>;

    /// Write state and return the new ETag.
    ///
    /// With `expected_etag = Some(..)` the write only succeeds if the stored
    /// ETag matches; `None` writes unconditionally.
    async fn write_state(
        &self,
        state_name: &str,
        identity: &str,
        data: Vec<u8>,
        expected_etag: Option<&str>,
    ) -> Result<String, StateStoreError>;

    /// Delete the stored state.
    ///
    /// With `expected_etag = Some(..)` the delete only succeeds if the stored
    /// ETag matches; `None` deletes unconditionally (a no-op when absent).
    async fn clear_state(
        &self,
        state_name: &str,
        identity: &str,
        expected_etag: Option<&str>,
    ) -> Result<(), StateStoreError>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    entries: DashMap<(String, String), StoredState>,
    counter: AtomicU64,
}

impl InMemoryStateStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn next_etag(&self) -> String {
        (self.counter.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }
}

fn check_etag(current: Option<&StoredState>, expected: &str) -> Result<(), StateStoreError> {
    match current {
        Some(existing) if existing.etag == expected => Ok(()),
        Some(existing) => Err(StateStoreError::ETagMismatch {
            expected: expected.to_string(),
            actual: existing.etag.clone(),
        }),
        None => Err(StateStoreError::ETagMismatch {
            expected: expected.to_string(),
            actual: String::new(),
        }),
    }
}

#[async_trait::async_trait]
impl ConnectionStateStore for InMemoryStateStore {
    async fn read_state(
        &self,
        state_name: &str,
        identity: &str,
    ) -> Result<Option<StoredState>, StateStoreError> {
        let key = (state_name.to_string(), identity.to_string());
        Ok(self.entries.get(&key).map(|entry| entry.value().clone()))
    }

    async fn write_state(
        &self,
        state_name: &str,
        identity: &str,
        data: Vec<u8>,
        expected_etag: Option<&str>,
    ) -> Result<String, StateStoreError> {
        let key = (state_name.to_string(), identity.to_string());
        let etag = self.next_etag();
        let stored = StoredState {
            data,
            etag: etag.clone(),
        };

        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                if let Some(expected) = expected_etag {
                    check_etag(Some(occupied.get()), expected)?;
                }
                occupied.insert(stored);
            }
            Entry::Vacant(vacant) => {
                if let Some(expected) = expected_etag {
                    check_etag(None, expected)?;
                }
                vacant.insert(stored);
            }
        }
        Ok(etag)
    }

    async fn clear_state(
        &self,
        state_name: &str,
        identity: &str,
        expected_etag: Option<&str>,
    ) -> Result<(), StateStoreError> {
        let key = (state_name.to_string(), identity.to_string());
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => {
                if let Some(expected) = expected_etag {
                    check_etag(Some(occupied.get()), expected)?;
                }
                occupied.remove();
                Ok(())
            }
            Entry::Vacant(_) => match expected_etag {
                Some(expected) => check_etag(None, expected),
                None => Ok(()),
            },
        }
    }
}
