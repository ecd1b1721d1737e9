//! Typed persistent state over a [`ConnectionStateStore`].
//!
//! `PersistentState<T>` keeps the last loaded value and its ETag, encodes
//! with `serde_json`, and writes back with the ETag so a second writer is
//! detected instead of silently overwritten.
//!
//! # Orleans Reference
//!
//! Corresponds to `IPersistentState<T>`: `state()` is `State`,
//! `write_state` / `clear_state` are `WriteStateAsync` / `ClearStateAsync`.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::store::{ConnectionStateStore, StateStoreError};

/// Typed, cached state of one actor.
pub struct PersistentState<T> {
    value: T,
    etag: Option<String>,
    store: Arc<dyn ConnectionStateStore>,
    state_name: String,
    identity: String,
}

impl<T: Serialize + DeserializeOwned + Default> PersistentState<T> {
    /// Load the state, or start from `T::default()` when nothing is stored.
    pub async fn load(
        store: Arc<dyn ConnectionStateStore>,
        state_name: &str,
        identity: &str,
    ) -> Result<Self, StateStoreError> {
        let mut state = Self {
            value: T::default(),
            etag: None,
            store,
            state_name: state_name.to_string(),
            identity: identity.to_string(),
        };
        state.read_state().await?;
        Ok(state)
    }

    /// Current value.
    pub fn state(&self) -> &T {
        &self.value
    }

    /// Mutable access; changes are persisted by [`write_state`](Self::write_state).
    pub fn state_mut(&mut self) -> &mut T {
        &mut self.value
    }

    /// Whether a record currently exists in the store.
    pub fn record_exists(&self) -> bool {
        self.etag.is_some()
    }

    /// ETag of the last read or write.
    pub fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }

    /// Persist the current value.
    pub async fn write_state(&mut self) -> Result<(), StateStoreError> {
        let data = serde_json::to_vec(&self.value)
            .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
        let etag = self
            .store
            .write_state(&self.state_name, &self.identity, data, self.etag.as_deref())
            .await?;
        self.etag = Some(etag);
        Ok(())
    }

    /// Re-read from the store, replacing the cached value.
    pub async fn read_state(&mut self) -> Result<(), StateStoreError> {
        match self
            .store
            .read_state(&self.state_name, &self.identity)
            .await?
        {
            Some(entry) => {
                self.value = serde_json::from_slice(&entry.data)
                    .map_err(|e| StateStoreError::Serialization(e.to_string()))?;
                self.etag = Some(entry.etag);
            }
            None => {
                self.value = T::default();
                self.etag = None;
            }
        }
        Ok(())
    }

    /// Delete the record and reset the cached value to `T::default()`.
    pub async fn clear_state(&mut self) -> Result<(), StateStoreError> {
        self.store
            .clear_state(&self.state_name, &self.identity, self.etag.as_deref())
            .await?;
        self.value = T::default();
        self.etag = None;
        Ok(())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PersistentState<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistentState")
            .field("state_name", &self.state_name)
            .field("identity", &self.identity)
            .field("value", &self.value)
            .field("etag", &self.etag)
            .finish()
    }
}
