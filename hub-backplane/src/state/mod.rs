//! Durable actor state: the store contract and a typed wrapper.

mod persistent;
mod store;

pub use persistent::PersistentState;
pub use store::{ConnectionStateStore, InMemoryStateStore, StateStoreError, StoredState};
