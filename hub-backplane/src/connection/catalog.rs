//! Connection catalog: at most one live activation per connection key.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ ConnectionCatalog                             │
//! │                                               │
//! │  activations: DashMap<ConnectionKey,          │
//! │                       Arc<ConnectionActivation>>
//! │  store:   Arc<dyn ConnectionStateStore>       │
//! │  pubsub:  Arc<dyn StreamProvider>             │
//! │  config:  BackplaneConfig                     │
//! └───────────────────────────────────────────────┘
//!            │ get or create                ▲ remove_if(same activation)
//!            ▼                              │
//!     run_message_loop (one tokio task per activation)
//! ```
//!
//! # Get Or Create
//!
//! ```text
//! Fast path:
//!   1. Read the directory entry
//!   2. If present and not finished → return it
//!
//! Slow path:
//!   1. Lock the key's shard through the entry API
//!   2. Re-check: a racing caller may have created it
//!   3. Insert a new activation, replacing a finished one
//!   4. Spawn its message loop after the shard lock is released
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};

use crate::config::BackplaneConfig;
use crate::pubsub::StreamProvider;
use crate::state::ConnectionStateStore;

use super::activation::{run_message_loop, ConnectionActivation, ConnectionCommand};
use super::key::{ConnectionKey, ServerId};
use super::lifecycle::DeactivationReason;
use super::reference::ConnectionRef;

/// Entry point to connection actors.
///
/// Cheap to clone; clones share the same activations.
///
/// # Example
///
/// ```rust,ignore
/// let catalog = ConnectionCatalog::new(store, pubsub, BackplaneConfig::default());
/// let conn = catalog.connection(ConnectionKey::new("ChatHub", "c-1")?);
/// conn.connect(server_id).await?;
/// ```
#[derive(Clone)]
pub struct ConnectionCatalog {
    inner: Arc<CatalogInner>,
}

impl ConnectionCatalog {
    /// Create a catalog over a state store and a stream provider.
    pub fn new(
        store: Arc<dyn ConnectionStateStore>,
        pubsub: Arc<dyn StreamProvider>,
        config: BackplaneConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CatalogInner {
                activations: DashMap::new(),
                next_activation_id: AtomicU64::new(1),
                store,
                pubsub,
                config,
            }),
        }
    }

    /// Reference to the connection actor for `key`.
    ///
    /// Activation is lazy: nothing happens until the first operation.
    pub fn connection(&self, key: ConnectionKey) -> ConnectionRef {
        ConnectionRef::new(key, self.inner.clone())
    }

    /// Number of activations currently in memory.
    pub fn active_count(&self) -> usize {
        self.inner.activations.len()
    }

    /// Whether `key` has an activation in memory.
    pub fn is_active(&self, key: &ConnectionKey) -> bool {
        self.inner.activations.contains_key(key)
    }

    /// The catalog's configuration.
    pub fn config(&self) -> &BackplaneConfig {
        &self.inner.config
    }

    /// Deactivate the activation for `key`, waiting for its loop to exit.
    ///
    /// The durable record and subscriptions are kept. Returns `false` when
    /// no activation was in memory.
    pub async fn deactivate(&self, key: &ConnectionKey) -> bool {
        let Some(activation) = self.inner.existing(key) else {
            return false;
        };
        deactivate(&activation, DeactivationReason::ExplicitRequest).await
    }

    /// Deactivate every activation in memory.
    ///
    /// Commands still queued are dropped. Durable records are kept so a new
    /// catalog over the same store picks the connections up again.
    pub async fn shutdown(&self) {
        let activations: Vec<_> = self
            .inner
            .activations
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tracing::info!("Shutting down catalog with {} activations", activations.len());

        futures::future::join_all(
            activations
                .iter()
                .map(|activation| deactivate(activation, DeactivationReason::NodeShutdown)),
        )
        .await;
    }
}

impl fmt::Debug for ConnectionCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

async fn deactivate(activation: &ConnectionActivation, reason: DeactivationReason) -> bool {
    let (done, rx) = oneshot::channel();
    let command = ConnectionCommand::Deactivate {
        reason,
        done: Some(done),
    };
    if activation.enqueue(command).await.is_err() {
        return false;
    }
    rx.await.is_ok()
}

/// State shared by the catalog, its references and the message loops.
pub(crate) struct CatalogInner {
    activations: DashMap<ConnectionKey, Arc<ConnectionActivation>>,
    next_activation_id: AtomicU64,
    store: Arc<dyn ConnectionStateStore>,
    pubsub: Arc<dyn StreamProvider>,
    config: BackplaneConfig,
}

impl CatalogInner {
    pub(crate) fn store(&self) -> Arc<dyn ConnectionStateStore> {
        self.store.clone()
    }

    pub(crate) fn pubsub(&self) -> Arc<dyn StreamProvider> {
        self.pubsub.clone()
    }

    pub(crate) fn config(&self) -> &BackplaneConfig {
        &self.config
    }

    /// The activation in memory for `key`, if any, without activating.
    pub(crate) fn existing(&self, key: &ConnectionKey) -> Option<Arc<ConnectionActivation>> {
        self.activations.get(key).map(|entry| entry.value().clone())
    }

    /// Get the live activation for `key` or create one.
    pub(crate) fn activation(self: &Arc<Self>, key: &ConnectionKey) -> Arc<ConnectionActivation> {
        if let Some(existing) = self.activations.get(key) {
            if !existing.state().is_finished() {
                return existing.value().clone();
            }
        }

        let (activation, spawned) = match self.activations.entry(key.clone()) {
            Entry::Occupied(mut entry) if entry.get().state().is_finished() => {
                let (activation, mailbox) = self.create(key);
                entry.insert(activation.clone());
                (activation, Some(mailbox))
            }
            Entry::Occupied(entry) => (entry.get().clone(), None),
            Entry::Vacant(entry) => {
                let (activation, mailbox) = self.create(key);
                entry.insert(activation.clone());
                (activation, Some(mailbox))
            }
        };

        if let Some(mailbox) = spawned {
            tracing::debug!("Spawning activation {} for {}", activation.id(), key);
            tokio::spawn(run_message_loop(
                activation.clone(),
                mailbox,
                Arc::clone(self),
            ));
        }
        activation
    }

    fn create(
        &self,
        key: &ConnectionKey,
    ) -> (Arc<ConnectionActivation>, mpsc::Receiver<ConnectionCommand>) {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity());
        let id = self.next_activation_id.fetch_add(1, Ordering::Relaxed);
        let activation = ConnectionActivation::new(
            id,
            key.clone(),
            tx,
            self.config.max_fail_attempts(),
            self.pubsub.clone(),
        );
        (Arc::new(activation), rx)
    }

    /// Remove `activation` from the directory unless a newer one replaced it.
    pub(crate) fn remove(&self, activation: &ConnectionActivation) {
        let removed = self
            .activations
            .remove_if(activation.key(), |_, current| current.id() == activation.id());
        if removed.is_some() {
            tracing::debug!(
                "Unregistered activation {} of {}",
                activation.id(),
                activation.key()
            );
        }
    }

    /// Hand a command left in a closing mailbox to a fresh activation.
    pub(crate) async fn forward(self: &Arc<Self>, key: &ConnectionKey, command: ConnectionCommand) {
        tracing::debug!("Forwarding {:?} for {} to a new activation", command, key);
        if let Err(e) = self.activation(key).enqueue(command).await {
            tracing::warn!("Forwarding to {} failed: {}", key, e);
        }
    }

    /// Deliver a server disconnection event, activating `key` if needed.
    pub(crate) async fn notify_server_disconnected(
        self: &Arc<Self>,
        key: &ConnectionKey,
        server_id: ServerId,
    ) {
        for _ in 0..2 {
            let command = ConnectionCommand::ServerDisconnected { server_id };
            if self.activation(key).enqueue(command).await.is_ok() {
                return;
            }
        }
        tracing::warn!(
            "Dropping disconnection of server {} for {}: no activation accepted it",
            server_id,
            key
        );
    }
}

impl fmt::Debug for CatalogInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCatalog")
            .field("activations", &self.activations.len())
            .field("store", &self.store)
            .field("pubsub", &self.pubsub)
            .field("config", &self.config)
            .finish()
    }
}
