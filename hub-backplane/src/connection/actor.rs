//! The connection actor: single-writer state of one connection.
//!
//! A `ConnectionActor` lives inside the message loop of its activation and
//! is only touched by that loop, one command at a time. It owns the durable
//! [`ConnectionRecord`] and the subscription to the bound server's
//! disconnection topic.
//!
//! # States
//!
//! ```text
//!   Unbound ──connect(S)──▶ Bound(S) ──disconnect──▶ Unbound (disconnected)
//!      ▲                       │
//!      └──── reactivation ─────┘  record survives, subscription resumed
//! ```
//!
//! # Orleans Reference
//!
//! This is the per-connection grain of a hub backplane: `OnConnect`,
//! `OnDisconnect` and the `OnActivateAsync` subscription resume.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::error::BackplaneError;
use crate::pubsub::{StreamEvent, StreamProvider, SubscriptionCallback, SubscriptionHandle, Topic};
use crate::state::{ConnectionStateStore, PersistentState};

use super::activation::ConnectionActivation;
use super::catalog::CatalogInner;
use super::key::{ConnectionKey, ServerId};

/// Name under which connection records are stored.
pub const CLIENT_STATE: &str = "ClientState";

/// Disconnect reason used when the bound server goes away.
pub const SERVER_DISCONNECTED: &str = "server-disconnected";

/// Disconnect reason used when too many sends found no bound server.
pub const ATTEMPTS_LIMIT_REACHED: &str = "attempts-limit-reached";

/// Durable state of a connection: which server holds its socket.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Server holding the live socket, `None` until connected.
    pub server_id: Option<ServerId>,
}

pub(crate) struct ConnectionActor {
    key: ConnectionKey,
    primary_key: String,
    record: PersistentState<ConnectionRecord>,
    disconnect_subscription: Option<SubscriptionHandle>,
    activation: Arc<ConnectionActivation>,
    pubsub: Arc<dyn StreamProvider>,
    catalog: Weak<CatalogInner>,
}

impl ConnectionActor {
    /// Rebuild the actor from its primary key and durable record.
    ///
    /// A record with a server id means the previous activation was bound
    /// when it went away; its disconnection subscription is resumed so the
    /// server's failure is still noticed.
    pub(crate) async fn activate(
        activation: Arc<ConnectionActivation>,
        store: Arc<dyn ConnectionStateStore>,
        pubsub: Arc<dyn StreamProvider>,
        catalog: Weak<CatalogInner>,
    ) -> Result<Self, BackplaneError> {
        let primary_key = activation.key().to_primary_key();
        let key = ConnectionKey::from_primary_key(&primary_key)?;
        let record = PersistentState::<ConnectionRecord>::load(store, CLIENT_STATE, &primary_key)
            .await?;

        let mut actor = Self {
            key,
            primary_key,
            record,
            disconnect_subscription: None,
            activation,
            pubsub,
            catalog,
        };

        if let Some(server_id) = actor.record.state().server_id {
            tracing::info!(
                "Resuming connection {} on {} bound to server {}",
                actor.key.connection_id(),
                actor.key.hub_type(),
                server_id
            );
            actor.resume_disconnect_subscription(server_id).await?;
            actor.activation.set_server_id(Some(server_id));
        }

        Ok(actor)
    }

    /// Bind the connection to `server_id`.
    ///
    /// The new subscription is taken and the record written before the old
    /// subscription is dropped. On failure the previous binding and its
    /// subscription are left as they were.
    pub(crate) async fn connect(&mut self, server_id: ServerId) -> Result<(), BackplaneError> {
        if server_id.is_nil() {
            return Err(BackplaneError::InvalidServerId);
        }

        let topic = Topic::server_disconnected(server_id);
        let handle = self
            .pubsub
            .subscribe(&topic, &self.primary_key, self.disconnect_callback())
            .await?;

        let previous_server = self.record.state().server_id;
        self.record.state_mut().server_id = Some(server_id);
        if let Err(e) = self.record.write_state().await {
            self.record.state_mut().server_id = previous_server;
            if let Err(unsubscribe) = self.pubsub.unsubscribe(&handle).await {
                tracing::warn!(
                    "Could not drop subscription {} of {} after failed connect: {}",
                    handle.id(),
                    self.primary_key,
                    unsubscribe
                );
            }
            return Err(e.into());
        }

        if let Some(previous) = self.disconnect_subscription.replace(handle) {
            tracing::debug!(
                "Connection {} re-bound, dropping subscription to {}",
                self.primary_key,
                previous.topic()
            );
            // Events from the old server no longer match the record.
            if let Err(e) = self.pubsub.unsubscribe(&previous).await {
                tracing::warn!(
                    "Could not drop subscription {} of {}: {}",
                    previous.id(),
                    self.primary_key,
                    e
                );
            }
        }

        self.activation.set_server_id(Some(server_id));
        self.activation.set_disconnected(false);

        tracing::info!(
            "Connection {} on {} bound to server {}",
            self.key.connection_id(),
            self.key.hub_type(),
            server_id
        );
        Ok(())
    }

    /// Tear the connection down: notify, forget, unsubscribe.
    ///
    /// The subscription is only dropped once the notification is published
    /// and the record cleared, so a failed disconnect can be retried by the
    /// next server disconnection event. A second call does nothing until the
    /// next `connect` or unbound `send`.
    pub(crate) async fn disconnect(&mut self, reason: Option<&str>) -> Result<(), BackplaneError> {
        if self.activation.is_disconnected() {
            tracing::debug!(
                "Connection {} already disconnected, ignoring reason '{:?}'",
                self.primary_key,
                reason
            );
            return Ok(());
        }

        tracing::debug!(
            "Disconnecting connection on {} for connection {} from server {:?} via reason '{:?}'",
            self.key.hub_type(),
            self.key.connection_id(),
            self.record.state().server_id,
            reason
        );

        let connection_id = self.key.connection_id().to_string();
        self.pubsub
            .publish(
                &Topic::client_disconnect(connection_id.clone()),
                StreamEvent::ClientDisconnected(connection_id),
            )
            .await?;

        self.record.clear_state().await?;

        if let Some(handle) = self.disconnect_subscription.take() {
            if let Err(e) = self.pubsub.unsubscribe(&handle).await {
                tracing::warn!(
                    "Could not drop subscription {} of {}: {}",
                    handle.id(),
                    self.primary_key,
                    e
                );
            }
        }

        self.activation.set_server_id(None);
        self.activation.reset_fail_attempts();
        self.activation.set_disconnected(true);
        Ok(())
    }

    /// React to a server disconnection event.
    ///
    /// Events for a server this connection is not bound to are stale and
    /// ignored.
    pub(crate) async fn on_server_disconnected(
        &mut self,
        server_id: ServerId,
    ) -> Result<(), BackplaneError> {
        if self.record.state().server_id != Some(server_id) {
            tracing::debug!(
                "Ignoring disconnection of server {} for {} (bound to {:?})",
                server_id,
                self.primary_key,
                self.record.state().server_id
            );
            return Ok(());
        }
        self.disconnect(Some(SERVER_DISCONNECTED)).await
    }

    async fn resume_disconnect_subscription(
        &mut self,
        server_id: ServerId,
    ) -> Result<(), BackplaneError> {
        let topic = Topic::server_disconnected(server_id);
        let mut handles = self
            .pubsub
            .subscription_handles(&topic, &self.primary_key)
            .await?;

        // Handles come oldest first: keep the newest, cancel the others.
        let handle = match handles.pop() {
            Some(latest) => {
                for stale in &handles {
                    tracing::warn!(
                        "Cancelling stale subscription {} of {} on {}",
                        stale.id(),
                        self.primary_key,
                        topic
                    );
                    self.pubsub.unsubscribe(stale).await?;
                }
                self.pubsub
                    .resume(&latest, self.disconnect_callback())
                    .await?
            }
            None => {
                tracing::warn!(
                    "No subscription left for {} on {}, subscribing again",
                    self.primary_key,
                    topic
                );
                self.pubsub
                    .subscribe(&topic, &self.primary_key, self.disconnect_callback())
                    .await?
            }
        };
        self.disconnect_subscription = Some(handle);
        Ok(())
    }

    /// Callback bound to the server disconnection topic.
    ///
    /// Routes through the catalog rather than this activation's mailbox, so
    /// an event for a deactivated connection reactivates it first.
    fn disconnect_callback(&self) -> SubscriptionCallback {
        let catalog = self.catalog.clone();
        let key = self.key.clone();
        Arc::new(move |event: StreamEvent| {
            let catalog = catalog.clone();
            let key = key.clone();
            async move {
                let StreamEvent::ServerDisconnected(server_id) = event else {
                    return;
                };
                match catalog.upgrade() {
                    Some(catalog) => catalog.notify_server_disconnected(&key, server_id).await,
                    None => tracing::debug!(
                        "Catalog gone, dropping disconnection of server {} for {}",
                        server_id,
                        key
                    ),
                }
            }
            .boxed()
        })
    }
}
