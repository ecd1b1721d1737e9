//! Location-transparent reference to a connection actor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::error::BackplaneError;

use super::activation::ConnectionActivation;
use super::catalog::CatalogInner;
use super::key::{ConnectionKey, ServerId};
use super::message::InvocationMessage;

/// Handle used by the hub layer to drive one connection.
///
/// Every call goes to the current activation of the key, creating it on
/// demand. A call that races with the activation leaving memory is retried
/// once against a fresh activation.
#[derive(Clone)]
pub struct ConnectionRef {
    key: ConnectionKey,
    catalog: Arc<CatalogInner>,
}

impl ConnectionRef {
    pub(crate) fn new(key: ConnectionKey, catalog: Arc<CatalogInner>) -> Self {
        Self { key, catalog }
    }

    /// The connection this reference points to.
    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    /// Bind the connection to the server holding its socket.
    ///
    /// Persists the binding and subscribes to the server's disconnection
    /// topic. Connecting again re-binds and drops the old subscription.
    ///
    /// # Errors
    ///
    /// [`BackplaneError::InvalidServerId`] for the nil id, or the store or
    /// stream error that interrupted the operation.
    pub async fn connect(&self, server_id: ServerId) -> Result<(), BackplaneError> {
        self.with_activation(|activation| async move { activation.connect(server_id).await })
            .await
    }

    /// Tear the connection down.
    ///
    /// Unsubscribes from the server's disconnection topic, publishes a
    /// client disconnection and clears the record. A second disconnect
    /// before the next connect does nothing.
    pub async fn disconnect(&self, reason: Option<&str>) -> Result<(), BackplaneError> {
        let reason = reason.map(str::to_string);
        self.with_activation(|activation| {
            let reason = reason.clone();
            async move { activation.disconnect(reason).await }
        })
        .await
    }

    /// Deliver `message` to the server holding the socket.
    ///
    /// With no server bound the message is dropped and counted; the call
    /// still succeeds. Reaching the configured attempts limit disconnects
    /// the connection with reason `attempts-limit-reached`.
    pub async fn send(&self, message: InvocationMessage) -> Result<(), BackplaneError> {
        self.with_activation(|activation| {
            let message = message.clone();
            async move { activation.send(message).await }
        })
        .await
    }

    /// Same as [`send`](Self::send), for callers that do not wait on
    /// delivery.
    pub async fn send_one_way(&self, message: InvocationMessage) -> Result<(), BackplaneError> {
        self.send(message).await
    }

    /// Server currently bound to the connection, activating it if needed.
    pub async fn server_id(&self) -> Result<Option<ServerId>, BackplaneError> {
        self.with_activation(|activation| async move {
            activation.wait_until_valid().await?;
            Ok(activation.server_id())
        })
        .await
    }

    /// Report that `server_id` went away, as its disconnection topic would.
    ///
    /// Queued behind earlier commands. Ignored unless the connection is
    /// still bound to that server when the report is processed.
    pub async fn server_disconnected(&self, server_id: ServerId) {
        self.catalog
            .notify_server_disconnected(&self.key, server_id)
            .await;
    }

    /// Consecutive failed sends of the activation in memory.
    ///
    /// `None` when the connection is not activated; this never activates.
    pub fn fail_attempts(&self) -> Option<u32> {
        self.catalog
            .existing(&self.key)
            .map(|activation| activation.fail_attempts())
    }

    async fn with_activation<T, F, Fut>(&self, op: F) -> Result<T, BackplaneError>
    where
        F: Fn(Arc<ConnectionActivation>) -> Fut,
        Fut: Future<Output = Result<T, BackplaneError>>,
    {
        match op(self.catalog.activation(&self.key)).await {
            Err(BackplaneError::ActorStopped(_)) => {
                tracing::debug!("Activation of {} stopped, retrying on a new one", self.key);
                op(self.catalog.activation(&self.key)).await
            }
            result => result,
        }
    }
}

impl fmt::Debug for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRef")
            .field("key", &self.key)
            .finish()
    }
}
