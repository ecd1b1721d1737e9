//! Server-side link between a hub server process and the fabric.
//!
//! A `HubServer` is what a server process holding sockets runs next to its
//! transport:
//!
//! ```text
//!  SERVERS_STREAM/{id} ──▶ HubServer ──▶ inbox (ClientMessage) ──▶ socket writer
//!  CLIENT_DISCONNECT/{c} ─▶ HubServer ──▶ watcher channel ──────▶ socket close
//!  shutdown() ──▶ SERVER_DISCONNECTED/{id} ──▶ every actor bound to id
//! ```

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::mpsc;

use crate::connection::{ClientMessage, ServerId};
use crate::pubsub::{PubSubError, StreamEvent, StreamProvider, SubscriptionHandle, Topic};

/// A running hub server registered on the fabric.
pub struct HubServer {
    id: ServerId,
    pubsub: Arc<dyn StreamProvider>,
    inbox: SubscriptionHandle,
    watches: DashMap<String, SubscriptionHandle>,
}

impl HubServer {
    /// Subscribe to the outbound topic of `id`.
    ///
    /// Returns the server and the receiving end of its inbox: every message
    /// a connection actor routes to `id` shows up there.
    pub async fn start(
        id: ServerId,
        pubsub: Arc<dyn StreamProvider>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ClientMessage>), PubSubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let topic = Topic::server_stream(id);
        let inbox = pubsub
            .subscribe(
                &topic,
                &subscriber_name(id),
                Arc::new(move |event: StreamEvent| {
                    let tx = tx.clone();
                    async move {
                        match event {
                            StreamEvent::Message(message) => {
                                if tx.send(message).is_err() {
                                    tracing::debug!("Inbox closed, dropping message");
                                }
                            }
                            other => tracing::warn!("Unexpected event on inbox: {:?}", other),
                        }
                    }
                    .boxed()
                }),
            )
            .await?;

        tracing::info!("Hub server {} listening on {}", id, topic);
        Ok((
            Self {
                id,
                pubsub,
                inbox,
                watches: DashMap::new(),
            },
            rx,
        ))
    }

    /// This server's id, to pass to `connect`.
    pub fn id(&self) -> ServerId {
        self.id
    }

    /// Watch the disconnection topic of a connection held by this server.
    ///
    /// The returned channel yields the connection id each time its actor
    /// tears the connection down. Watching the same connection again
    /// replaces the previous watch.
    pub async fn watch_client(
        &self,
        connection_id: &str,
    ) -> Result<mpsc::UnboundedReceiver<String>, PubSubError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self
            .pubsub
            .subscribe(
                &Topic::client_disconnect(connection_id),
                &subscriber_name(self.id),
                Arc::new(move |event: StreamEvent| {
                    let tx = tx.clone();
                    async move {
                        if let StreamEvent::ClientDisconnected(connection_id) = event {
                            let _ = tx.send(connection_id);
                        }
                    }
                    .boxed()
                }),
            )
            .await?;

        if let Some(previous) = self.watches.insert(connection_id.to_string(), handle) {
            self.pubsub.unsubscribe(&previous).await?;
        }
        Ok(rx)
    }

    /// Stop watching a connection. Unknown connections are ignored.
    pub async fn unwatch_client(&self, connection_id: &str) -> Result<(), PubSubError> {
        if let Some((_, handle)) = self.watches.remove(connection_id) {
            self.pubsub.unsubscribe(&handle).await?;
        }
        Ok(())
    }

    /// Leave the fabric and tell every actor bound here that this server is
    /// gone.
    pub async fn shutdown(self) -> Result<(), PubSubError> {
        tracing::info!("Hub server {} shutting down", self.id);

        self.pubsub.unsubscribe(&self.inbox).await?;
        let watches: Vec<SubscriptionHandle> = self
            .watches
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        for handle in &watches {
            self.pubsub.unsubscribe(handle).await?;
        }

        self.pubsub
            .publish(
                &Topic::server_disconnected(self.id),
                StreamEvent::ServerDisconnected(self.id),
            )
            .await
    }
}

impl fmt::Debug for HubServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubServer")
            .field("id", &self.id)
            .field("watches", &self.watches.len())
            .finish()
    }
}

fn subscriber_name(id: ServerId) -> String {
    format!("server:{}", id)
}
