//! # hub-backplane
//!
//! Connection routing core for a scale-out real-time hub.
//!
//! Every client connection known to the cluster is owned by one virtual
//! actor. The actor remembers which server process holds the live socket,
//! forwards outbound invocations to that server's stream, and cleans itself
//! up when the server or the client goes away.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Hub layer / transport (external)                           │
//! │    connect · send · send_one_way · disconnect               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ConnectionCatalog → ConnectionRef → connection actor       │
//! │    one activation per ConnectionKey, mailbox + task         │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │  ConnectionStateStore        │  StreamProvider              │
//! │  durable { server_id }       │  SERVERS_STREAM/{server}     │
//! │  PersistentState<T>          │  SERVER_DISCONNECTED/{server}│
//! │                              │  CLIENT_DISCONNECT/{conn}    │
//! └──────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Orleans Model
//!
//! Turn-based concurrency: connect, disconnect and lifecycle commands are
//! processed one at a time per activation. `send` is re-entrant and runs on
//! the caller's task, so its failure counter is atomic.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use hub_backplane::*;
//!
//! let pubsub: Arc<dyn StreamProvider> = Arc::new(InMemoryStreamProvider::new());
//! let store: Arc<dyn ConnectionStateStore> = Arc::new(InMemoryStateStore::new());
//! let catalog = ConnectionCatalog::new(store, pubsub.clone(), BackplaneConfig::default());
//!
//! let (server, mut inbox) = HubServer::start(ServerId::new(), pubsub).await?;
//! let conn = catalog.connection(ConnectionKey::new("ChatHub", "conn-1")?);
//! conn.connect(server.id()).await?;
//! conn.send(InvocationMessage::new("ReceiveMessage", vec![])).await?;
//! let delivered = inbox.recv().await;
//! ```

#![deny(missing_docs)]

mod config;
mod error;

pub mod connection;
pub mod pubsub;
pub mod server;
pub mod state;

pub use config::{
    BackplaneConfig, BackplaneConfigBuilder, ConfigError, DEFAULT_DEACTIVATION_DELAY,
    DEFAULT_IDLE_TIMEOUT, DEFAULT_MAILBOX_CAPACITY, DEFAULT_MAX_FAIL_ATTEMPTS,
};
pub use connection::{
    ActivationState, ClientMessage, ConnectionCatalog, ConnectionKey, ConnectionKeyError,
    ConnectionRecord, ConnectionRef, DeactivationReason, InvocationMessage, ServerId,
};
pub use error::BackplaneError;
pub use pubsub::{
    InMemoryStreamProvider, PubSubError, StreamEvent, StreamProvider, SubscriptionCallback,
    SubscriptionHandle, SubscriptionId, Topic,
};
pub use server::HubServer;
pub use state::{
    ConnectionStateStore, InMemoryStateStore, PersistentState, StateStoreError, StoredState,
};
