//! Top-level error type for backplane operations.

use thiserror::Error;

use crate::connection::ConnectionKeyError;
use crate::pubsub::PubSubError;
use crate::state::StateStoreError;

/// Errors surfaced by connection operations.
///
/// Routing misses (no server bound) are never reported here: they are
/// absorbed by the attempts counter. Store and stream failures propagate
/// unchanged to the caller.
#[derive(Debug, Error)]
pub enum BackplaneError {
    /// The primary key could not be decoded into a connection key.
    #[error("invalid connection key: {0}")]
    Key(#[from] ConnectionKeyError),

    /// The durable state store failed.
    #[error("state store error: {0}")]
    State(#[from] StateStoreError),

    /// The publish/subscribe fabric failed.
    #[error("pub/sub error: {0}")]
    PubSub(#[from] PubSubError),

    /// Connect was called with the nil server id.
    #[error("server id must not be nil")]
    InvalidServerId,

    /// The activation could not load its state or resume its subscription.
    #[error("activation failed for connection {0}")]
    ActivationFailed(String),

    /// The activation stopped before the operation was processed.
    #[error("connection actor {0} is no longer running")]
    ActorStopped(String),
}
