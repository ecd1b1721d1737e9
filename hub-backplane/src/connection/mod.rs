//! Connection actors: identity, durable record, activations and catalog.
//!
//! ```text
//! ConnectionCatalog ──connection(key)──▶ ConnectionRef
//!                                           │
//!        connect / disconnect ── mailbox ──▶│ message loop ─▶ ConnectionActor
//!        send ─────────── caller's task ───▶│ atomics + server-id snapshot
//! ```

mod activation;
mod actor;
mod catalog;
mod key;
mod lifecycle;
mod message;
mod reference;

pub use actor::{ConnectionRecord, ATTEMPTS_LIMIT_REACHED, CLIENT_STATE, SERVER_DISCONNECTED};
pub use catalog::ConnectionCatalog;
pub use key::{ConnectionKey, ConnectionKeyError, ServerId, KEY_SEPARATOR};
pub use lifecycle::{ActivationState, DeactivationReason};
pub use message::{ClientMessage, InvocationMessage};
pub use reference::ConnectionRef;
