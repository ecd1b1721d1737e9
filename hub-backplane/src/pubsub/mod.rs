//! Publish/subscribe fabric between connection actors and hub servers.
//!
//! Three topic families carry all cross-process traffic:
//!
//! ```text
//!  connection actor ──Message──────────────▶ SERVERS_STREAM/{server}
//!  hub server ───────ServerDisconnected────▶ SERVER_DISCONNECTED/{server} ──▶ bound actors
//!  connection actor ──ClientDisconnected───▶ CLIENT_DISCONNECT/{connection} ──▶ transport
//! ```
//!
//! Publishing is fire-and-forget: a successful publish says nothing about
//! delivery to the socket.

mod provider;
mod topic;

pub use provider::{
    InMemoryStreamProvider, PubSubError, StreamProvider, SubscriptionCallback,
    SubscriptionHandle, SubscriptionId,
};
pub use topic::{
    StreamEvent, Topic, CLIENT_DISCONNECT_NAMESPACE, SERVER_DISCONNECTED_NAMESPACE,
    SERVER_STREAM_NAMESPACE,
};
