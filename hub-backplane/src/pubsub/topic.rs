//! Topic families and the events they carry.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::connection::{ClientMessage, ServerId};

/// Namespace of the per-server outbound message topic.
pub const SERVER_STREAM_NAMESPACE: &str = "SERVERS_STREAM";

/// Namespace of the per-server disconnection topic.
pub const SERVER_DISCONNECTED_NAMESPACE: &str = "SERVER_DISCONNECTED";

/// Namespace of the per-connection disconnection topic.
pub const CLIENT_DISCONNECT_NAMESPACE: &str = "CLIENT_DISCONNECT";

/// A pub/sub topic: a namespace plus the key of the topic instance.
///
/// | Topic | Producer | Consumer |
/// |-------|----------|----------|
/// | `ServerStream(s)` | any connection actor bound to `s` | dispatch loop of `s` |
/// | `ServerDisconnected(s)` | `s` on shutdown or failure detection | actors bound to `s` |
/// | `ClientDisconnect(c)` | the actor owning `c` | the transport holding `c` |
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topic {
    /// Outbound invocations for the connections held by a server.
    ServerStream(ServerId),
    /// Signals that a server process stopped or failed.
    ServerDisconnected(ServerId),
    /// Signals that a connection was torn down.
    ClientDisconnect(String),
}

impl Topic {
    /// Outbound message topic of `server_id`.
    pub fn server_stream(server_id: ServerId) -> Self {
        Topic::ServerStream(server_id)
    }

    /// Disconnection topic of `server_id`.
    pub fn server_disconnected(server_id: ServerId) -> Self {
        Topic::ServerDisconnected(server_id)
    }

    /// Disconnection topic of a connection.
    pub fn client_disconnect(connection_id: impl Into<String>) -> Self {
        Topic::ClientDisconnect(connection_id.into())
    }

    /// Namespace of this topic's family.
    pub fn namespace(&self) -> &'static str {
        match self {
            Topic::ServerStream(_) => SERVER_STREAM_NAMESPACE,
            Topic::ServerDisconnected(_) => SERVER_DISCONNECTED_NAMESPACE,
            Topic::ClientDisconnect(_) => CLIENT_DISCONNECT_NAMESPACE,
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::ServerStream(id) | Topic::ServerDisconnected(id) => {
                write!(f, "{}/{}", self.namespace(), id)
            }
            Topic::ClientDisconnect(connection_id) => {
                write!(f, "{}/{}", self.namespace(), connection_id)
            }
        }
    }
}

/// Payload published on a topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamEvent {
    /// An invocation routed to the server holding the connection.
    Message(ClientMessage),
    /// The server with this id went away.
    ServerDisconnected(ServerId),
    /// The connection with this id was torn down.
    ClientDisconnected(String),
}
