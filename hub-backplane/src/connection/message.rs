//! Invocation payloads routed to connections.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A hub method invocation destined for one client.
///
/// The backplane never inspects the arguments; serializing them for the
/// socket is the transport's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationMessage {
    /// Present when the caller expects a completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Client method to invoke.
    pub target: String,
    /// Method arguments.
    pub arguments: Vec<serde_json::Value>,
    /// Ids of streams passed as arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_ids: Option<Vec<String>>,
    /// Protocol headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
}

impl InvocationMessage {
    /// A non-blocking invocation of `target` with `arguments`.
    pub fn new(target: impl Into<String>, arguments: Vec<serde_json::Value>) -> Self {
        Self {
            invocation_id: None,
            target: target.into(),
            arguments,
            stream_ids: None,
            headers: None,
        }
    }

    /// Attach an invocation id.
    pub fn with_invocation_id(mut self, invocation_id: impl Into<String>) -> Self {
        self.invocation_id = Some(invocation_id.into());
        self
    }

    /// Attach stream ids.
    pub fn with_stream_ids(mut self, stream_ids: Vec<String>) -> Self {
        self.stream_ids = Some(stream_ids);
        self
    }

    /// Attach headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = Some(headers);
        self
    }
}

/// What a connection actor publishes on its server's outbound topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientMessage {
    /// Hub the connection belongs to.
    pub hub_name: String,
    /// Target connection.
    pub connection_id: String,
    /// The invocation to deliver.
    pub payload: InvocationMessage,
}
