//! Connection identity and server identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between hub type and connection id in a primary key.
pub const KEY_SEPARATOR: char = ':';

/// Errors from decoding or building a [`ConnectionKey`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionKeyError {
    /// The primary key has no `:` separator.
    #[error("primary key {0:?} has no ':' separator (expected 'hub_type:connection_id')")]
    MissingSeparator(String),

    /// A component of the key is empty.
    #[error("connection key field cannot be empty: {0}")]
    EmptyField(&'static str),

    /// The hub type contains the separator and would not decode back.
    #[error("hub type {0:?} cannot contain ':'")]
    SeparatorInHubType(String),
}

/// Identity of one client connection on one hub.
///
/// # String Format
///
/// `hub_type:connection_id`, e.g. `ChatHub:Zx8b4d0`. Decoding splits on the
/// first `:` only, so the connection id may itself contain colons.
///
/// # Example
///
/// ```rust
/// use hub_backplane::ConnectionKey;
///
/// let key = ConnectionKey::new("ChatHub", "abc:def").expect("valid key");
/// assert_eq!(key.to_primary_key(), "ChatHub:abc:def");
/// assert_eq!(ConnectionKey::from_primary_key("ChatHub:abc:def"), Ok(key));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    hub_type: String,
    connection_id: String,
}

impl ConnectionKey {
    /// Build a key from its parts.
    pub fn new(
        hub_type: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Result<Self, ConnectionKeyError> {
        let hub_type = hub_type.into();
        let connection_id = connection_id.into();

        if hub_type.is_empty() {
            return Err(ConnectionKeyError::EmptyField("hub_type"));
        }
        if connection_id.is_empty() {
            return Err(ConnectionKeyError::EmptyField("connection_id"));
        }
        if hub_type.contains(KEY_SEPARATOR) {
            return Err(ConnectionKeyError::SeparatorInHubType(hub_type));
        }

        Ok(Self {
            hub_type,
            connection_id,
        })
    }

    /// Decode `hub_type:connection_id`.
    pub fn from_primary_key(primary_key: &str) -> Result<Self, ConnectionKeyError> {
        let (hub_type, connection_id) = primary_key
            .split_once(KEY_SEPARATOR)
            .ok_or_else(|| ConnectionKeyError::MissingSeparator(primary_key.to_string()))?;
        Self::new(hub_type, connection_id)
    }

    /// Encode as `hub_type:connection_id`.
    pub fn to_primary_key(&self) -> String {
        format!("{}{}{}", self.hub_type, KEY_SEPARATOR, self.connection_id)
    }

    /// The hub type (hub name).
    pub fn hub_type(&self) -> &str {
        &self.hub_type
    }

    /// The connection id.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.hub_type, KEY_SEPARATOR, self.connection_id)
    }
}

impl FromStr for ConnectionKey {
    type Err = ConnectionKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_primary_key(s)
    }
}

/// Identity of a hub server process.
///
/// Wraps a UUID. The nil UUID stands for "no server" and is rejected by
/// `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(Uuid);

impl ServerId {
    /// Generate a fresh random server id.
    #[allow(clippy::new_without_default)] // A random id is not a default value
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// The nil server id.
    pub fn nil() -> Self {
        Self(Uuid::nil())
    }

    /// Whether this is the nil id.
    pub fn is_nil(&self) -> bool {
        self.0.is_nil()
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
