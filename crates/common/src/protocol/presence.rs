// Document presence messages and destination naming.
//
// Clients publish join/leave bodies to per-document destinations and
// subscribe to a per-document topic that carries the full viewer set.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::{CurrentUser, DocumentId, PresenceUser, UserId};

pub const PRESENCE_MESSAGE_TYPE: &str = "presence";

/// Logical destinations of the presence protocol.
///
/// Paths are broker-agnostic; the transport adds its own prefixes
/// (e.g. `/app` for publishes, `/topic` for subscriptions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    /// `presence/{id}/join`
    Join(DocumentId),
    /// `presence/{id}/leave`
    Leave(DocumentId),
    /// `presence/{id}`, the broadcast topic.
    Topic(DocumentId),
}

impl Destination {
    pub fn document_id(self) -> DocumentId {
        match self {
            Self::Join(id) | Self::Leave(id) | Self::Topic(id) => id,
        }
    }

    pub fn path(self) -> String {
        match self {
            Self::Join(id) => format!("presence/{id}/join"),
            Self::Leave(id) => format!("presence/{id}/leave"),
            Self::Topic(id) => format!("presence/{id}"),
        }
    }

    /// Parse a logical topic path back into a destination.
    pub fn parse_topic(path: &str) -> Option<Self> {
        let id = path.strip_prefix("presence/")?;
        id.parse::<DocumentId>().ok().map(Self::Topic)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Body of a join or leave publish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
    pub name: String,
    pub email: String,
}

impl From<&CurrentUser> for PresencePayload {
    fn from(user: &CurrentUser) -> Self {
        Self { user_id: user.id, name: user.name.clone(), email: user.email.clone() }
    }
}

impl PresencePayload {
    pub fn to_json(&self) -> String {
        // A struct of an integer and two strings always serializes.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Messages broadcast by the presence server on a document topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Full replacement viewer set for the document.
    Presence { users: Vec<PresenceUser> },
}

/// Why an inbound body could not be turned into a [`ServerMessage`].
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("message body is not a JSON object: {0}")]
    Malformed(String),
    #[error("message has no string `type` field")]
    MissingType,
    #[error("unsupported message type `{0}`")]
    UnsupportedType(String),
    #[error("invalid `{kind}` payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode a topic body, dispatching on its `type` discriminant.
pub fn decode_server_message(body: &str) -> Result<ServerMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(body).map_err(|error| DecodeError::Malformed(error.to_string()))?;
    let Value::Object(ref fields) = value else {
        return Err(DecodeError::Malformed("expected an object".into()));
    };
    let kind = fields
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    if kind != PRESENCE_MESSAGE_TYPE {
        return Err(DecodeError::UnsupportedType(kind));
    }
    serde_json::from_value(value).map_err(|source| DecodeError::InvalidPayload { kind, source })
}
