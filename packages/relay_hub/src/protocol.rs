//! Wire protocol types
//!
//! Every frame in either direction is a single JSON object of the form
//! `{"eventName": <string>, "eventPayload": <value>}`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProtocolError;

pub const EVENT_MESSAGE: &str = "message";
pub const EVENT_MESSAGE_RESPONSE: &str = "message response";
pub const EVENT_JOIN: &str = "join";
pub const EVENT_DISCONNECT: &str = "disconnect";

/// Process-unique identifier of one live connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    #[cfg(test)]
    pub(crate) fn from_static(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for ConnectionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// One entry of a membership list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
    #[serde(rename = "socketID")]
    pub socket_id: String,
}

/// Payload of an inbound `message` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default)]
    pub message: String,
    /// Identifier of the connection the message is addressed to.
    #[serde(rename = "socketID", default)]
    pub socket_id: String,
}

/// Payload of an outbound `message response` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Display name of the sender.
    pub username: String,
    pub message: String,
    /// Identifier of the recipient, copied from the inbound payload.
    #[serde(rename = "socketID")]
    pub socket_id: String,
}

/// Events received FROM a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    Message(ChatMessage),
}

/// Events sent TO clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventName", content = "eventPayload")]
pub enum ServerEvent {
    #[serde(rename = "message response")]
    MessageResponse(MessageResponse),
    /// Full membership list after a connection registered.
    #[serde(rename = "join")]
    Join(Vec<Member>),
    /// Full membership list after a connection went away.
    #[serde(rename = "disconnect")]
    Disconnect(Vec<Member>),
}

/// Raw envelope used for the first decoding step. `EventName`/`EventPayload`
/// are the capitalized keys older browser clients send; no other casing is
/// accepted.
#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "eventName", alias = "EventName")]
    event_name: String,
    #[serde(rename = "eventPayload", alias = "EventPayload", default)]
    event_payload: serde_json::Value,
}

impl ClientEvent {
    /// Decode one inbound frame.
    ///
    /// Returns `Ok(None)` for well-formed frames carrying an event name this
    /// server does not handle.
    pub fn decode(frame: &[u8]) -> Result<Option<Self>, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(frame).map_err(ProtocolError::MalformedFrame)?;

        match envelope.event_name.as_str() {
            EVENT_MESSAGE => serde_json::from_value(envelope.event_payload)
                .map(|payload| Some(ClientEvent::Message(payload)))
                .map_err(|source| ProtocolError::InvalidPayload {
                    event: envelope.event_name.clone(),
                    source,
                }),
            _ => Ok(None),
        }
    }

    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Message(_) => EVENT_MESSAGE,
        }
    }
}

impl ServerEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::MessageResponse(_) => EVENT_MESSAGE_RESPONSE,
            Self::Join(_) => EVENT_JOIN,
            Self::Disconnect(_) => EVENT_DISCONNECT,
        }
    }

    /// The connection identifier a directed emit is matched against.
    ///
    /// For a message response this is the `socketID` carried in the payload,
    /// i.e. whatever the sending client put there.
    pub fn recipient(&self) -> Option<&str> {
        match self {
            Self::MessageResponse(response) => Some(&response.socket_id),
            Self::Join(_) | Self::Disconnect(_) => None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Encode several events into the body of a single text frame, one JSON
/// object per line, in order.
pub fn encode_batch(events: &[ServerEvent]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for (i, event) in events.iter().enumerate() {
        if i > 0 {
            body.push('\n');
        }
        body.push_str(&event.to_json()?);
    }
    Ok(body)
}
