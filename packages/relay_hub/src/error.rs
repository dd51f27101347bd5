/// Errors surfaced by the hub handle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The coordinating task has stopped and no longer accepts operations.
    #[error("hub is closed")]
    Closed,
}

/// Errors produced while decoding an inbound frame.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not a JSON object with an `eventName` field.
    #[error("malformed frame: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// The event name is known but its payload has the wrong shape.
    #[error("invalid payload for event '{event}': {source}")]
    InvalidPayload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::MalformedFrame(_) => "malformed_frame",
            Self::InvalidPayload { .. } => "invalid_payload",
        }
    }
}
