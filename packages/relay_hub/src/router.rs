//! Event Router
//!
//! Translates a decoded inbound event into the outbound event that should be
//! delivered for it. Holds no state; the only input besides the event is the
//! sender's display name.

use crate::protocol::{ClientEvent, MessageResponse, ServerEvent};

/// Route an inbound event. `None` means nothing is delivered.
pub fn route(sender_display_name: &str, event: ClientEvent) -> Option<ServerEvent> {
    match event {
        // The recipient id is taken from the payload as-is; directed emit
        // matches on it.
        ClientEvent::Message(msg) => Some(ServerEvent::MessageResponse(MessageResponse {
            username: sender_display_name.to_string(),
            message: msg.message,
            socket_id: msg.socket_id,
        })),
    }
}
