//! Relay Hub - connection registry and event routing for a chat relay
//!
//! This crate owns the authoritative set of live connections and the rules
//! for delivering events to them. It has no HTTP or WebSocket dependencies:
//! transports hand it [`Connection`] records and drain the matching
//! [`OutboundQueue`].
//!
//! # Example
//!
//! ```no_run
//! use relay_hub::{Connection, Hub, HubConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let hub = Hub::spawn(HubConfig::default());
//!
//!     let (conn, mut outbound) = Connection::new("alice", 256);
//!     hub.register(conn).await.unwrap();
//!
//!     // The first event on alice's queue is the join announcement.
//!     while let Some(event) = outbound.recv().await {
//!         println!("{}", event.to_json().unwrap());
//!     }
//! }
//! ```

mod connection;
mod error;
mod hub;
pub mod protocol;
pub mod router;

pub use connection::{Connection, OutboundQueue};
pub use error::{HubError, ProtocolError};
pub use hub::{
    DEFAULT_INBOX_CAPACITY, Hub, HubCommand, HubConfig, HubHandle, HubStats, HubStatsSnapshot,
};
pub use protocol::{
    ChatMessage, ClientEvent, ConnectionId, Member, MessageResponse, ServerEvent, encode_batch,
};
pub use router::route;
