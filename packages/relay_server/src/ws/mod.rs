//! WebSocket transport
//!
//! Each upgraded socket gets a pump pair:
//! - the reader decodes inbound frames, routes them and watches the pong deadline
//! - the writer drains the connection's outbound queue and sends keepalive pings
//!
//! The hub only ever sees the connection record; the socket halves stay here.

mod reader;
mod session;
mod writer;

pub use reader::ReaderExit;
pub use session::{SocketContext, serve_socket};
pub use writer::WriterExit;
