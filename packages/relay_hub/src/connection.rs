use tokio::sync::mpsc;

use crate::protocol::{ConnectionId, Member, ServerEvent};

/// Receiving end of a connection's outbound queue, drained by its writer.
pub type OutboundQueue = mpsc::Receiver<ServerEvent>;

/// One live client as seen by the hub.
///
/// The record owns the only sender of its outbound queue, so once the hub
/// drops the record the queue closes: the writer drains what is still
/// buffered and then sees the end of the queue.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    display_name: String,
    outbound: mpsc::Sender<ServerEvent>,
}

impl Connection {
    /// Create a record with a fresh identifier and a bounded outbound queue.
    pub fn new(display_name: impl Into<String>, outbound_capacity: usize) -> (Self, OutboundQueue) {
        Self::with_id(ConnectionId::generate(), display_name, outbound_capacity)
    }

    pub(crate) fn with_id(
        id: ConnectionId,
        display_name: impl Into<String>,
        outbound_capacity: usize,
    ) -> (Self, OutboundQueue) {
        let (outbound, rx) = mpsc::channel(outbound_capacity.max(1));
        let conn = Self {
            id,
            display_name: display_name.into(),
            outbound,
        };
        (conn, rx)
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub(crate) fn member(&self) -> Member {
        Member {
            username: self.display_name.clone(),
            socket_id: self.id.to_string(),
        }
    }

    /// Non-blocking enqueue; fails if the queue is full or its writer is gone.
    pub(crate) fn try_enqueue(
        &self,
        event: ServerEvent,
    ) -> Result<(), mpsc::error::TrySendError<ServerEvent>> {
        self.outbound.try_send(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection() {
        let (conn, _rx) = Connection::new("alice", 4);
        assert_eq!(conn.display_name(), "alice");
        assert!(!conn.id().as_str().is_empty());

        let member = conn.member();
        assert_eq!(member.username, "alice");
        assert_eq!(member.socket_id, conn.id().as_str());
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let (conn, mut rx) = Connection::new("alice", 0);
        conn.try_enqueue(ServerEvent::Join(Vec::new())).unwrap();
        assert!(conn.try_enqueue(ServerEvent::Join(Vec::new())).is_err());
        assert_eq!(rx.try_recv().unwrap(), ServerEvent::Join(Vec::new()));
    }

    #[tokio::test]
    async fn test_dropping_record_closes_queue_after_drain() {
        let (conn, mut rx) = Connection::new("alice", 4);
        conn.try_enqueue(ServerEvent::Join(Vec::new())).unwrap();
        drop(conn);

        assert_eq!(rx.recv().await, Some(ServerEvent::Join(Vec::new())));
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn test_enqueue_fails_when_writer_gone() {
        let (conn, rx) = Connection::new("alice", 4);
        drop(rx);
        assert!(matches!(
            conn.try_enqueue(ServerEvent::Join(Vec::new())),
            Err(mpsc::error::TrySendError::Closed(_))
        ));
    }
}
