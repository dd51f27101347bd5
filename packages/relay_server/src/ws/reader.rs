use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures::StreamExt;
use futures::stream::SplitStream;
use relay_hub::{ClientEvent, ConnectionId, ProtocolError, ServerEvent, route};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::SocketContext;

/// Why the inbound pump stopped.
#[derive(Debug, thiserror::Error)]
pub enum ReaderExit {
    #[error("peer sent close (code {code:?})")]
    PeerClosed { code: Option<u16> },
    #[error("stream ended")]
    StreamEnded,
    #[error("no pong within the liveness window")]
    LivenessTimeout,
    #[error("writer stopped")]
    WriterStopped,
    #[error("hub is closed")]
    HubClosed,
    #[error("transport error: {0}")]
    Transport(#[source] axum::Error),
    #[error("undecodable frame: {0}")]
    Decode(#[from] ProtocolError),
}

impl ReaderExit {
    /// Ordinary ways for a peer to leave; these are not worth a warning.
    pub fn is_expected(&self) -> bool {
        match self {
            ReaderExit::PeerClosed { code } => matches!(
                code,
                None | Some(close_code::NORMAL) | Some(close_code::AWAY) | Some(close_code::ABNORMAL)
            ),
            ReaderExit::StreamEnded | ReaderExit::WriterStopped => true,
            _ => false,
        }
    }
}

/// Inbound pump. Runs until the peer leaves, misbehaves, goes quiet past the
/// pong deadline, or the writer half stops.
pub(super) async fn run_reader(
    mut receiver: SplitStream<WebSocket>,
    conn_id: &ConnectionId,
    display_name: &str,
    ctx: &SocketContext,
    writer_stopped: CancellationToken,
) -> ReaderExit {
    let pong_wait = ctx.config.pong_wait;
    let mut deadline = Instant::now() + pong_wait;

    loop {
        let next = tokio::select! {
            _ = writer_stopped.cancelled() => return ReaderExit::WriterStopped,
            next = tokio::time::timeout_at(deadline, receiver.next()) => next,
        };

        let msg = match next {
            Err(_) => return ReaderExit::LivenessTimeout,
            Ok(None) => return ReaderExit::StreamEnded,
            Ok(Some(Err(e))) => return ReaderExit::Transport(e),
            Ok(Some(Ok(msg))) => msg,
        };

        let decoded = match msg {
            Message::Text(text) => ClientEvent::decode(text.as_str().as_bytes()),
            Message::Binary(data) => ClientEvent::decode(&data),
            Message::Pong(_) => {
                trace!(conn_id = %conn_id, "Pong received, extending deadline");
                deadline = Instant::now() + pong_wait;
                continue;
            }
            // Answered by the socket itself
            Message::Ping(_) => continue,
            Message::Close(frame) => {
                return ReaderExit::PeerClosed {
                    code: frame.map(|CloseFrame { code, .. }| code),
                };
            }
        };

        ctx.metrics.frame_received();

        let event = match decoded {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(conn_id = %conn_id, "Ignoring frame with unknown event name");
                continue;
            }
            Err(e) => {
                ctx.metrics.decode_error();
                return ReaderExit::Decode(e);
            }
        };

        debug!(conn_id = %conn_id, event = event.event_name(), "Inbound event");

        let Some(outbound) = route(display_name, event) else {
            continue;
        };
        if deliver(ctx, outbound).await.is_err() {
            return ReaderExit::HubClosed;
        }
    }
}

async fn deliver(ctx: &SocketContext, event: ServerEvent) -> Result<(), relay_hub::HubError> {
    if event.recipient().is_some() {
        ctx.hub.emit(event).await
    } else {
        // Only reachable once `route` produces an event without a recipient
        ctx.hub.broadcast(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expected_exits() {
        assert!(ReaderExit::StreamEnded.is_expected());
        assert!(ReaderExit::WriterStopped.is_expected());
        assert!(ReaderExit::PeerClosed { code: None }.is_expected());
        assert!(
            ReaderExit::PeerClosed {
                code: Some(close_code::AWAY)
            }
            .is_expected()
        );
        assert!(
            ReaderExit::PeerClosed {
                code: Some(close_code::ABNORMAL)
            }
            .is_expected()
        );
    }

    fn test_context() -> SocketContext {
        SocketContext {
            hub: relay_hub::Hub::spawn(relay_hub::HubConfig::default()),
            config: std::sync::Arc::new(crate::config::ConnectionConfig::default()),
            metrics: std::sync::Arc::new(crate::metrics::ServerMetrics::new()),
        }
    }

    #[tokio::test]
    async fn test_deliver_without_recipient_broadcasts() {
        let ctx = test_context();
        let (alice, mut alice_rx) = relay_hub::Connection::new("alice", 4);
        ctx.hub.register(alice).await.unwrap();
        assert!(matches!(alice_rx.recv().await, Some(ServerEvent::Join(_))));

        deliver(&ctx, ServerEvent::Join(Vec::new())).await.unwrap();
        assert_eq!(alice_rx.recv().await, Some(ServerEvent::Join(Vec::new())));

        // Round-trip so the hub has finished counting
        ctx.hub.members().await.unwrap();
        let stats = ctx.hub.stats();
        assert_eq!(stats.broadcasts, 2);
        assert_eq!(stats.directed_delivered, 0);
    }

    #[tokio::test]
    async fn test_deliver_with_recipient_is_directed() {
        let ctx = test_context();
        let (alice, mut alice_rx) = relay_hub::Connection::new("alice", 4);
        let alice_id = alice.id().to_string();
        ctx.hub.register(alice).await.unwrap();
        alice_rx.recv().await.unwrap();

        let event = route(
            "bob",
            ClientEvent::Message(relay_hub::ChatMessage {
                message: "hi".to_string(),
                socket_id: alice_id.clone(),
            }),
        )
        .unwrap();
        deliver(&ctx, event).await.unwrap();

        match alice_rx.recv().await {
            Some(ServerEvent::MessageResponse(response)) => {
                assert_eq!(response.username, "bob");
                assert_eq!(response.socket_id, alice_id);
            }
            other => panic!("expected message response, got {:?}", other),
        }
        // Round-trip so the hub has finished counting
        ctx.hub.members().await.unwrap();
        let stats = ctx.hub.stats();
        assert_eq!(stats.broadcasts, 1);
        assert_eq!(stats.directed_delivered, 1);
    }

    #[test]
    fn test_unexpected_exits() {
        assert!(!ReaderExit::LivenessTimeout.is_expected());
        assert!(!ReaderExit::HubClosed.is_expected());
        assert!(
            !ReaderExit::PeerClosed {
                code: Some(close_code::PROTOCOL)
            }
            .is_expected()
        );

        let err = ClientEvent::decode(b"nope").unwrap_err();
        let exit = ReaderExit::from(err);
        assert!(!exit.is_expected());
        assert!(exit.to_string().starts_with("undecodable frame"));
    }
}
