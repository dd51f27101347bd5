//! Connection Registry
//!
//! A single coordinating task owns the set of live connections. Every
//! mutation and every delivery is a [`HubCommand`] sent to that task and
//! applied one at a time, in arrival order. Nothing else ever touches the set.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::HubError;
use crate::protocol::{ConnectionId, Member, ServerEvent};

/// Default capacity of the hub inbox
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

#[derive(Clone, Debug)]
pub struct HubConfig {
    /// Operations buffered before submitters start waiting
    pub inbox_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
        }
    }
}

/// Operations accepted by the hub
#[derive(Debug)]
pub enum HubCommand {
    Register {
        connection: Connection,
    },
    Unregister {
        id: ConnectionId,
    },
    Broadcast {
        event: ServerEvent,
    },
    /// Deliver to the connection named by [`ServerEvent::recipient`]
    Emit {
        event: ServerEvent,
    },
    Members {
        respond_to: oneshot::Sender<Vec<Member>>,
    },
}

/// Counters maintained by the hub task
#[derive(Debug, Default)]
pub struct HubStats {
    pub registered: AtomicU64,
    pub unregistered: AtomicU64,
    pub broadcasts: AtomicU64,
    /// Directed emits that reached their recipient's queue
    pub directed_delivered: AtomicU64,
    /// Directed emits whose recipient was not connected
    pub directed_unmatched: AtomicU64,
    /// Connections dropped because their queue was full or closed
    pub evicted: AtomicU64,
}

impl HubStats {
    pub fn snapshot(&self) -> HubStatsSnapshot {
        HubStatsSnapshot {
            registered: self.registered.load(Ordering::Relaxed),
            unregistered: self.unregistered.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            directed_delivered: self.directed_delivered.load(Ordering::Relaxed),
            directed_unmatched: self.directed_unmatched.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
        }
    }

    fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HubStatsSnapshot {
    pub registered: u64,
    pub unregistered: u64,
    pub broadcasts: u64,
    pub directed_delivered: u64,
    pub directed_unmatched: u64,
    pub evicted: u64,
}

/// Handle to communicate with the hub task
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
    stats: Arc<HubStats>,
}

impl HubHandle {
    /// Add a connection and broadcast `join` with the new membership list.
    pub async fn register(&self, connection: Connection) -> Result<(), HubError> {
        self.send(HubCommand::Register { connection }).await
    }

    /// Remove a connection, close its queue and broadcast `disconnect`.
    /// Unknown or already removed ids are ignored.
    pub async fn unregister(&self, id: ConnectionId) -> Result<(), HubError> {
        self.send(HubCommand::Unregister { id }).await
    }

    pub async fn broadcast(&self, event: ServerEvent) -> Result<(), HubError> {
        self.send(HubCommand::Broadcast { event }).await
    }

    /// Directed emit; silently dropped when no live connection matches.
    pub async fn emit(&self, event: ServerEvent) -> Result<(), HubError> {
        self.send(HubCommand::Emit { event }).await
    }

    /// Current membership list. Answered after every operation submitted
    /// earlier through this handle has been applied.
    pub async fn members(&self) -> Result<Vec<Member>, HubError> {
        let (tx, rx) = oneshot::channel();
        self.send(HubCommand::Members { respond_to: tx }).await?;
        rx.await.map_err(|_| HubError::Closed)
    }

    pub fn stats(&self) -> HubStatsSnapshot {
        self.stats.snapshot()
    }

    async fn send(&self, cmd: HubCommand) -> Result<(), HubError> {
        self.sender.send(cmd).await.map_err(|_| HubError::Closed)
    }
}

/// The hub task state
pub struct Hub {
    connections: HashMap<ConnectionId, Connection>,
    receiver: mpsc::Receiver<HubCommand>,
    stats: Arc<HubStats>,
}

impl Hub {
    /// Spawn the hub task and return its handle. The task runs until every
    /// handle has been dropped.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (sender, receiver) = mpsc::channel(config.inbox_capacity.max(1));
        let stats = Arc::new(HubStats::default());

        let hub = Hub {
            connections: HashMap::new(),
            receiver,
            stats: stats.clone(),
        };

        tokio::spawn(async move {
            hub.run().await;
        });

        HubHandle { sender, stats }
    }

    async fn run(mut self) {
        debug!("Hub started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                HubCommand::Register { connection } => self.register(connection),
                HubCommand::Unregister { id } => self.unregister(&id),
                HubCommand::Broadcast { event } => self.broadcast(event),
                HubCommand::Emit { event } => self.emit(event),
                HubCommand::Members { respond_to } => {
                    let _ = respond_to.send(self.members());
                }
            }
        }

        debug!(
            remaining = self.connections.len(),
            "Hub stopped, all handles dropped"
        );
    }

    fn register(&mut self, connection: Connection) {
        if self.connections.contains_key(connection.id()) {
            // Dropping the duplicate closes its queue; the live record stays.
            warn!(
                conn_id = %connection.id(),
                username = %connection.display_name(),
                "Rejecting duplicate registration"
            );
            return;
        }

        info!(
            conn_id = %connection.id(),
            username = %connection.display_name(),
            "Connection registered"
        );
        self.connections.insert(connection.id().clone(), connection);
        HubStats::incr(&self.stats.registered);

        let event = ServerEvent::Join(self.members());
        self.broadcast(event);
    }

    fn unregister(&mut self, id: &ConnectionId) {
        let Some(connection) = self.connections.remove(id) else {
            debug!(conn_id = %id, "Unregister for unknown connection ignored");
            return;
        };

        info!(
            conn_id = %id,
            username = %connection.display_name(),
            "Connection unregistered"
        );
        drop(connection);
        HubStats::incr(&self.stats.unregistered);

        let event = ServerEvent::Disconnect(self.members());
        self.broadcast(event);
    }

    fn broadcast(&mut self, event: ServerEvent) {
        HubStats::incr(&self.stats.broadcasts);
        let (_, evicted) = self.deliver(&event, None);
        self.announce_evictions(evicted);
    }

    fn emit(&mut self, event: ServerEvent) {
        let Some(target) = event.recipient().map(str::to_owned) else {
            debug!(event = event.event_name(), "Event has no recipient, dropping");
            HubStats::incr(&self.stats.directed_unmatched);
            return;
        };

        let (delivered, evicted) = self.deliver(&event, Some(&target));
        if delivered == 0 && evicted == 0 {
            debug!(recipient = %target, "No connection matches recipient, dropping");
            HubStats::incr(&self.stats.directed_unmatched);
        }
        self.stats
            .directed_delivered
            .fetch_add(delivered as u64, Ordering::Relaxed);

        self.announce_evictions(evicted);
    }

    /// Enqueue `event` on every matching connection without waiting.
    /// Connections whose queue is full or closed are removed on the spot.
    /// Returns (delivered, evicted).
    fn deliver(&mut self, event: &ServerEvent, target: Option<&str>) -> (usize, usize) {
        let mut delivered = 0;
        let mut evicted = Vec::new();

        for (id, connection) in &self.connections {
            if target.is_some_and(|t| id.as_str() != t) {
                continue;
            }
            match connection.try_enqueue(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        conn_id = %id,
                        username = %connection.display_name(),
                        event = event.event_name(),
                        "Outbound queue full, evicting connection"
                    );
                    evicted.push(id.clone());
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(conn_id = %id, "Outbound queue closed, evicting connection");
                    evicted.push(id.clone());
                }
            }
        }

        for id in &evicted {
            self.connections.remove(id);
            HubStats::incr(&self.stats.evicted);
        }

        (delivered, evicted.len())
    }

    /// Tell the remaining connections about evictions until a pass evicts no one.
    fn announce_evictions(&mut self, mut evicted: usize) {
        while evicted > 0 {
            let event = ServerEvent::Disconnect(self.members());
            HubStats::incr(&self.stats.broadcasts);
            (_, evicted) = self.deliver(&event, None);
        }
    }

    fn members(&self) -> Vec<Member> {
        self.connections.values().map(Connection::member).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundQueue;
    use crate::protocol::MessageResponse;

    fn spawn_hub() -> HubHandle {
        Hub::spawn(HubConfig::default())
    }

    /// Register a connection and wait until the hub has applied it.
    async fn join(hub: &HubHandle, name: &str, capacity: usize) -> (ConnectionId, OutboundQueue) {
        let (conn, rx) = Connection::new(name, capacity);
        let id = conn.id().clone();
        hub.register(conn).await.unwrap();
        hub.members().await.unwrap();
        (id, rx)
    }

    fn drain(rx: &mut OutboundQueue) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn member(name: &str, id: &ConnectionId) -> Member {
        Member {
            username: name.to_string(),
            socket_id: id.to_string(),
        }
    }

    fn sorted(mut members: Vec<Member>) -> Vec<Member> {
        members.sort();
        members
    }

    fn message_to(id: &str, from: &str, text: &str) -> ServerEvent {
        ServerEvent::MessageResponse(MessageResponse {
            username: from.to_string(),
            message: text.to_string(),
            socket_id: id.to_string(),
        })
    }

    #[tokio::test]
    async fn test_register_broadcasts_join_to_everyone() {
        let hub = spawn_hub();

        let (a, mut rx_a) = join(&hub, "alice", 16).await;
        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::Join(vec![member("alice", &a)])]
        );

        let (b, mut rx_b) = join(&hub, "bob", 16).await;
        let expected = sorted(vec![member("alice", &a), member("bob", &b)]);
        for rx in [&mut rx_a, &mut rx_b] {
            match drain(rx).as_slice() {
                [ServerEvent::Join(list)] => assert_eq!(sorted(list.clone()), expected),
                other => panic!("Expected a single join, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_unregister_broadcasts_disconnect_and_closes_queue() {
        let hub = spawn_hub();
        let (a, mut rx_a) = join(&hub, "alice", 16).await;
        let (b, mut rx_b) = join(&hub, "bob", 16).await;
        drain(&mut rx_a);

        hub.unregister(b).await.unwrap();
        hub.members().await.unwrap();

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::Disconnect(vec![member("alice", &a)])]
        );

        // Bob's queue still holds his own join, then closes.
        assert!(matches!(rx_b.recv().await, Some(ServerEvent::Join(_))));
        assert_eq!(rx_b.recv().await, None);
    }

    #[tokio::test]
    async fn test_unregister_twice_is_noop() {
        let hub = spawn_hub();
        let (_a, mut rx_a) = join(&hub, "alice", 16).await;
        let (b, _rx_b) = join(&hub, "bob", 16).await;
        drain(&mut rx_a);

        hub.unregister(b.clone()).await.unwrap();
        hub.unregister(b).await.unwrap();
        hub.members().await.unwrap();

        let events = drain(&mut rx_a);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Disconnect(_)));
        assert_eq!(hub.stats().unregistered, 1);
    }

    #[tokio::test]
    async fn test_unregister_unknown_id_is_noop() {
        let hub = spawn_hub();
        let (_a, mut rx_a) = join(&hub, "alice", 16).await;
        drain(&mut rx_a);

        hub.unregister(ConnectionId::from_static("nobody"))
            .await
            .unwrap();
        assert_eq!(hub.members().await.unwrap().len(), 1);
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_emit_reaches_only_recipient() {
        let hub = spawn_hub();
        let (_a, mut rx_a) = join(&hub, "alice", 16).await;
        let (b, mut rx_b) = join(&hub, "bob", 16).await;
        let (_c, mut rx_c) = join(&hub, "carol", 16).await;
        drain(&mut rx_a);
        drain(&mut rx_b);
        drain(&mut rx_c);

        let event = message_to(b.as_str(), "alice", "hi");
        hub.emit(event.clone()).await.unwrap();
        hub.members().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(drain(&mut rx_b), vec![event]);
        assert!(drain(&mut rx_c).is_empty());
        assert_eq!(hub.stats().directed_delivered, 1);
    }

    #[tokio::test]
    async fn test_emit_to_self() {
        let hub = spawn_hub();
        let (a, mut rx_a) = join(&hub, "alice", 16).await;
        drain(&mut rx_a);

        let event = message_to(a.as_str(), "alice", "note to self");
        hub.emit(event.clone()).await.unwrap();
        hub.members().await.unwrap();

        assert_eq!(drain(&mut rx_a), vec![event]);
    }

    #[tokio::test]
    async fn test_emit_without_match_is_silent() {
        let hub = spawn_hub();
        let (_a, mut rx_a) = join(&hub, "alice", 16).await;
        drain(&mut rx_a);

        hub.emit(message_to("not-connected", "alice", "hello?"))
            .await
            .unwrap();
        hub.emit(ServerEvent::Join(Vec::new())).await.unwrap();
        hub.members().await.unwrap();

        assert!(drain(&mut rx_a).is_empty());
        assert_eq!(hub.stats().directed_unmatched, 2);
        assert_eq!(hub.members().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_full_queue_evicts_and_announces_disconnect() {
        let hub = spawn_hub();
        let (a, mut rx_a) = join(&hub, "alice", 16).await;
        // Bob's single slot is taken by his own join.
        let (b, mut rx_b) = join(&hub, "bob", 1).await;
        drain(&mut rx_a);

        hub.emit(message_to(b.as_str(), "alice", "dropped"))
            .await
            .unwrap();
        let members = hub.members().await.unwrap();
        assert_eq!(members, vec![member("alice", &a)]);

        assert_eq!(
            drain(&mut rx_a),
            vec![ServerEvent::Disconnect(vec![member("alice", &a)])]
        );
        assert!(matches!(rx_b.recv().await, Some(ServerEvent::Join(_))));
        assert_eq!(rx_b.recv().await, None);
        assert_eq!(hub.stats().evicted, 1);

        // The pump noticing later must not produce a second disconnect.
        hub.unregister(b).await.unwrap();
        hub.members().await.unwrap();
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_evicts_connection_whose_writer_is_gone() {
        let hub = spawn_hub();
        let (a, mut rx_a) = join(&hub, "alice", 16).await;
        let (_b, rx_b) = join(&hub, "bob", 16).await;
        drop(rx_b);
        drain(&mut rx_a);

        let event = message_to("x", "system", "hello all");
        hub.broadcast(event.clone()).await.unwrap();
        hub.members().await.unwrap();

        assert_eq!(
            drain(&mut rx_a),
            vec![event, ServerEvent::Disconnect(vec![member("alice", &a)])]
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_rejected() {
        let hub = spawn_hub();
        let id = ConnectionId::from_static("dup");

        let (first, mut rx_first) = Connection::with_id(id.clone(), "alice", 16);
        hub.register(first).await.unwrap();
        let (second, mut rx_second) = Connection::with_id(id.clone(), "mallory", 16);
        hub.register(second).await.unwrap();

        let members = hub.members().await.unwrap();
        assert_eq!(members, vec![member("alice", &id)]);
        assert_eq!(drain(&mut rx_first).len(), 1);
        assert_eq!(rx_second.recv().await, None);
        assert_eq!(hub.stats().registered, 1);
    }

    #[tokio::test]
    async fn test_membership_tracks_register_unregister_sequence() {
        let hub = spawn_hub();
        let mut live: Vec<(ConnectionId, String, OutboundQueue)> = Vec::new();

        for step in 0..12 {
            if step % 3 == 2 {
                let (id, _, _) = live.remove(step % live.len());
                hub.unregister(id).await.unwrap();
            } else {
                let name = format!("user-{}", step);
                let (conn, rx) = Connection::new(name.clone(), 64);
                let id = conn.id().clone();
                hub.register(conn).await.unwrap();
                live.push((id, name, rx));
            }

            let current = sorted(hub.members().await.unwrap());
            let expected = sorted(
                live.iter()
                    .map(|(id, name, _)| member(name, id))
                    .collect(),
            );
            assert_eq!(current, expected);

            // Every live connection's latest membership event matches.
            for (_, _, rx) in live.iter_mut() {
                let last = drain(rx).pop().expect("membership update");
                let list = match last {
                    ServerEvent::Join(list) | ServerEvent::Disconnect(list) => list,
                    other => panic!("Unexpected event {:?}", other),
                };
                assert_eq!(sorted(list), expected);
            }
        }
    }
}
