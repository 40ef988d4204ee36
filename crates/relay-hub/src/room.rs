//! Room registry - one room per user, holding the attached sockets
//!
//! Broadcast is best-effort concurrent fire: each peer gets the payload on
//! its own mpsc sender, deliveries to one peer are never retried, and a
//! slow peer cannot block the others. Per sender→peer ordering comes from
//! the channel itself.

use std::collections::HashMap;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Outbound capacity per attached socket; beyond it, deliveries drop
const PEER_BUFFER: usize = 256;

/// One attached socket
pub struct Peer {
    /// Who this is, for logs: a subject id or a declared service role
    pub label: String,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
struct Room {
    peers: HashMap<Uuid, Peer>,
}

/// All live rooms, keyed by user id
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Attach a peer to a room, returning its id and the receiving end of
    /// its outbound queue.
    pub async fn join(&self, room_id: &str, label: impl Into<String>) -> (Uuid, mpsc::Receiver<String>) {
        let peer_id = Uuid::new_v4();
        let label = label.into();
        let (tx, rx) = mpsc::channel(PEER_BUFFER);

        let mut rooms = self.rooms.write().await;
        let room = rooms.entry(room_id.to_string()).or_default();
        info!(room_id, peer = %label, "Peer joined ({} now attached)", room.peers.len() + 1);
        room.peers.insert(peer_id, Peer { label, tx });

        (peer_id, rx)
    }

    /// Detach a peer; empty rooms are dropped.
    pub async fn leave(&self, room_id: &str, peer_id: Uuid) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(room_id) {
            if let Some(peer) = room.peers.remove(&peer_id) {
                info!(room_id, peer = %peer.label, "Peer left");
            }
            if room.peers.is_empty() {
                rooms.remove(room_id);
                debug!(room_id, "Room closed");
            }
        }
    }

    /// Deliver a payload to every peer in the room except the sender.
    /// Returns how many peers it was handed to.
    pub async fn broadcast(&self, room_id: &str, payload: &str, exclude: Option<Uuid>) -> usize {
        let rooms = self.rooms.read().await;
        let Some(room) = rooms.get(room_id) else {
            return 0;
        };

        let mut delivered = 0;
        for (peer_id, peer) in &room.peers {
            if Some(*peer_id) == exclude {
                continue;
            }
            match peer.tx.try_send(payload.to_string()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    // At-most-once: no retry for a full or closed queue
                    warn!(room_id, peer = %peer.label, "Delivery dropped: {}", e);
                }
            }
        }
        delivered
    }

    pub async fn peer_count(&self, room_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).map(|r| r.peers.len()).unwrap_or(0)
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_and_leave() {
        let registry = RoomRegistry::new();

        let (a, _rx_a) = registry.join("user-1", "browser").await;
        let (_b, _rx_b) = registry.join("user-1", "supervisor").await;
        assert_eq!(registry.peer_count("user-1").await, 2);

        registry.leave("user-1", a).await;
        assert_eq!(registry.peer_count("user-1").await, 1);
    }

    #[tokio::test]
    async fn test_broadcast_excludes_sender() {
        let registry = RoomRegistry::new();

        let (a, mut rx_a) = registry.join("user-1", "a").await;
        let (_b, mut rx_b) = registry.join("user-1", "b").await;
        let (_c, mut rx_c) = registry.join("user-1", "c").await;

        let delivered = registry.broadcast("user-1", "hello", Some(a)).await;
        assert_eq!(delivered, 2);

        assert_eq!(rx_b.recv().await.unwrap(), "hello");
        assert_eq!(rx_c.recv().await.unwrap(), "hello");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room() {
        let registry = RoomRegistry::new();
        assert_eq!(registry.broadcast("nobody-home", "hello", None).await, 0);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let registry = RoomRegistry::new();

        let (_a, mut rx_a) = registry.join("user-1", "a").await;
        let (_b, mut rx_b) = registry.join("user-2", "b").await;

        registry.broadcast("user-1", "for user 1 only", None).await;
        assert_eq!(rx_a.recv().await.unwrap(), "for user 1 only");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_empty_room_is_dropped() {
        let registry = RoomRegistry::new();
        let (a, _rx) = registry.join("user-1", "a").await;
        registry.leave("user-1", a).await;
        assert_eq!(registry.peer_count("user-1").await, 0);
    }

    #[tokio::test]
    async fn test_ordering_per_sender_peer_edge() {
        let registry = RoomRegistry::new();
        let (a, _rx_a) = registry.join("user-1", "a").await;
        let (_b, mut rx_b) = registry.join("user-1", "b").await;

        for i in 0..10 {
            registry
                .broadcast("user-1", &format!("msg-{}", i), Some(a))
                .await;
        }
        for i in 0..10 {
            assert_eq!(rx_b.recv().await.unwrap(), format!("msg-{}", i));
        }
    }
}
