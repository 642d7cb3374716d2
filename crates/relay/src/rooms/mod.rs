// Room-scoped presence broadcast.
//
// Each room keeps the latest raw presence per connection and fans every
// change out over a tokio broadcast channel. Presence is stored untyped;
// readers parse it leniently so a malformed snapshot only hides that peer.

use quizpulse_common::presence::{ConnectionId, Peer};
use quizpulse_common::protocol::ws::{PeerFrame, WsMessage};
use quizpulse_common::room::RoomId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::DEFAULT_ROOM_CHANNEL_CAPACITY;

/// A frame published to a room, tagged with the connection that caused it
/// so the publisher can skip its own echo.
#[derive(Debug, Clone, PartialEq)]
pub struct RoomBroadcast {
    pub origin: ConnectionId,
    pub message: WsMessage,
}

/// Result of joining a room: the caller's connection id, a subscription
/// that starts right after the join, and every other peer at join time.
#[derive(Debug)]
pub struct RoomMembership {
    pub connection_id: ConnectionId,
    pub receiver: broadcast::Receiver<RoomBroadcast>,
    pub peers: Vec<PeerFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("room `{0}` has no live connections")]
    UnknownRoom(RoomId),
    #[error("connection {connection_id} is not in room `{room_id}`")]
    NotAMember { room_id: RoomId, connection_id: ConnectionId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub connection_count: usize,
}

/// Subscribe/publish capability keyed by room. The WebSocket layer and the
/// admin views only see this trait.
pub trait RoomChannel: Send + Sync {
    /// Enter a room, creating it on first use, and announce the new peer.
    fn join(&self, room_id: &RoomId, presence: Option<serde_json::Value>) -> RoomMembership;

    /// Replace a connection's presence and broadcast it.
    fn publish(
        &self,
        room_id: &RoomId,
        connection_id: ConnectionId,
        presence: serde_json::Value,
    ) -> Result<(), RoomError>;

    /// Remove a connection. Returns false when it was not in the room.
    fn leave(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool;

    /// Observe a live room without becoming a peer.
    fn subscribe(&self, room_id: &RoomId) -> Option<broadcast::Receiver<RoomBroadcast>>;

    /// Raw peer snapshot, in join order.
    fn peer_frames(&self, room_id: &RoomId) -> Vec<PeerFrame>;

    fn rooms(&self) -> Vec<RoomInfo>;

    /// Typed peer snapshot; malformed presence degrades to `None`.
    fn peers(&self, room_id: &RoomId) -> Vec<Peer> {
        self.peer_frames(room_id).iter().map(PeerFrame::to_peer).collect()
    }
}

#[derive(Debug)]
struct RoomState {
    sender: broadcast::Sender<RoomBroadcast>,
    peers: Vec<PeerFrame>,
}

/// In-process [`RoomChannel`].
#[derive(Debug)]
pub struct RoomHub {
    rooms: Mutex<HashMap<RoomId, RoomState>>,
    next_connection_id: AtomicU64,
    channel_capacity: usize,
}

impl Default for RoomHub {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CHANNEL_CAPACITY)
    }
}

impl RoomHub {
    pub fn new(channel_capacity: usize) -> Self {
        Self {
            rooms: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            channel_capacity: channel_capacity.max(1),
        }
    }

    pub fn connection_count(&self) -> usize {
        self.lock().values().map(|room| room.peers.len()).sum()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<RoomId, RoomState>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate_connection_id(&self) -> ConnectionId {
        ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed))
    }
}

impl RoomChannel for RoomHub {
    fn join(&self, room_id: &RoomId, presence: Option<serde_json::Value>) -> RoomMembership {
        let connection_id = self.allocate_connection_id();
        let mut guard = self.lock();
        let room = guard.entry(room_id.clone()).or_insert_with(|| RoomState {
            sender: broadcast::channel(self.channel_capacity).0,
            peers: Vec::new(),
        });

        let receiver = room.sender.subscribe();
        let peers = room.peers.clone();
        let frame = PeerFrame { connection_id, presence };
        room.peers.push(frame.clone());

        // No receivers is fine: the joiner itself holds one.
        let _ = room.sender.send(RoomBroadcast {
            origin: connection_id,
            message: WsMessage::PeerJoined { room_id: room_id.clone(), peer: frame },
        });
        debug!(room_id = %room_id, connection_id = %connection_id, "connection joined room");

        RoomMembership { connection_id, receiver, peers }
    }

    fn publish(
        &self,
        room_id: &RoomId,
        connection_id: ConnectionId,
        presence: serde_json::Value,
    ) -> Result<(), RoomError> {
        let mut guard = self.lock();
        let room = guard.get_mut(room_id).ok_or_else(|| RoomError::UnknownRoom(room_id.clone()))?;
        let frame = room
            .peers
            .iter_mut()
            .find(|peer| peer.connection_id == connection_id)
            .ok_or_else(|| RoomError::NotAMember { room_id: room_id.clone(), connection_id })?;

        frame.presence = Some(presence);
        let peer = frame.clone();
        let _ = room.sender.send(RoomBroadcast {
            origin: connection_id,
            message: WsMessage::PeerUpdated { room_id: room_id.clone(), peer },
        });
        Ok(())
    }

    fn leave(&self, room_id: &RoomId, connection_id: ConnectionId) -> bool {
        let mut guard = self.lock();
        let Some(room) = guard.get_mut(room_id) else {
            return false;
        };

        let before = room.peers.len();
        room.peers.retain(|peer| peer.connection_id != connection_id);
        if room.peers.len() == before {
            return false;
        }

        if room.peers.is_empty() {
            guard.remove(room_id);
            debug!(room_id = %room_id, "room closed after last connection left");
        } else {
            let _ = room.sender.send(RoomBroadcast {
                origin: connection_id,
                message: WsMessage::PeerLeft { room_id: room_id.clone(), connection_id },
            });
        }
        true
    }

    fn subscribe(&self, room_id: &RoomId) -> Option<broadcast::Receiver<RoomBroadcast>> {
        self.lock().get(room_id).map(|room| room.sender.subscribe())
    }

    fn peer_frames(&self, room_id: &RoomId) -> Vec<PeerFrame> {
        self.lock().get(room_id).map(|room| room.peers.clone()).unwrap_or_default()
    }

    fn rooms(&self) -> Vec<RoomInfo> {
        let mut rooms: Vec<RoomInfo> = self
            .lock()
            .iter()
            .map(|(room_id, room)| RoomInfo {
                room_id: room_id.clone(),
                connection_count: room.peers.len(),
            })
            .collect();
        rooms.sort_by(|a, b| a.room_id.cmp(&b.room_id));
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quizpulse_common::presence::Presence;
    use serde_json::json;

    fn quiz_room() -> RoomId {
        RoomId::quiz_attempt("42").expect("valid room")
    }

    fn alice() -> serde_json::Value {
        json!({
            "currentPage": "/quizzes/42",
            "isActive": true,
            "lastActiveAt": "2026-03-14T09:00:00.000Z",
            "userId": "u-alice",
            "username": "alice",
            "currentAction": {
                "type": "attempting_quiz",
                "resourceId": "42",
                "startedAt": "2026-03-14T09:00:00.000Z"
            }
        })
    }

    fn bob() -> serde_json::Value {
        json!({
            "currentPage": "/quizzes/42",
            "isActive": false,
            "lastActiveAt": "2026-03-14T08:50:00.000Z",
            "userId": "u-bob",
            "username": "bob"
        })
    }

    // ── join / snapshot ────────────────────────────────────────────

    #[test]
    fn join_returns_existing_peers_and_unique_ids() {
        let hub = RoomHub::default();
        let first = hub.join(&quiz_room(), Some(alice()));
        let second = hub.join(&quiz_room(), Some(bob()));

        assert_ne!(first.connection_id, second.connection_id);
        assert!(first.peers.is_empty());
        assert_eq!(second.peers.len(), 1);
        assert_eq!(second.peers[0].connection_id, first.connection_id);
    }

    #[test]
    fn connection_ids_are_unique_across_rooms() {
        let hub = RoomHub::default();
        let a = hub.join(&quiz_room(), None);
        let b = hub.join(&RoomId::admin_dashboard(), None);
        assert_ne!(a.connection_id, b.connection_id);
    }

    #[tokio::test]
    async fn existing_members_see_join_broadcast() {
        let hub = RoomHub::default();
        let mut first = hub.join(&quiz_room(), Some(alice()));
        // The joiner's own announcement is first in its own queue.
        let own = first.receiver.recv().await.expect("own join");
        assert_eq!(own.origin, first.connection_id);

        let second = hub.join(&quiz_room(), Some(bob()));
        let event = first.receiver.recv().await.expect("join broadcast");
        assert_eq!(event.origin, second.connection_id);
        assert!(matches!(
            event.message,
            WsMessage::PeerJoined { ref peer, .. } if peer.connection_id == second.connection_id
        ));
    }

    // ── publish ────────────────────────────────────────────────────

    #[tokio::test]
    async fn publish_replaces_presence_and_broadcasts() {
        let hub = RoomHub::default();
        let mut watcher = hub.join(&quiz_room(), None);
        let member = hub.join(&quiz_room(), None);
        hub.publish(&quiz_room(), member.connection_id, alice()).expect("publish");

        let peers = hub.peers(&quiz_room());
        assert_eq!(peers.len(), 2);
        assert!(peers[0].presence.is_none());
        assert_eq!(peers[1].presence.as_ref().map(|p| p.username.as_str()), Some("alice"));

        let mut saw_update = false;
        while let Ok(event) = watcher.receiver.try_recv() {
            if let WsMessage::PeerUpdated { peer, .. } = event.message {
                assert_eq!(peer.connection_id, member.connection_id);
                saw_update = true;
            }
        }
        assert!(saw_update);
    }

    #[test]
    fn publish_to_unknown_room_or_member_fails() {
        let hub = RoomHub::default();
        let err = hub.publish(&quiz_room(), ConnectionId(99), alice()).expect_err("no room");
        assert_eq!(err, RoomError::UnknownRoom(quiz_room()));

        let _member = hub.join(&quiz_room(), None);
        let err = hub.publish(&quiz_room(), ConnectionId(99), alice()).expect_err("not member");
        assert!(matches!(err, RoomError::NotAMember { .. }));
    }

    #[test]
    fn malformed_presence_is_stored_but_hidden_from_typed_peers() {
        let hub = RoomHub::default();
        let member = hub.join(&quiz_room(), Some(alice()));
        hub.publish(&quiz_room(), member.connection_id, json!({ "currentPage": 7 }))
            .expect("publish");

        let frames = hub.peer_frames(&quiz_room());
        assert_eq!(frames[0].presence, Some(json!({ "currentPage": 7 })));
        assert!(hub.peers(&quiz_room())[0].presence.is_none());
    }

    // ── leave ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn leave_broadcasts_and_last_leave_closes_room() {
        let hub = RoomHub::default();
        let mut first = hub.join(&quiz_room(), Some(alice()));
        let second = hub.join(&quiz_room(), Some(bob()));

        assert!(hub.leave(&quiz_room(), second.connection_id));
        let mut saw_left = false;
        while let Ok(event) = first.receiver.try_recv() {
            if let WsMessage::PeerLeft { connection_id, .. } = event.message {
                assert_eq!(connection_id, second.connection_id);
                saw_left = true;
            }
        }
        assert!(saw_left);

        assert!(hub.leave(&quiz_room(), first.connection_id));
        assert!(hub.rooms().is_empty());
        assert!(hub.peer_frames(&quiz_room()).is_empty());
    }

    #[test]
    fn leave_twice_is_false() {
        let hub = RoomHub::default();
        let member = hub.join(&quiz_room(), None);
        let _other = hub.join(&quiz_room(), None);
        assert!(hub.leave(&quiz_room(), member.connection_id));
        assert!(!hub.leave(&quiz_room(), member.connection_id));
        assert!(!hub.leave(&RoomId::admin_dashboard(), member.connection_id));
    }

    // ── subscribe ──────────────────────────────────────────────────

    #[tokio::test]
    async fn subscriber_observes_without_joining() {
        let hub = RoomHub::default();
        assert!(hub.subscribe(&quiz_room()).is_none());

        let member = hub.join(&quiz_room(), None);
        let mut observer = hub.subscribe(&quiz_room()).expect("live room");
        hub.publish(&quiz_room(), member.connection_id, bob()).expect("publish");

        let event = observer.recv().await.expect("update");
        assert!(matches!(event.message, WsMessage::PeerUpdated { .. }));
        assert_eq!(hub.peer_frames(&quiz_room()).len(), 1);
    }

    // ── listing ────────────────────────────────────────────────────

    #[test]
    fn rooms_are_listed_sorted_with_counts() {
        let hub = RoomHub::default();
        hub.join(&quiz_room(), None);
        hub.join(&quiz_room(), None);
        hub.join(&RoomId::admin_dashboard(), None);

        let rooms = hub.rooms();
        assert_eq!(rooms.len(), 2);
        assert_eq!(rooms[0].room_id, RoomId::admin_dashboard());
        assert_eq!(rooms[0].connection_count, 1);
        assert_eq!(rooms[1].connection_count, 2);
        assert_eq!(hub.connection_count(), 3);
    }

    #[test]
    fn typed_peers_round_trip_presence() {
        let hub = RoomHub::default();
        let presence = Presence::from_json(&alice()).expect("valid presence");
        hub.join(&quiz_room(), Some(presence.to_json()));
        assert_eq!(hub.peers(&quiz_room())[0].presence.as_ref(), Some(&presence));
    }
}
