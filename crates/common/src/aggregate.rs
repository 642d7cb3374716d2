// Local peer set for one room subscription.

use crate::presence::{ConnectionId, Peer, Presence};
use crate::views::{self, ActivitySummary, QuizActivity, UsersByPage};

/// A change to a room's peer set, as delivered by the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomEvent {
    /// Full snapshot; replaces everything known so far.
    Reset(Vec<Peer>),
    Joined(Peer),
    /// Full-replacement presence for one connection.
    Updated(Peer),
    Left(ConnectionId),
}

/// Keeps the latest snapshot per connection, in arrival order, and
/// computes the derived views on read.
///
/// Owned by the single task that consumes a room subscription, so it holds
/// no locks.
#[derive(Debug, Clone, Default)]
pub struct PresenceAggregator {
    peers: Vec<Peer>,
}

impl PresenceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_peers(peers: Vec<Peer>) -> Self {
        let mut aggregator = Self::new();
        aggregator.apply(RoomEvent::Reset(peers));
        aggregator
    }

    pub fn apply(&mut self, event: RoomEvent) {
        match event {
            RoomEvent::Reset(peers) => {
                self.peers.clear();
                for peer in peers {
                    self.upsert(peer);
                }
            }
            RoomEvent::Joined(peer) | RoomEvent::Updated(peer) => self.upsert(peer),
            RoomEvent::Left(connection_id) => {
                self.peers.retain(|peer| peer.connection_id != connection_id);
            }
        }
    }

    pub fn apply_all(&mut self, events: impl IntoIterator<Item = RoomEvent>) {
        for event in events {
            self.apply(event);
        }
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn presence_of(&self, connection_id: ConnectionId) -> Option<&Presence> {
        self.peers
            .iter()
            .find(|peer| peer.connection_id == connection_id)
            .and_then(|peer| peer.presence.as_ref())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    pub fn active_users(&self) -> Vec<Presence> {
        views::active_users(&self.peers)
    }

    pub fn users_by_page(&self) -> UsersByPage {
        views::users_by_page(&self.peers)
    }

    pub fn quiz_activity(&self) -> Vec<QuizActivity> {
        views::quiz_activity(&self.peers)
    }

    pub fn summary(&self) -> ActivitySummary {
        views::summarize(&self.peers)
    }

    fn upsert(&mut self, peer: Peer) {
        match self.peers.iter_mut().find(|known| known.connection_id == peer.connection_id) {
            Some(known) => known.presence = peer.presence,
            None => self.peers.push(peer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::ActionType;
    use chrono::{TimeZone, Utc};

    fn presence(user: &str, page: &str) -> Presence {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).single().expect("valid timestamp");
        Presence::new(format!("u-{user}"), user, page, now)
    }

    fn joined(id: u64, presence: Option<Presence>) -> RoomEvent {
        RoomEvent::Joined(Peer::new(ConnectionId(id), presence))
    }

    #[test]
    fn join_update_leave_lifecycle() {
        let mut aggregator = PresenceAggregator::new();
        aggregator.apply(joined(1, Some(presence("alice", "/"))));
        aggregator.apply(joined(2, None));
        assert_eq!(aggregator.len(), 2);
        assert_eq!(aggregator.active_users().len(), 1);

        aggregator.apply(RoomEvent::Updated(Peer::new(
            ConnectionId(2),
            Some(presence("bob", "/quizzes/3")),
        )));
        assert_eq!(aggregator.active_users().len(), 2);
        assert_eq!(
            aggregator.presence_of(ConnectionId(2)).map(|p| p.current_page.as_str()),
            Some("/quizzes/3")
        );

        aggregator.apply(RoomEvent::Left(ConnectionId(1)));
        assert_eq!(aggregator.len(), 1);
        assert!(aggregator.users_by_page().get("/").is_none());
    }

    #[test]
    fn duplicate_join_replaces_in_place() {
        let mut aggregator = PresenceAggregator::new();
        aggregator.apply(joined(1, Some(presence("alice", "/a"))));
        aggregator.apply(joined(2, Some(presence("bob", "/b"))));
        aggregator.apply(joined(1, Some(presence("alice", "/c"))));

        let order: Vec<u64> = aggregator.peers().iter().map(|p| p.connection_id.0).collect();
        assert_eq!(order, vec![1, 2]);
        assert_eq!(aggregator.users_by_page().pages().collect::<Vec<_>>(), vec!["/c", "/b"]);
    }

    #[test]
    fn update_for_unknown_connection_appends() {
        let mut aggregator = PresenceAggregator::new();
        aggregator
            .apply(RoomEvent::Updated(Peer::new(ConnectionId(9), Some(presence("eve", "/")))));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn update_to_no_presence_hides_peer_from_views() {
        let mut aggregator = PresenceAggregator::new();
        aggregator.apply(joined(1, Some(presence("alice", "/"))));
        aggregator.apply(RoomEvent::Updated(Peer::new(ConnectionId(1), None)));
        assert_eq!(aggregator.len(), 1);
        assert!(aggregator.active_users().is_empty());
        assert!(aggregator.users_by_page().is_empty());
    }

    #[test]
    fn reset_replaces_everything_and_dedupes() {
        let mut aggregator = PresenceAggregator::new();
        aggregator.apply(joined(1, Some(presence("alice", "/"))));
        aggregator.apply(RoomEvent::Reset(vec![
            Peer::new(ConnectionId(7), Some(presence("gus", "/x"))),
            Peer::new(ConnectionId(8), None),
            Peer::new(ConnectionId(7), Some(presence("gus", "/y"))),
        ]));

        assert_eq!(aggregator.len(), 2);
        assert!(aggregator.presence_of(ConnectionId(1)).is_none());
        assert_eq!(
            aggregator.presence_of(ConnectionId(7)).map(|p| p.current_page.as_str()),
            Some("/y")
        );
    }

    #[test]
    fn leave_for_unknown_connection_is_ignored() {
        let mut aggregator = PresenceAggregator::from_peers(vec![Peer::new(
            ConnectionId(1),
            Some(presence("alice", "/")),
        )]);
        aggregator.apply(RoomEvent::Left(ConnectionId(42)));
        assert_eq!(aggregator.len(), 1);
    }

    #[test]
    fn summary_tracks_quiz_transitions() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 9, 10, 0).single().expect("valid timestamp");
        let start = presence("alice", "/quizzes/5");
        let attempting = start.begin_action(ActionType::AttemptingQuiz, Some("5".into()), now);
        let done = attempting.begin_action(ActionType::CompletedQuiz, Some("5".into()), now);

        let mut aggregator = PresenceAggregator::new();
        aggregator.apply_all([
            joined(1, Some(start)),
            RoomEvent::Updated(Peer::new(ConnectionId(1), Some(attempting))),
        ]);
        assert_eq!(aggregator.quiz_activity()[0].action.action_type, ActionType::AttemptingQuiz);

        aggregator.apply(RoomEvent::Updated(Peer::new(ConnectionId(1), Some(done))));
        let summary = aggregator.summary();
        assert_eq!(summary.quiz_activity.len(), 1);
        assert_eq!(summary.quiz_activity[0].action.action_type, ActionType::CompletedQuiz);
    }

    #[test]
    fn reading_views_twice_is_stable() {
        let aggregator = PresenceAggregator::from_peers(vec![
            Peer::new(ConnectionId(1), Some(presence("alice", "/a"))),
            Peer::new(ConnectionId(2), Some(presence("bob", "/a"))),
        ]);
        assert_eq!(aggregator.summary(), aggregator.summary());
    }
}
