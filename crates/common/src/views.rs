// Derived presence views.
//
// Pure functions over a peer set. Peers without a well-formed presence are
// skipped everywhere; output order follows peer order.

use crate::presence::{CurrentAction, Peer, Presence};
use serde::{Deserialize, Serialize};

/// Presences of every peer that reports itself active.
pub fn active_users(peers: &[Peer]) -> Vec<Presence> {
    present(peers).filter(|presence| presence.is_active).cloned().collect()
}

/// Presences grouped by the page they are on.
pub fn users_by_page(peers: &[Peer]) -> UsersByPage {
    let mut pages: Vec<PageViewers> = Vec::new();
    for presence in present(peers) {
        match pages.iter_mut().find(|group| group.page == presence.current_page) {
            Some(group) => group.users.push(presence.clone()),
            None => pages.push(PageViewers {
                page: presence.current_page.clone(),
                users: vec![presence.clone()],
            }),
        }
    }
    UsersByPage { pages }
}

/// Peers currently attempting or having completed a quiz.
pub fn quiz_activity(peers: &[Peer]) -> Vec<QuizActivity> {
    present(peers)
        .filter_map(|presence| {
            let action = presence.current_action.as_ref()?;
            action.action_type.is_quiz().then(|| QuizActivity {
                user_id: presence.user_id.clone(),
                username: presence.username.clone(),
                action: action.clone(),
            })
        })
        .collect()
}

pub fn summarize(peers: &[Peer]) -> ActivitySummary {
    ActivitySummary {
        connection_count: peers.len(),
        present_count: present(peers).count(),
        active_users: active_users(peers),
        users_by_page: users_by_page(peers),
        quiz_activity: quiz_activity(peers),
    }
}

fn present(peers: &[Peer]) -> impl Iterator<Item = &Presence> {
    peers.iter().filter_map(|peer| peer.presence.as_ref())
}

/// Page-to-viewers mapping. Keys keep first-seen order and a page only
/// appears while at least one viewer is on it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UsersByPage {
    pages: Vec<PageViewers>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageViewers {
    pub page: String,
    pub users: Vec<Presence>,
}

impl UsersByPage {
    pub fn get(&self, page: &str) -> Option<&[Presence]> {
        self.pages.iter().find(|group| group.page == page).map(|group| group.users.as_slice())
    }

    pub fn pages(&self) -> impl Iterator<Item = &str> {
        self.pages.iter().map(|group| group.page.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &PageViewers> {
        self.pages.iter()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizActivity {
    pub user_id: String,
    pub username: String,
    pub action: CurrentAction,
}

/// Everything the admin monitor shows for one room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivitySummary {
    pub connection_count: usize,
    pub present_count: usize,
    pub active_users: Vec<Presence>,
    pub users_by_page: UsersByPage,
    pub quiz_activity: Vec<QuizActivity>,
}
