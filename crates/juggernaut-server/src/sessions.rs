//! Registry of sessions that are still running, keyed by id.

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use juggernaut_core::ids::SessionId;

#[derive(Default)]
pub struct ActiveSessions {
    tokens: DashMap<SessionId, CancellationToken>,
}

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: SessionId, cancel: CancellationToken) {
        self.tokens.insert(id, cancel);
    }

    /// Cancel a running session. False when no such session is running.
    pub fn cancel(&self, id: &SessionId) -> bool {
        match self.tokens.get(id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &SessionId) -> bool {
        self.tokens.remove(id).is_some()
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.tokens.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Cancel everything, e.g. on shutdown. Returns how many were running.
    pub fn cancel_all(&self) -> usize {
        let count = self.tokens.len();
        for entry in self.tokens.iter() {
            entry.value().cancel();
        }
        count
    }
}
