//! Explicitly constructed collaborators handed to the controller.

use std::sync::Arc;

use juggernaut_store::{Database, FallbackTaskRepo, MessageRepo, SessionRepo, SnapshotRepo};

use crate::fallback::{FallbackSink, MemoryFallbackSink, StoreFallbackSink};
use crate::notify::Notifier;

/// Repositories used to record a session as it runs.
pub struct Persistence {
    pub sessions: SessionRepo,
    pub messages: MessageRepo,
    pub snapshots: SnapshotRepo,
}

impl Persistence {
    pub fn new(db: Database) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            snapshots: SnapshotRepo::new(db),
        }
    }
}

/// Shared per-process context. Cloning is cheap.
#[derive(Clone)]
pub struct SessionServices {
    pub fallback: Arc<dyn FallbackSink>,
    pub notifier: Option<Arc<dyn Notifier>>,
    pub persistence: Option<Arc<Persistence>>,
}

impl SessionServices {
    /// No database: fallback tasks are kept in memory and nothing is persisted.
    pub fn in_memory() -> Self {
        Self {
            fallback: Arc::new(MemoryFallbackSink::new()),
            notifier: None,
            persistence: None,
        }
    }

    pub fn with_database(db: Database) -> Self {
        Self {
            fallback: Arc::new(StoreFallbackSink::new(FallbackTaskRepo::new(db.clone()))),
            notifier: None,
            persistence: Some(Arc::new(Persistence::new(db))),
        }
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn FallbackSink>) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}
