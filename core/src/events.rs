use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::error::Error;
use crate::models::Table;

/// Result of one drain cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items applied remotely (or skipped as nothing-to-do) and removed.
    pub applied: usize,
    /// Items removed after a permanent failure.
    pub dropped: Vec<Uuid>,
    /// Items left queued after a transient failure.
    pub deferred: usize,
    /// The drain stopped early on an expired session.
    pub aborted: bool,
}

impl DrainReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dropped.is_empty() && self.deferred == 0 && !self.aborted
    }
}

/// Notifications published to observers of the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    DrainStarted { pending: usize },
    /// A drain cycle finished; the queue may be empty or partially retried.
    SyncCompleted(DrainReport),
    /// A queued mutation was discarded because retrying could never succeed.
    MutationDropped {
        item: Uuid,
        table: Table,
        reason: Error,
    },
    /// A background refresh replaced the cached recipe listing.
    BackgroundRefreshCompleted { recipes: usize },
    CategoriesRefreshed { categories: usize },
}

/// Broadcast channel for `SyncEvent`s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn emit(&self, event: SyncEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!(event = ?e.0, "no event subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
