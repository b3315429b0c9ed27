use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{EntityId, Row, Table};
use crate::store::{Collection, Document, LocalStore};

/// A mutation waiting to be replayed against the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum MutationOp {
    /// Insert `row`. `temp_id` is set when the row was created under a temporary id
    /// that the remote store must replace with its own.
    Insert {
        table: Table,
        row: Row,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        temp_id: Option<Uuid>,
    },
    Update {
        table: Table,
        target: EntityId,
        patch: Row,
    },
    /// Soft delete: the remote row is flagged inactive.
    Delete { table: Table, target: EntityId },
    /// Physically remove every row of `table` whose `column` equals `owner`.
    HardDelete {
        table: Table,
        column: String,
        owner: EntityId,
    },
}

impl MutationOp {
    #[must_use]
    pub fn table(&self) -> Table {
        match self {
            Self::Insert { table, .. }
            | Self::Update { table, .. }
            | Self::Delete { table, .. }
            | Self::HardDelete { table, .. } => *table,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Insert { .. } => "insert",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::HardDelete { .. } => "delete_permanent",
        }
    }

    /// Temporary id this op creates on the remote side, if any.
    #[must_use]
    pub fn creates(&self) -> Option<Uuid> {
        match self {
            Self::Insert {
                table,
                temp_id: Some(temp),
                ..
            } if table.is_primary() => Some(*temp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationQueueItem {
    pub uuid: Uuid,
    pub op: MutationOp,
    /// Recipe the mutation belongs to; substituted into `recipe_id` on replay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe_ref: Option<EntityId>,
    /// Milliseconds since the epoch, strictly increasing across the queue.
    pub enqueued_at: i64,
}

impl MutationQueueItem {
    /// Whether the item mentions `id` as its target, owner or recipe reference.
    #[must_use]
    pub fn references(&self, id: &EntityId) -> bool {
        if self.recipe_ref.as_ref() == Some(id) {
            return true;
        }
        match &self.op {
            MutationOp::Insert { temp_id, .. } => {
                matches!(id, EntityId::Temporary(uuid) if *temp_id == Some(*uuid))
            }
            MutationOp::Update { target, .. } | MutationOp::Delete { target, .. } => target == id,
            MutationOp::HardDelete { owner, .. } => owner == id,
        }
    }
}

impl Document for MutationQueueItem {
    const COLLECTION: Collection = Collection::SyncQueue;

    fn key(&self) -> String {
        self.uuid.to_string()
    }

    fn sort_key(&self) -> i64 {
        self.enqueued_at
    }
}

/// Ordered durable log of pending mutations on top of the local store.
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
    last_stamp: Arc<AtomicI64>,
}

impl SyncQueue {
    #[must_use]
    pub fn new(store: LocalStore) -> Self {
        Self {
            store,
            last_stamp: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Append a mutation and return its queue uuid.
    pub async fn enqueue(&self, op: MutationOp, recipe_ref: Option<EntityId>) -> Result<Uuid> {
        if self.last_stamp.load(Ordering::SeqCst) == 0 {
            // Resume after the newest persisted item so order survives a restart.
            if let Some(newest) = self.all().await?.last() {
                self.last_stamp.fetch_max(newest.enqueued_at, Ordering::SeqCst);
            }
        }
        let item = MutationQueueItem {
            uuid: Uuid::new_v4(),
            enqueued_at: self.next_stamp(),
            op,
            recipe_ref,
        };
        self.store.put(&item).await?;
        debug!(
            item = %item.uuid,
            op = item.op.kind(),
            table = %item.op.table(),
            "mutation enqueued"
        );
        Ok(item.uuid)
    }

    fn next_stamp(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let mut last = self.last_stamp.load(Ordering::SeqCst);
        loop {
            let next = now.max(last + 1);
            match self.last_stamp.compare_exchange(
                last,
                next,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }

    /// Every pending item in enqueue order.
    pub async fn all(&self) -> Result<Vec<MutationQueueItem>> {
        self.store.get_all().await
    }

    pub async fn remove(&self, uuid: Uuid) -> Result<()> {
        self.store
            .delete(Collection::SyncQueue, &uuid.to_string())
            .await
    }

    /// Overwrite a queued item in place, keeping its position.
    pub async fn update(&self, item: &MutationQueueItem) -> Result<()> {
        self.store.put(item).await
    }

    /// Remove every item that references `id`. Returns how many were removed.
    pub async fn purge(&self, id: &EntityId) -> Result<usize> {
        let doomed: Vec<String> = self
            .all()
            .await?
            .into_iter()
            .filter(|item| item.references(id))
            .map(|item| item.uuid.to_string())
            .collect();
        let count = doomed.len();
        self.store
            .replace::<MutationQueueItem>(doomed, &[])
            .await?;
        debug!(id = %id, removed = count, "queued mutations purged");
        Ok(count)
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.count(Collection::SyncQueue).await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}
