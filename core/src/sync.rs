use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::error::{Error, FailureClass, Result};
use crate::events::{DrainReport, EventBus, SyncEvent};
use crate::models::{EntityId, Recipe, RecipePatch, Table};
use crate::queue::{MutationOp, MutationQueueItem, SyncQueue};
use crate::replay::{Applied, Dispatcher, IdentifierMap};
use crate::store::{Collection, LocalStore};

/// How a drain request ended.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// Another drain is running; this request was a no-op.
    AlreadyDraining,
    /// Nothing was queued. No remote calls were made and nothing was emitted.
    Empty,
    /// A manual trigger arrived while offline.
    Offline,
    /// The queue could not be read.
    Unavailable(Error),
    Finished(DrainReport),
}

/// Resets the draining flag when a drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// The replay engine: drains the mutation queue against the remote store.
#[derive(Clone)]
pub struct SyncManager {
    queue: SyncQueue,
    store: LocalStore,
    dispatcher: Dispatcher,
    connectivity: ConnectivityMonitor,
    events: EventBus,
    draining: Arc<AtomicBool>,
}

impl SyncManager {
    #[must_use]
    pub fn new(
        queue: SyncQueue,
        store: LocalStore,
        dispatcher: Dispatcher,
        connectivity: ConnectivityMonitor,
        events: EventBus,
    ) -> Self {
        Self {
            queue,
            store,
            dispatcher,
            connectivity,
            events,
            draining: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Drain only if the client is online.
    pub async fn trigger(&self) -> DrainOutcome {
        if !self.connectivity.is_online() {
            debug!("sync trigger ignored while offline");
            return DrainOutcome::Offline;
        }
        self.drain().await
    }

    /// Replay every queued mutation in enqueue order. At most one drain runs at a time.
    pub async fn drain(&self) -> DrainOutcome {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in progress");
            return DrainOutcome::AlreadyDraining;
        }
        let guard = DrainGuard(&self.draining);

        let items = match self.queue.all().await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "cannot read mutation queue");
                return DrainOutcome::Unavailable(e);
            }
        };
        if items.is_empty() {
            return DrainOutcome::Empty;
        }
        // Mappings from earlier drains live on the cached recipes; without them
        // queued children cannot be told apart from orphans.
        let recipes: Vec<Recipe> = match self.store.get_all().await {
            Ok(recipes) => recipes,
            Err(e) => {
                warn!(error = %e, "cached recipes unreadable, drain postponed");
                return DrainOutcome::Unavailable(e);
            }
        };

        info!(pending = items.len(), "drain started");
        self.events.emit(SyncEvent::DrainStarted {
            pending: items.len(),
        });

        let mut map = IdentifierMap::from_recipes(&recipes);
        let mut report = DrainReport::default();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut batch = items;

        // Items enqueued while a round runs are picked up by the next round.
        loop {
            for item in &batch {
                if let Some(temp) = item.op.creates() {
                    map.expect(temp);
                }
            }
            for item in &batch {
                seen.insert(item.uuid);
                if !self.replay_one(item, &mut map, &mut report).await {
                    break;
                }
            }
            if report.aborted || !self.connectivity.is_online() {
                break;
            }
            batch = match self.queue.all().await {
                Ok(all) => all.into_iter().filter(|i| !seen.contains(&i.uuid)).collect(),
                Err(e) => {
                    warn!(error = %e, "cannot re-read mutation queue");
                    Vec::new()
                }
            };
            if batch.is_empty() {
                break;
            }
        }

        info!(
            applied = report.applied,
            dropped = report.dropped.len(),
            deferred = report.deferred,
            aborted = report.aborted,
            "drain finished"
        );
        drop(guard);
        self.events.emit(SyncEvent::SyncCompleted(report.clone()));
        DrainOutcome::Finished(report)
    }

    /// Replay one item. Returns false when the drain must stop.
    async fn replay_one(
        &self,
        item: &MutationQueueItem,
        map: &mut IdentifierMap,
        report: &mut DrainReport,
    ) -> bool {
        let table = item.op.table();
        match self
            .dispatcher
            .dispatch(&item.op, item.recipe_ref.as_ref(), map)
            .await
        {
            Ok(applied) => {
                if let Err(e) = self.queue.remove(item.uuid).await {
                    warn!(item = %item.uuid, error = %e, "applied item could not be removed");
                }
                if let Err(e) = self.reconcile_local(&item.op, &applied, map).await {
                    warn!(item = %item.uuid, error = %e, "local reconcile failed");
                }
                debug!(item = %item.uuid, op = item.op.kind(), table = %table, "applied");
                report.applied += 1;
                true
            }
            Err(err) => match err.failure_class() {
                FailureClass::Fatal => {
                    warn!(item = %item.uuid, error = %err, "session expired, drain aborted");
                    report.aborted = true;
                    false
                }
                FailureClass::Permanent => {
                    error!(item = %item.uuid, table = %table, error = %err, "mutation dropped");
                    if let Some(temp) = item.op.creates() {
                        map.abandon(temp);
                    }
                    if let Err(e) = self.queue.remove(item.uuid).await {
                        warn!(item = %item.uuid, error = %e, "dropped item could not be removed");
                    }
                    report.dropped.push(item.uuid);
                    self.events.emit(SyncEvent::MutationDropped {
                        item: item.uuid,
                        table,
                        reason: err,
                    });
                    true
                }
                FailureClass::Transient => {
                    info!(item = %item.uuid, table = %table, error = %err, "mutation deferred");
                    report.deferred += 1;
                    true
                }
            },
        }
    }

    /// Bring the cached recipe in line with a successfully replayed mutation.
    async fn reconcile_local(
        &self,
        op: &MutationOp,
        applied: &Applied,
        map: &IdentifierMap,
    ) -> Result<()> {
        match (op, applied) {
            (
                MutationOp::Insert {
                    table: Table::Recipes,
                    temp_id: Some(temp),
                    ..
                },
                Applied::Row(row),
            ) => {
                let temp_id = EntityId::Temporary(*temp);
                let server_id = map.rewrite(&temp_id);
                let delete_queued = self.carry_forward(&temp_id, map).await?;
                let Some(mut recipe) = self.store.get::<Recipe>(&temp_id.key()).await? else {
                    if !delete_queued {
                        // Deleted locally while its insert was in flight.
                        info!(
                            recipe = %server_id,
                            "recipe deleted during its insert, queueing delete"
                        );
                        self.queue
                            .enqueue(
                                MutationOp::Delete {
                                    table: Table::Recipes,
                                    target: server_id,
                                },
                                None,
                            )
                            .await?;
                    }
                    return Ok(());
                };
                if let Some(created_at) = row.get("created_at").and_then(|v| v.as_str()) {
                    recipe.created_at = created_at.to_string();
                }
                recipe.id = server_id;
                debug!(from = %temp_id, to = %recipe.id, "local recipe re-keyed");
                self.store.replace(vec![temp_id.key()], &[recipe]).await
            }
            (
                MutationOp::Update {
                    table: Table::Recipes,
                    target,
                    patch,
                },
                Applied::Row(_),
            ) => {
                let Some(favorite) = RecipePatch::from_row(patch)?.is_favorite else {
                    return Ok(());
                };
                let key = map.rewrite(target).key();
                if let Some(mut recipe) = self.store.get::<Recipe>(&key).await? {
                    if recipe.is_favorite != favorite {
                        recipe.is_favorite = favorite;
                        self.store.put(&recipe).await?;
                    }
                }
                Ok(())
            }
            (
                MutationOp::Delete {
                    table: Table::Recipes,
                    target,
                },
                _,
            ) => {
                self.store
                    .delete(Collection::Recipes, &map.rewrite(target).key())
                    .await
            }
            _ => Ok(()),
        }
    }

    /// Point queued items at the server id of a recipe created in this drain so the
    /// mapping survives an aborted drain. Returns whether a recipe delete is queued.
    async fn carry_forward(&self, temp: &EntityId, map: &IdentifierMap) -> Result<bool> {
        let mut delete_queued = false;
        for item in self.queue.all().await? {
            if !item.references(temp) {
                continue;
            }
            delete_queued |= matches!(
                &item.op,
                MutationOp::Delete { table: Table::Recipes, target } if target == temp
            );
            let rewritten = MutationQueueItem {
                op: map.rewrite_op(&item.op),
                recipe_ref: item.recipe_ref.as_ref().map(|r| map.rewrite(r)),
                ..item
            };
            self.queue.update(&rewritten).await?;
        }
        Ok(delete_queued)
    }

    /// Drain whenever the connectivity monitor reports the client online.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let manager = self.clone();
        let mut rx = self.connectivity.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Transition::WentOnline) => {
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            manager.drain().await;
                        });
                    }
                    Ok(Transition::WentOffline) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "connectivity listener lagged");
                        if manager.connectivity.is_online() {
                            let manager = manager.clone();
                            tokio::spawn(async move {
                                manager.drain().await;
                            });
                        }
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
