use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{EntityId, Recipe, Row};
use crate::queue::MutationOp;
use crate::remote::{RemoteAdapter, value_text};

/// What the identifier map knows about an entity id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(String),
    /// The insert creating this temporary id is still queued.
    Pending,
    /// The insert creating this temporary id was dropped in this cycle.
    Orphaned,
    /// No insert for this temporary id is known to this cycle.
    Unknown,
}

/// Temporary to server id mapping, alive for a single drain or online write.
#[derive(Debug, Clone, Default)]
pub struct IdentifierMap {
    resolved: HashMap<Uuid, String>,
    pending: HashSet<Uuid>,
    abandoned: HashSet<Uuid>,
}

impl IdentifierMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with recipes that were created offline and already received a server id
    /// in an earlier drain.
    #[must_use]
    pub fn from_recipes(recipes: &[Recipe]) -> Self {
        let mut map = Self::new();
        for recipe in recipes {
            if let (Some(origin), EntityId::Persisted(id)) = (recipe.origin, &recipe.id) {
                map.resolved.insert(origin, id.clone());
            }
        }
        map
    }

    /// Note that an insert for `temp` is queued ahead.
    pub fn expect(&mut self, temp: Uuid) {
        if !self.resolved.contains_key(&temp) {
            self.pending.insert(temp);
        }
    }

    /// The insert for `temp` will not run in this cycle.
    pub fn abandon(&mut self, temp: Uuid) {
        self.pending.remove(&temp);
        self.abandoned.insert(temp);
    }

    pub fn record(&mut self, temp: Uuid, server_id: String) {
        self.pending.remove(&temp);
        self.resolved.insert(temp, server_id);
    }

    #[must_use]
    pub fn lookup(&self, id: &EntityId) -> Resolution {
        match id {
            EntityId::Persisted(id) => Resolution::Resolved(id.clone()),
            EntityId::Temporary(temp) => {
                if let Some(server_id) = self.resolved.get(temp) {
                    Resolution::Resolved(server_id.clone())
                } else if self.pending.contains(temp) {
                    Resolution::Pending
                } else if self.abandoned.contains(temp) {
                    Resolution::Orphaned
                } else {
                    Resolution::Unknown
                }
            }
        }
    }

    #[must_use]
    pub fn resolve(&self, id: &EntityId) -> Option<String> {
        match self.lookup(id) {
            Resolution::Resolved(id) => Some(id),
            Resolution::Pending | Resolution::Orphaned | Resolution::Unknown => None,
        }
    }

    /// `id` with a known mapping applied.
    #[must_use]
    pub fn rewrite(&self, id: &EntityId) -> EntityId {
        self.resolve(id).map_or_else(|| id.clone(), EntityId::Persisted)
    }

    /// `op` with every mapped temporary id replaced by its server id.
    #[must_use]
    pub fn rewrite_op(&self, op: &MutationOp) -> MutationOp {
        match op {
            MutationOp::Insert { .. } => op.clone(),
            MutationOp::Update {
                table,
                target,
                patch,
            } => MutationOp::Update {
                table: *table,
                target: self.rewrite(target),
                patch: patch.clone(),
            },
            MutationOp::Delete { table, target } => MutationOp::Delete {
                table: *table,
                target: self.rewrite(target),
            },
            MutationOp::HardDelete {
                table,
                column,
                owner,
            } => MutationOp::HardDelete {
                table: *table,
                column: column.clone(),
                owner: self.rewrite(owner),
            },
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

/// Outcome of dispatching one mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// The remote store returned the affected row.
    Row(Row),
    Done,
    /// Nothing to do remotely: the entity never existed there.
    Skipped,
}

/// Applies mutations to the remote store, each call bounded by a timeout.
#[derive(Clone)]
pub struct Dispatcher {
    remote: Arc<dyn RemoteAdapter>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(remote: Arc<dyn RemoteAdapter>, timeout: Duration) -> Self {
        Self { remote, timeout }
    }

    #[must_use]
    pub fn remote(&self) -> &Arc<dyn RemoteAdapter> {
        &self.remote
    }

    /// Bound a remote call by the configured timeout. Elapsing counts as a network
    /// failure.
    pub async fn bounded<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                Error::NetworkUnavailable(format!("{what} timed out after {:?}", self.timeout))
            })?
    }

    /// Dispatch `op`, substituting the resolved `recipe_ref` into `recipe_id` and
    /// recording server ids of primary inserts in `map`.
    pub async fn dispatch(
        &self,
        op: &MutationOp,
        recipe_ref: Option<&EntityId>,
        map: &mut IdentifierMap,
    ) -> Result<Applied> {
        match op {
            MutationOp::Insert {
                table,
                row,
                temp_id,
            } => {
                let mut row = row.clone();
                if let Some(parent) = recipe_ref {
                    row.insert("recipe_id".into(), Value::from(require(map, parent)?));
                }
                if temp_id.is_some() {
                    row.remove("id");
                }
                let stored = self
                    .bounded("insert", self.remote.insert(*table, row))
                    .await?;
                if let Some(temp) = op.creates() {
                    let server_id = stored.get("id").map(value_text).ok_or_else(|| {
                        Error::Malformed(format!("{table} insert returned no id"))
                    })?;
                    debug!(temp = %temp, server_id = %server_id, "identifier mapped");
                    map.record(temp, server_id);
                }
                Ok(Applied::Row(stored))
            }
            MutationOp::Update {
                table,
                target,
                patch,
            } => {
                let id = require(map, target)?;
                let mut patch = patch.clone();
                if let Some(parent) = recipe_ref {
                    if patch.contains_key("recipe_id") {
                        patch.insert("recipe_id".into(), Value::from(require(map, parent)?));
                    }
                }
                patch.remove("id");
                let stored = self
                    .bounded("update", self.remote.update(*table, &id, patch))
                    .await?;
                Ok(Applied::Row(stored))
            }
            MutationOp::Delete { table, target } => match map.lookup(target) {
                Resolution::Resolved(id) => {
                    self.bounded("delete", self.remote.soft_delete(*table, &id))
                        .await?;
                    Ok(Applied::Done)
                }
                Resolution::Pending => Err(Error::UnresolvableReference(target.clone())),
                Resolution::Orphaned | Resolution::Unknown => Ok(Applied::Skipped),
            },
            MutationOp::HardDelete {
                table,
                column,
                owner,
            } => match map.lookup(owner) {
                Resolution::Resolved(id) => {
                    self.bounded(
                        "delete_permanent",
                        self.remote.hard_delete(*table, column, &id),
                    )
                    .await?;
                    Ok(Applied::Done)
                }
                Resolution::Pending => Err(Error::UnresolvableReference(owner.clone())),
                Resolution::Orphaned | Resolution::Unknown => Ok(Applied::Skipped),
            },
        }
    }
}

fn require(map: &IdentifierMap, id: &EntityId) -> Result<String> {
    match map.lookup(id) {
        Resolution::Resolved(id) => Ok(id),
        Resolution::Pending | Resolution::Unknown => Err(Error::UnresolvableReference(id.clone())),
        Resolution::Orphaned => Err(Error::Orphaned(id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewRecipe, Table, to_row};
    use crate::testing::{Call, MockRemote};
    use serde_json::json;

    fn dispatcher(remote: &Arc<MockRemote>) -> Dispatcher {
        Dispatcher::new(remote.clone(), Duration::from_secs(10))
    }

    fn temp() -> (EntityId, Uuid) {
        let uuid = Uuid::new_v4();
        (EntityId::Temporary(uuid), uuid)
    }

    #[tokio::test]
    async fn test_primary_insert_records_mapping_and_strips_id() {
        let remote = MockRemote::new(42);
        let (id, uuid) = temp();
        let mut map = IdentifierMap::new();
        map.expect(uuid);
        assert_eq!(map.lookup(&id), Resolution::Pending);

        let op = MutationOp::Insert {
            table: Table::Recipes,
            row: to_row(&json!({"id": id.key(), "name": "Paella"})).unwrap(),
            temp_id: Some(uuid),
        };
        let applied = dispatcher(&remote).dispatch(&op, None, &mut map).await.unwrap();

        let Applied::Row(row) = applied else {
            panic!("expected a row");
        };
        assert_eq!(row["id"], "srv_42");
        assert_eq!(map.resolve(&id).as_deref(), Some("srv_42"));
        let Call::Insert(_, sent) = &remote.calls()[0] else {
            panic!("expected an insert");
        };
        assert!(!sent.contains_key("id"));
    }

    #[tokio::test]
    async fn test_child_insert_uses_mapped_parent() {
        let remote = MockRemote::new(1);
        let (parent, uuid) = temp();
        let mut map = IdentifierMap::new();
        map.record(uuid, "srv_9".to_string());

        let op = MutationOp::Insert {
            table: Table::Ingredients,
            row: to_row(&json!({"name": "Rice", "recipe_id": null})).unwrap(),
            temp_id: None,
        };
        dispatcher(&remote)
            .dispatch(&op, Some(&parent), &mut map)
            .await
            .unwrap();
        assert_eq!(remote.rows(Table::Ingredients)[0]["recipe_id"], "srv_9");
        // Child inserts never add mappings.
        assert_eq!(map.len(), 1);
    }

    #[tokio::test]
    async fn test_unresolved_parent_is_pending_or_orphaned() {
        let remote = MockRemote::new(1);
        let (parent, uuid) = temp();
        let op = MutationOp::Insert {
            table: Table::Ingredients,
            row: Row::new(),
            temp_id: None,
        };

        let mut map = IdentifierMap::new();
        map.expect(uuid);
        let err = dispatcher(&remote)
            .dispatch(&op, Some(&parent), &mut map)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnresolvableReference(parent.clone()));

        map.abandon(uuid);
        let err = dispatcher(&remote)
            .dispatch(&op, Some(&parent), &mut map)
            .await
            .unwrap_err();
        assert_eq!(err, Error::Orphaned(parent));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_update_of_unknown_temporary_is_deferred() {
        let remote = MockRemote::new(1);
        let (target, _) = temp();
        let mut map = IdentifierMap::new();
        assert_eq!(map.lookup(&target), Resolution::Unknown);

        let op = MutationOp::Update {
            table: Table::Recipes,
            target: target.clone(),
            patch: to_row(&json!({"name": "Soup"})).unwrap(),
        };
        let err = dispatcher(&remote)
            .dispatch(&op, None, &mut map)
            .await
            .unwrap_err();
        assert_eq!(err, Error::UnresolvableReference(target));
        assert_eq!(err.failure_class(), crate::error::FailureClass::Transient);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_delete_of_never_synced_entity_is_skipped() {
        let remote = MockRemote::new(1);
        let (target, _) = temp();
        let op = MutationOp::Delete {
            table: Table::Recipes,
            target,
        };
        let applied = dispatcher(&remote)
            .dispatch(&op, None, &mut IdentifierMap::new())
            .await
            .unwrap();
        assert_eq!(applied, Applied::Skipped);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_hard_delete_filters_by_owner() {
        let remote = MockRemote::new(1);
        remote.seed(
            Table::Ingredients,
            vec![
                json!({"id": "i1", "recipe_id": "r1"}),
                json!({"id": "i2", "recipe_id": "r2"}),
            ],
        );
        let op = MutationOp::HardDelete {
            table: Table::Ingredients,
            column: "recipe_id".to_string(),
            owner: EntityId::persisted("r1"),
        };
        dispatcher(&remote)
            .dispatch(&op, None, &mut IdentifierMap::new())
            .await
            .unwrap();
        let left = remote.rows(Table::Ingredients);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0]["id"], "i2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_calls_time_out_as_network_failures() {
        let remote = MockRemote::new(1);
        remote.set_delay(Duration::from_secs(60));
        let op = MutationOp::Update {
            table: Table::Recipes,
            target: EntityId::persisted("r1"),
            patch: Row::new(),
        };
        let err = Dispatcher::new(remote.clone(), Duration::from_secs(5))
            .dispatch(&op, None, &mut IdentifierMap::new())
            .await
            .unwrap_err();
        assert!(err.is_network());
    }

    #[test]
    fn test_map_seeded_from_reconciled_recipes() {
        let (temp_id, uuid) = temp();
        let mut recipe = NewRecipe::named("Soup").into_recipe(temp_id.clone(), "u");
        assert_eq!(recipe.origin, Some(uuid));
        recipe.id = EntityId::persisted("srv_7");

        let map = IdentifierMap::from_recipes(&[recipe]);
        assert_eq!(map.rewrite(&temp_id), EntityId::persisted("srv_7"));

        let op = MutationOp::Delete {
            table: Table::Recipes,
            target: temp_id,
        };
        assert_eq!(
            map.rewrite_op(&op),
            MutationOp::Delete {
                table: Table::Recipes,
                target: EntityId::persisted("srv_7"),
            }
        );
    }
}
