use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivityMonitor;
use crate::error::{Error, Result};
use crate::events::{EventBus, SyncEvent};
use crate::models::{
    Category, EntityId, Ingredient, NewRecipe, PreparationStep, Recipe, RecipeFilter,
    RecipeImage, RecipePatch, Row, Table, from_row, to_row,
};
use crate::queue::{MutationOp, MutationQueueItem, SyncQueue};
use crate::remote::{RemoteFilter, value_text};
use crate::replay::{Applied, Dispatcher, IdentifierMap};
use crate::store::{Collection, LocalStore};

/// Where a write went after its local apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRoute {
    /// Applied to the remote store before returning.
    Remote,
    /// Appended to the mutation queue for a later drain.
    Queued,
    /// Nothing to send: the entity never reached the remote store.
    Local,
}

/// The locally visible result of a write.
#[derive(Debug, Clone, PartialEq)]
pub struct Written<T> {
    pub value: T,
    pub route: WriteRoute,
}

type PlannedOp = (MutationOp, Option<EntityId>);

struct Routed {
    route: WriteRoute,
    applied: Vec<Applied>,
}

struct ResetOnDrop(Arc<AtomicBool>);

impl Drop for ResetOnDrop {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Local-first reads and writes of the recipe collection.
#[derive(Clone)]
pub struct CacheCoordinator {
    store: LocalStore,
    queue: SyncQueue,
    dispatcher: Dispatcher,
    connectivity: ConnectivityMonitor,
    events: EventBus,
    owner_id: Arc<str>,
    refreshing: Arc<AtomicBool>,
    refreshing_categories: Arc<AtomicBool>,
}

impl CacheCoordinator {
    #[must_use]
    pub fn new(
        store: LocalStore,
        queue: SyncQueue,
        dispatcher: Dispatcher,
        connectivity: ConnectivityMonitor,
        events: EventBus,
        owner_id: &str,
    ) -> Self {
        Self {
            store,
            queue,
            dispatcher,
            connectivity,
            events,
            owner_id: owner_id.into(),
            refreshing: Arc::new(AtomicBool::new(false)),
            refreshing_categories: Arc::new(AtomicBool::new(false)),
        }
    }

    #[must_use]
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    // --- Reads ---

    /// Recipes matching `filter`, served from the local cache whenever it has
    /// an answer.
    pub async fn get_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>> {
        let local: Vec<Recipe> = match self.store.get_all().await {
            Ok(local) => local,
            Err(e) if e.is_storage() => {
                warn!(error = %e, "local cache unavailable, reading remote");
                let fetched = self.fetch_partition(filter.shared).await?;
                return Ok(filter.apply(&fetched));
            }
            Err(e) => return Err(e),
        };

        let filtered = filter.apply(&local);
        let online = self.connectivity.is_online();
        if !filtered.is_empty() || !online {
            if online && filter.is_unfiltered() {
                self.spawn_refresh();
            }
            return Ok(filtered);
        }

        match self.fetch_partition(filter.shared).await {
            Ok(fetched) => {
                self.store.put_all(&fetched).await?;
                Ok(filter.apply(&fetched))
            }
            Err(e) if e.is_network() => {
                debug!(error = %e, "remote unreachable, serving empty local result");
                Ok(filtered)
            }
            Err(e) => Err(e),
        }
    }

    /// One recipe with its ingredients and steps.
    pub async fn get_recipe(&self, key: &str) -> Result<Recipe> {
        match self.store.get::<Recipe>(key).await {
            Ok(Some(recipe)) => return Ok(recipe),
            Ok(None) => {}
            Err(e) if e.is_storage() => {
                warn!(error = %e, "local cache unavailable, reading remote");
            }
            Err(e) => return Err(e),
        }
        if !self.connectivity.is_online() {
            return Err(Error::NotFound(format!("recipe '{key}'")));
        }
        let recipe = self
            .fetch_recipe(key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("recipe '{key}'")))?;
        self.tolerate_storage(self.store.put(&recipe).await)?;
        Ok(recipe)
    }

    /// Categories ordered by `order_index`, refreshed wholesale in the background
    /// when online.
    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        let local: Vec<Category> = match self.store.get_all().await {
            Ok(local) => local,
            Err(e) if e.is_storage() => return self.fetch_categories().await,
            Err(e) => return Err(e),
        };
        if !self.connectivity.is_online() {
            return Ok(local);
        }
        if local.is_empty() {
            return match self.refresh_categories().await {
                Ok(categories) => Ok(categories),
                Err(e) if e.is_network() => Ok(local),
                Err(e) => Err(e),
            };
        }
        self.spawn_category_refresh();
        Ok(local)
    }

    // --- Refresh ---

    /// Replace the cached owned and shared recipes with the remote state.
    ///
    /// Temporary recipes are local-only and always survive. Recipes with queued
    /// edits, or edited while the fetch was in flight, keep their local version.
    pub async fn refresh(&self) -> Result<usize> {
        let before: HashMap<String, u64> = self
            .store
            .get_all::<Recipe>()
            .await?
            .into_iter()
            .map(|r| (r.id.key(), r.revision))
            .collect();

        let owned = self.fetch_owned().await?;
        let shared = match self.fetch_shared().await {
            Ok(shared) => Some(shared),
            Err(e) if e.is_network() => {
                debug!(error = %e, "shared recipes unavailable, keeping cached ones");
                None
            }
            Err(e) => return Err(e),
        };

        let local: Vec<Recipe> = self.store.get_all().await?;
        let queued = self.queue.all().await?;
        let unchanged = |r: &Recipe| before.get(&r.id.key()) == Some(&r.revision);
        let local_by_key: HashMap<String, &Recipe> =
            local.iter().map(|r| (r.id.key(), r)).collect();

        let mut fresh: Vec<Recipe> = Vec::new();
        for mut recipe in owned.into_iter().chain(shared.iter().flatten().cloned()) {
            if let Some(existing) = local_by_key.get(&recipe.id.key()) {
                if !unchanged(existing) || has_pending_edits(existing, &queued) {
                    fresh.push((*existing).clone());
                    continue;
                }
                recipe.origin = existing.origin;
            }
            fresh.push(recipe);
        }

        let fresh_keys: HashSet<String> = fresh.iter().map(|r| r.id.key()).collect();
        let removed: Vec<String> = local
            .iter()
            .filter(|r| !fresh_keys.contains(&r.id.key()))
            .filter(|r| !r.id.is_temporary() && unchanged(r))
            .filter(|r| !(r.shared && shared.is_none()))
            .map(|r| r.id.key())
            .collect();

        let count = fresh.len();
        self.store.replace(removed, &fresh).await?;
        info!(recipes = count, "background refresh completed");
        self.events
            .emit(SyncEvent::BackgroundRefreshCompleted { recipes: count });
        Ok(count)
    }

    /// Replace the cached categories with the active remote ones.
    pub async fn refresh_categories(&self) -> Result<Vec<Category>> {
        let categories = self.fetch_categories().await?;
        let stale: Vec<String> = self
            .store
            .get_all::<Category>()
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        self.store.replace(stale, &categories).await?;
        self.events.emit(SyncEvent::CategoriesRefreshed {
            categories: categories.len(),
        });
        Ok(categories)
    }

    fn spawn_refresh(&self) {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let _reset = ResetOnDrop(Arc::clone(&this.refreshing));
            if let Err(e) = this.refresh().await {
                warn!(error = %e, "background refresh failed");
            }
        });
    }

    fn spawn_category_refresh(&self) {
        if self
            .refreshing_categories
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            let _reset = ResetOnDrop(Arc::clone(&this.refreshing_categories));
            if let Err(e) = this.refresh_categories().await {
                warn!(error = %e, "category refresh failed");
            }
        });
    }

    /// Refresh the cache after every completed drain so reconciled server ids
    /// replace temporary ones.
    pub fn follow_sync(&self) -> JoinHandle<()> {
        let this = self.clone();
        let mut rx = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(SyncEvent::SyncCompleted(_)) if this.connectivity.is_online() => {
                        this.spawn_refresh();
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "sync follower lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    // --- Writes ---

    /// Create a recipe with its ingredients and steps.
    pub async fn create_recipe(&self, draft: NewRecipe) -> Result<Written<Recipe>> {
        draft.validate()?;
        let recipe = draft.into_recipe(EntityId::temporary(), &self.owner_id);
        self.apply_local(&recipe).await?;

        let routed = self.route(create_ops(&recipe)?).await?;
        let value = self.finish_create(recipe, &routed.applied).await?;
        Ok(Written {
            value,
            route: routed.route,
        })
    }

    pub async fn update_recipe(&self, key: &str, patch: RecipePatch) -> Result<Written<Recipe>> {
        patch.validate()?;
        if patch.is_empty() {
            return Err(Error::Malformed("nothing to update".to_string()));
        }
        let mut recipe = self.load_for_write(key).await?;
        patch.apply(&mut recipe);
        touch(&mut recipe);
        self.apply_local(&recipe).await?;

        if self.is_orphan_draft(&recipe).await? {
            return self.resubmit(recipe).await;
        }
        let op = MutationOp::Update {
            table: Table::Recipes,
            target: recipe.id.clone(),
            patch: patch.to_row(),
        };
        let routed = self.route(vec![(op, None)]).await?;
        let value = match rows(&routed.applied).first() {
            Some(row) => self.reconcile(&recipe, row, |_| {}).await?,
            None => recipe,
        };
        Ok(Written {
            value,
            route: routed.route,
        })
    }

    pub async fn set_favorite(&self, key: &str, favorite: bool) -> Result<Written<Recipe>> {
        self.update_recipe(key, RecipePatch::favorite(favorite))
            .await
    }

    pub async fn toggle_favorite(&self, key: &str) -> Result<Written<Recipe>> {
        let recipe = self.load_for_write(key).await?;
        self.set_favorite(key, !recipe.is_favorite).await
    }

    /// Replace a recipe's ingredients: existing rows are hard-deleted and the new
    /// list is inserted.
    pub async fn replace_ingredients(
        &self,
        key: &str,
        ingredients: Vec<Ingredient>,
    ) -> Result<Written<Recipe>> {
        self.replace_children(key, Table::Ingredients, |recipe| {
            recipe.ingredients = ingredients;
        })
        .await
    }

    pub async fn replace_steps(
        &self,
        key: &str,
        steps: Vec<PreparationStep>,
    ) -> Result<Written<Recipe>> {
        self.replace_children(key, Table::PreparationSteps, |recipe| {
            recipe.steps = steps;
        })
        .await
    }

    /// Remove a recipe locally right away and soft-delete it remotely.
    ///
    /// A draft whose insert is still queued never existed remotely: its queued
    /// mutations are discarded instead.
    pub async fn delete_recipe(&self, key: &str) -> Result<WriteRoute> {
        let recipe = self.load_for_write(key).await?;
        self.tolerate_storage(
            self.store
                .delete(Collection::Recipes, &recipe.id.key())
                .await,
        )?;
        if recipe.id.is_temporary() && !self.is_orphan_draft(&recipe).await? {
            let purged = self.queue.purge(&recipe.id).await?;
            info!(key = %recipe.id, purged, "unsynced draft deleted");
            return Ok(WriteRoute::Local);
        }
        let op = MutationOp::Delete {
            table: Table::Recipes,
            target: recipe.id.clone(),
        };
        Ok(self.route(vec![(op, None)]).await?.route)
    }

    async fn replace_children(
        &self,
        key: &str,
        table: Table,
        edit: impl FnOnce(&mut Recipe),
    ) -> Result<Written<Recipe>> {
        let mut recipe = self.load_for_write(key).await?;
        edit(&mut recipe);
        renumber_children(&mut recipe);
        touch(&mut recipe);
        self.apply_local(&recipe).await?;

        if self.is_orphan_draft(&recipe).await? {
            return self.resubmit(recipe).await;
        }
        let mut ops: Vec<PlannedOp> = vec![(
            MutationOp::HardDelete {
                table,
                column: "recipe_id".to_string(),
                owner: recipe.id.clone(),
            },
            None,
        )];
        ops.extend(child_ops(&recipe, table)?);

        let routed = self.route(ops).await?;
        let inserted = rows(&routed.applied);
        if !inserted.is_empty() {
            self.adopt_ids(&recipe, table, &inserted).await?;
        }
        Ok(Written {
            value: self.store.get(&recipe.id.key()).await.ok().flatten().unwrap_or(recipe),
            route: routed.route,
        })
    }

    /// Send a local draft whose insert never reached the remote store or the queue.
    async fn resubmit(&self, recipe: Recipe) -> Result<Written<Recipe>> {
        info!(key = %recipe.id, "resubmitting unsynced draft");
        let routed = self.route(create_ops(&recipe)?).await?;
        let value = self.finish_create(recipe, &routed.applied).await?;
        Ok(Written {
            value,
            route: routed.route,
        })
    }

    async fn finish_create(&self, recipe: Recipe, applied: &[Applied]) -> Result<Recipe> {
        let applied_rows = rows(applied);
        let Some((recipe_row, children)) = applied_rows.split_first() else {
            return Ok(recipe);
        };
        let (ingredient_rows, step_rows) =
            children.split_at(recipe.ingredients.len().min(children.len()));
        self.reconcile(&recipe, recipe_row, |r| {
            assign_ids(r, Table::Ingredients, ingredient_rows);
            assign_ids(r, Table::PreparationSteps, step_rows);
        })
        .await
    }

    // --- Internals ---

    /// Send `ops` straight to the remote store when online with nothing queued
    /// ahead, otherwise append them to the queue.
    async fn route(&self, ops: Vec<PlannedOp>) -> Result<Routed> {
        let direct = self.connectivity.is_online()
            && match self.queue.is_empty().await {
                Ok(empty) => empty,
                Err(e) if e.is_storage() => true,
                Err(e) => return Err(e),
            };
        if !direct {
            for (op, recipe_ref) in ops {
                self.queue.enqueue(op, recipe_ref).await?;
            }
            return Ok(Routed {
                route: WriteRoute::Queued,
                applied: Vec::new(),
            });
        }

        let mut map = IdentifierMap::new();
        for (op, _) in &ops {
            if let Some(temp) = op.creates() {
                map.expect(temp);
            }
        }
        let mut applied = Vec::with_capacity(ops.len());
        for (index, (op, recipe_ref)) in ops.iter().enumerate() {
            match self
                .dispatcher
                .dispatch(op, recipe_ref.as_ref(), &mut map)
                .await
            {
                Ok(result) => applied.push(result),
                Err(e) if e.is_network() => {
                    warn!(
                        error = %e,
                        remaining = ops.len() - index,
                        "remote unreachable, queueing the rest of the write"
                    );
                    for (op, recipe_ref) in &ops[index..] {
                        let recipe_ref = recipe_ref.as_ref().map(|r| map.rewrite(r));
                        self.queue.enqueue(map.rewrite_op(op), recipe_ref).await?;
                    }
                    return Ok(Routed {
                        route: WriteRoute::Queued,
                        applied,
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(Routed {
            route: WriteRoute::Remote,
            applied,
        })
    }

    /// Fold a server row into the cached recipe. If the recipe was edited again
    /// since `snapshot`, only the server identity is taken.
    async fn reconcile(
        &self,
        snapshot: &Recipe,
        row: &Row,
        adopt: impl FnOnce(&mut Recipe),
    ) -> Result<Recipe> {
        let old_key = snapshot.id.key();
        let current = match self.store.get::<Recipe>(&old_key).await {
            Ok(current) => current,
            Err(e) if e.is_storage() => None,
            Err(e) => return Err(e),
        };
        let mut recipe = current.unwrap_or_else(|| snapshot.clone());
        if recipe.revision == snapshot.revision {
            recipe.merge_server_row(row)?;
            adopt(&mut recipe);
        } else {
            debug!(key = %old_key, "newer local edit, ignoring stale server fields");
            if let Some(id) = row.get("id").map(value_text) {
                recipe.id = EntityId::Persisted(id);
            }
        }
        let removed = if recipe.id.key() == old_key {
            Vec::new()
        } else {
            vec![old_key]
        };
        self.tolerate_storage(self.store.replace(removed, &[recipe.clone()]).await)?;
        Ok(recipe)
    }

    async fn adopt_ids(&self, snapshot: &Recipe, table: Table, inserted: &[&Row]) -> Result<()> {
        let current = match self.store.get::<Recipe>(&snapshot.id.key()).await {
            Ok(Some(current)) => current,
            Ok(None) => return Ok(()),
            Err(e) if e.is_storage() => return Ok(()),
            Err(e) => return Err(e),
        };
        if current.revision != snapshot.revision {
            return Ok(());
        }
        let mut recipe = current;
        assign_ids(&mut recipe, table, inserted);
        self.tolerate_storage(self.store.put(&recipe).await)
    }

    async fn load_for_write(&self, key: &str) -> Result<Recipe> {
        let recipe = self.get_recipe(key).await?;
        if recipe.shared {
            return Err(Error::Malformed(format!(
                "recipe '{key}' is shared with you and read-only"
            )));
        }
        Ok(recipe)
    }

    /// A temporary recipe whose insert is neither queued nor applied.
    async fn is_orphan_draft(&self, recipe: &Recipe) -> Result<bool> {
        let EntityId::Temporary(temp) = recipe.id else {
            return Ok(false);
        };
        let queued = match self.queue.all().await {
            Ok(queued) => queued,
            Err(e) if e.is_storage() => return Ok(true),
            Err(e) => return Err(e),
        };
        Ok(!queued.iter().any(|i| i.op.creates() == Some(temp)))
    }

    async fn apply_local(&self, recipe: &Recipe) -> Result<()> {
        self.tolerate_storage(self.store.put(recipe).await)
    }

    /// Storage failures are tolerated while online: the remote store stays the
    /// source of truth. Offline they fail the write.
    fn tolerate_storage(&self, result: Result<()>) -> Result<()> {
        match result {
            Err(e) if e.is_storage() && self.connectivity.is_online() => {
                warn!(error = %e, "local cache unavailable, continuing remote-only");
                Ok(())
            }
            other => other,
        }
    }

    // --- Remote reads ---

    async fn fetch(&self, table: Table, filter: RemoteFilter) -> Result<Vec<Row>> {
        let remote = self.dispatcher.remote();
        self.dispatcher
            .bounded("fetch", remote.fetch(table, &filter))
            .await
    }

    async fn fetch_partition(&self, shared: bool) -> Result<Vec<Recipe>> {
        if shared {
            self.fetch_shared().await
        } else {
            self.fetch_owned().await
        }
    }

    async fn fetch_owned(&self) -> Result<Vec<Recipe>> {
        let filter = RemoteFilter::new()
            .eq("user_id", &*self.owner_id)
            .eq("is_active", true)
            .order_by("created_at", true);
        let rows = self.fetch(Table::Recipes, filter).await?;
        let mut recipes = rows
            .iter()
            .map(Recipe::from_row)
            .collect::<Result<Vec<_>>>()?;
        self.attach_children(&mut recipes).await?;
        Ok(recipes)
    }

    async fn fetch_shared(&self) -> Result<Vec<Recipe>> {
        let shares = self
            .fetch(
                Table::SharedRecipes,
                RemoteFilter::new().eq("recipient_user_id", &*self.owner_id),
            )
            .await?;
        let ids: Vec<String> = shares
            .iter()
            .filter_map(|s| s.get("recipe_id").map(value_text))
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = self
            .fetch(
                Table::Recipes,
                RemoteFilter::new()
                    .is_in("id", &ids)
                    .eq("is_active", true)
                    .order_by("created_at", true),
            )
            .await?;
        let mut recipes = rows
            .iter()
            .map(|row| {
                let mut recipe = Recipe::from_row(row)?;
                recipe.shared = true;
                Ok(recipe)
            })
            .collect::<Result<Vec<_>>>()?;
        self.attach_children(&mut recipes).await?;
        Ok(recipes)
    }

    async fn fetch_recipe(&self, key: &str) -> Result<Option<Recipe>> {
        let rows = self
            .fetch(
                Table::Recipes,
                RemoteFilter::new().eq("id", key).eq("is_active", true),
            )
            .await?;
        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let mut recipe = Recipe::from_row(row)?;
        recipe.shared = recipe.user_id != *self.owner_id;
        let mut one = vec![recipe];
        self.attach_children(&mut one).await?;
        Ok(one.pop())
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>> {
        let rows = self
            .fetch(
                Table::Categories,
                RemoteFilter::new()
                    .eq("is_active", true)
                    .order_by("order_index", false),
            )
            .await?;
        rows.into_iter().map(from_row).collect()
    }

    /// Embed ingredients, steps and images fetched in one query per table.
    async fn attach_children(&self, recipes: &mut [Recipe]) -> Result<()> {
        let ids: Vec<String> = recipes
            .iter()
            .filter_map(|r| r.id.as_persisted().map(String::from))
            .collect();
        if ids.is_empty() {
            return Ok(());
        }
        let ingredients = self
            .fetch(
                Table::Ingredients,
                RemoteFilter::new()
                    .is_in("recipe_id", &ids)
                    .order_by("order_index", false),
            )
            .await?;
        let steps = self
            .fetch(
                Table::PreparationSteps,
                RemoteFilter::new()
                    .is_in("recipe_id", &ids)
                    .order_by("step_number", false),
            )
            .await?;
        let images = self
            .fetch(
                Table::RecipeImages,
                RemoteFilter::new()
                    .is_in("recipe_id", &ids)
                    .order_by("order_index", false),
            )
            .await?;

        let ingredients = group_by_recipe::<Ingredient>(ingredients)?;
        let steps = group_by_recipe::<PreparationStep>(steps)?;
        let images = group_by_recipe::<RecipeImage>(images)?;
        for recipe in recipes.iter_mut() {
            let key = recipe.id.key();
            recipe.ingredients = ingredients.get(&key).cloned().unwrap_or_default();
            recipe.steps = steps.get(&key).cloned().unwrap_or_default();
            recipe.images = images.get(&key).cloned().unwrap_or_default();
        }
        Ok(())
    }
}

fn group_by_recipe<T: serde::de::DeserializeOwned>(
    rows: Vec<Row>,
) -> Result<HashMap<String, Vec<T>>> {
    let mut grouped: HashMap<String, Vec<T>> = HashMap::new();
    for row in rows {
        let Some(recipe_id) = row.get("recipe_id").map(value_text) else {
            continue;
        };
        grouped.entry(recipe_id).or_default().push(from_row(row)?);
    }
    Ok(grouped)
}

fn has_pending_edits(recipe: &Recipe, queued: &[MutationQueueItem]) -> bool {
    let origin = recipe.origin.map(EntityId::Temporary);
    queued
        .iter()
        .any(|i| i.references(&recipe.id) || origin.as_ref().is_some_and(|o| i.references(o)))
}

fn touch(recipe: &mut Recipe) {
    recipe.revision += 1;
    recipe.updated_at = chrono::Utc::now().to_rfc3339();
}

fn renumber_children(recipe: &mut Recipe) {
    for (i, ingredient) in (0u32..).zip(recipe.ingredients.iter_mut()) {
        ingredient.order_index = i;
        ingredient.id = None;
    }
    for (i, step) in (1u32..).zip(recipe.steps.iter_mut()) {
        step.step_number = i;
        step.id = None;
    }
}

fn rows(applied: &[Applied]) -> Vec<&Row> {
    applied
        .iter()
        .filter_map(|a| match a {
            Applied::Row(row) => Some(row),
            Applied::Done | Applied::Skipped => None,
        })
        .collect()
}

fn assign_ids(recipe: &mut Recipe, table: Table, inserted: &[&Row]) {
    let ids = inserted.iter().map(|row| row.get("id").map(value_text));
    match table {
        Table::Ingredients => {
            for (ingredient, id) in recipe.ingredients.iter_mut().zip(ids) {
                ingredient.id = id;
            }
        }
        Table::PreparationSteps => {
            for (step, id) in recipe.steps.iter_mut().zip(ids) {
                step.id = id;
            }
        }
        _ => {}
    }
}

/// The recipe insert followed by inserts of its children.
fn create_ops(recipe: &Recipe) -> Result<Vec<PlannedOp>> {
    let EntityId::Temporary(temp) = recipe.id else {
        return Err(Error::Malformed(format!(
            "recipe '{}' already exists remotely",
            recipe.id
        )));
    };
    let mut ops: Vec<PlannedOp> = vec![(
        MutationOp::Insert {
            table: Table::Recipes,
            row: recipe.to_row()?,
            temp_id: Some(temp),
        },
        None,
    )];
    ops.extend(child_ops(recipe, Table::Ingredients)?);
    ops.extend(child_ops(recipe, Table::PreparationSteps)?);
    Ok(ops)
}

fn child_ops(recipe: &Recipe, table: Table) -> Result<Vec<PlannedOp>> {
    let rows = match table {
        Table::Ingredients => recipe
            .ingredients
            .iter()
            .map(to_row)
            .collect::<Result<Vec<_>>>()?,
        Table::PreparationSteps => recipe.steps.iter().map(to_row).collect::<Result<Vec<_>>>()?,
        other => {
            return Err(Error::Malformed(format!("{other} rows are not recipe children")));
        }
    };
    Ok(rows
        .into_iter()
        .map(|mut row| {
            row.remove("id");
            (
                MutationOp::Insert {
                    table,
                    row,
                    temp_id: None,
                },
                Some(recipe.id.clone()),
            )
        })
        .collect())
}
