use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::cache::{CacheCoordinator, WriteRoute, Written};
use crate::connectivity::ConnectivityMonitor;
use crate::error::Result;
use crate::events::{EventBus, SyncEvent};
use crate::models::{
    Category, Ingredient, NewRecipe, PreparationStep, Recipe, RecipeFilter, RecipePatch,
};
use crate::queue::{MutationQueueItem, SyncQueue};
use crate::remote::RemoteAdapter;
use crate::replay::Dispatcher;
use crate::store::{Collection, LocalStore};
use crate::sync::{DrainOutcome, SyncManager};

/// Settings for wiring a `RecipeHub`.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// User whose recipes are cached and created.
    pub owner_id: String,
    /// Upper bound for each remote call.
    pub remote_timeout: Duration,
    pub event_capacity: usize,
    /// Start a drain in the background after writes queued while online.
    pub auto_sync: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            owner_id: "local-user".to_string(),
            remote_timeout: Duration::from_secs(10),
            event_capacity: 64,
            auto_sync: true,
        }
    }
}

impl HubConfig {
    #[must_use]
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }

    #[must_use]
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    #[must_use]
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }
}

/// Snapshot of the sync engine for status displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStatus {
    pub online: bool,
    pub draining: bool,
    pub storage_available: bool,
    pub pending: usize,
    pub cached_recipes: usize,
    pub cached_categories: usize,
}

/// The offline-first recipe client: every component constructed once and shared
/// by handle.
#[derive(Clone)]
pub struct RecipeHub {
    store: LocalStore,
    queue: SyncQueue,
    connectivity: ConnectivityMonitor,
    events: EventBus,
    cache: CacheCoordinator,
    sync: SyncManager,
    auto_sync: bool,
}

impl RecipeHub {
    pub fn new(
        store: LocalStore,
        remote: Arc<dyn RemoteAdapter>,
        connectivity: ConnectivityMonitor,
        config: &HubConfig,
    ) -> Self {
        let queue = SyncQueue::new(store.clone());
        let events = EventBus::new(config.event_capacity);
        let dispatcher = Dispatcher::new(remote, config.remote_timeout);
        let cache = CacheCoordinator::new(
            store.clone(),
            queue.clone(),
            dispatcher.clone(),
            connectivity.clone(),
            events.clone(),
            &config.owner_id,
        );
        let sync = SyncManager::new(
            queue.clone(),
            store.clone(),
            dispatcher,
            connectivity.clone(),
            events.clone(),
        );
        Self {
            store,
            queue,
            connectivity,
            events,
            cache,
            sync,
            auto_sync: config.auto_sync,
        }
    }

    /// Spawn the connectivity listener and the post-sync refresher, and drain once
    /// if the client starts online.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let mut tasks = vec![self.sync.spawn_listener(), self.cache.follow_sync()];
        if self.connectivity.is_online() {
            let sync = self.sync.clone();
            tasks.push(tokio::spawn(async move {
                sync.trigger().await;
            }));
        }
        tasks
    }

    #[must_use]
    pub fn cache(&self) -> &CacheCoordinator {
        &self.cache
    }

    #[must_use]
    pub fn sync(&self) -> &SyncManager {
        &self.sync
    }

    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    #[must_use]
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    // --- Reads ---

    pub async fn get_recipes(&self, filter: &RecipeFilter) -> Result<Vec<Recipe>> {
        self.cache.get_recipes(filter).await
    }

    pub async fn get_recipe(&self, key: &str) -> Result<Recipe> {
        self.cache.get_recipe(key).await
    }

    pub async fn get_categories(&self) -> Result<Vec<Category>> {
        self.cache.get_categories().await
    }

    // --- Writes ---

    pub async fn create_recipe(&self, draft: NewRecipe) -> Result<Written<Recipe>> {
        let written = self.cache.create_recipe(draft).await?;
        self.nudge(written.route);
        Ok(written)
    }

    pub async fn update_recipe(&self, key: &str, patch: RecipePatch) -> Result<Written<Recipe>> {
        let written = self.cache.update_recipe(key, patch).await?;
        self.nudge(written.route);
        Ok(written)
    }

    pub async fn set_favorite(&self, key: &str, favorite: bool) -> Result<Written<Recipe>> {
        let written = self.cache.set_favorite(key, favorite).await?;
        self.nudge(written.route);
        Ok(written)
    }

    pub async fn toggle_favorite(&self, key: &str) -> Result<Written<Recipe>> {
        let written = self.cache.toggle_favorite(key).await?;
        self.nudge(written.route);
        Ok(written)
    }

    pub async fn replace_ingredients(
        &self,
        key: &str,
        ingredients: Vec<Ingredient>,
    ) -> Result<Written<Recipe>> {
        let written = self.cache.replace_ingredients(key, ingredients).await?;
        self.nudge(written.route);
        Ok(written)
    }

    pub async fn replace_steps(
        &self,
        key: &str,
        steps: Vec<PreparationStep>,
    ) -> Result<Written<Recipe>> {
        let written = self.cache.replace_steps(key, steps).await?;
        self.nudge(written.route);
        Ok(written)
    }

    pub async fn delete_recipe(&self, key: &str) -> Result<WriteRoute> {
        let route = self.cache.delete_recipe(key).await?;
        self.nudge(route);
        Ok(route)
    }

    /// A write queued while online sits behind older items; start draining them.
    fn nudge(&self, route: WriteRoute) {
        if !self.auto_sync || route != WriteRoute::Queued || !self.connectivity.is_online() {
            return;
        }
        debug!("write queued while online, starting drain");
        let sync = self.sync.clone();
        tokio::spawn(async move {
            sync.trigger().await;
        });
    }

    // --- Sync ---

    /// Drain the queue now if online.
    pub async fn sync_now(&self) -> DrainOutcome {
        self.sync.trigger().await
    }

    /// Re-fetch recipes and categories from the remote store.
    pub async fn refresh(&self) -> Result<usize> {
        self.cache.refresh_categories().await?;
        self.cache.refresh().await
    }

    pub async fn pending(&self) -> Result<Vec<MutationQueueItem>> {
        self.queue.all().await
    }

    pub async fn status(&self) -> Result<HubStatus> {
        let storage_available = self.store.is_available();
        let (pending, cached_recipes, cached_categories) = if storage_available {
            (
                self.queue.len().await?,
                self.store.count(Collection::Recipes).await?,
                self.store.count(Collection::Categories).await?,
            )
        } else {
            (0, 0, 0)
        };
        Ok(HubStatus {
            online: self.connectivity.is_online(),
            draining: self.sync.is_draining(),
            storage_available,
            pending,
            cached_recipes,
            cached_categories,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityId, Table};
    use crate::testing::MockRemote;

    fn hub(online: bool) -> (RecipeHub, Arc<MockRemote>) {
        let remote = MockRemote::new(42);
        let hub = RecipeHub::new(
            LocalStore::open_in_memory().unwrap(),
            remote.clone(),
            ConnectivityMonitor::new(online),
            &HubConfig::default().with_owner("user-1"),
        );
        (hub, remote)
    }

    async fn wait_for_sync(rx: &mut tokio::sync::broadcast::Receiver<SyncEvent>) {
        loop {
            if let SyncEvent::SyncCompleted(_) = rx.recv().await.unwrap() {
                return;
            }
        }
    }

    #[test]
    fn test_config_builders() {
        let config = HubConfig::default()
            .with_owner("u")
            .with_remote_timeout(Duration::from_secs(3))
            .with_event_capacity(8)
            .with_auto_sync(false);
        assert_eq!(config.owner_id, "u");
        assert_eq!(config.remote_timeout, Duration::from_secs(3));
        assert_eq!(config.event_capacity, 8);
        assert!(!config.auto_sync);
    }

    #[tokio::test]
    async fn test_offline_session_syncs_on_reconnect() {
        let (hub, remote) = hub(false);
        let tasks = hub.start();
        let mut rx = hub.subscribe();

        let draft = NewRecipe {
            ingredients: vec![Ingredient::named("Eggs", 0), Ingredient::named("Salt", 1)],
            ..NewRecipe::named("Tortilla")
        };
        let created = hub.create_recipe(draft).await.unwrap();
        assert!(created.value.id.is_temporary());
        assert_eq!(hub.status().await.unwrap().pending, 3);

        hub.connectivity().set_online(true);
        wait_for_sync(&mut rx).await;

        let status = hub.status().await.unwrap();
        assert_eq!(status.pending, 0);
        assert!(status.online);
        let recipe = hub.get_recipe("srv_42").await.unwrap();
        assert_eq!(recipe.id, EntityId::persisted("srv_42"));
        assert!(
            remote
                .rows(Table::Ingredients)
                .iter()
                .all(|r| r["recipe_id"] == "srv_42")
        );
        for task in tasks {
            task.abort();
        }
    }

    #[tokio::test]
    async fn test_write_queued_while_online_starts_drain() {
        let (hub, remote) = hub(false);
        hub.create_recipe(NewRecipe::named("First")).await.unwrap();
        hub.connectivity().set_online(true);
        let mut rx = hub.subscribe();

        let second = hub.create_recipe(NewRecipe::named("Second")).await.unwrap();
        assert_eq!(second.route, WriteRoute::Queued);
        wait_for_sync(&mut rx).await;

        assert!(hub.pending().await.unwrap().is_empty());
        assert_eq!(remote.rows(Table::Recipes).len(), 2);
    }

    #[tokio::test]
    async fn test_draft_deleted_offline_never_reaches_remote() {
        let (hub, remote) = hub(false);
        let draft = NewRecipe {
            ingredients: vec![Ingredient::named("Flour", 0)],
            ..NewRecipe::named("Draft")
        };
        let created = hub.create_recipe(draft).await.unwrap();
        let route = hub.delete_recipe(&created.value.id.key()).await.unwrap();
        assert_eq!(route, WriteRoute::Local);
        assert!(hub.pending().await.unwrap().is_empty());

        hub.connectivity().set_online(true);
        remote.fail_once_when(
            |c| matches!(c, crate::testing::Call::Insert(Table::Ingredients, _)),
            crate::error::Error::AuthorizationExpired("JWT expired".to_string()),
        );
        assert_eq!(hub.sync_now().await, DrainOutcome::Empty);
        assert_eq!(hub.refresh().await.unwrap(), 0);
        assert!(remote.rows(Table::Recipes).is_empty());
        assert!(remote.writes().is_empty());
    }

    #[tokio::test]
    async fn test_sync_now_offline_does_nothing() {
        let (hub, remote) = hub(false);
        hub.create_recipe(NewRecipe::named("Soup")).await.unwrap();
        assert_eq!(hub.sync_now().await, DrainOutcome::Offline);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_status_without_storage() {
        let hub = RecipeHub::new(
            LocalStore::unavailable("gone"),
            MockRemote::new(1),
            ConnectivityMonitor::new(true),
            &HubConfig::default(),
        );
        let status = hub.status().await.unwrap();
        assert!(!status.storage_available);
        assert_eq!(status.pending, 0);
    }
}
