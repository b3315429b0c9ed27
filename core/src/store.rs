use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{Category, Recipe};

/// Named collections of the local store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Recipes,
    Categories,
    SyncQueue,
}

impl Collection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Recipes => "recipes",
            Self::Categories => "categories",
            Self::SyncQueue => "sync_queue",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A record that lives in one collection of the local store.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    const COLLECTION: Collection;

    /// Collection-specific identity.
    fn key(&self) -> String;

    /// Secondary ordering used by `get_all`; ties are broken by key.
    fn sort_key(&self) -> i64 {
        0
    }
}

impl Document for Recipe {
    const COLLECTION: Collection = Collection::Recipes;

    fn key(&self) -> String {
        self.id.key()
    }
}

impl Document for Category {
    const COLLECTION: Collection = Collection::Categories;

    fn key(&self) -> String {
        self.id.clone()
    }

    fn sort_key(&self) -> i64 {
        self.order_index
    }
}

#[derive(Clone)]
enum Backend {
    Sqlite(Arc<Mutex<Connection>>),
    Unavailable(Arc<str>),
}

/// Durable keyed store of recipes, categories and the mutation queue.
///
/// Every call is atomic and committed before it returns. Blocking SQLite work runs
/// on tokio's blocking pool so callers can await it from async code.
#[derive(Clone)]
pub struct LocalStore {
    backend: Backend,
}

impl fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.backend {
            Backend::Sqlite(_) => f.write_str("LocalStore(sqlite)"),
            Backend::Unavailable(reason) => write!(f, "LocalStore(unavailable: {reason})"),
        }
    }
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            Error::StorageUnavailable(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Open the store at `path`, or fall back to a store whose every call fails with
    /// `StorageUnavailable` so the caller degrades to remote-only behavior.
    #[must_use]
    pub fn open_or_unavailable(path: &Path) -> Self {
        match Self::open(path) {
            Ok(store) => store,
            Err(e) => {
                warn!(error = %e, "local store unavailable, running remote-only");
                Self::unavailable(e.to_string())
            }
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason: String = reason.into();
        Self {
            backend: Backend::Unavailable(reason.into()),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self.backend, Backend::Sqlite(_))
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            backend: Backend::Sqlite(Arc::new(Mutex::new(conn))),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = match &self.backend {
            Backend::Sqlite(conn) => Arc::clone(conn),
            Backend::Unavailable(reason) => {
                return Err(Error::StorageUnavailable(reason.to_string()));
            }
        };
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await?
    }

    /// Every document of `T`'s collection, ordered by sort key then key.
    pub async fn get_all<T: Document>(&self) -> Result<Vec<T>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT body FROM {} ORDER BY sort_key, key",
                T::COLLECTION.as_str()
            );
            let mut stmt = conn.prepare(&sql)?;
            let bodies = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            bodies
                .iter()
                .map(|body| Ok(serde_json::from_str(body)?))
                .collect()
        })
        .await
    }

    pub async fn get<T: Document>(&self, key: &str) -> Result<Option<T>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let sql = format!("SELECT body FROM {} WHERE key = ?1", T::COLLECTION.as_str());
            let body: Option<String> = conn
                .query_row(&sql, params![key], |row| row.get(0))
                .optional()?;
            body.map(|b| serde_json::from_str(&b).map_err(Error::from))
                .transpose()
        })
        .await
    }

    /// Upsert one document by key.
    pub async fn put<T: Document + Clone>(&self, item: &T) -> Result<()> {
        let item = item.clone();
        self.with_conn(move |conn| {
            upsert(conn, &item)?;
            debug!(collection = %T::COLLECTION, key = %item.key(), "put");
            Ok(())
        })
        .await
    }

    /// Upsert many documents in a single transaction.
    pub async fn put_all<T: Document + Clone>(&self, items: &[T]) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }
        self.replace::<T>(Vec::new(), items).await
    }

    /// Delete `removed` keys and upsert `items` in a single transaction.
    pub async fn replace<T: Document + Clone>(
        &self,
        removed: Vec<String>,
        items: &[T],
    ) -> Result<()> {
        let items = items.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!("DELETE FROM {} WHERE key = ?1", T::COLLECTION.as_str());
            for key in &removed {
                tx.execute(&sql, params![key])?;
            }
            for item in &items {
                upsert(&tx, item)?;
            }
            tx.commit()?;
            debug!(
                collection = %T::COLLECTION,
                removed = removed.len(),
                written = items.len(),
                "batch committed"
            );
            Ok(())
        })
        .await
    }

    /// Delete one document. Deleting a missing key is not an error.
    pub async fn delete(&self, collection: Collection, key: &str) -> Result<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let sql = format!("DELETE FROM {} WHERE key = ?1", collection.as_str());
            conn.execute(&sql, params![key])?;
            Ok(())
        })
        .await
    }

    pub async fn clear(&self, collection: Collection) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(&format!("DELETE FROM {}", collection.as_str()), [])?;
            Ok(())
        })
        .await
    }

    pub async fn count(&self, collection: Collection) -> Result<usize> {
        self.with_conn(move |conn| {
            let n: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", collection.as_str()),
                [],
                |row| row.get(0),
            )?;
            Ok(usize::try_from(n).unwrap_or(0))
        })
        .await
    }
}

fn upsert<T: Document>(conn: &Connection, item: &T) -> Result<()> {
    let body = serde_json::to_string(item)?;
    let sql = format!(
        "INSERT INTO {} (key, sort_key, body) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET sort_key = excluded.sort_key, body = excluded.body",
        T::COLLECTION.as_str()
    );
    conn.execute(&sql, params![item.key(), item.sort_key(), body])?;
    Ok(())
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS recipes (
                key TEXT PRIMARY KEY,
                sort_key INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS categories (
                key TEXT PRIMARY KEY,
                sort_key INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS sync_queue (
                key TEXT PRIMARY KEY,
                sort_key INTEGER NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_sync_queue_sort ON sync_queue(sort_key);

            PRAGMA user_version = 1;",
        )?;
    }

    if version < 2 {
        // Secondary lookups for the listing filters.
        conn.execute_batch(
            "CREATE INDEX IF NOT EXISTS idx_recipes_category
                ON recipes(json_extract(body, '$.category_id'));
             CREATE INDEX IF NOT EXISTS idx_recipes_favorite
                ON recipes(json_extract(body, '$.is_favorite'));

             PRAGMA user_version = 2;",
        )?;
    }

    Ok(())
}
