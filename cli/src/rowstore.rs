use std::path::Path;

use chrono::{SecondsFormat, Utc};
use recipehub_core::error::{Error, Result};
use recipehub_core::models::{Row, Table};
use recipehub_core::remote::RemoteFilter;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;
use tracing::debug;

/// Relational rows behind the development server, stored as JSON bodies keyed by
/// table and id.
pub struct RowStore {
    conn: Connection,
}

impl RowStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|e| {
            Error::StorageUnavailable(format!("failed to open {}: {e}", path.display()))
        })?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self { conn })
    }

    pub fn fetch(&self, table: Table, filter: &RemoteFilter) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare("SELECT body FROM rows WHERE tbl = ?1 ORDER BY seq")?;
        let bodies = stmt
            .query_map(params![table.as_str()], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let rows = bodies
            .iter()
            .map(|body| Ok(serde_json::from_str(body)?))
            .collect::<Result<Vec<Row>>>()?;
        Ok(filter.apply(rows))
    }

    /// Store a new row. The id, timestamps and active flag are filled in when the
    /// caller leaves them out.
    pub fn insert(&self, table: Table, mut row: Row) -> Result<Row> {
        let id = match row.get("id") {
            Some(Value::String(id)) if !id.is_empty() => id.clone(),
            Some(Value::Null | Value::String(_)) | None => uuid::Uuid::new_v4().to_string(),
            Some(other) => {
                return Err(Error::Malformed(format!("id must be a string, got {other}")));
            }
        };
        let now = timestamp();
        row.insert("id".into(), Value::from(id.clone()));
        row.entry("created_at")
            .or_insert_with(|| Value::from(now.clone()));
        row.insert("updated_at".into(), Value::from(now));
        if table.has_active_flag() {
            row.entry("is_active").or_insert(Value::Bool(true));
        }

        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO rows (tbl, id, body) VALUES (?1, ?2, ?3)",
            params![table.as_str(), id, serde_json::to_string(&row)?],
        )?;
        if inserted == 0 {
            return Err(Error::Malformed(format!("{table} {id} already exists")));
        }
        debug!(%table, %id, "row inserted");
        Ok(row)
    }

    /// Merge `patch` into the row and return the result.
    pub fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row> {
        let mut row = self
            .get(table, id)?
            .ok_or_else(|| Error::NotFound(format!("{table} {id}")))?;
        for (column, value) in patch {
            if column != "id" {
                row.insert(column, value);
            }
        }
        row.insert("updated_at".into(), Value::from(timestamp()));
        self.conn.execute(
            "UPDATE rows SET body = ?3 WHERE tbl = ?1 AND id = ?2",
            params![table.as_str(), id, serde_json::to_string(&row)?],
        )?;
        debug!(%table, %id, "row updated");
        Ok(row)
    }

    /// Delete every row of `table` matching `filter`, returning how many went.
    pub fn delete_matching(&self, table: Table, filter: &RemoteFilter) -> Result<usize> {
        let doomed: Vec<String> = self
            .fetch(table, filter)?
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_str).map(str::to_string))
            .collect();
        let tx = self.conn.unchecked_transaction()?;
        for id in &doomed {
            tx.execute(
                "DELETE FROM rows WHERE tbl = ?1 AND id = ?2",
                params![table.as_str(), id],
            )?;
        }
        tx.commit()?;
        debug!(%table, removed = doomed.len(), "rows deleted");
        Ok(doomed.len())
    }

    pub fn get(&self, table: Table, id: &str) -> Result<Option<Row>> {
        let body: Option<String> = self
            .conn
            .query_row(
                "SELECT body FROM rows WHERE tbl = ?1 AND id = ?2",
                params![table.as_str(), id],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| serde_json::from_str(&b).map_err(Error::from))
            .transpose()
    }
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn migrate(conn: &Connection) -> Result<()> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rows (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                tbl TEXT NOT NULL,
                id TEXT NOT NULL,
                body TEXT NOT NULL,
                UNIQUE (tbl, id)
            );

            PRAGMA user_version = 1;",
        )?;
    }

    Ok(())
}
