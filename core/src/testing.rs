use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};
use crate::models::{Row, Table};
use crate::remote::{RemoteAdapter, RemoteFilter, value_text};

/// A call received by `MockRemote`.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Fetch(Table),
    Insert(Table, Row),
    Update(Table, String, Row),
    SoftDelete(Table, String),
    HardDelete(Table, String, String),
}

impl Call {
    pub fn table(&self) -> Table {
        match self {
            Call::Fetch(t)
            | Call::Insert(t, _)
            | Call::Update(t, _, _)
            | Call::SoftDelete(t, _)
            | Call::HardDelete(t, _, _) => *t,
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Call::Fetch(_))
    }
}

type Predicate = Box<dyn Fn(&Call) -> bool + Send>;

struct Failure {
    matches: Predicate,
    error: Error,
    remaining: Option<usize>,
}

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<Row>>,
    calls: Vec<Call>,
    next_id: u64,
    failures: Vec<Failure>,
    delay: Option<Duration>,
    gate: Option<Gate>,
}

#[derive(Clone)]
struct Gate {
    release: Arc<Semaphore>,
    arrived: Arc<Semaphore>,
}

/// In-memory remote store that records calls and fails on demand.
pub struct MockRemote {
    state: Mutex<State>,
}

impl MockRemote {
    /// Server ids are assigned as `srv_{n}` starting from `first_id`.
    pub fn new(first_id: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State {
                next_id: first_id,
                ..State::default()
            }),
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn seed(&self, table: Table, rows: Vec<Value>) {
        let rows = rows
            .into_iter()
            .map(|v| crate::models::to_row(&v).unwrap());
        self.state().tables.entry(table).or_default().extend(rows);
    }

    pub fn rows(&self, table: Table) -> Vec<Row> {
        self.state().tables.get(&table).cloned().unwrap_or_default()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn writes(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_write).collect()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Fail every call matching `matches` with `error`.
    pub fn fail_when(&self, matches: impl Fn(&Call) -> bool + Send + 'static, error: Error) {
        self.state().failures.push(Failure {
            matches: Box::new(matches),
            error,
            remaining: None,
        });
    }

    /// Fail the next call matching `matches` only.
    pub fn fail_once_when(&self, matches: impl Fn(&Call) -> bool + Send + 'static, error: Error) {
        self.state().failures.push(Failure {
            matches: Box::new(matches),
            error,
            remaining: Some(1),
        });
    }

    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = Some(delay);
    }

    /// Block every subsequent call until `release` hands out permits.
    pub fn hold(&self) {
        self.state().gate = Some(Gate {
            release: Arc::new(Semaphore::new(0)),
            arrived: Arc::new(Semaphore::new(0)),
        });
    }

    pub fn release(&self, calls: usize) {
        if let Some(gate) = &self.state().gate {
            gate.release.add_permits(calls);
        }
    }

    /// Wait until a call is blocked by `hold`.
    pub async fn entered(&self) {
        let arrived = self.state().gate.as_ref().map(|g| Arc::clone(&g.arrived));
        if let Some(arrived) = arrived {
            if let Ok(permit) = arrived.acquire().await {
                permit.forget();
            }
        }
    }

    async fn begin(&self, call: Call) -> Result<()> {
        let (delay, gate) = {
            let mut state = self.state();
            state.calls.push(call.clone());
            (state.delay, state.gate.clone())
        };
        if let Some(gate) = gate {
            gate.arrived.add_permits(1);
            if let Ok(permit) = gate.release.acquire().await {
                permit.forget();
            }
        }
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        let hit = state.failures.iter_mut().find(|f| {
            (f.matches)(&call) && f.remaining.is_none_or(|n| n > 0)
        });
        if let Some(failure) = hit {
            if let Some(n) = failure.remaining.as_mut() {
                *n -= 1;
            }
            return Err(failure.error.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl RemoteAdapter for MockRemote {
    async fn fetch(&self, table: Table, filter: &RemoteFilter) -> Result<Vec<Row>> {
        self.begin(Call::Fetch(table)).await?;
        Ok(filter.apply(self.rows(table)))
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        self.begin(Call::Insert(table, row.clone())).await?;
        let mut state = self.state();
        let mut stored = row;
        if !stored.contains_key("id") {
            let id = format!("srv_{}", state.next_id);
            state.next_id += 1;
            stored.insert("id".into(), Value::from(id));
        }
        stored
            .entry("created_at")
            .or_insert_with(|| Value::from("2024-06-01T10:00:00Z"));
        if table.has_active_flag() {
            stored.entry("is_active").or_insert(Value::Bool(true));
        }
        state.tables.entry(table).or_default().push(stored.clone());
        Ok(stored)
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row> {
        self.begin(Call::Update(table, id.to_string(), patch.clone()))
            .await?;
        let mut state = self.state();
        let row = state
            .tables
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|r| r.get("id").map(value_text).as_deref() == Some(id))
            .ok_or_else(|| Error::RemoteRejected {
                status: 404,
                message: format!("{table} {id} not found"),
            })?;
        row.extend(patch);
        Ok(row.clone())
    }

    async fn soft_delete(&self, table: Table, id: &str) -> Result<()> {
        self.begin(Call::SoftDelete(table, id.to_string())).await?;
        let mut state = self.state();
        if let Some(row) = state
            .tables
            .entry(table)
            .or_default()
            .iter_mut()
            .find(|r| r.get("id").map(value_text).as_deref() == Some(id))
        {
            row.insert("is_active".into(), Value::Bool(false));
        }
        Ok(())
    }

    async fn hard_delete(&self, table: Table, column: &str, value: &str) -> Result<()> {
        self.begin(Call::HardDelete(
            table,
            column.to_string(),
            value.to_string(),
        ))
        .await?;
        self.state()
            .tables
            .entry(table)
            .or_default()
            .retain(|r| r.get(column).map(value_text).as_deref() != Some(value));
        Ok(())
    }
}
