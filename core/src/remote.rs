use std::cmp::Ordering;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::models::{Row, Table};

/// The remote relational store, reached over an authenticated channel.
///
/// Implementations report an expired session as `Error::AuthorizationExpired` and
/// transport problems as `Error::NetworkUnavailable`.
#[async_trait]
pub trait RemoteAdapter: Send + Sync {
    async fn fetch(&self, table: Table, filter: &RemoteFilter) -> Result<Vec<Row>>;

    /// Insert a row and return it as stored, including its server id.
    async fn insert(&self, table: Table, row: Row) -> Result<Row>;

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row>;

    /// Flag a row inactive.
    async fn soft_delete(&self, table: Table, id: &str) -> Result<()>;

    /// Remove every row whose `column` equals `value`.
    async fn hard_delete(&self, table: Table, column: &str, value: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    Eq { column: String, value: String },
    In { column: String, values: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

/// Row filter understood by every remote adapter.
///
/// Encodes to PostgREST-style query pairs: `col=eq.v`, `col=in.(a,b)`,
/// `order=col.asc|desc`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFilter {
    pub conditions: Vec<Condition>,
    pub order: Option<OrderBy>,
}

impl RemoteFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn eq(mut self, column: &str, value: impl ToString) -> Self {
        self.conditions.push(Condition::Eq {
            column: column.to_string(),
            value: value.to_string(),
        });
        self
    }

    #[must_use]
    pub fn is_in<I, S>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        self.conditions.push(Condition::In {
            column: column.to_string(),
            values: values.into_iter().map(|v| v.to_string()).collect(),
        });
        self
    }

    #[must_use]
    pub fn order_by(mut self, column: &str, descending: bool) -> Self {
        self.order = Some(OrderBy {
            column: column.to_string(),
            descending,
        });
        self
    }

    #[must_use]
    pub fn to_query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<(String, String)> = self
            .conditions
            .iter()
            .map(|c| match c {
                Condition::Eq { column, value } => (column.clone(), format!("eq.{value}")),
                Condition::In { column, values } => {
                    (column.clone(), format!("in.({})", values.join(",")))
                }
            })
            .collect();
        if let Some(order) = &self.order {
            let dir = if order.descending { "desc" } else { "asc" };
            pairs.push(("order".to_string(), format!("{}.{dir}", order.column)));
        }
        pairs
    }

    pub fn from_query_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut filter = Self::new();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key == "order" {
                let (column, dir) = value.rsplit_once('.').unwrap_or((value, "asc"));
                let descending = match dir {
                    "asc" => false,
                    "desc" => true,
                    other => {
                        return Err(Error::Malformed(format!("unknown order direction '{other}'")));
                    }
                };
                filter = filter.order_by(column, descending);
            } else if let Some(v) = value.strip_prefix("eq.") {
                filter = filter.eq(key, v);
            } else if let Some(list) = value
                .strip_prefix("in.(")
                .and_then(|rest| rest.strip_suffix(')'))
            {
                let values = list.split(',').filter(|v| !v.is_empty());
                filter = filter.is_in(key, values);
            } else {
                return Err(Error::Malformed(format!(
                    "unsupported filter '{key}={value}'"
                )));
            }
        }
        Ok(filter)
    }

    #[must_use]
    pub fn matches(&self, row: &Row) -> bool {
        self.conditions.iter().all(|c| match c {
            Condition::Eq { column, value } => {
                row.get(column).map(value_text).as_deref() == Some(value.as_str())
            }
            Condition::In { column, values } => row
                .get(column)
                .map(value_text)
                .is_some_and(|v| values.contains(&v)),
        })
    }

    /// Keep matching rows and sort them by the requested order.
    #[must_use]
    pub fn apply(&self, rows: Vec<Row>) -> Vec<Row> {
        let mut out: Vec<Row> = rows.into_iter().filter(|r| self.matches(r)).collect();
        if let Some(order) = &self.order {
            out.sort_by(|a, b| {
                let ord = compare_values(a.get(&order.column), b.get(&order.column));
                if order.descending { ord.reverse() } else { ord }
            });
        }
        out
    }
}

/// Text form of a column value as it appears in a query string.
#[must_use]
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Number(x)), Some(Value::Number(y))) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(x), Some(y)) => value_text(x).cmp(&value_text(y)),
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(v: Value) -> Row {
        crate::models::to_row(&v).unwrap()
    }

    #[test]
    fn test_query_pairs() {
        let filter = RemoteFilter::new()
            .eq("user_id", "u1")
            .eq("is_active", true)
            .is_in("recipe_id", ["a", "b"])
            .order_by("created_at", true);
        let pairs = filter.to_query_pairs();
        assert_eq!(
            pairs,
            vec![
                ("user_id".to_string(), "eq.u1".to_string()),
                ("is_active".to_string(), "eq.true".to_string()),
                ("recipe_id".to_string(), "in.(a,b)".to_string()),
                ("order".to_string(), "created_at.desc".to_string()),
            ]
        );
        assert_eq!(RemoteFilter::from_query_pairs(pairs).unwrap(), filter);
    }

    #[test]
    fn test_from_query_pairs_rejects_unknown_operators() {
        assert!(RemoteFilter::from_query_pairs([("name", "ilike.*soup*")]).is_err());
        assert!(RemoteFilter::from_query_pairs([("order", "name.sideways")]).is_err());
    }

    #[test]
    fn test_matches_compares_text_forms() {
        let r = row(json!({"user_id": "u1", "is_active": true, "order_index": 3}));
        assert!(RemoteFilter::new().eq("is_active", true).matches(&r));
        assert!(RemoteFilter::new().eq("order_index", 3).matches(&r));
        assert!(!RemoteFilter::new().eq("user_id", "u2").matches(&r));
        assert!(!RemoteFilter::new().eq("missing", "x").matches(&r));
        assert!(RemoteFilter::new().is_in("user_id", ["u0", "u1"]).matches(&r));
    }

    #[test]
    fn test_apply_sorts_numbers_numerically() {
        let rows = vec![
            row(json!({"id": "a", "order_index": 10})),
            row(json!({"id": "b", "order_index": 2})),
            row(json!({"id": "c", "order_index": 7})),
        ];
        let sorted = RemoteFilter::new().order_by("order_index", false).apply(rows);
        let ids: Vec<&str> = sorted.iter().map(|r| r["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["b", "c", "a"]);
    }
}
