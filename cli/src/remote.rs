use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use recipehub_core::error::{Error, Result};
use recipehub_core::models::{Row, Table};
use recipehub_core::remote::{RemoteAdapter, RemoteFilter};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

/// Remote store reached over HTTP with PostgREST-style endpoints under
/// `{base}/rest/v1/{table}`.
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRemote {
    pub fn new(base_url: &str, token: Option<String>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!(
                "recipehub/{} (recipe sync)",
                env!("CARGO_PKG_VERSION")
            ))
            .timeout(Duration::from_secs(10))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Whether the server answers its health endpoint.
    pub async fn is_reachable(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!(error = %e, "remote unreachable");
                false
            }
        }
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        let url = format!("{}/rest/v1/{table}", self.base_url);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let resp = builder
            .send()
            .await
            .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = error_message(resp).await;
        warn!(status = status.as_u16(), %message, "remote request failed");
        Err(classify(status, message))
    }
}

/// Map a failed HTTP status onto the engine's failure taxonomy.
fn classify(status: StatusCode, message: String) -> Error {
    match status.as_u16() {
        401 | 403 => Error::AuthorizationExpired(message),
        408 | 429 | 500..=599 => Error::NetworkUnavailable(format!("{status}: {message}")),
        code => Error::RemoteRejected {
            status: code,
            message,
        },
    }
}

async fn error_message(resp: Response) -> String {
    let text = resp.text().await.unwrap_or_default();
    serde_json::from_str::<Value>(&text)
        .ok()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or(text)
}

async fn json_body<T: serde::de::DeserializeOwned>(resp: Response) -> Result<T> {
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::NetworkUnavailable(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[async_trait]
impl RemoteAdapter for HttpRemote {
    async fn fetch(&self, table: Table, filter: &RemoteFilter) -> Result<Vec<Row>> {
        let req = self
            .request(Method::GET, table)
            .query(&filter.to_query_pairs());
        json_body(self.send(req).await?).await
    }

    async fn insert(&self, table: Table, row: Row) -> Result<Row> {
        let req = self.request(Method::POST, table).json(&row);
        json_body(self.send(req).await?).await
    }

    async fn update(&self, table: Table, id: &str, patch: Row) -> Result<Row> {
        let req = self
            .request(Method::PATCH, table)
            .query(&[("id", format!("eq.{id}"))])
            .json(&patch);
        json_body(self.send(req).await?).await
    }

    async fn soft_delete(&self, table: Table, id: &str) -> Result<()> {
        let mut patch = Row::new();
        patch.insert("is_active".into(), Value::Bool(false));
        match self.update(table, id, patch).await {
            // Already gone remotely.
            Err(Error::RemoteRejected { status: 404, .. }) => {
                debug!(%table, %id, "soft delete of missing row");
                Ok(())
            }
            other => other.map(|_| ()),
        }
    }

    async fn hard_delete(&self, table: Table, column: &str, value: &str) -> Result<()> {
        let req = self
            .request(Method::DELETE, table)
            .query(&[(column, format!("eq.{value}"))]);
        self.send(req).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rowstore::RowStore;
    use recipehub_core::FailureClass;
    use serde_json::json;

    async fn spawn_server(api_key: Option<&str>) -> String {
        let app = crate::server::build_router(crate::server::AppState::new(
            RowStore::open_in_memory().unwrap(),
            api_key.map(str::to_string),
        ));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn row(v: Value) -> Row {
        recipehub_core::models::to_row(&v).unwrap()
    }

    #[test]
    fn test_classify_statuses() {
        let c = |s: u16| classify(StatusCode::from_u16(s).unwrap(), "m".into()).failure_class();
        assert_eq!(c(401), FailureClass::Fatal);
        assert_eq!(c(403), FailureClass::Fatal);
        assert_eq!(c(400), FailureClass::Permanent);
        assert_eq!(c(409), FailureClass::Permanent);
        assert_eq!(c(429), FailureClass::Transient);
        assert_eq!(c(503), FailureClass::Transient);
    }

    #[tokio::test]
    async fn test_round_trip_against_dev_server() {
        let base = spawn_server(Some("k")).await;
        let remote = HttpRemote::new(&base, Some("k".into())).unwrap();
        assert!(remote.is_reachable().await);

        let stored = remote
            .insert(
                Table::Recipes,
                row(json!({"name": "Soup", "user_id": "u1", "is_favorite": false})),
            )
            .await
            .unwrap();
        let id = stored["id"].as_str().unwrap().to_string();
        assert_eq!(stored["is_active"], true);

        for (n, text) in [(1, "Chop"), (2, "Boil")] {
            remote
                .insert(
                    Table::PreparationSteps,
                    row(json!({"recipe_id": id, "step_number": n, "instruction": text})),
                )
                .await
                .unwrap();
        }

        let updated = remote
            .update(Table::Recipes, &id, row(json!({"is_favorite": true})))
            .await
            .unwrap();
        assert_eq!(updated["is_favorite"], true);

        let steps = remote
            .fetch(
                Table::PreparationSteps,
                &RemoteFilter::new()
                    .is_in("recipe_id", [id.as_str()])
                    .order_by("step_number", true),
            )
            .await
            .unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0]["instruction"], "Boil");

        remote
            .hard_delete(Table::PreparationSteps, "recipe_id", &id)
            .await
            .unwrap();
        remote.soft_delete(Table::Recipes, &id).await.unwrap();
        remote.soft_delete(Table::Recipes, "missing").await.unwrap();

        let active = remote
            .fetch(
                Table::Recipes,
                &RemoteFilter::new().eq("user_id", "u1").eq("is_active", true),
            )
            .await
            .unwrap();
        assert!(active.is_empty());
        let steps = remote
            .fetch(Table::PreparationSteps, &RemoteFilter::new())
            .await
            .unwrap();
        assert!(steps.is_empty());
    }

    #[tokio::test]
    async fn test_wrong_token_is_authorization_expired() {
        let base = spawn_server(Some("right")).await;
        let remote = HttpRemote::new(&base, Some("wrong".into())).unwrap();
        let err = remote
            .fetch(Table::Recipes, &RemoteFilter::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthorizationExpired(_)));
    }

    #[tokio::test]
    async fn test_update_of_missing_row_is_rejected() {
        let base = spawn_server(None).await;
        let remote = HttpRemote::new(&base, None).unwrap();
        let err = remote
            .update(Table::Recipes, "nope", row(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteRejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_unavailable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let remote = HttpRemote::new(&format!("http://{addr}/"), None).unwrap();
        assert_eq!(remote.base_url(), format!("http://{addr}"));
        assert!(!remote.is_reachable().await);
        let err = remote
            .insert(Table::Recipes, row(json!({"name": "x"})))
            .await
            .unwrap_err();
        assert!(err.is_network());
    }
}
