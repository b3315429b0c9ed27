use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use recipehub_core::error::Error;
use recipehub_core::models::{Row, Table};
use recipehub_core::remote::{Condition, RemoteFilter};
use serde::Serialize;
use serde_json::json;
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{error, info, warn};

use crate::rowstore::RowStore;

const BODY_LIMIT: usize = 5 * 1024 * 1024; // 5 MB

#[derive(Clone)]
pub struct AppState {
    rows: Arc<Mutex<RowStore>>,
    api_key: Option<String>,
}

impl AppState {
    pub fn new(rows: RowStore, api_key: Option<String>) -> Self {
        Self {
            rows: Arc::new(Mutex::new(rows)),
            api_key,
        }
    }

    fn rows(&self) -> MutexGuard<'_, RowStore> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type Pairs = Query<Vec<(String, String)>>;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(what) => Self::NotFound(format!("{what} not found")),
            Error::Malformed(msg) if msg.ends_with("already exists") => Self::Conflict(msg),
            Error::Malformed(msg) => Self::BadRequest(msg),
            other => Self::Internal(other),
        }
    }
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_filter(pairs: Vec<(String, String)>) -> Result<RemoteFilter, ApiError> {
    RemoteFilter::from_query_pairs(pairs).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// The single `id=eq.{id}` condition a row-level write targets.
fn target_id(filter: &RemoteFilter) -> Result<String, ApiError> {
    match filter.conditions.as_slice() {
        [Condition::Eq { column, value }] if column == "id" => Ok(value.clone()),
        _ => Err(ApiError::BadRequest(
            "updates must target exactly one id=eq.{id}".to_string(),
        )),
    }
}

async fn list_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(pairs): Pairs,
) -> Result<Json<Vec<Row>>, ApiError> {
    let table: Table = table.parse()?;
    let filter = parse_filter(pairs)?;
    let rows = state.rows().fetch(table, &filter)?;
    Ok(Json(rows))
}

async fn insert_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(row): Json<Row>,
) -> Result<(StatusCode, Json<Row>), ApiError> {
    let table: Table = table.parse()?;
    let stored = state.rows().insert(table, row)?;
    Ok((StatusCode::CREATED, Json(stored)))
}

async fn update_row(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(pairs): Pairs,
    Json(patch): Json<Row>,
) -> Result<Json<Row>, ApiError> {
    let table: Table = table.parse()?;
    let id = target_id(&parse_filter(pairs)?)?;
    let row = state.rows().update(table, &id, patch)?;
    Ok(Json(row))
}

async fn delete_rows(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(pairs): Pairs,
) -> Result<StatusCode, ApiError> {
    let table: Table = table.parse()?;
    let filter = parse_filter(pairs)?;
    if filter.conditions.is_empty() {
        return Err(ApiError::BadRequest(
            "refusing to delete without a filter".to_string(),
        ));
    }
    state.rows().delete_matching(table, &filter)?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(
            "/rest/v1/{table}",
            get(list_rows)
                .post(insert_row)
                .patch(update_row)
                .delete(delete_rows),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .route("/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .with_state(state)
}

// --- Server startup ---

/// First and last four characters of `key`, or nothing for short keys.
fn redact_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() < 12 {
        return "****".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub async fn start_server(
    rows: RowStore,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let app = build_router(AppState::new(rows, api_key.clone()));

    if let Some(ref key) = api_key {
        eprintln!(
            "API key: {} (see api_key file in data directory)",
            redact_key(key)
        );
    } else {
        warn!("authentication disabled (--no-auth), API is open to anyone");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        warn!(%bind, "listening beyond localhost with no authentication");
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}")).await?;
    info!(address = %listener.local_addr()?, "remote store listening");
    eprintln!("Listening on http://{bind}:{port}");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}
