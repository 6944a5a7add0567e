use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware as axum_mw, Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tower_http::cors::CorsLayer;

use crate::error::Error;
use crate::metrics::BlockSummary;
use crate::middleware::timing;
use crate::query;
use crate::slots::parse_timestamp;
use crate::store::Store;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Snapshot store, read here concurrently with the tailer's writes.
    pub store: Arc<Store>,
}

/// Builds the read-API `Router` with all routes and middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/single", get(single))
        .route("/api/range", get(range))
        .with_state(state)
        .layer(axum_mw::from_fn(timing))
        .layer(CorsLayer::permissive())
}

/// `from`/`to` are ISO-8601; `step` is seconds. All optional.
#[derive(Debug, Deserialize)]
pub struct RangeParams {
    pub from: Option<String>,
    pub to: Option<String>,
    pub step: Option<f64>,
}

// ─── GET /api/single ─────────────────────────────────────────────
/// Cumulative delta across [from, to] as one BlockSummary.

async fn single(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<BlockSummary>, AppError> {
    let from = parse_bound(params.from.as_deref())?;
    let to = parse_bound(params.to.as_deref())?;
    let delta = query::fetch_single(&state.store, from, to)?;
    Ok(Json(delta))
}

// ─── GET /api/range ──────────────────────────────────────────────
/// Per-window deltas across [from, to], keyed by snapshot timestamp.

async fn range(
    State(state): State<Arc<AppState>>,
    Query(params): Query<RangeParams>,
) -> Result<Json<BTreeMap<String, BlockSummary>>, AppError> {
    let from = parse_bound(params.from.as_deref())?;
    let to = parse_bound(params.to.as_deref())?;
    let step_secs = params.step.unwrap_or(query::DEFAULT_STEP_SECS as f64);
    if !step_secs.is_finite() || step_secs <= 0.0 {
        return Err(AppError::BadRequest(
            "step must be a positive number of seconds".into(),
        ));
    }
    let step = Duration::milliseconds((step_secs * 1000.0) as i64);
    let windows = query::fetch_by_time_range(&state.store, from, to, step)?;
    Ok(Json(windows))
}

fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>, AppError> {
    raw.map(|text| {
        parse_timestamp(text)
            .map_err(|_| AppError::BadRequest(format!("unparseable timestamp '{text}'")))
    })
    .transpose()
}

// ─── Unified error type ──────────────────────────────────────────

#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        match err {
            Error::EmptyStore | Error::OutOfRange(_) => Self::NotFound(err.to_string()),
            Error::InvalidStep | Error::Timestamp { .. } => Self::BadRequest(err.to_string()),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error":  message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}
