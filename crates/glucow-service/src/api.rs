//! REST API endpoints for glucow-service.
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/api/health` | Liveness check |
//! | GET | `/api/status` | Published sync snapshot and history size |
//! | GET | `/api/readings` | Chart points in the display unit |
//! | GET | `/api/settings` | Display unit, bands and toggles |
//! | PUT | `/api/settings/unit` | Switch the display unit live |
//! | POST | `/api/history/save` | Persist the history now |
//! | POST | `/api/sync/now` | Fetch now, outside the minute schedule |
//!
//! All errors are returned as `{"error": "<message>"}` via [`AppError`].
//!
//! # Lock Acquisition
//!
//! Only `state.history` is a lock. Handlers hold it for the duration of a
//! query or save and never across another await.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};
use glucow_core::{FetchOutcome, SyncSnapshot};
use glucow_core::units::bands_for_display;
use glucow_types::{ClinicalBands, DisplayUnit};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::state::AppState;

/// Create the API router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/status", get(get_status))
        .route("/api/readings", get(get_readings))
        .route("/api/settings", get(get_settings))
        .route("/api/settings/unit", put(set_unit))
        .route("/api/history/save", post(save_history))
        .route("/api/sync/now", post(sync_now))
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: OffsetDateTime::now_utc(),
    })
}

/// Service status.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    pub unit: DisplayUnit,
    pub sync: SyncSnapshot,
    pub history: HistoryStatus,
}

/// History summary.
#[derive(Debug, Serialize)]
pub struct HistoryStatus {
    pub count: usize,
    /// Unit recorded by the last save.
    pub saved_unit: Option<DisplayUnit>,
    pub autosave: bool,
}

async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    let history = {
        let history = state.history.lock().await;
        HistoryStatus {
            count: history.len(),
            saved_unit: history.saved_unit(),
            autosave: state.config.storage.autosave,
        }
    };

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        started_at: state.started_at,
        unit: state.unit.get(),
        sync: state.scheduler.snapshot(),
        history,
    })
}

/// Query parameters for `/api/readings`.
#[derive(Debug, Deserialize, Default)]
pub struct ReadingsQuery {
    /// RFC 3339 lower bound (inclusive).
    pub since: Option<String>,
    /// Keep only the newest `limit` points.
    pub limit: Option<usize>,
}

impl ReadingsQuery {
    /// Parse `since`, rejecting malformed timestamps and a zero limit.
    pub fn validate(&self) -> Result<Option<OffsetDateTime>, AppError> {
        if self.limit == Some(0) {
            return Err(AppError::BadRequest(
                "'limit' must be at least 1".to_string(),
            ));
        }
        self.since
            .as_deref()
            .map(|since| {
                OffsetDateTime::parse(since, &Rfc3339).map_err(|e| {
                    AppError::BadRequest(format!("Invalid 'since' timestamp '{}': {}", since, e))
                })
            })
            .transpose()
    }
}

/// A chart point.
#[derive(Debug, Serialize)]
pub struct ChartPoint {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: f64,
}

/// Chart points in the display unit.
#[derive(Debug, Serialize)]
pub struct ReadingsResponse {
    pub unit: DisplayUnit,
    pub count: usize,
    pub points: Vec<ChartPoint>,
}

/// Get chart points.
///
/// # Errors
///
/// - [`AppError::NotFound`] if the graph is disabled
/// - [`AppError::BadRequest`] for a malformed `since` or a zero `limit`
async fn get_readings(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ReadingsQuery>,
) -> Result<Json<ReadingsResponse>, AppError> {
    if !state.config.display.enable_graph {
        return Err(AppError::NotFound("Graph is disabled".to_string()));
    }
    let since = params.validate()?;
    let unit = state.unit.get();

    let mut points: Vec<ChartPoint> = state
        .history
        .lock()
        .await
        .display_points(unit, since)
        .into_iter()
        .map(|(timestamp, value)| ChartPoint { timestamp, value })
        .collect();

    if let Some(limit) = params.limit
        && points.len() > limit
    {
        points.drain(..points.len() - limit);
    }

    Ok(Json(ReadingsResponse {
        unit,
        count: points.len(),
        points,
    }))
}

/// Current display settings.
#[derive(Debug, Serialize)]
pub struct SettingsResponse {
    pub unit: DisplayUnit,
    /// Bands in the display unit, rounded for display.
    pub bands: ClinicalBands,
    /// Bands in mg/dL.
    pub bands_mgdl: ClinicalBands,
    pub show_text_reading: bool,
    pub enable_graph: bool,
    pub notifications: bool,
    pub health_export: bool,
    pub autosave: bool,
}

async fn get_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    let unit = state.unit.get();
    let settings = state.settings.borrow().clone();

    Json(SettingsResponse {
        unit,
        bands: bands_for_display(unit, &settings.bands),
        bands_mgdl: settings.bands,
        show_text_reading: settings.show_text_reading,
        enable_graph: state.config.display.enable_graph,
        notifications: settings.notifications,
        health_export: settings.health_export,
        autosave: state.config.storage.autosave,
    })
}

/// Request body for `PUT /api/settings/unit`.
#[derive(Debug, Deserialize)]
pub struct UnitRequest {
    pub unit: DisplayUnit,
}

/// Response for `PUT /api/settings/unit`.
#[derive(Debug, Serialize)]
pub struct UnitResponse {
    pub unit: DisplayUnit,
    pub changed: bool,
}

async fn set_unit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<UnitRequest>,
) -> Json<UnitResponse> {
    let changed = state.set_unit(request.unit);
    Json(UnitResponse {
        unit: request.unit,
        changed,
    })
}

/// Response for `POST /api/history/save`.
#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub saved: usize,
    pub unit: DisplayUnit,
}

async fn save_history(State(state): State<Arc<AppState>>) -> Result<Json<SaveResponse>, AppError> {
    let saved = state.save_history().await?;
    Ok(Json(SaveResponse {
        saved,
        unit: state.unit.get(),
    }))
}

/// Response for `POST /api/sync/now`.
#[derive(Debug, Serialize)]
pub struct SyncNowResponse {
    /// Whether the fetch was handed to the running scheduler.
    pub queued: bool,
    /// Outcome of the fetch run inline when the scheduler is stopped.
    pub outcome: Option<FetchOutcome>,
}

/// Trigger a fetch.
///
/// A running scheduler is woken and answers with `202 Accepted`. Otherwise
/// the fetch runs inline and its outcome is returned.
async fn sync_now(State(state): State<Arc<AppState>>) -> (StatusCode, Json<SyncNowResponse>) {
    if state.scheduler.is_running() {
        state.scheduler.request_fetch();
        return (
            StatusCode::ACCEPTED,
            Json(SyncNowResponse {
                queued: true,
                outcome: None,
            }),
        );
    }

    let outcome = state.scheduler.fetch_once().await;
    (
        StatusCode::OK,
        Json(SyncNowResponse {
            queued: false,
            outcome: Some(outcome),
        }),
    )
}

/// Application error type.
#[derive(Debug)]
pub enum AppError {
    NotFound(String),
    BadRequest(String),
    Store(glucow_store::Error),
}

impl From<glucow_store::Error> for AppError {
    fn from(e: glucow_store::Error) -> Self {
        AppError::Store(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Store(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, Json(body)).into_response()
    }
}
