use crate::api::errors::ApiError;
use crate::ingest::handler::AppState;
use crate::query::windows::{start_of_day, Window, Windows};
use crate::query::{breakdowns, metrics, timeseries};
use crate::storage::store::{to_local, Website};
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Longest trend the API will compute.
pub const MAX_TREND_DAYS: u32 = 366;

const MAX_BREAKDOWN_LIMIT: usize = 1000;

fn parse_website_id(raw: &str) -> Result<i64, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid website id: {raw}")))
}

fn local_now(state: &AppState) -> NaiveDateTime {
    to_local(Utc::now(), state.recorder.offset())
}

fn require_website(state: &AppState, id: i64) -> Result<Website, ApiError> {
    state
        .recorder
        .store()
        .find_website(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Website {id} not found")))
}

/// GET /api/websites/{id}/stats — Windowed visitor and page view statistics.
pub async fn get_website_stats(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<metrics::WindowStats>, ApiError> {
    let website_id = parse_website_id(&id)?;
    let result = tokio::task::spawn_blocking(move || {
        let website = require_website(&state, website_id)?;
        let now = local_now(&state);
        let conn = state.recorder.store().conn().lock();
        metrics::query_window_stats(&conn, website.id, website.start_time, now)
            .map_err(ApiError::from)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;
    Ok(Json(result))
}

/// Query parameters for breakdown endpoints.
#[derive(Debug, Deserialize)]
pub struct BreakdownParams {
    #[serde(default = "default_period")]
    pub period: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_period() -> String {
    "30d".to_string()
}

const fn default_limit() -> usize {
    10
}

/// Resolve a named period to a window ending at `now`.
///
/// `Nd` periods cover the last N calendar days including today.
pub fn period_window(
    period: &str,
    now: NaiveDateTime,
    tracking_start: NaiveDateTime,
) -> Result<Window, ApiError> {
    let trailing = |days: i64| {
        Window::new(
            start_of_day(now.date() - Duration::days(days - 1)),
            now,
        )
    };
    match period {
        "day" | "today" => Ok(Windows::at(now, tracking_start).today),
        "7d" => Ok(trailing(7)),
        "30d" => Ok(trailing(30)),
        "90d" => Ok(trailing(90)),
        "total" | "all" => Ok(Windows::at(now, tracking_start).total),
        _ => Err(ApiError::BadRequest(format!(
            "Invalid period: {period}. Use 'today', '7d', '30d', '90d' or 'total'."
        ))),
    }
}

/// GET /api/websites/{id}/breakdown/{dimension} — Top values of one dimension.
pub async fn get_breakdown(
    State(state): State<Arc<AppState>>,
    Path((id, dimension)): Path<(String, String)>,
    Query(params): Query<BreakdownParams>,
) -> Result<Json<Vec<breakdowns::BreakdownRow>>, ApiError> {
    let website_id = parse_website_id(&id)?;
    let dimension = breakdowns::Dimension::from_path(&dimension)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown dimension: {dimension}")))?;
    let limit = params.limit.clamp(1, MAX_BREAKDOWN_LIMIT);

    let result = tokio::task::spawn_blocking(move || {
        let website = require_website(&state, website_id)?;
        let window = period_window(&params.period, local_now(&state), website.start_time)?;
        let conn = state.recorder.store().conn().lock();
        breakdowns::query_breakdown(&conn, website.id, window, dimension, limit)
            .map_err(ApiError::from)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
pub struct TrendParams {
    pub days: Option<u32>,
}

fn validate_trend_days(days: u32) -> Result<u32, ApiError> {
    if (1..=MAX_TREND_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ApiError::BadRequest(format!(
            "days must be between 1 and {MAX_TREND_DAYS}"
        )))
    }
}

/// GET /api/system/trend — Daily unique IPs and page views across all websites.
pub async fn get_system_trend(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TrendParams>,
) -> Result<Json<Vec<timeseries::DailyTotals>>, ApiError> {
    let days = validate_trend_days(params.days.unwrap_or(state.trend_days))?;
    let result = tokio::task::spawn_blocking(move || {
        let today = local_now(&state).date();
        let conn = state.recorder.store().conn().lock();
        timeseries::query_system_trend(&conn, days, today)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;
    Ok(Json(result))
}

#[derive(Debug, Serialize)]
pub struct SystemStats {
    #[serde(flatten)]
    pub summary: metrics::SystemSummary,
    pub trend: Vec<timeseries::DailyTotals>,
}

/// GET /api/system/stats — System-wide overview with the configured trend.
pub async fn get_system_stats(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStats>, ApiError> {
    let days = state.trend_days.clamp(1, MAX_TREND_DAYS);
    let result = tokio::task::spawn_blocking(move || {
        let now = local_now(&state);
        let conn = state.recorder.store().conn().lock();
        let summary = metrics::query_system_summary(&conn, now)?;
        let trend = timeseries::query_system_trend(&conn, days, now.date())?;
        Ok::<_, duckdb::Error>(SystemStats { summary, trend })
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Query task panicked: {e}")))??;
    Ok(Json(result))
}
