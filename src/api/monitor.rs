use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::ApiError;
use crate::config::{Config, ConfigUpdate};
use crate::controller::{AppState, DatedSeries, Monitor, SampleSeries, Status};
use crate::domain::{DailyTotal, Sample};
use crate::repo::aggregate::parse_date;

const DEFAULT_HISTORY_LIMIT: usize = 100;
const DEFAULT_RANGE_LIMIT: usize = 500;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/current", get(get_current))
        .route("/history", get(get_history))
        .route("/history/range", get(get_history_range))
        .route("/daily", get(get_daily))
        .route("/daily/range", get(get_daily_range))
        .route("/config", get(get_config).post(update_config))
        .route("/healthz", get(healthz))
        .with_state(state)
}

pub async fn healthz() -> impl IntoResponse {
    StatusCode::OK
}

/// Run a query that may scan the log file off the async workers
async fn blocking<T, F>(monitor: &Arc<Monitor>, query: F) -> Result<T, ApiError>
where
    F: FnOnce(&Monitor) -> T + Send + 'static,
    T: Send + 'static,
{
    let monitor = Arc::clone(monitor);
    Ok(tokio::task::spawn_blocking(move || query(&monitor)).await?)
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn required_date(raw: Option<&str>, name: &str) -> Result<NaiveDate, ApiError> {
    let raw = raw.ok_or_else(|| ApiError::BadRequest(format!("{name} is required (YYYY-MM-DD)")))?;
    Ok(parse_date(raw)?)
}

fn optional_date(raw: Option<&str>, default: NaiveDate) -> Result<NaiveDate, ApiError> {
    raw.map_or(Ok(default), |raw| parse_date(raw).map_err(ApiError::from))
}

pub async fn get_status(State(st): State<AppState>) -> Json<Status> {
    Json(st.monitor.status())
}

pub async fn get_current(State(st): State<AppState>) -> Json<Sample> {
    Json(st.monitor.current())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
    pub minutes: Option<u64>,
}

pub async fn get_history(
    State(st): State<AppState>,
    Query(q): Query<HistoryQuery>,
) -> Json<SampleSeries> {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    Json(st.monitor.history(limit, q.minutes))
}

#[derive(Debug, Deserialize)]
pub struct RangeQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<usize>,
}

pub async fn get_history_range(
    State(st): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<DatedSeries<Sample>>, ApiError> {
    let start = required_date(q.start_date.as_deref(), "start_date")?;
    let end = optional_date(q.end_date.as_deref(), start)?;
    let limit = q.limit.unwrap_or(DEFAULT_RANGE_LIMIT);

    let series = blocking(&st.monitor, move |m| m.history_range(start, end, limit)).await??;
    Ok(Json(series))
}

#[derive(Debug, Deserialize)]
pub struct DailyQuery {
    pub date: Option<String>,
}

pub async fn get_daily(
    State(st): State<AppState>,
    Query(q): Query<DailyQuery>,
) -> Result<Json<DailyTotal>, ApiError> {
    let date = optional_date(q.date.as_deref(), today())?;
    let total = blocking(&st.monitor, move |m| m.daily(date)).await?;
    Ok(Json(total))
}

pub async fn get_daily_range(
    State(st): State<AppState>,
    Query(q): Query<RangeQuery>,
) -> Result<Json<DatedSeries<DailyTotal>>, ApiError> {
    let start = required_date(q.start_date.as_deref(), "start_date")?;
    let end = optional_date(q.end_date.as_deref(), today())?;

    let series = blocking(&st.monitor, move |m| m.daily_range(start, end)).await??;
    Ok(Json(series))
}

pub async fn get_config(State(st): State<AppState>) -> Json<Config> {
    Json(st.monitor.config())
}

#[derive(Debug, Serialize)]
pub struct ConfigUpdated {
    pub message: &'static str,
    pub config: Config,
}

pub async fn update_config(
    State(st): State<AppState>,
    Json(update): Json<ConfigUpdate>,
) -> Result<Json<ConfigUpdated>, ApiError> {
    let config = blocking(&st.monitor, move |m| m.update_config(&update)).await??;
    Ok(Json(ConfigUpdated {
        message: "Configuration updated",
        config,
    }))
}
