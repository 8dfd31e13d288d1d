//! HTTP endpoints over the store.

mod channels;
mod health;
mod posts;
mod status;
mod ticks;

#[cfg(test)]
mod tests;

pub use channels::{channels_list, channels_upsert};
pub use health::health;
pub use posts::posts_list;
pub use status::{config_view, status};
pub use ticks::{ticks_list, ticks_trigger};

use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Serialize;

// ── Shared response plumbing ─────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Paged envelope shared by the list endpoints.
#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub items: Vec<T>,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);
pub type ApiResult<T> = Result<T, ApiError>;

pub fn internal_error(err: impl std::fmt::Display) -> ApiError {
    tracing::error!(error = %err, "api request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse { error: err.to_string() }),
    )
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message.into() }))
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    (StatusCode::NOT_FOUND, Json(ErrorResponse { error: message.into() }))
}

/// Clamp paging inputs: limit 1..=200 (default 50), offset floored at 0.
pub fn page_params(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (limit.unwrap_or(50).clamp(1, 200), offset.unwrap_or(0).max(0))
}

/// Parse an ISO-8601 instant. Timezone-less values are read as UTC;
/// a bare date becomes the start of that day, or its end when
/// `end_of_day` is set, so date ranges stay inclusive.
pub fn parse_instant(raw: &str, end_of_day: bool) -> Option<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()?;
    let time = if end_of_day {
        date.and_hms_milli_opt(23, 59, 59, 999)?
    } else {
        date.and_hms_opt(0, 0, 0)?
    };
    Some(Utc.from_utc_datetime(&time))
}

pub fn parse_instant_param(
    raw: Option<&str>,
    end_of_day: bool,
) -> Result<Option<DateTime<Utc>>, ApiError> {
    match raw {
        None => Ok(None),
        Some(raw) => parse_instant(raw, end_of_day)
            .map(Some)
            .ok_or_else(|| bad_request(format!("invalid timestamp: {raw}"))),
    }
}
