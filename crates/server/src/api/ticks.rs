use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use depesche_store::models::TickRun;
use depesche_store::traits::TickRunStore;

use super::{internal_error, ApiError, ApiResult, ErrorResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct TickListQuery {
    pub limit: Option<i64>,
}

/// GET /api/ticks -- recent cycle audit records, newest first.
pub async fn ticks_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TickListQuery>,
) -> ApiResult<Json<Vec<TickRun>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let runs = state
        .stores
        .ticks
        .recent(limit)
        .await
        .map_err(internal_error)?;
    Ok(Json(runs))
}

/// POST /api/ticks -- queue a manual cycle.
///
/// The cycle still goes through the scheduler loop and its lock, so a
/// trigger is an ask, not a bypass. A second trigger while one is
/// pending gets 409.
pub async fn ticks_trigger(State(state): State<Arc<AppState>>) -> ApiResult<(StatusCode, Json<Value>)> {
    if state.trigger.trigger() {
        Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
    } else {
        Err(pending_conflict())
    }
}

fn pending_conflict() -> ApiError {
    (
        StatusCode::CONFLICT,
        Json(ErrorResponse { error: "a manual tick is already pending".to_string() }),
    )
}
