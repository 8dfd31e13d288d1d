use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use depesche_store::models::{ChannelFilter, HealthCounts, TickRun};
use depesche_store::traits::{AccountStore, ChannelStore, TickRunStore};

use super::{internal_error, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ChannelCounts {
    pub total: i64,
    pub active: i64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub accounts: HealthCounts,
    pub channels: ChannelCounts,
    pub latest_tick: Option<TickRun>,
}

/// GET /api/status -- account health, channel totals and the latest cycle.
pub async fn status(State(state): State<Arc<AppState>>) -> ApiResult<Json<StatusResponse>> {
    let accounts = state
        .stores
        .accounts
        .health_counts()
        .await
        .map_err(internal_error)?;

    let count_filter = ChannelFilter { limit: 1, ..Default::default() };
    let total = state
        .stores
        .channels
        .list(&count_filter)
        .await
        .map_err(internal_error)?
        .total;
    let active_filter = ChannelFilter {
        is_active: Some(true),
        limit: 1,
        ..Default::default()
    };
    let active = state
        .stores
        .channels
        .list(&active_filter)
        .await
        .map_err(internal_error)?
        .total;

    let latest_tick = state
        .stores
        .ticks
        .latest()
        .await
        .map_err(internal_error)?;

    Ok(Json(StatusResponse {
        accounts,
        channels: ChannelCounts { total, active },
        latest_tick,
    }))
}

/// GET /api/config -- redacted configuration of the running instance.
pub async fn config_view(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.config_summary.clone())
}
