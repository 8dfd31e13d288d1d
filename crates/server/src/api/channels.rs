use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;

use depesche_store::models::{Channel, ChannelFilter, ChannelKind, ChannelUpsert};
use depesche_store::traits::ChannelStore;

use super::{bad_request, internal_error, page_params, ApiResult, ListResponse};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChannelListQuery {
    pub is_active: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<ChannelKind>,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/channels -- list registered channels with filters.
pub async fn channels_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ChannelListQuery>,
) -> ApiResult<Json<ListResponse<Channel>>> {
    let (limit, offset) = page_params(query.limit, query.offset);
    let filter = ChannelFilter {
        is_active: query.is_active,
        kind: query.kind,
        q: query.q,
        limit,
        offset,
    };
    let page = state
        .stores
        .channels
        .list(&filter)
        .await
        .map_err(internal_error)?;
    Ok(Json(ListResponse { total: page.total, limit, offset, items: page.items }))
}

/// POST /api/channels -- register a channel, idempotent on (type, identifier).
pub async fn channels_upsert(
    State(state): State<Arc<AppState>>,
    Json(upsert): Json<ChannelUpsert>,
) -> ApiResult<Json<Channel>> {
    if upsert.identifier.trim().is_empty() {
        return Err(bad_request("identifier must not be empty"));
    }
    let channel = state
        .stores
        .channels
        .upsert(upsert)
        .await
        .map_err(internal_error)?;
    Ok(Json(channel))
}
