use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use depesche_store::models::{Channel, ChannelKind, Post, PostFilter};
use depesche_store::traits::{ChannelStore, PostStore};

use super::{
    bad_request, internal_error, not_found, page_params, parse_instant_param, ApiError,
    ApiResult, ListResponse,
};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct PostListQuery {
    pub channel_id: Option<i64>,
    pub channel_identifier: Option<String>,
    #[serde(rename = "channel_type")]
    pub channel_kind: Option<ChannelKind>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: ChannelKind,
    pub identifier: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostItem {
    #[serde(flatten)]
    pub post: Post,
    pub channel: ChannelSummary,
}

/// GET /api/posts -- posts of one channel, newest first.
///
/// The channel is addressed by `channel_id` or by `channel_identifier`
/// (optionally narrowed with `channel_type`). Date bounds are inclusive.
pub async fn posts_list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PostListQuery>,
) -> ApiResult<Json<ListResponse<PostItem>>> {
    let channel = resolve_channel(&state, &query).await?;
    let (limit, offset) = page_params(query.limit, query.offset);
    let filter = PostFilter {
        channel_id: channel.id,
        date_from: parse_instant_param(query.date_from.as_deref(), false)?,
        date_to: parse_instant_param(query.date_to.as_deref(), true)?,
        limit,
        offset,
    };
    let page = state
        .stores
        .posts
        .list(&filter)
        .await
        .map_err(internal_error)?;

    let summary = ChannelSummary {
        id: channel.id,
        kind: channel.kind,
        identifier: channel.identifier,
        title: channel.title,
    };
    let items = page
        .items
        .into_iter()
        .map(|post| PostItem { post, channel: summary.clone() })
        .collect();
    Ok(Json(ListResponse { total: page.total, limit, offset, items }))
}

async fn resolve_channel(state: &AppState, query: &PostListQuery) -> Result<Channel, ApiError> {
    if let Some(id) = query.channel_id {
        return state
            .stores
            .channels
            .get(id)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| not_found(format!("channel {id} not found")));
    }
    if let Some(identifier) = query.channel_identifier.as_deref() {
        return state
            .stores
            .channels
            .find(query.channel_kind, identifier)
            .await
            .map_err(internal_error)?
            .ok_or_else(|| not_found(format!("channel '{identifier}' not found")));
    }
    Err(bad_request("either channel_id or channel_identifier is required"))
}
