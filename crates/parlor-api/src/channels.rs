use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use parlor_types::actor::Actor;
use parlor_types::api::{
    AffectedResponse, ChannelFilter, ChannelListRequest, ChannelSort, CreateChannelRequest,
    CreateDmRequest, IdsRequest, SetChannelPinRequest, SetChannelStateRequest, UnreadCountResponse,
};
use parlor_types::models::{ChannelKind, ChannelState};
use parlor_types::pagination::PageArgs;

use crate::error::ApiError;
use crate::state::AppState;

/// Query string of channel listings. Kept flat so numbers and booleans
/// parse straight from the URL.
#[derive(Debug, Default, Deserialize)]
pub struct ChannelListQuery {
    pub first: Option<u32>,
    pub after: Option<String>,
    pub last: Option<u32>,
    pub before: Option<String>,
    pub kind: Option<ChannelKind>,
    pub state: Option<ChannelState>,
    pub visible: Option<bool>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub updated_after: Option<DateTime<Utc>>,
    pub sort: Option<ChannelSort>,
    #[serde(default)]
    pub with_total_count: bool,
}

impl From<ChannelListQuery> for ChannelListRequest {
    fn from(q: ChannelListQuery) -> Self {
        Self {
            page: PageArgs {
                first: q.first,
                after: q.after,
                last: q.last,
                before: q.before,
            },
            filter: ChannelFilter {
                kind: q.kind,
                state: q.state,
                visible: q.visible,
                created_after: q.created_after,
                created_before: q.created_before,
                updated_after: q.updated_after,
            },
            sort: q.sort.unwrap_or_default(),
            with_total_count: q.with_total_count,
        }
    }
}

pub async fn get_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_channel(&actor, channel_id).await?))
}

pub async fn list_my_channels(
    State(state): State<AppState>,
    Query(query): Query<ChannelListQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list_my_channels(&actor, query.into()).await?))
}

pub async fn list_pinned_channels(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list_pinned_channels(&actor).await?))
}

pub async fn list_channels_admin(
    State(state): State<AppState>,
    Query(query): Query<ChannelListQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list_channels_admin(&actor, query.into()).await?))
}

pub async fn create_channel_admin(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateChannelRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let channel = state.service.create_channel_admin(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn create_dm_channel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<CreateDmRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.create_dm_channel(&actor, req.user_id).await?))
}

pub async fn join_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let participant = state.service.join_channel(&actor, channel_id).await?;
    Ok((StatusCode::CREATED, Json(participant)))
}

pub async fn leave_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.leave_channel(&actor, channel_id).await?))
}

pub async fn leave_channels(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<IdsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.leave_channels(&actor, req.ids).await?))
}

pub async fn set_channel_state(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SetChannelStateRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.set_channel_state(&actor, channel_id, req.state).await?))
}

pub async fn set_channel_pin(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SetChannelPinRequest>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.set_channel_pin(&actor, channel_id, req.pinned).await?))
}

pub async fn delete_channels(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<IdsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let affected = state.service.delete_channels(&actor, req.ids).await?;
    Ok(Json(AffectedResponse { affected }))
}

pub async fn purge_channels(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<IdsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let affected = state.service.purge_channels(&actor, req.ids).await?;
    Ok(Json(AffectedResponse { affected }))
}

pub async fn unread_count(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let unread_count = state.service.unread_count(&actor, channel_id).await?;
    Ok(Json(UnreadCountResponse {
        channel_id,
        unread_count,
    }))
}
