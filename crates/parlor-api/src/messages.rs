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
    AffectedResponse, IdsRequest, MessageFilter, MessageListRequest, MessageSort,
    SendMessageRequest,
};
use parlor_types::models::MessageType;
use parlor_types::pagination::PageArgs;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct MessageListQuery {
    pub first: Option<u32>,
    pub after: Option<String>,
    pub last: Option<u32>,
    pub before: Option<String>,
    /// Only honoured by the admin listing
    pub channel_id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: Option<MessageType>,
    pub author_id: Option<Uuid>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub sort: Option<MessageSort>,
    #[serde(default)]
    pub with_total_count: bool,
}

impl From<MessageListQuery> for MessageListRequest {
    fn from(q: MessageListQuery) -> Self {
        Self {
            page: PageArgs {
                first: q.first,
                after: q.after,
                last: q.last,
                before: q.before,
            },
            filter: MessageFilter {
                channel_id: q.channel_id,
                kind: q.kind,
                author_id: q.author_id,
                created_after: q.created_after,
                created_before: q.created_before,
            },
            sort: q.sort.unwrap_or_default(),
            with_total_count: q.with_total_count,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub first: Option<u32>,
    pub after: Option<String>,
    pub last: Option<u32>,
    pub before: Option<String>,
    #[serde(default)]
    pub with_total_count: bool,
}

pub async fn send_message(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = state.service.send_message(&actor, req).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn get_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.get_message(&actor, message_id).await?))
}

pub async fn list_messages_by_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<MessageListQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let page = state
        .service
        .list_messages_by_channel(&actor, channel_id, query.into())
        .await?;
    Ok(Json(page))
}

pub async fn list_messages_admin(
    State(state): State<AppState>,
    Query(query): Query<MessageListQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.service.list_messages_admin(&actor, query.into()).await?))
}

pub async fn list_payloads_by_channel(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let args = PageArgs {
        first: query.first,
        after: query.after,
        last: query.last,
        before: query.before,
    };
    let page = state
        .service
        .list_payloads_by_channel(&actor, channel_id, args, query.with_total_count)
        .await?;
    Ok(Json(page))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.delete_message(&actor, message_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn delete_messages(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(req): Json<IdsRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let affected = state.service.delete_messages(&actor, req.ids).await?;
    Ok(Json(AffectedResponse { affected }))
}

pub async fn read_all_messages(
    State(state): State<AppState>,
    Path(channel_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    let affected = state.service.read_all_messages(&actor, channel_id).await?;
    Ok(Json(AffectedResponse { affected }))
}
