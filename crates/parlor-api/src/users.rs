use axum::{
    Extension,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use parlor_types::actor::Actor;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn block_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.block_user(&actor, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn unblock_user(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(actor): Extension<Actor>,
) -> Result<impl IntoResponse, ApiError> {
    state.service.unblock_user(&actor, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
