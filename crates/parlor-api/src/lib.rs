pub mod channels;
pub mod error;
pub mod loader;
pub mod messages;
pub mod middleware;
pub mod notify;
pub mod service;
pub mod state;
pub mod users;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::middleware::require_auth;
use crate::state::AppState;

/// Every authenticated REST route.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/channels", get(channels::list_my_channels))
        .route("/channels/pinned", get(channels::list_pinned_channels))
        .route("/channels/dm", post(channels::create_dm_channel))
        .route("/channels/leave", post(channels::leave_channels))
        .route("/channels/{channel_id}", get(channels::get_channel))
        .route("/channels/{channel_id}/join", post(channels::join_channel))
        .route("/channels/{channel_id}/leave", post(channels::leave_channel))
        .route("/channels/{channel_id}/pin", put(channels::set_channel_pin))
        .route("/channels/{channel_id}/unread", get(channels::unread_count))
        .route("/channels/{channel_id}/read", post(messages::read_all_messages))
        .route("/channels/{channel_id}/messages", get(messages::list_messages_by_channel))
        .route("/channels/{channel_id}/payloads", get(messages::list_payloads_by_channel))
        .route("/messages", post(messages::send_message))
        .route("/messages/delete", post(messages::delete_messages))
        .route(
            "/messages/{message_id}",
            get(messages::get_message).delete(messages::delete_message),
        )
        .route(
            "/users/{user_id}/block",
            post(users::block_user).delete(users::unblock_user),
        )
        .route(
            "/admin/channels",
            get(channels::list_channels_admin).post(channels::create_channel_admin),
        )
        .route("/admin/channels/delete", post(channels::delete_channels))
        .route("/admin/channels/purge", post(channels::purge_channels))
        .route("/admin/channels/{channel_id}/state", put(channels::set_channel_state))
        .route("/admin/messages", get(messages::list_messages_admin))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state)
}
