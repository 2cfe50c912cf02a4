use std::sync::Arc;

use crate::service::ChatService;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub service: ChatService,
    pub jwt_secret: String,
}
