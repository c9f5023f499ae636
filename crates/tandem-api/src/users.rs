use axum::{Json, extract::State};

use tandem_types::models::UserRecord;

use crate::auth::AppState;
use crate::error::ApiError;

/// GET /chat: liveness check for the relay side of the server.
pub async fn chat_check() -> &'static str {
    "Chat route works!"
}

/// GET /users: every registered user, for signed-in callers only.
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<UserRecord>>, ApiError> {
    Ok(Json(state.tree.users().await?))
}
