use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use uuid::Uuid;

use tandem_types::models::TypingFlag;

use crate::auth::{AppState, conversation_access};
use crate::error::ApiError;
use crate::middleware::Claims;

/// One composer keystroke: raises the caller's typing flag, which clears
/// itself shortly after.
pub async fn keystroke(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<StatusCode, ApiError> {
    let (conversation, sender) = conversation_access(&state, &claims, user_id).await?;

    // the clear task runs on its own
    let _clear = state.tree.typing_signal(conversation, sender).keystroke().await;

    Ok(StatusCode::ACCEPTED)
}

/// Whether the other side of the conversation is typing right now.
pub async fn counterpart_flag(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<TypingFlag>, ApiError> {
    let (conversation, sender) = conversation_access(&state, &claims, user_id).await?;
    let typing = state.tree.is_typing(conversation, sender.counterpart()).await;
    Ok(Json(TypingFlag { typing }))
}
