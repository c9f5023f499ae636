use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use tandem_types::api::ReactRequest;
use tandem_types::models::{Message, MessageId};

use crate::auth::{AppState, conversation_access};
use crate::error::ApiError;
use crate::middleware::Claims;

/// Set the caller's reaction on a message. Reacting again replaces it;
/// there is no way to remove one.
pub async fn set_reaction(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(Uuid, MessageId)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<ReactRequest>,
) -> Result<Json<Message>, ApiError> {
    let (conversation, _) = conversation_access(&state, &claims, user_id).await?;

    let message = state
        .tree
        .react(conversation, message_id, claims.sub, &req.emoji)
        .await?;

    Ok(Json(message))
}
