use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::warn;
use uuid::Uuid;

use tandem_types::api::{EditMessageRequest, SendMessageRequest};
use tandem_types::models::{Message, MessageId};

use crate::auth::{AppState, conversation_access};
use crate::error::ApiError;
use crate::middleware::Claims;

/// Snapshot of a conversation. Reading counts as viewing it, so the
/// counterpart's unseen messages are marked seen afterwards.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let (conversation, viewer) = conversation_access(&state, &claims, user_id).await?;
    let messages = state.tree.messages(conversation).await?;

    let unseen: Vec<MessageId> = messages
        .iter()
        .filter(|m| m.sender != viewer && !m.seen)
        .map(|m| m.id)
        .collect();
    if let Err(e) = state.tree.mark_seen(conversation, viewer, unseen).await {
        warn!("Failed to mark messages seen in {}: {}", conversation, e);
    }

    Ok(Json(messages))
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Response, ApiError> {
    let (conversation, sender) = conversation_access(&state, &claims, user_id).await?;
    let sent_at = req.sent_at.unwrap_or_else(chrono::Utc::now);

    let sent = state
        .tree
        .send_message(conversation, claims.sub, sender, &req.text, sent_at)
        .await?;

    Ok(match sent {
        Some(message) => (StatusCode::CREATED, Json(message)).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

pub async fn edit_message(
    State(state): State<AppState>,
    Path((user_id, message_id)): Path<(Uuid, MessageId)>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Response, ApiError> {
    let (conversation, _) = conversation_access(&state, &claims, user_id).await?;

    let edited = state
        .tree
        .edit_message(conversation, message_id, claims.sub, &req.text)
        .await?;

    Ok(match edited {
        Some(message) => Json(message).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}
