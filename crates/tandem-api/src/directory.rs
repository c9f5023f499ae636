use axum::{
    Extension, Json,
    extract::{Query, State},
};

use tandem_sync::filter_directory;
use tandem_types::api::DirectoryQuery;
use tandem_types::models::{DirectoryEntry, Role};

use crate::auth::AppState;
use crate::error::ApiError;
use crate::middleware::Claims;

/// Admin-only list of users with presence, unread count and last message,
/// optionally narrowed by a name search.
pub async fn list_directory(
    State(state): State<AppState>,
    Query(query): Query<DirectoryQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<DirectoryEntry>>, ApiError> {
    if state.tree.role_of(&claims.email) != Role::Admin {
        return Err(ApiError::Forbidden);
    }

    let entries = state.tree.directory(claims.sub).await?;
    Ok(Json(filter_directory(&entries, query.q.trim())))
}
