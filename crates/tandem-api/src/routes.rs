use axum::{
    Router, middleware,
    routing::{get, patch, post, put},
};

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{directory, messages, reactions, typing, users};

/// Every REST route of the service.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/route", get(auth::resolve_route))
        .route("/chat", get(users::chat_check))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/logout", post(auth::logout))
        .route("/users", get(users::list_users))
        .route("/directory", get(directory::list_directory))
        .route(
            "/conversations/{user_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route(
            "/conversations/{user_id}/messages/{message_id}",
            patch(messages::edit_message),
        )
        .route(
            "/conversations/{user_id}/messages/{message_id}/reaction",
            put(reactions::set_reaction),
        )
        .route(
            "/conversations/{user_id}/typing",
            get(typing::counterpart_flag).post(typing::keystroke),
        )
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
