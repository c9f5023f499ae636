pub mod auth;
pub mod directory;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod reactions;
pub mod routes;
pub mod typing;
pub mod users;
