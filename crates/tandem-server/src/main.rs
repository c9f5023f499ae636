mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use tandem_api::auth::{AppState, AppStateInner};
use tandem_api::routes;
use tandem_gateway::connection;
use tandem_gateway::dispatcher::Dispatcher;
use tandem_gateway::relay::{self, Relay};
use tandem_sync::Tree;

use crate::config::Config;

#[derive(Clone)]
struct ServerState {
    dispatcher: Dispatcher,
    relay: Relay,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tandem=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = tandem_db::Database::open(&config.db_path)?;
    let tree = Tree::new(db, config.admin_email.clone());
    info!("Admin account is {}", config.admin_email);

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner {
        tree: tree.clone(),
        jwt_secret: config.jwt_secret.clone(),
    });

    let state = ServerState {
        dispatcher: Dispatcher::new(tree),
        relay: Relay::new(),
        jwt_secret: config.jwt_secret.clone(),
    };

    let ws_routes = Router::new()
        .route("/gateway", get(gateway_upgrade))
        .route("/relay", get(relay_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(routes::router(app_state))
        .merge(ws_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = config.addr().parse()?;
    info!("Tandem server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn gateway_upgrade(
    State(state): State<ServerState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.jwt_secret)
    })
}

async fn relay_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| relay::handle_relay_connection(socket, state.relay))
}
