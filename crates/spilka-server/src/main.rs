use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use spilka_api::middleware::require_auth;
use spilka_api::{AppState, AppStateInner, conversations, messages, settings};
use spilka_core::{Directory, Ledger, RateLimiter};
use spilka_db::Database;
use spilka_gateway::connection;
use spilka_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
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
                .unwrap_or_else(|_| "spilka=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("SPILKA_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("SPILKA_DB_PATH").unwrap_or_else(|_| "spilka.db".into());
    let host = std::env::var("SPILKA_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("SPILKA_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = Arc::new(Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let dispatcher = Dispatcher::new();
    let rate_limiter = Arc::new(RateLimiter::new());
    let directory = Directory::new(db.clone(), dispatcher.clone());
    let ledger = Ledger::new(db.clone(), dispatcher.clone(), rate_limiter);

    let app_state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        directory,
        ledger,
        dispatcher: dispatcher.clone(),
    });

    // Routes
    let protected_routes = Router::new()
        .route("/conversations", get(conversations::list_conversations))
        .route("/conversations/direct", post(conversations::ensure_direct))
        .route("/conversations/group", post(conversations::create_group))
        .route(
            "/conversations/{conversation_id}",
            get(conversations::get_conversation),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            get(conversations::list_participants),
        )
        .route(
            "/conversations/{conversation_id}/participants",
            post(conversations::add_participants),
        )
        .route(
            "/conversations/{conversation_id}/participants/{user_id}",
            delete(conversations::remove_participant),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::list_messages),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(messages::mark_read),
        )
        .route("/messages/{message_id}", patch(messages::edit_message))
        .route("/messages/{message_id}", delete(messages::delete_message))
        .route("/admin/settings", get(settings::get_settings))
        .route("/admin/settings", patch(settings::update_settings))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new().route("/gateway", get(ws_upgrade)).with_state(GatewayState {
        dispatcher,
        db,
        jwt_secret,
    });

    let app = Router::new()
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Spilka messaging server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<GatewayState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, state.jwt_secret)
    })
}
