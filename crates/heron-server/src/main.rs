use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use heron_api::auth::{self, AppState, AppStateInner};
use heron_api::middleware::require_auth;
use heron_api::{comments, conversations, follows, messages};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "heron=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("HERON_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("HERON_DB_PATH").unwrap_or_else(|_| "heron.db".into());
    let host = std::env::var("HERON_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("HERON_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;

    // Init database
    let db = heron_db::Database::open(&PathBuf::from(&db_path))?;

    // Shared state
    let app_state: AppState = Arc::new(AppStateInner { db, jwt_secret });

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/users/{user_id}", get(follows::profile))
        .route("/users/{user_id}/follow", post(follows::follow))
        .route("/users/{user_id}/follow", delete(follows::unfollow))
        .route("/users/{user_id}/follow", get(follows::follow_check))
        .route("/users/{user_id}/followers", get(follows::list_followers))
        .route("/users/{user_id}/following", get(follows::list_following))
        .route("/conversations/direct", post(conversations::open_direct))
        .route("/conversations", get(conversations::inbox))
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            post(messages::send_message),
        )
        .route(
            "/conversations/{conversation_id}/read",
            post(messages::mark_read),
        )
        .route("/stories/{story_id}/comments", post(comments::post_comment))
        .route("/stories/{story_id}/comments", get(comments::story_comments))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Heron server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
