use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, State},
    middleware,
    response::IntoResponse,
    routing::{get, post, put},
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use connect_api::auth::{self, AppState, AppStateInner};
use connect_api::error::ApiError;
use connect_api::middleware::require_auth;
use connect_api::store::MessageStore;
use connect_api::{messages, posts, uploads, users};
use connect_crypto::MessageCipher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "connect=debug,studyconnect=debug,tower_http=debug".into()),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("CONNECT_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("CONNECT_DB_PATH").unwrap_or_else(|_| "studyconnect.db".into());
    let upload_dir = std::env::var("CONNECT_UPLOAD_DIR").unwrap_or_else(|_| "./uploads".into());
    let host = std::env::var("CONNECT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("CONNECT_PORT")
        .unwrap_or_else(|_| "8000".into())
        .parse()?;

    // Init database and the message cipher. The cipher comes up once per
    // process; a missing or malformed key is reported here, never per-call.
    let db = Arc::new(connect_db::Database::open(&PathBuf::from(&db_path))?);
    let cipher = Arc::new(MessageCipher::from_config(
        std::env::var("CHAT_ENCRYPTION_KEY").ok().as_deref(),
    ));
    if cipher.is_enabled() {
        info!("Message encryption enabled");
    }

    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        messages: MessageStore::new(db, cipher),
        jwt_secret,
        upload_dir: PathBuf::from(&upload_dir),
    });

    // Routes
    let public_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/auth/forgot-password", post(auth::forgot_password))
        .route("/auth/reset-password", post(auth::reset_password))
        // The feed and public profiles are readable without a session,
        // as in the original portal.
        .route("/posts", get(posts::get_posts))
        .route("/users/{user_id}", get(users::get_user))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route("/auth/profile", put(auth::update_profile))
        .route(
            "/upload/image",
            post(uploads::upload_image).layer(DefaultBodyLimit::max(uploads::UPLOAD_BODY_LIMIT)),
        )
        .route(
            "/upload/document",
            post(uploads::upload_document).layer(DefaultBodyLimit::max(uploads::UPLOAD_BODY_LIMIT)),
        )
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}/replies", post(posts::add_reply))
        .route("/users/search", get(users::search_users))
        .route("/messages", post(messages::send_message))
        .route("/messages/conversations", get(messages::get_conversations))
        .route("/messages/{user_id}", get(messages::get_thread))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(&upload_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("StudyConnect server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "message": "StudyConnect API is running!" }))
}

/// Health probe: proves the database answers queries.
async fn health(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_count = tokio::task::spawn_blocking(move || db.count_users())
        .await
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("spawn_blocking join error: {}", e)))?
        .map_err(ApiError::Internal)?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "database": "connected",
        "user_count": user_count,
    })))
}
