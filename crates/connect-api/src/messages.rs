use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use connect_types::api::{Claims, ConversationResponse, MessageResponse, SendMessageRequest};

use crate::auth::AppState;
use crate::error::{ApiError, join_error};

/// POST /messages — send a direct message. Content arrives as plaintext and
/// is encrypted inside the store; the response echoes the plaintext back.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let recipient: Uuid = req
        .recipient_id
        .parse()
        .map_err(|_| ApiError::InvalidReference("Invalid recipient ID"))?;

    let store = state.messages.clone();
    let message = tokio::task::spawn_blocking(move || {
        store.append(claims.sub, recipient, &req.content)
    })
    .await
    .map_err(join_error)??;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET /messages/{user_id} — the full thread with one peer, oldest first.
/// Opening the thread is what marks its unread messages as seen.
pub async fn get_thread(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<MessageResponse>>, ApiError> {
    let peer: Uuid = user_id
        .parse()
        .map_err(|_| ApiError::InvalidReference("Invalid user ID"))?;

    let store = state.messages.clone();
    let thread = tokio::task::spawn_blocking(move || store.thread_between(claims.sub, peer))
        .await
        .map_err(join_error)??;

    Ok(Json(thread))
}

/// GET /messages/conversations — derived inbox, most recent exchange first.
pub async fn get_conversations(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ConversationResponse>>, ApiError> {
    let store = state.messages.clone();
    let conversations =
        tokio::task::spawn_blocking(move || store.conversations_for(claims.sub))
            .await
            .map_err(join_error)??;

    Ok(Json(conversations))
}
