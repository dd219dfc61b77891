use axum::{
    Extension, Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use connect_types::api::{Claims, Participant, PublicProfile};

use crate::auth::AppState;
use crate::convert;
use crate::error::{ApiError, join_error};

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

const SEARCH_LIMIT: u32 = 20;

/// GET /users/{user_id} — public profile with post count.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PublicProfile>, ApiError> {
    let user_uuid: Uuid = user_id
        .parse()
        .map_err(|_| ApiError::InvalidReference("Invalid user ID"))?;

    let db = state.db.clone();
    let (user, posts_count) = tokio::task::spawn_blocking(move || {
        let id = user_uuid.to_string();
        let user = db.get_user_by_id(&id)?;
        let posts_count = db.count_posts_by_author(&id)?;
        Ok::<_, anyhow::Error>((user, posts_count))
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Internal)?;

    let user = user.ok_or(ApiError::NotFound("User not found"))?;

    Ok(Json(PublicProfile {
        profile: convert::user_profile(&user),
        posts_count,
    }))
}

/// GET /users/search?q= — display profiles for the new-message picker.
/// The caller is excluded; under two characters returns nothing, matching
/// the frontend's own threshold.
pub async fn search_users(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Participant>>, ApiError> {
    let q = query.q.trim().to_string();
    if q.len() < 2 {
        return Ok(Json(vec![]));
    }

    let db = state.db.clone();
    let rows = tokio::task::spawn_blocking(move || {
        db.search_users(&q, &claims.sub.to_string(), SEARCH_LIMIT)
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Internal)?;

    Ok(Json(rows.iter().map(convert::participant).collect()))
}
