use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;
use uuid::Uuid;

use connect_db::models::{PostRow, ReplyRow};
use connect_db::now_timestamp;
use connect_types::api::{
    Claims, CreatePostRequest, CreateReplyRequest, PostResponse, ReplyResponse,
};

use crate::auth::AppState;
use crate::convert;
use crate::error::{ApiError, join_error};

const POST_KINDS: [&str; 3] = ["note", "job", "thread"];

#[derive(Debug, Deserialize)]
pub struct PostsQuery {
    #[serde(default)]
    pub skip: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    pub search: Option<String>,
    pub category: Option<String>,
}

fn default_limit() -> u32 {
    20
}

pub async fn create_post(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !POST_KINDS.contains(&req.kind.as_str()) {
        return Err(ApiError::BadRequest("Post type must be note, job or thread"));
    }
    if req.title.trim().is_empty() {
        return Err(ApiError::BadRequest("Title must not be empty"));
    }

    let author = crate::auth::fetch_user(&state, claims.sub).await?;

    let post_id = Uuid::new_v4();
    let created_at = now_timestamp();
    let tags_json = serde_json::to_string(&req.tags)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("tag encoding failed: {}", e)))?;

    {
        let db = state.db.clone();
        let (req, created_at) = (req.clone(), created_at.clone());
        let author_id = claims.sub.to_string();
        tokio::task::spawn_blocking(move || {
            db.insert_post(
                &post_id.to_string(),
                &author_id,
                &req.kind,
                &req.title,
                &req.content,
                &tags_json,
                req.company.as_deref(),
                req.location.as_deref(),
                req.job_link.as_deref(),
                req.document_name.as_deref(),
                req.document_url.as_deref(),
                &created_at,
            )
        })
        .await
        .map_err(join_error)?
        .map_err(ApiError::Internal)?;
    }

    let created = convert::parse_timestamp(&created_at);
    Ok((
        StatusCode::CREATED,
        Json(PostResponse {
            id: post_id,
            author_id: claims.sub,
            author_name: author.name,
            author_username: author.username,
            author_profile_picture: author.profile_picture,
            kind: req.kind,
            title: req.title,
            content: req.content,
            tags: req.tags,
            company: req.company,
            location: req.location,
            job_link: req.job_link,
            document_name: req.document_name,
            document_url: req.document_url,
            replies: vec![],
            created_at: created,
            updated_at: created,
        }),
    ))
}

pub async fn get_posts(
    State(state): State<AppState>,
    Query(query): Query<PostsQuery>,
) -> Result<Json<Vec<PostResponse>>, ApiError> {
    let limit = query.limit.min(100);
    // "all" means no filter, matching the feed's category tabs.
    let category = query
        .category
        .filter(|c| c != "all");

    let db = state.db.clone();
    let (rows, reply_rows) = tokio::task::spawn_blocking(move || {
        let rows = db.get_posts(query.skip, limit, query.search.as_deref(), category.as_deref())?;
        let post_ids: Vec<String> = rows.iter().map(|p| p.id.clone()).collect();
        let reply_rows = db.get_replies_for_posts(&post_ids)?;
        Ok::<_, anyhow::Error>((rows, reply_rows))
    })
    .await
    .map_err(join_error)?
    .map_err(ApiError::Internal)?;

    // Group replies by post (cheap in-memory work, fine on the async thread)
    let mut replies_by_post: HashMap<String, Vec<ReplyResponse>> = HashMap::new();
    for reply in &reply_rows {
        replies_by_post
            .entry(reply.post_id.clone())
            .or_default()
            .push(reply_response(reply));
    }

    let posts = rows
        .iter()
        .map(|row| post_response(row, replies_by_post.remove(&row.id).unwrap_or_default()))
        .collect();

    Ok(Json(posts))
}

pub async fn add_reply(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateReplyRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let post_uuid: Uuid = post_id
        .parse()
        .map_err(|_| ApiError::InvalidReference("Invalid post ID"))?;

    let author = crate::auth::fetch_user(&state, claims.sub).await?;

    let reply_id = Uuid::new_v4();
    let created_at = now_timestamp();

    {
        let db = state.db.clone();
        let (content, created_at) = (req.content.clone(), created_at.clone());
        let author_id = claims.sub.to_string();
        let exists = tokio::task::spawn_blocking(move || {
            if !db.post_exists(&post_uuid.to_string())? {
                return Ok(false);
            }
            db.insert_reply(
                &reply_id.to_string(),
                &post_uuid.to_string(),
                &author_id,
                &content,
                &created_at,
            )?;
            Ok::<_, anyhow::Error>(true)
        })
        .await
        .map_err(join_error)?
        .map_err(ApiError::Internal)?;

        if !exists {
            return Err(ApiError::NotFound("Post not found"));
        }
    }

    Ok((
        StatusCode::CREATED,
        Json(ReplyResponse {
            id: reply_id,
            author_id: claims.sub,
            author_name: author.name,
            author_username: author.username,
            author_profile_picture: author.profile_picture,
            content: req.content,
            created_at: convert::parse_timestamp(&created_at),
        }),
    ))
}

fn post_response(row: &PostRow, replies: Vec<ReplyResponse>) -> PostResponse {
    let tags: Vec<String> = serde_json::from_str(&row.tags).unwrap_or_else(|e| {
        warn!("Corrupt tags '{}' on post '{}': {}", row.tags, row.id, e);
        vec![]
    });

    PostResponse {
        id: convert::parse_uuid(&row.id, "post id"),
        author_id: convert::parse_uuid(&row.author_id, "author_id"),
        author_name: row.author_name.clone(),
        author_username: row.author_username.clone(),
        author_profile_picture: row.author_profile_picture.clone(),
        kind: row.kind.clone(),
        title: row.title.clone(),
        content: row.content.clone(),
        tags,
        company: row.company.clone(),
        location: row.location.clone(),
        job_link: row.job_link.clone(),
        document_name: row.document_name.clone(),
        document_url: row.document_url.clone(),
        replies,
        created_at: convert::parse_timestamp(&row.created_at),
        updated_at: convert::parse_timestamp(&row.updated_at),
    }
}

fn reply_response(row: &ReplyRow) -> ReplyResponse {
    ReplyResponse {
        id: convert::parse_uuid(&row.id, "reply id"),
        author_id: convert::parse_uuid(&row.author_id, "author_id"),
        author_name: row.author_name.clone(),
        author_username: row.author_username.clone(),
        author_profile_picture: row.author_profile_picture.clone(),
        content: row.content.clone(),
        created_at: convert::parse_timestamp(&row.created_at),
    }
}
