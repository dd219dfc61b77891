use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::error;
use uuid::Uuid;

use connect_types::api::{Claims, UploadResponse};

use crate::auth::AppState;
use crate::error::ApiError;

/// 10 MB cap for profile images and shared documents.
const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Request body cap for the upload routes. Axum's default body limit is
/// 2 MB, well under MAX_FILE_SIZE; the routes layer this value instead,
/// with headroom for multipart framing so an exactly-max file still
/// reaches the size check below.
pub const UPLOAD_BODY_LIMIT: usize = MAX_FILE_SIZE + 64 * 1024;

/// POST /upload/image — multipart "file" field, stored on local disk,
/// returns the URL it will be served from.
pub async fn upload_image(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (url, _) = save_upload(&state, claims.sub, multipart).await?;
    Ok((StatusCode::CREATED, Json(UploadResponse { url, name: None })))
}

/// POST /upload/document — same storage path, but the original filename is
/// echoed back so posts can display it.
pub async fn upload_document(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let (url, name) = save_upload(&state, claims.sub, multipart).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            url,
            name: Some(name),
        }),
    ))
}

async fn save_upload(
    state: &AppState,
    uploader: Uuid,
    mut multipart: Multipart,
) -> Result<(String, String), ApiError> {
    let field = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => break field,
            Ok(Some(_)) => continue,
            Ok(None) => return Err(ApiError::BadRequest("Missing 'file' field")),
            Err(_) => return Err(ApiError::BadRequest("Malformed multipart body")),
        }
    };

    let original_name = sanitize_filename(field.file_name().unwrap_or("upload"));

    let bytes = field
        .bytes()
        .await
        .map_err(|_| ApiError::BadRequest("Malformed multipart body"))?;
    if bytes.is_empty() {
        return Err(ApiError::BadRequest("Empty file"));
    }
    if bytes.len() > MAX_FILE_SIZE {
        return Err(ApiError::BadRequest("File too large"));
    }

    let stored_name = format!("{}_{}_{}", uploader, Uuid::new_v4(), original_name);
    let path = state.upload_dir.join(&stored_name);

    tokio::fs::create_dir_all(&state.upload_dir).await.map_err(|e| {
        error!("Failed to create upload dir {}: {}", state.upload_dir.display(), e);
        ApiError::Internal(e.into())
    })?;
    tokio::fs::write(&path, &bytes).await.map_err(|e| {
        error!("Failed to write upload {}: {}", path.display(), e);
        ApiError::Internal(e.into())
    })?;

    Ok((format!("/uploads/{}", stored_name), original_name))
}

/// Keep only characters that are safe in a path segment; everything else
/// becomes '_'. Prevents traversal via the client-supplied filename.
fn sanitize_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.trim_matches(['.', '_']).is_empty() {
        "upload".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::{MAX_FILE_SIZE, UPLOAD_BODY_LIMIT, sanitize_filename};

    #[test]
    fn body_limit_leaves_headroom_over_the_file_cap() {
        assert!(UPLOAD_BODY_LIMIT > MAX_FILE_SIZE);
    }

    #[test]
    fn strips_path_separators() {
        assert_eq!(sanitize_filename("../../etc/passwd"), ".._.._etc_passwd");
        assert_eq!(sanitize_filename("notes final.pdf"), "notes_final.pdf");
    }

    #[test]
    fn degenerate_names_get_a_default() {
        assert_eq!(sanitize_filename(""), "upload");
        assert_eq!(sanitize_filename("..."), "upload");
        assert_eq!(sanitize_filename("///"), "upload");
    }
}
