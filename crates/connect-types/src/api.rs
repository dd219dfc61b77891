use serde::{Deserialize, Serialize};
use uuid::Uuid;

// -- JWT Claims --

/// JWT claims shared between the auth handlers (token creation) and the
/// request middleware (token validation). Canonical definition lives here
/// in connect-types to eliminate duplication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub token_type: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateProfileRequest {
    pub name: Option<String>,
    pub username: Option<String>,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub profile_picture: Option<String>,
}

// -- Users --

#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub bio: String,
    pub profile_picture: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// Public view of another user, with aggregate post count.
#[derive(Debug, Serialize)]
pub struct PublicProfile {
    #[serde(flatten)]
    pub profile: UserProfile,
    pub posts_count: u64,
}

/// Minimal display profile, used by the new-message user picker and as the
/// `participant` of a conversation row.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub profile_picture: Option<String>,
}

// -- Posts --

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePostRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub job_link: Option<String>,
    pub document_name: Option<String>,
    pub document_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateReplyRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_username: String,
    pub author_profile_picture: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub job_link: Option<String>,
    pub document_name: Option<String>,
    pub document_url: Option<String>,
    pub replies: Vec<ReplyResponse>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub id: Uuid,
    pub author_id: Uuid,
    pub author_name: String,
    pub author_username: String,
    pub author_profile_picture: Option<String>,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub recipient_id: String,
    pub content: String,
}

/// A single directed message, content already decrypted. Callers never see
/// ciphertext.
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub id: Uuid,
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub read: bool,
}

/// One derived inbox row per peer. Conversations are recomputed from the
/// message log on every request and have no identity of their own; the
/// peer's id doubles as the conversation id.
#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub conversation_id: Uuid,
    pub participant: Participant,
    pub last_message: LastMessage,
    pub unread_count: u64,
}

#[derive(Debug, Serialize)]
pub struct LastMessage {
    pub id: Uuid,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub sender_id: Uuid,
}

// -- Uploads --

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}
