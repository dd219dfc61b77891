/// Database row types — these map directly to SQLite rows.
/// Distinct from connect-types API models to keep the DB layer independent.

#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub bio: String,
    pub profile_picture: Option<String>,
    pub created_at: String,
}

pub struct PasswordResetRow {
    pub id: String,
    pub user_id: String,
    pub token: String,
    pub expires_at: String,
    pub used: bool,
}

pub struct PostRow {
    pub id: String,
    pub author_id: String,
    pub kind: String,
    pub title: String,
    pub content: String,
    /// JSON-encoded array of tag strings.
    pub tags: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub job_link: Option<String>,
    pub document_name: Option<String>,
    pub document_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    // Author display snapshot, joined from users at query time.
    pub author_name: String,
    pub author_username: String,
    pub author_profile_picture: Option<String>,
}

pub struct ReplyRow {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub created_at: String,
    pub author_name: String,
    pub author_username: String,
    pub author_profile_picture: Option<String>,
}

/// A directed message. `content` is whatever string was persisted —
/// ciphertext or legacy plaintext; decryption happens above this layer.
#[derive(Debug, Clone)]
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub recipient_id: String,
    pub content: String,
    pub read: bool,
    pub created_at: String,
}
