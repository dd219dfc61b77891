//! Row-to-wire conversions. Stored ids and timestamps are text; corrupt
//! values are logged and defaulted rather than failing the whole response,
//! matching how the rest of the service degrades.

use tracing::warn;
use uuid::Uuid;

use connect_db::models::{MessageRow, UserRow};
use connect_types::api::{MessageResponse, Participant, UserProfile};

pub(crate) fn parse_uuid(value: &str, what: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, value, e);
        Uuid::default()
    })
}

pub(crate) fn parse_timestamp(value: &str) -> chrono::DateTime<chrono::Utc> {
    value
        .parse::<chrono::DateTime<chrono::Utc>>()
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", value, e);
            chrono::DateTime::default()
        })
}

pub(crate) fn user_profile(row: &UserRow) -> UserProfile {
    UserProfile {
        id: parse_uuid(&row.id, "user id"),
        name: row.name.clone(),
        username: row.username.clone(),
        email: row.email.clone(),
        bio: row.bio.clone(),
        profile_picture: row.profile_picture.clone(),
        created_at: parse_timestamp(&row.created_at),
    }
}

pub(crate) fn participant(row: &UserRow) -> Participant {
    Participant {
        id: parse_uuid(&row.id, "user id"),
        name: row.name.clone(),
        username: row.username.clone(),
        profile_picture: row.profile_picture.clone(),
    }
}

/// Assemble the wire message from a stored row and its already-decrypted
/// content.
pub(crate) fn message(row: &MessageRow, content: String) -> MessageResponse {
    MessageResponse {
        id: parse_uuid(&row.id, "message id"),
        sender_id: parse_uuid(&row.sender_id, "sender_id"),
        recipient_id: parse_uuid(&row.recipient_id, "recipient_id"),
        content,
        created_at: parse_timestamp(&row.created_at),
        read: row.read,
    }
}
