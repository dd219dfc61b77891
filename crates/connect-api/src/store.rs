//! The message store: the one place message records are written, read, and
//! flipped to read. Owns the injected cipher capability; everything leaving
//! this module carries decrypted content, everything entering is encrypted
//! before it touches the database.

use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use connect_crypto::MessageCipher;
use connect_db::conversations;
use connect_db::{Database, now_timestamp};
use connect_types::api::{ConversationResponse, LastMessage, MessageResponse};

use crate::convert;
use crate::error::ApiError;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("recipient does not exist")]
    RecipientNotFound,

    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::RecipientNotFound => ApiError::NotFound("Recipient not found"),
            StoreError::Storage(e) => ApiError::Internal(e),
        }
    }
}

/// Append-only store of directed messages. Methods are synchronous (rusqlite
/// underneath); handlers call them through `spawn_blocking`.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
    cipher: Arc<MessageCipher>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>, cipher: Arc<MessageCipher>) -> Self {
        Self { db, cipher }
    }

    /// Persist a new message. The recipient must exist; content is encrypted
    /// at rest. The returned record carries the original plaintext; the
    /// caller never sees ciphertext.
    pub fn append(
        &self,
        sender: Uuid,
        recipient: Uuid,
        content: &str,
    ) -> Result<MessageResponse, StoreError> {
        if !self.db.user_exists(&recipient.to_string())? {
            return Err(StoreError::RecipientNotFound);
        }

        let id = Uuid::new_v4();
        let created_at = now_timestamp();
        let stored = self.cipher.encrypt(content);

        self.db.insert_message(
            &id.to_string(),
            &sender.to_string(),
            &recipient.to_string(),
            &stored,
            &created_at,
        )?;

        Ok(MessageResponse {
            id,
            sender_id: sender,
            recipient_id: recipient,
            content: content.to_string(),
            created_at: convert::parse_timestamp(&created_at),
            read: false,
        })
    }

    /// Open the thread between viewer and peer: full bidirectional history,
    /// oldest first, decrypted. Viewing marks it seen: every returned
    /// message addressed to the viewer and still unread is flipped to read
    /// in one batch, and the response reflects the flip.
    pub fn thread_between(
        &self,
        viewer: Uuid,
        peer: Uuid,
    ) -> Result<Vec<MessageResponse>, StoreError> {
        let viewer_id = viewer.to_string();
        let rows = self.db.messages_between(&viewer_id, &peer.to_string())?;

        let unread_ids: Vec<String> = rows
            .iter()
            .filter(|m| m.recipient_id == viewer_id && !m.read)
            .map(|m| m.id.clone())
            .collect();
        self.mark_read(&unread_ids)?;

        let messages = rows
            .into_iter()
            .map(|row| {
                let content = self.cipher.decrypt(&row.content);
                let mut message = convert::message(&row, content);
                if row.recipient_id == viewer_id {
                    message.read = true;
                }
                message
            })
            .collect();

        Ok(messages)
    }

    /// Idempotent batch read-marking.
    pub fn mark_read(&self, ids: &[String]) -> Result<(), StoreError> {
        self.db.mark_messages_read(ids)?;
        Ok(())
    }

    /// The viewer's inbox: one row per peer, most recent first. Derivation
    /// is pure in-process work over one broad query; peers whose account no
    /// longer resolves are dropped from the listing rather than failing it.
    pub fn conversations_for(&self, viewer: Uuid) -> Result<Vec<ConversationResponse>, StoreError> {
        let viewer_id = viewer.to_string();
        let rows = self.db.messages_for_user(&viewer_id)?;
        let summaries = conversations::derive(&viewer_id, &rows);

        let peer_ids: Vec<String> = summaries.iter().map(|s| s.peer_id.clone()).collect();
        let peers = self.db.get_users_by_ids(&peer_ids)?;

        let conversations = summaries
            .into_iter()
            .filter_map(|summary| {
                let Some(peer) = peers.iter().find(|u| u.id == summary.peer_id) else {
                    tracing::warn!(
                        "Dropping conversation with unknown user {}",
                        summary.peer_id
                    );
                    return None;
                };

                let last = &summary.last_message;
                Some(ConversationResponse {
                    conversation_id: convert::parse_uuid(&summary.peer_id, "peer id"),
                    participant: convert::participant(peer),
                    last_message: LastMessage {
                        id: convert::parse_uuid(&last.id, "message id"),
                        content: self.cipher.decrypt(&last.content),
                        created_at: convert::parse_timestamp(&last.created_at),
                        sender_id: convert::parse_uuid(&last.sender_id, "sender_id"),
                    },
                    unread_count: summary.unread_count,
                })
            })
            .collect();

        Ok(conversations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use connect_crypto::keys;

    fn seeded_store(cipher: MessageCipher) -> (MessageStore, Uuid, Uuid, Uuid) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let (ada, alan, grace) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        for (id, username) in [(ada, "ada"), (alan, "alan"), (grace, "grace")] {
            db.create_user(
                &id.to_string(),
                &format!("User {username}"),
                username,
                &format!("{username}@example.edu"),
                "hash",
                "",
                &now_timestamp(),
            )
            .unwrap();
        }
        (MessageStore::new(db, Arc::new(cipher)), ada, alan, grace)
    }

    #[test]
    fn append_rejects_missing_recipient() {
        let (store, ada, _, _) = seeded_store(MessageCipher::disabled());

        let err = store.append(ada, Uuid::new_v4(), "hello?").unwrap_err();
        assert!(matches!(err, StoreError::RecipientNotFound));
    }

    #[test]
    fn append_encrypts_at_rest_and_returns_plaintext() {
        let key = keys::generate_key();
        let (store, ada, alan, _) = seeded_store(MessageCipher::with_key(key));

        let sent = store.append(ada, alan, "hello").unwrap();
        assert_eq!(sent.content, "hello");
        assert!(!sent.read);

        // The persisted record is ciphertext, not "hello".
        let raw = store
            .db
            .messages_between(&ada.to_string(), &alan.to_string())
            .unwrap();
        assert_ne!(raw[0].content, "hello");

        // The read boundary decrypts it back.
        let thread = store.thread_between(alan, ada).unwrap();
        assert_eq!(thread[0].content, "hello");
    }

    #[test]
    fn key_change_degrades_to_raw_stored_string() {
        let key = keys::generate_key();
        let (store, ada, alan, _) = seeded_store(MessageCipher::with_key(key));
        store.append(ada, alan, "hello").unwrap();

        let stored = store
            .db
            .messages_between(&ada.to_string(), &alan.to_string())
            .unwrap()[0]
            .content
            .clone();

        // Same database, different process key: fetch does not fail, the
        // stored ciphertext string comes back verbatim.
        let restarted = MessageStore::new(
            store.db.clone(),
            Arc::new(MessageCipher::with_key(keys::generate_key())),
        );
        let thread = restarted.thread_between(alan, ada).unwrap();
        assert_eq!(thread[0].content, stored);
    }

    #[test]
    fn plaintext_history_readable_after_enabling_encryption() {
        let (store, ada, alan, _) = seeded_store(MessageCipher::disabled());
        store.append(ada, alan, "pre-encryption message").unwrap();

        let upgraded = MessageStore::new(
            store.db.clone(),
            Arc::new(MessageCipher::with_key(keys::generate_key())),
        );
        let thread = upgraded.thread_between(alan, ada).unwrap();
        assert_eq!(thread[0].content, "pre-encryption message");
    }

    #[test]
    fn opening_thread_marks_only_viewer_addressed_messages() {
        let (store, ada, alan, _) = seeded_store(MessageCipher::disabled());
        store.append(ada, alan, "one").unwrap();
        store.append(ada, alan, "two").unwrap();
        store.append(alan, ada, "reply").unwrap();

        // Alan opens the thread: ada's two messages flip, alan's own stays.
        let thread = store.thread_between(alan, ada).unwrap();
        assert!(thread.iter().filter(|m| m.recipient_id == alan).all(|m| m.read));

        let rows = store
            .db
            .messages_between(&ada.to_string(), &alan.to_string())
            .unwrap();
        for row in &rows {
            assert_eq!(row.read, row.recipient_id == alan.to_string());
        }

        // Re-opening changes nothing.
        store.thread_between(alan, ada).unwrap();
        let again = store
            .db
            .messages_between(&ada.to_string(), &alan.to_string())
            .unwrap();
        for (a, b) in rows.iter().zip(again.iter()) {
            assert_eq!(a.read, b.read);
        }
    }

    #[test]
    fn conversations_group_count_and_sort() {
        let (store, ada, alan, grace) = seeded_store(MessageCipher::with_key(keys::generate_key()));
        store.append(alan, ada, "from alan 1").unwrap();
        store.append(alan, ada, "from alan 2").unwrap();
        store.append(ada, grace, "to grace").unwrap();
        store.append(grace, ada, "from grace").unwrap();

        let inbox = store.conversations_for(ada).unwrap();
        assert_eq!(inbox.len(), 2);

        // Grace's exchange is most recent.
        assert_eq!(inbox[0].conversation_id, grace);
        assert_eq!(inbox[0].last_message.content, "from grace");
        assert_eq!(inbox[0].unread_count, 1);

        assert_eq!(inbox[1].conversation_id, alan);
        assert_eq!(inbox[1].last_message.content, "from alan 2");
        assert_eq!(inbox[1].unread_count, 2);
        assert_eq!(inbox[1].participant.username, "alan");

        // Opening alan's thread zeroes his count but keeps the row.
        store.thread_between(ada, alan).unwrap();
        let inbox = store.conversations_for(ada).unwrap();
        assert_eq!(inbox[1].conversation_id, alan);
        assert_eq!(inbox[1].unread_count, 0);
    }
}
