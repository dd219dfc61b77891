use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use tracing::{error, warn};

use crate::keys;

const NONCE_LEN: usize = 12;

/// Outcome of a decryption attempt. Collapsed to a plain string at the
/// module boundary by [`MessageCipher::decrypt`]; kept distinct here so
/// callers (and tests) can tell a successful decryption from a fallback
/// without inspecting string content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decrypted {
    /// Authenticated decryption succeeded; this is the original plaintext.
    Plaintext(String),
    /// The stored value is not ciphertext under the current key (legacy
    /// plaintext, foreign-key ciphertext, or the cipher is disabled).
    PassThrough,
}

enum CipherState {
    Enabled([u8; 32]),
    Disabled,
}

/// Process-wide symmetric cipher for message content, constructed once at
/// startup and injected where needed. The disabled state is an explicit
/// variant: every operation on a disabled cipher is a pass-through.
pub struct MessageCipher {
    state: CipherState,
}

impl MessageCipher {
    /// Build from the configured key, if any.
    ///
    /// - No key: a fresh random key is generated for the lifetime of this
    ///   process. Ciphertext written under it is unreadable after a restart,
    ///   which is why the key is logged for the operator to persist.
    /// - Malformed key: the cipher comes up disabled instead of taking the
    ///   process down; content is stored and returned as plain text.
    pub fn from_config(configured_key: Option<&str>) -> Self {
        match configured_key {
            Some(encoded) => match keys::key_from_base64(encoded) {
                Ok(key) => Self::with_key(key),
                Err(e) => {
                    error!(
                        "CHAT_ENCRYPTION_KEY is not a valid base64 256-bit key ({}); \
                         message encryption DISABLED, content will be stored as plain text",
                        e
                    );
                    Self::disabled()
                }
            },
            None => {
                let key = keys::generate_key();
                warn!(
                    "CHAT_ENCRYPTION_KEY not set; generated ephemeral key {} — \
                     set it in the environment or messages encrypted this run \
                     become unreadable after restart",
                    keys::key_to_base64(&key)
                );
                Self::with_key(key)
            }
        }
    }

    pub fn with_key(key: [u8; 32]) -> Self {
        Self {
            state: CipherState::Enabled(key),
        }
    }

    pub fn disabled() -> Self {
        Self {
            state: CipherState::Disabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.state, CipherState::Enabled(_))
    }

    /// Encrypt plaintext for storage: base64(nonce ‖ ciphertext), a fresh
    /// random nonce per call.
    ///
    /// Never fails: a disabled cipher or an internal cipher error returns
    /// the plaintext unchanged, so the message still goes through. Chat
    /// availability is deliberately valued over strict confidentiality here.
    pub fn encrypt(&self, plaintext: &str) -> String {
        let CipherState::Enabled(key) = &self.state else {
            return plaintext.to_string();
        };

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        match cipher.encrypt(nonce, plaintext.as_bytes()) {
            Ok(ciphertext) => {
                let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
                blob.extend_from_slice(&nonce_bytes);
                blob.extend_from_slice(&ciphertext);
                BASE64.encode(blob)
            }
            Err(e) => {
                error!("Message encryption failed ({}); storing plain text", e);
                plaintext.to_string()
            }
        }
    }

    /// Attempt authenticated decryption of a stored value.
    ///
    /// Any failure (bad base64, short blob, authentication mismatch, bad
    /// UTF-8) is `PassThrough`: the value is treated as never having been
    /// encrypted. This is the backward-compatibility rule for data written
    /// before encryption was enabled or while the cipher was disabled.
    pub fn try_decrypt(&self, stored: &str) -> Decrypted {
        let CipherState::Enabled(key) = &self.state else {
            return Decrypted::PassThrough;
        };

        let Ok(blob) = BASE64.decode(stored) else {
            return Decrypted::PassThrough;
        };
        if blob.len() <= NONCE_LEN {
            return Decrypted::PassThrough;
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
        let Ok(plaintext) = cipher.decrypt(Nonce::from_slice(nonce_bytes), ciphertext) else {
            return Decrypted::PassThrough;
        };

        match String::from_utf8(plaintext) {
            Ok(text) => Decrypted::Plaintext(text),
            Err(_) => Decrypted::PassThrough,
        }
    }

    /// Decrypt for display. Falls back to the stored value verbatim when
    /// [`try_decrypt`](Self::try_decrypt) passes through; never errors.
    pub fn decrypt(&self, stored: &str) -> String {
        match self.try_decrypt(stored) {
            Decrypted::Plaintext(text) => text,
            Decrypted::PassThrough => stored.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let cipher = MessageCipher::with_key(keys::generate_key());
        let stored = cipher.encrypt("Hello from StudyConnect!");

        assert_ne!(stored, "Hello from StudyConnect!");
        assert_eq!(cipher.decrypt(&stored), "Hello from StudyConnect!");
    }

    #[test]
    fn roundtrip_is_tagged_as_plaintext() {
        let cipher = MessageCipher::with_key(keys::generate_key());
        let stored = cipher.encrypt("tagged");

        assert_eq!(
            cipher.try_decrypt(&stored),
            Decrypted::Plaintext("tagged".into())
        );
    }

    #[test]
    fn empty_string_roundtrip() {
        let cipher = MessageCipher::with_key(keys::generate_key());
        let stored = cipher.encrypt("");

        // GCM authenticates even an empty plaintext, so the blob is non-trivial.
        assert_ne!(stored, "");
        assert_eq!(cipher.decrypt(&stored), "");
    }

    #[test]
    fn disabled_cipher_passes_through_both_ways() {
        let cipher = MessageCipher::disabled();

        assert!(!cipher.is_enabled());
        assert_eq!(cipher.encrypt("plain"), "plain");
        assert_eq!(cipher.decrypt("plain"), "plain");
        assert_eq!(cipher.try_decrypt("plain"), Decrypted::PassThrough);
    }

    #[test]
    fn legacy_plaintext_survives_decrypt() {
        let cipher = MessageCipher::with_key(keys::generate_key());

        // Written before encryption existed: not base64 at all.
        assert_eq!(cipher.decrypt("hey, free pizza in the lounge"), "hey, free pizza in the lounge");
        // Valid base64 but not ciphertext: too short / fails authentication.
        assert_eq!(cipher.decrypt("aGVsbG8="), "aGVsbG8=");
        assert_eq!(cipher.decrypt(""), "");
    }

    #[test]
    fn cross_key_decrypt_returns_stored_verbatim() {
        let writer = MessageCipher::with_key(keys::generate_key());
        let reader = MessageCipher::with_key(keys::generate_key());
        let stored = writer.encrypt("secret");

        // Wrong key: authentication fails, the raw stored string comes back.
        assert_eq!(reader.try_decrypt(&stored), Decrypted::PassThrough);
        assert_eq!(reader.decrypt(&stored), stored);
    }

    #[test]
    fn from_config_rejects_malformed_key_without_panicking() {
        assert!(!MessageCipher::from_config(Some("too-short")).is_enabled());
        assert!(!MessageCipher::from_config(Some("####")).is_enabled());

        let valid = keys::key_to_base64(&keys::generate_key());
        assert!(MessageCipher::from_config(Some(&valid)).is_enabled());
    }

    #[test]
    fn from_config_without_key_generates_one() {
        let cipher = MessageCipher::from_config(None);
        assert!(cipher.is_enabled());
        assert_eq!(cipher.decrypt(&cipher.encrypt("x")), "x");
    }
}
