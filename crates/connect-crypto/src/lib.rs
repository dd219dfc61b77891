//! At-rest encryption for direct-message content.
//!
//! One process-wide AES-256-GCM key wrapped in a [`MessageCipher`] capability
//! that is constructed once at startup and injected into the message store.
//! The cipher degrades rather than fails: with no usable key it passes
//! content through unchanged, and decryption of anything that is not valid
//! ciphertext under the current key returns the stored value verbatim. That
//! keeps messages written before encryption was enabled (or under a previous
//! key) readable, and keeps chat available even when the cipher cannot
//! operate.

pub mod cipher;
pub mod keys;

pub use cipher::{Decrypted, MessageCipher};
