//! Encryption layer.
//!
//! Keys are derived from a user secret with Argon2id and used with
//! AES-256-GCM. The layer persists [`KeyRecord`]s (salt, cost parameters and a
//! verification tag) and nothing else: neither the secret nor the derived key
//! ever reaches disk.

mod key;
mod keyring;

pub use key::{Cipher, EncryptionKey, KdfParams, KEY_LEN, SALT_LEN};
pub use keyring::{KeyRecord, Keyring};
