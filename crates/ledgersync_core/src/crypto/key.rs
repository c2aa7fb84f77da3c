//! Keys, key derivation and the AEAD cipher.

use crate::error::{CoreError, CoreResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use ledgersync_codec::{NONCE_LEN, TAG_LEN};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of an AES-256 key.
pub const KEY_LEN: usize = 32;

/// Length of a key derivation salt.
pub const SALT_LEN: usize = 16;

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Number of passes.
    pub iterations: u32,
    /// Degree of parallelism.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    /// The cheapest parameters Argon2 accepts. Tests only.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            memory_kib: 8,
            iterations: 1,
            parallelism: 1,
        }
    }

    /// Sets the memory cost.
    #[must_use]
    pub fn with_memory_kib(mut self, memory_kib: u32) -> Self {
        self.memory_kib = memory_kib;
        self
    }

    /// Sets the number of passes.
    #[must_use]
    pub fn with_iterations(mut self, iterations: u32) -> Self {
        self.iterations = iterations;
        self
    }
}

/// A 256-bit key, wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_LEN],
}

impl EncryptionKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error unless `bytes` is exactly [`KEY_LEN`] long.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CoreError::key_derivation_failed(format!(
                "key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    /// Derives a key from a user secret with Argon2id.
    ///
    /// Deliberately slow; cost is set by `params`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyDerivationFailed`] if Argon2 rejects the
    /// parameters or the salt.
    pub fn derive(secret: &[u8], salt: &[u8], params: &KdfParams) -> CoreResult<Self> {
        let argon_params = Params::new(
            params.memory_kib,
            params.iterations,
            params.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| CoreError::key_derivation_failed(format!("invalid Argon2 parameters: {e}")))?;

        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon_params);
        let mut bytes = [0u8; KEY_LEN];
        argon2
            .hash_password_into(secret, salt, &mut bytes)
            .map_err(|e| CoreError::key_derivation_failed(e.to_string()))?;
        Ok(Self { bytes })
    }

    /// Returns the raw key bytes. Never log or persist these.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// AES-256-GCM with a fresh random nonce per call.
///
/// Output layout of [`encrypt`](Self::encrypt) is
/// `nonce (12) || ciphertext || tag (16)`.
pub struct Cipher {
    aead: Aes256Gcm,
}

impl Cipher {
    /// Creates a cipher for `key`.
    #[must_use]
    pub fn new(key: &EncryptionKey) -> Self {
        Self {
            aead: Aes256Gcm::new(GenericArray::from_slice(key.as_bytes())),
        }
    }

    /// Encrypts and authenticates `plaintext`, binding `aad`.
    ///
    /// # Errors
    ///
    /// Returns an error only if the AEAD refuses the input length.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let sealed = self
            .aead
            .encrypt(Nonce::from_slice(&nonce), Payload { msg: plaintext, aad })
            .map_err(|_| CoreError::invalid_operation("plaintext too large to encrypt"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + sealed.len());
        out.extend_from_slice(&nonce);
        out.extend(sealed);
        Ok(out)
    }

    /// Decrypts the output of [`encrypt`](Self::encrypt).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::AuthenticationFailed`] if the data is too short,
    /// was altered, was sealed with another key, or `aad` differs.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> CoreResult<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(CoreError::AuthenticationFailed);
        }
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        self.aead
            .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|_| CoreError::AuthenticationFailed)
    }
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("aead", &"Aes256Gcm").finish()
    }
}
