//! Key records and the per-file keyring.
//!
//! Rotation keeps history: a rotated-out key stays in the ring so messages
//! it sealed remain readable, while new messages are sealed with the active
//! key. Nothing is ever re-encrypted.

use super::key::{Cipher, EncryptionKey, KdfParams, SALT_LEN};
use crate::error::{CoreError, CoreResult};
use ledgersync_codec::{EncryptedMessage, Message, NONCE_LEN};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Plaintext sealed into every record's verification tag.
const KEY_PROBE: &[u8] = b"ledgersync key check v1";

/// Everything needed to re-derive and check a key, minus the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyRecord {
    /// Key identifier, written into every envelope the key seals.
    pub id: Uuid,
    /// Argon2id salt.
    pub salt: [u8; SALT_LEN],
    /// Argon2id cost.
    pub params: KdfParams,
    /// [`KEY_PROBE`] sealed under the key, with the id as associated data.
    pub test: Vec<u8>,
}

impl KeyRecord {
    /// Derives a new key from `secret` with a fresh salt.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn create(secret: &[u8], params: KdfParams) -> CoreResult<(Self, EncryptionKey)> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        let id = Uuid::new_v4();

        let key = EncryptionKey::derive(secret, &salt, &params)?;
        let test = Cipher::new(&key).encrypt(KEY_PROBE, id.as_bytes())?;
        Ok((
            Self {
                id,
                salt,
                params,
                test,
            },
            key,
        ))
    }

    /// Re-derives the key from `secret` and checks it against the tag.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyMismatch`] if `secret` is not the one this
    /// record was created from.
    pub fn unlock(&self, secret: &[u8]) -> CoreResult<EncryptionKey> {
        let key = EncryptionKey::derive(secret, &self.salt, &self.params)?;
        if self.matches(&key) {
            Ok(key)
        } else {
            Err(CoreError::KeyMismatch { key_id: self.id })
        }
    }

    /// Returns true if `key` opens this record's verification tag.
    #[must_use]
    pub fn matches(&self, key: &EncryptionKey) -> bool {
        Cipher::new(key)
            .decrypt(&self.test, self.id.as_bytes())
            .is_ok_and(|probe| probe == KEY_PROBE)
    }
}

/// The key records of one budgeting file plus whichever keys are unlocked.
///
/// Only the records and the active id are serialized.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Keyring {
    records: Vec<KeyRecord>,
    active: Option<Uuid>,
    #[serde(skip)]
    unlocked: HashMap<Uuid, EncryptionKey>,
}

impl Keyring {
    /// Creates an empty keyring.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives a new key from `secret`, stores its record and makes it active.
    ///
    /// Earlier keys stay in the ring.
    ///
    /// # Errors
    ///
    /// Returns an error if key derivation fails.
    pub fn create_key(&mut self, secret: &[u8], params: KdfParams) -> CoreResult<Uuid> {
        let (record, key) = KeyRecord::create(secret, params)?;
        let id = record.id;
        debug!(key_id = %id, "derived new key");
        self.records.push(record);
        self.unlocked.insert(id, key);
        self.active = Some(id);
        Ok(id)
    }

    /// Takes over a key record created on another device.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::KeyMismatch`] if `secret` does not match the record.
    pub fn adopt(&mut self, record: KeyRecord, secret: &[u8]) -> CoreResult<()> {
        let key = record.unlock(secret)?;
        let id = record.id;
        if !self.records.iter().any(|r| r.id == id) {
            self.records.push(record);
        }
        self.unlocked.insert(id, key);
        self.active = Some(id);
        Ok(())
    }

    /// Unlocks every record `secret` opens.
    ///
    /// Returns how many keys were unlocked.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoActiveKey`] if the ring is empty, or
    /// [`CoreError::KeyMismatch`] if `secret` does not open the active key.
    pub fn unlock(&mut self, secret: &[u8]) -> CoreResult<usize> {
        let active = self.active.ok_or(CoreError::NoActiveKey)?;
        let mut opened = 0;
        for record in &self.records {
            let key = EncryptionKey::derive(secret, &record.salt, &record.params)?;
            if record.matches(&key) {
                self.unlocked.insert(record.id, key);
                opened += 1;
            }
        }
        if self.unlocked.contains_key(&active) {
            Ok(opened)
        } else {
            Err(CoreError::KeyMismatch { key_id: active })
        }
    }

    /// Checks `secret` against the active record without unlocking anything.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoActiveKey`] if there is no active record.
    pub fn verify(&self, secret: &[u8]) -> CoreResult<bool> {
        let record = self.active_record().ok_or(CoreError::NoActiveKey)?;
        match record.unlock(secret) {
            Ok(_) => Ok(true),
            Err(CoreError::KeyMismatch { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Forgets every unlocked key; records stay.
    pub fn lock(&mut self) {
        self.unlocked.clear();
    }

    /// Id of the key new messages are sealed with.
    #[must_use]
    pub fn active_key_id(&self) -> Option<Uuid> {
        self.active
    }

    /// Record of the active key.
    #[must_use]
    pub fn active_record(&self) -> Option<&KeyRecord> {
        let active = self.active?;
        self.records.iter().find(|r| r.id == active)
    }

    /// All records, oldest first.
    #[must_use]
    pub fn records(&self) -> &[KeyRecord] {
        &self.records
    }

    /// Returns true if the active key is unlocked.
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.active.is_some_and(|id| self.unlocked.contains_key(&id))
    }

    /// Encrypts a message under the active key.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::NoActiveKey`] if no key is active and unlocked.
    pub fn seal(&self, message: &Message) -> CoreResult<EncryptedMessage> {
        let key_id = self.active.ok_or(CoreError::NoActiveKey)?;
        let key = self.unlocked.get(&key_id).ok_or(CoreError::NoActiveKey)?;

        let aad = message.timestamp.to_bytes();
        let data = Cipher::new(key).encrypt(&message.encode()?, &aad)?;
        let (nonce, sealed) = data.split_at(NONCE_LEN);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        nonce_bytes.copy_from_slice(nonce);

        Ok(EncryptedMessage {
            timestamp: message.timestamp,
            key_id,
            nonce: nonce_bytes,
            sealed: sealed.to_vec(),
        })
    }

    /// Decrypts and decodes an envelope.
    ///
    /// # Errors
    ///
    /// - [`CoreError::KeyMismatch`] if the sealing key is not unlocked here
    /// - [`CoreError::AuthenticationFailed`] if the ciphertext does not verify
    /// - [`CoreError::Codec`] if the plaintext is not a message, or carries a
    ///   different timestamp than the envelope
    pub fn open(&self, envelope: &EncryptedMessage) -> CoreResult<Message> {
        let key = self
            .unlocked
            .get(&envelope.key_id)
            .ok_or(CoreError::KeyMismatch {
                key_id: envelope.key_id,
            })?;

        let mut data = Vec::with_capacity(NONCE_LEN + envelope.sealed.len());
        data.extend_from_slice(&envelope.nonce);
        data.extend_from_slice(&envelope.sealed);
        let plaintext = Cipher::new(key).decrypt(&data, &envelope.timestamp.to_bytes())?;

        let message = Message::decode(&plaintext)?;
        if message.timestamp != envelope.timestamp {
            return Err(ledgersync_codec::CodecError::malformed(format!(
                "payload timestamp {} differs from envelope {}",
                message.timestamp, envelope.timestamp
            ))
            .into());
        }
        Ok(message)
    }
}
