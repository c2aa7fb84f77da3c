//! Key management surface for the application.
//!
//! Every change to the keyring is checkpointed so the key records survive
//! a restart. Secrets are never stored.

use crate::error::{SyncError, SyncResult};
use ledgersync_core::{CoreError, KeyRecord, Ledger};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Derives, checks and rotates the encryption key of one ledger.
#[derive(Debug, Clone)]
pub struct KeyManager {
    ledger: Arc<Mutex<Ledger>>,
}

impl KeyManager {
    /// Creates a key manager over a shared ledger.
    pub fn new(ledger: Arc<Mutex<Ledger>>) -> Self {
        Self { ledger }
    }

    /// Derives the file's first key from `secret` and makes it active.
    ///
    /// # Errors
    ///
    /// Fails if the file already has a key; use [`KeyManager::rotate_key`]
    /// to replace it.
    pub fn derive_and_store_key(&self, secret: &[u8]) -> SyncResult<Uuid> {
        let mut ledger = self.ledger.lock();
        if let Some(existing) = ledger.keyring().active_key_id() {
            return Err(CoreError::invalid_operation(format!(
                "file already has key {existing}; rotate it instead"
            ))
            .into());
        }
        let kdf = ledger.config().kdf;
        let id = ledger.keyring_mut().create_key(secret, kdf)?;
        ledger.checkpoint()?;
        info!(key_id = %id, "stored new encryption key");
        Ok(id)
    }

    /// Checks `secret` against the active key without unlocking anything.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveKey`] if the file has no key.
    pub fn verify_key(&self, secret: &[u8]) -> SyncResult<bool> {
        Ok(self.ledger.lock().keyring().verify(secret)?)
    }

    /// Makes a key derived from `new_secret` active. Earlier keys stay in
    /// the ring so history they sealed stays readable.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoActiveKey`] if there is no key to rotate.
    pub fn rotate_key(&self, new_secret: &[u8]) -> SyncResult<Uuid> {
        let mut ledger = self.ledger.lock();
        let previous = ledger
            .keyring()
            .active_key_id()
            .ok_or(SyncError::NoActiveKey)?;
        let kdf = ledger.config().kdf;
        let id = ledger.keyring_mut().create_key(new_secret, kdf)?;
        ledger.checkpoint()?;
        info!(%previous, key_id = %id, "rotated encryption key");
        Ok(id)
    }

    /// Unlocks the stored keys after a restart.
    ///
    /// Returns how many keys `secret` opened.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::KeyMismatch`] if `secret` does not open the
    /// active key.
    pub fn unlock(&self, secret: &[u8]) -> SyncResult<usize> {
        Ok(self.ledger.lock().keyring_mut().unlock(secret)?)
    }

    /// Takes over a key created on another device sharing the file.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::KeyMismatch`] if `secret` does not match.
    pub fn adopt_key(&self, record: KeyRecord, secret: &[u8]) -> SyncResult<()> {
        let mut ledger = self.ledger.lock();
        let id = record.id;
        ledger.keyring_mut().adopt(record, secret)?;
        ledger.checkpoint()?;
        info!(key_id = %id, "adopted encryption key");
        Ok(())
    }

    /// Record of the active key, for sharing with another device.
    pub fn active_record(&self) -> Option<KeyRecord> {
        self.ledger.lock().keyring().active_record().cloned()
    }

    /// Id of the active key.
    pub fn active_key_id(&self) -> Option<Uuid> {
        self.ledger.lock().keyring().active_key_id()
    }

    /// Forgets every unlocked key.
    pub fn lock(&self) {
        self.ledger.lock().keyring_mut().lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_core::LedgerConfig;

    fn manager() -> KeyManager {
        let ledger = Ledger::in_memory(LedgerConfig::testing()).unwrap();
        KeyManager::new(Arc::new(Mutex::new(ledger)))
    }

    #[test]
    fn derive_then_verify() {
        let keys = manager();
        let id = keys.derive_and_store_key(b"hunter2").unwrap();
        assert_eq!(keys.active_key_id(), Some(id));
        assert!(keys.verify_key(b"hunter2").unwrap());
        assert!(!keys.verify_key(b"hunter3").unwrap());
    }

    #[test]
    fn second_derive_is_refused() {
        let keys = manager();
        keys.derive_and_store_key(b"hunter2").unwrap();
        let err = keys.derive_and_store_key(b"other").unwrap_err();
        assert!(matches!(
            err,
            SyncError::Ledger(CoreError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn verify_without_key() {
        let keys = manager();
        assert!(matches!(
            keys.verify_key(b"hunter2"),
            Err(SyncError::NoActiveKey)
        ));
        assert!(matches!(
            keys.rotate_key(b"hunter2"),
            Err(SyncError::NoActiveKey)
        ));
    }

    #[test]
    fn rotation_keeps_old_key_readable() {
        let keys = manager();
        let old = keys.derive_and_store_key(b"first").unwrap();
        let sealed = {
            let mut ledger = keys.ledger.lock();
            let message = ledger.record("accounts", "a1", "name", "Checking").unwrap();
            ledger.keyring().seal(&message).unwrap()
        };

        let new = keys.rotate_key(b"second").unwrap();
        assert_ne!(old, new);
        assert_eq!(keys.active_key_id(), Some(new));
        assert!(keys.verify_key(b"second").unwrap());

        let ledger = keys.ledger.lock();
        assert_eq!(sealed.key_id, old);
        assert!(ledger.keyring().open(&sealed).is_ok());
        assert_eq!(ledger.keyring().records().len(), 2);
    }

    #[test]
    fn unlock_after_lock() {
        let keys = manager();
        keys.derive_and_store_key(b"hunter2").unwrap();
        keys.lock();
        assert!(!keys.ledger.lock().keyring().is_unlocked());

        assert!(matches!(
            keys.unlock(b"wrong"),
            Err(SyncError::KeyMismatch { .. })
        ));
        assert_eq!(keys.unlock(b"hunter2").unwrap(), 1);
        assert!(keys.ledger.lock().keyring().is_unlocked());
    }

    #[test]
    fn adopt_shared_record() {
        let a = manager();
        let id = a.derive_and_store_key(b"shared").unwrap();
        let record = a.active_record().unwrap();

        let b = manager();
        assert!(matches!(
            b.adopt_key(record.clone(), b"nope"),
            Err(SyncError::KeyMismatch { .. })
        ));
        b.adopt_key(record, b"shared").unwrap();
        assert_eq!(b.active_key_id(), Some(id));
    }
}
