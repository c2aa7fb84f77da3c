//! Sync tokens.
//!
//! A token authorizes requests for one file until it expires.
//!
//! ## Token Format
//!
//! - 8 bytes: issue time (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 over the file id followed by the issue time
//!
//! Total: 40 bytes, hex-encoded for transport.

use crate::error::{ServerError, ServerResult};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

const ISSUED_LEN: usize = 8;
const SIGNATURE_LEN: usize = 32;
const TOKEN_LEN: usize = ISSUED_LEN + SIGNATURE_LEN;

/// Authentication configuration.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC.
    pub secret: Vec<u8>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates an auth configuration with a 24 hour token lifetime.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the token lifetime.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

/// Issues and checks sync tokens.
#[derive(Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Issues a token for `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if the secret cannot key an HMAC.
    pub fn create_token(&self, file_id: &str) -> ServerResult<String> {
        self.create_token_at(file_id, now_millis())
    }

    fn create_token_at(&self, file_id: &str, issued: u64) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(&issued.to_be_bytes());
        let mac = self.mac(file_id, issued)?.finalize().into_bytes();
        token.extend_from_slice(&mac);
        Ok(hex::encode(token))
    }

    /// Checks that `token` was issued for `file_id` and has not expired.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] for a malformed, forged,
    /// misdirected or expired token.
    pub fn validate_token(&self, token: &str, file_id: &str) -> ServerResult<()> {
        let bytes = hex::decode(token)
            .map_err(|_| ServerError::NotAuthorized("token is not hex".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::NotAuthorized("invalid token length".into()));
        }

        let (issued, signature) = bytes.split_at(ISSUED_LEN);
        let mut issued_bytes = [0u8; ISSUED_LEN];
        issued_bytes.copy_from_slice(issued);
        let issued = u64::from_be_bytes(issued_bytes);

        self.mac(file_id, issued)?
            .verify_slice(signature)
            .map_err(|_| ServerError::NotAuthorized("invalid signature".into()))?;

        let expiry = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > issued.saturating_add(expiry) {
            return Err(ServerError::NotAuthorized("token expired".into()));
        }
        Ok(())
    }

    fn mac(&self, file_id: &str, issued: u64) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("bad token secret: {e}")))?;
        mac.update(file_id.as_bytes());
        mac.update(&issued.to_be_bytes());
        Ok(mac)
    }
}

impl std::fmt::Debug for TokenValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenValidator")
            .field("token_expiry", &self.config.token_expiry)
            .finish_non_exhaustive()
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}
