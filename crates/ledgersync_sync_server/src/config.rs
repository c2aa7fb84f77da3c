//! Relay configuration.

use std::time::Duration;

/// Configuration for the relay.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum messages accepted in one push.
    pub max_push_batch: u32,
    /// Whether requests must carry a valid sync token.
    pub require_auth: bool,
    /// Secret for token signing (if auth enabled).
    pub auth_secret: Option<Vec<u8>>,
    /// Token lifetime.
    pub token_expiry: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits and no auth.
    pub fn new() -> Self {
        Self {
            max_push_batch: 1000,
            require_auth: false,
            auth_secret: None,
            token_expiry: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Sets the maximum push batch size.
    pub fn with_max_push_batch(mut self, size: u32) -> Self {
        self.max_push_batch = size;
        self
    }

    /// Enables authentication with the given secret.
    pub fn with_auth(mut self, secret: Vec<u8>) -> Self {
        self.require_auth = true;
        self.auth_secret = Some(secret);
        self
    }

    /// Sets the token lifetime.
    pub fn with_token_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}
