//! Request handlers for sync endpoints.

use crate::auth::{AuthConfig, TokenValidator};
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::RelayStore;
use ledgersync_core::MerkleTrie;
use ledgersync_sync_protocol::{
    Ack, FileRequest, FileScoped, PullDiffRequest, PullDiffResponse, PullMessagesRequest,
    PullMessagesResponse, PushRequest, PushResponse,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Handler for sync requests.
pub struct RequestHandler {
    config: ServerConfig,
    store: Arc<RelayStore>,
    validator: Option<TokenValidator>,
}

impl RequestHandler {
    /// Creates a handler over `store`.
    pub fn new(config: ServerConfig, store: Arc<RelayStore>) -> Self {
        let validator = config.auth_secret.as_ref().map(|secret| {
            TokenValidator::new(AuthConfig::new(secret.clone()).with_expiry(config.token_expiry))
        });
        Self {
            config,
            store,
            validator,
        }
    }

    /// The token validator, if auth is configured.
    pub fn validator(&self) -> Option<&TokenValidator> {
        self.validator.as_ref()
    }

    fn authorize(&self, request: &impl FileScoped) -> ServerResult<()> {
        if request.file_id().is_empty() {
            return Err(ServerError::InvalidRequest("empty file id".into()));
        }
        if !self.config.require_auth {
            return Ok(());
        }
        let validator = self
            .validator
            .as_ref()
            .ok_or_else(|| ServerError::Internal("auth required but no secret configured".into()))?;
        let token = request
            .token()
            .ok_or_else(|| ServerError::NotAuthorized("missing sync token".into()))?;
        validator.validate_token(token, request.file_id())
    }

    /// Stores pushed messages.
    pub fn handle_push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.authorize(&request)?;
        if request.messages.len() > self.config.max_push_batch as usize {
            return Err(ServerError::TooLarge {
                len: request.messages.len(),
                max: self.config.max_push_batch,
            });
        }

        if let Some(m) = request.messages.iter().find(|m| !MerkleTrie::covers(&m.timestamp)) {
            return Err(ServerError::InvalidRequest(format!(
                "timestamp {} is beyond the Merkle index range",
                m.timestamp
            )));
        }

        let new_watermark = request
            .messages
            .iter()
            .map(|m| m.timestamp)
            .max()
            .or(request.since);
        let received = request.messages.len();

        let (stored, group_id) = self.store.with_file(&request.file_id, |file| {
            let stored = request
                .messages
                .into_iter()
                .fold(0u32, |n, m| n + u32::from(file.insert(m)));
            (stored, file.group_id())
        });

        debug!(file_id = %request.file_id, received, stored, "push");
        Ok(PushResponse {
            new_watermark,
            stored,
            group_id,
        })
    }

    /// Compares the client's trie with the relay's.
    pub fn handle_pull_diff(&self, request: PullDiffRequest) -> ServerResult<PullDiffResponse> {
        self.authorize(&request)?;
        let response = self.store.with_file(&request.file_id, |file| PullDiffResponse {
            diverging: file.trie().diff(&request.trie),
            remote_root: file.root_hash(),
            group_id: file.group_id(),
        });
        debug!(
            file_id = %request.file_id,
            diverging = response.diverging.len(),
            "pull-diff"
        );
        Ok(response)
    }

    /// Returns messages in the requested buckets.
    pub fn handle_pull_messages(
        &self,
        request: PullMessagesRequest,
    ) -> ServerResult<PullMessagesResponse> {
        self.authorize(&request)?;
        let messages = self
            .store
            .read_file(&request.file_id, |file| file.messages_in(&request.buckets))
            .unwrap_or_default();
        debug!(file_id = %request.file_id, returned = messages.len(), "pull-messages");
        Ok(PullMessagesResponse { messages })
    }

    /// Wipes the file and starts a new history generation.
    pub fn handle_reset(&self, request: FileRequest) -> ServerResult<Ack> {
        self.authorize(&request)?;
        let ack = self.store.with_file(&request.file_id, |file| {
            file.reset();
            Ack {
                group_id: file.group_id(),
                root: file.root_hash(),
            }
        });
        info!(file_id = %request.file_id, group_id = %ack.group_id, "reset file");
        Ok(ack)
    }

    /// Rebuilds the file's trie from its stored messages.
    pub fn handle_repair(&self, request: FileRequest) -> ServerResult<Ack> {
        self.authorize(&request)?;
        let ack = self.store.with_file(&request.file_id, |file| {
            file.repair();
            Ack {
                group_id: file.group_id(),
                root: file.root_hash(),
            }
        });
        info!(file_id = %request.file_id, root = %ack.root, "repaired file");
        Ok(ack)
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("max_push_batch", &self.config.max_push_batch)
            .field("auth", &self.validator.is_some())
            .finish_non_exhaustive()
    }
}
