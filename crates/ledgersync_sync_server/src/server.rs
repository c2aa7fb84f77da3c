//! The relay facade.

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::handler::RequestHandler;
use crate::store::RelayStore;
use ledgersync_core::TrieHash;
use ledgersync_sync_protocol::{
    Ack, Endpoint, FileRequest, ProtocolResult, PullDiffRequest, PullDiffResponse,
    PullMessagesRequest, PullMessagesResponse, PushRequest, PushResponse, Reply, WireMessage,
};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// The relay.
///
/// ```
/// use ledgersync_sync_protocol::{FileRequest, Endpoint, Reply, Ack, WireMessage};
/// use ledgersync_sync_server::{RelayServer, ServerConfig};
///
/// let server = RelayServer::new(ServerConfig::default());
/// let body = FileRequest::new("budget-1", None).encode().unwrap();
/// let reply = server.handle_post(Endpoint::Repair.path(), &body).unwrap();
/// let ack = Reply::<Ack>::decode(&reply).unwrap().unwrap();
/// assert!(ack.root.is_zero());
/// ```
pub struct RelayServer {
    handler: RequestHandler,
    store: Arc<RelayStore>,
}

impl RelayServer {
    /// Creates a relay with an empty store.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_store(config, Arc::new(RelayStore::new()))
    }

    /// Creates a relay over an existing store.
    pub fn with_store(config: ServerConfig, store: Arc<RelayStore>) -> Self {
        let handler = RequestHandler::new(config, Arc::clone(&store));
        Self { handler, store }
    }

    /// Handles a push request.
    pub fn push(&self, request: PushRequest) -> ServerResult<PushResponse> {
        self.handler.handle_push(request)
    }

    /// Handles a pull-diff request.
    pub fn pull_diff(&self, request: PullDiffRequest) -> ServerResult<PullDiffResponse> {
        self.handler.handle_pull_diff(request)
    }

    /// Handles a pull-messages request.
    pub fn pull_messages(&self, request: PullMessagesRequest) -> ServerResult<PullMessagesResponse> {
        self.handler.handle_pull_messages(request)
    }

    /// Handles a reset request.
    pub fn reset(&self, request: FileRequest) -> ServerResult<Ack> {
        self.handler.handle_reset(request)
    }

    /// Handles a repair request.
    pub fn repair(&self, request: FileRequest) -> ServerResult<Ack> {
        self.handler.handle_repair(request)
    }

    /// Decodes a request body, dispatches it by path and encodes the reply.
    ///
    /// Relay-level refusals travel inside the reply; `Err` is reserved for
    /// an unknown path or a reply that cannot be encoded.
    pub fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let endpoint =
            Endpoint::from_path(path).ok_or_else(|| format!("no such endpoint: {path}"))?;
        let encoded = match endpoint {
            Endpoint::Push => reply(endpoint, decode(body).and_then(|r| self.push(r))),
            Endpoint::PullDiff => reply(endpoint, decode(body).and_then(|r| self.pull_diff(r))),
            Endpoint::PullMessages => {
                reply(endpoint, decode(body).and_then(|r| self.pull_messages(r)))
            }
            Endpoint::Reset => reply(endpoint, decode(body).and_then(|r| self.reset(r))),
            Endpoint::Repair => reply(endpoint, decode(body).and_then(|r| self.repair(r))),
        };
        encoded.map_err(|e| e.to_string())
    }

    /// Issues a sync token for `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Internal`] if auth is not configured.
    pub fn create_token(&self, file_id: &str) -> ServerResult<String> {
        self.handler
            .validator()
            .ok_or_else(|| ServerError::Internal("auth is not configured".into()))?
            .create_token(file_id)
    }

    /// Checks a sync token for `file_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::NotAuthorized`] if the token is bad, or
    /// [`ServerError::Internal`] if auth is not configured.
    pub fn validate_token(&self, token: &str, file_id: &str) -> ServerResult<()> {
        self.handler
            .validator()
            .ok_or_else(|| ServerError::Internal("auth is not configured".into()))?
            .validate_token(token, file_id)
    }

    /// Messages stored for a file.
    pub fn message_count(&self, file_id: &str) -> usize {
        self.store.read_file(file_id, |f| f.len()).unwrap_or(0)
    }

    /// Root hash of a file's trie.
    pub fn root_hash(&self, file_id: &str) -> TrieHash {
        self.store
            .read_file(file_id, |f| f.root_hash())
            .unwrap_or_default()
    }

    /// Current group id of a file, if it exists.
    pub fn group_id(&self, file_id: &str) -> Option<Uuid> {
        self.store.read_file(file_id, |f| f.group_id())
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<RelayStore> {
        &self.store
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("handler", &self.handler)
            .field("files", &self.store.file_count())
            .finish()
    }
}

fn decode<T: WireMessage>(body: &[u8]) -> ServerResult<T> {
    Ok(T::decode(body)?)
}

fn reply<T: WireMessage>(endpoint: Endpoint, result: ServerResult<T>) -> ProtocolResult<Vec<u8>> {
    let reply: Reply<T> = result.map_err(|e| {
        if e.is_client_error() {
            debug!(%endpoint, error = %e, "rejected request");
        } else {
            warn!(%endpoint, error = %e, "request failed");
        }
        e.to_remote()
    });
    reply.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_codec::{EncryptedMessage, NodeId, Timestamp};
    use ledgersync_core::{BucketRange, MerkleTrie};
    use ledgersync_sync_protocol::RemoteErrorKind;

    const MINUTE: u64 = 60_000;
    const FILE: &str = "budget-1";

    fn envelope(millis: u64, node: u16) -> EncryptedMessage {
        EncryptedMessage {
            timestamp: Timestamp::new(millis, NodeId::new(node), 0),
            key_id: Uuid::nil(),
            nonce: [9; 12],
            sealed: vec![0x42; 24],
        }
    }

    fn post<Req: WireMessage, Res: WireMessage>(
        server: &RelayServer,
        endpoint: Endpoint,
        request: &Req,
    ) -> Reply<Res> {
        let body = request.encode().unwrap();
        let reply = server.handle_post(endpoint.path(), &body).unwrap();
        Reply::<Res>::decode(&reply).unwrap()
    }

    #[test]
    fn full_sync_flow() {
        let server = RelayServer::new(ServerConfig::default());

        // An empty client against an empty relay agrees.
        let diff: PullDiffResponse = post(
            &server,
            Endpoint::PullDiff,
            &PullDiffRequest::new(FILE, None, MerkleTrie::new()),
        )
        .unwrap();
        assert!(diff.is_converged());

        let pushed = vec![envelope(MINUTE, 1), envelope(5 * MINUTE, 1)];
        let response: PushResponse = post(
            &server,
            Endpoint::Push,
            &PushRequest::new(FILE, None, None, pushed.clone()),
        )
        .unwrap();
        assert_eq!(response.stored, 2);
        assert_eq!(response.new_watermark, Some(pushed[1].timestamp));

        // A second device with nothing sees both buckets diverge.
        let diff: PullDiffResponse = post(
            &server,
            Endpoint::PullDiff,
            &PullDiffRequest::new(FILE, None, MerkleTrie::new()),
        )
        .unwrap();
        assert_eq!(
            diff.diverging,
            vec![BucketRange::minute(1), BucketRange::minute(5)]
        );
        assert_eq!(diff.group_id, response.group_id);

        let pulled: PullMessagesResponse = post(
            &server,
            Endpoint::PullMessages,
            &PullMessagesRequest::new(FILE, None, diff.diverging),
        )
        .unwrap();
        assert_eq!(pulled.messages, pushed);
    }

    #[test]
    fn push_is_idempotent() {
        let server = RelayServer::new(ServerConfig::default());
        let request = PushRequest::new(FILE, None, None, vec![envelope(MINUTE, 1)]);
        server.push(request.clone()).unwrap();
        let root = server.root_hash(FILE);

        let again = server.push(request).unwrap();
        assert_eq!(again.stored, 0);
        assert_eq!(server.root_hash(FILE), root);
        assert_eq!(server.message_count(FILE), 1);
    }

    #[test]
    fn empty_push_keeps_watermark() {
        let server = RelayServer::new(ServerConfig::default());
        let since = Timestamp::new(MINUTE, NodeId::new(1), 0);
        let response = server
            .push(PushRequest::new(FILE, None, Some(since), vec![]))
            .unwrap();
        assert_eq!(response.new_watermark, Some(since));
    }

    #[test]
    fn push_over_limit_is_refused() {
        let server = RelayServer::new(ServerConfig::default().with_max_push_batch(1));
        let reply: Reply<PushResponse> = post(
            &server,
            Endpoint::Push,
            &PushRequest::new(FILE, None, None, vec![envelope(1, 1), envelope(2, 1)]),
        );
        assert_eq!(reply.unwrap_err().kind, RemoteErrorKind::TooLarge);
        assert_eq!(server.message_count(FILE), 0);
    }

    #[test]
    fn push_past_trie_range_is_refused() {
        let server = RelayServer::new(ServerConfig::default());
        let far = (ledgersync_core::MAX_MINUTE + 1) * MINUTE;
        let reply: Reply<PushResponse> = post(
            &server,
            Endpoint::Push,
            &PushRequest::new(FILE, None, None, vec![envelope(MINUTE, 1), envelope(far, 1)]),
        );
        assert_eq!(reply.unwrap_err().kind, RemoteErrorKind::BadRequest);
        assert_eq!(server.message_count(FILE), 0);
    }

    #[test]
    fn auth_is_enforced() {
        let server = RelayServer::new(ServerConfig::default().with_auth(b"secret".to_vec()));

        let reply: Reply<Ack> = post(&server, Endpoint::Repair, &FileRequest::new(FILE, None));
        assert_eq!(reply.unwrap_err().kind, RemoteErrorKind::Unauthorized);

        let other = server.create_token("budget-2").unwrap();
        let reply: Reply<Ack> = post(
            &server,
            Endpoint::Repair,
            &FileRequest::new(FILE, Some(other)),
        );
        assert_eq!(reply.unwrap_err().kind, RemoteErrorKind::Unauthorized);

        let token = server.create_token(FILE).unwrap();
        let reply: Reply<Ack> = post(
            &server,
            Endpoint::Repair,
            &FileRequest::new(FILE, Some(token)),
        );
        assert!(reply.is_ok());
    }

    #[test]
    fn reset_wipes_and_regroups() {
        let server = RelayServer::new(ServerConfig::default());
        let pushed = server
            .push(PushRequest::new(FILE, None, None, vec![envelope(MINUTE, 1)]))
            .unwrap();

        let ack = server.reset(FileRequest::new(FILE, None)).unwrap();
        assert_ne!(ack.group_id, pushed.group_id);
        assert!(ack.root.is_zero());
        assert_eq!(server.message_count(FILE), 0);
        assert_eq!(server.group_id(FILE), Some(ack.group_id));
    }

    #[test]
    fn unknown_path_and_bad_body() {
        let server = RelayServer::new(ServerConfig::default());
        assert!(server.handle_post("/sync/handshake", &[]).is_err());

        let reply = server
            .handle_post(Endpoint::Push.path(), &[0xff, 0xff])
            .unwrap();
        let err = Reply::<PushResponse>::decode(&reply).unwrap().unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::BadRequest);
    }

    #[test]
    fn empty_file_id_is_refused() {
        let server = RelayServer::new(ServerConfig::default());
        let err = server.repair(FileRequest::new("", None)).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
    }
}
