//! HTTP transport implementation.
//!
//! The actual HTTP client is abstracted via a trait so any stack (reqwest,
//! hyper, a platform fetch bridge) or an in-process relay can carry the
//! CBOR bodies.

use crate::error::{SyncError, SyncResult};
use crate::transport::SyncTransport;
use ledgersync_sync_protocol::{
    Ack, Endpoint, FileRequest, PullDiffRequest, PullDiffResponse, PullMessagesRequest,
    PullMessagesResponse, PushRequest, PushResponse, Reply, WireMessage,
};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request and returns the response body.
    fn post(&self, url: &str, body: Vec<u8>)
        -> impl Future<Output = Result<Vec<u8>, String>> + Send;

    /// Checks if the client is healthy.
    fn is_healthy(&self) -> bool;
}

/// HTTP-based sync transport with CBOR bodies.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates an HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    async fn post_cbor<Req, Res>(&self, endpoint: Endpoint, request: &Req) -> SyncResult<Res>
    where
        Req: WireMessage + Sync,
        Res: WireMessage,
    {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }

        let body = request.encode()?;
        let url = format!("{}{}", self.base_url, endpoint.path());
        debug!(%url, bytes = body.len(), "posting");

        let response = self.client.post(&url, body).await.map_err(|e| {
            *self.last_error.write() = Some(e.clone());
            SyncError::network_retryable(e)
        })?;
        *self.last_error.write() = None;

        Ok(Reply::<Res>::decode(&response)??)
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.post_cbor(Endpoint::Push, request).await
    }

    async fn pull_diff(&self, request: &PullDiffRequest) -> SyncResult<PullDiffResponse> {
        self.post_cbor(Endpoint::PullDiff, request).await
    }

    async fn pull_messages(
        &self,
        request: &PullMessagesRequest,
    ) -> SyncResult<PullMessagesResponse> {
        self.post_cbor(Endpoint::PullMessages, request).await
    }

    async fn reset(&self, request: &FileRequest) -> SyncResult<Ack> {
        self.post_cbor(Endpoint::Reset, request).await
    }

    async fn repair(&self, request: &FileRequest) -> SyncResult<Ack> {
        self.post_cbor(Endpoint::Repair, request).await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.client.is_healthy()
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl<C: HttpClient> std::fmt::Debug for HttpTransport<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

/// Servers that can answer requests in-process.
pub trait LoopbackServer {
    /// Handles a POST request and returns the response body.
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String>;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        (**self).handle_post(path, body)
    }
}

/// An HTTP client that routes requests straight to a [`LoopbackServer`].
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer + Send + Sync> LoopbackClient<S> {
    /// Creates a loopback client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }
}

impl<S: LoopbackServer + Send + Sync> HttpClient for LoopbackClient<S> {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        let path = url.find("/sync/").map_or(url, |i| &url[i..]);
        self.server.handle_post(path, &body)
    }

    fn is_healthy(&self) -> bool {
        true
    }
}
