//! Transport layer abstraction for sync operations.

use crate::error::{SyncError, SyncResult};
use ledgersync_sync_protocol::{
    Ack, FileRequest, PullDiffRequest, PullDiffResponse, PullMessagesRequest,
    PullMessagesResponse, PushRequest, PushResponse,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};

/// A sync transport carries one round-trip's requests to the relay.
///
/// Calls are the only suspension points of a sync session.
pub trait SyncTransport: Send + Sync {
    /// Uploads sealed messages.
    fn push(&self, request: &PushRequest)
        -> impl Future<Output = SyncResult<PushResponse>> + Send;

    /// Compares tries.
    fn pull_diff(
        &self,
        request: &PullDiffRequest,
    ) -> impl Future<Output = SyncResult<PullDiffResponse>> + Send;

    /// Fetches messages in bucket ranges.
    fn pull_messages(
        &self,
        request: &PullMessagesRequest,
    ) -> impl Future<Output = SyncResult<PullMessagesResponse>> + Send;

    /// Wipes the relay's copy of a file.
    fn reset(&self, request: &FileRequest) -> impl Future<Output = SyncResult<Ack>> + Send;

    /// Rebuilds the relay's trie for a file.
    fn repair(&self, request: &FileRequest) -> impl Future<Output = SyncResult<Ack>> + Send;

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport.
    fn close(&self) -> SyncResult<()>;
}

/// A transport that replays scripted responses, for testing.
///
/// Each endpoint has a queue; an empty queue answers with a protocol error.
/// Every request is recorded.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    push_responses: Mutex<VecDeque<SyncResult<PushResponse>>>,
    diff_responses: Mutex<VecDeque<SyncResult<PullDiffResponse>>>,
    message_responses: Mutex<VecDeque<SyncResult<PullMessagesResponse>>>,
    ack_responses: Mutex<VecDeque<SyncResult<Ack>>>,
    pushes: Mutex<Vec<PushRequest>>,
    diffs: Mutex<Vec<PullDiffRequest>>,
    fetches: Mutex<Vec<PullMessagesRequest>>,
}

impl MockTransport {
    /// Creates a connected mock with empty queues.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            push_responses: Mutex::new(VecDeque::new()),
            diff_responses: Mutex::new(VecDeque::new()),
            message_responses: Mutex::new(VecDeque::new()),
            ack_responses: Mutex::new(VecDeque::new()),
            pushes: Mutex::new(Vec::new()),
            diffs: Mutex::new(Vec::new()),
            fetches: Mutex::new(Vec::new()),
        }
    }

    /// Queues a push response.
    pub fn queue_push(&self, response: SyncResult<PushResponse>) {
        self.push_responses.lock().push_back(response);
    }

    /// Queues a pull-diff response.
    pub fn queue_diff(&self, response: SyncResult<PullDiffResponse>) {
        self.diff_responses.lock().push_back(response);
    }

    /// Queues a pull-messages response.
    pub fn queue_messages(&self, response: SyncResult<PullMessagesResponse>) {
        self.message_responses.lock().push_back(response);
    }

    /// Queues a reset or repair response.
    pub fn queue_ack(&self, response: SyncResult<Ack>) {
        self.ack_responses.lock().push_back(response);
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Push requests received so far.
    pub fn pushes(&self) -> Vec<PushRequest> {
        self.pushes.lock().clone()
    }

    /// Pull-diff requests received so far.
    pub fn diffs(&self) -> Vec<PullDiffRequest> {
        self.diffs.lock().clone()
    }

    /// Pull-messages requests received so far.
    pub fn fetches(&self) -> Vec<PullMessagesRequest> {
        self.fetches.lock().clone()
    }

    fn next<T>(&self, queue: &Mutex<VecDeque<SyncResult<T>>>, what: &str) -> SyncResult<T> {
        if !self.is_connected() {
            return Err(SyncError::NotConnected);
        }
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol(format!("no mock {what} response queued"))))
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncTransport for MockTransport {
    async fn push(&self, request: &PushRequest) -> SyncResult<PushResponse> {
        self.pushes.lock().push(request.clone());
        self.next(&self.push_responses, "push")
    }

    async fn pull_diff(&self, request: &PullDiffRequest) -> SyncResult<PullDiffResponse> {
        self.diffs.lock().push(request.clone());
        self.next(&self.diff_responses, "pull-diff")
    }

    async fn pull_messages(
        &self,
        request: &PullMessagesRequest,
    ) -> SyncResult<PullMessagesResponse> {
        self.fetches.lock().push(request.clone());
        self.next(&self.message_responses, "pull-messages")
    }

    async fn reset(&self, _request: &FileRequest) -> SyncResult<Ack> {
        self.next(&self.ack_responses, "reset")
    }

    async fn repair(&self, _request: &FileRequest) -> SyncResult<Ack> {
        self.next(&self.ack_responses, "repair")
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> SyncResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledgersync_core::TrieHash;
    use uuid::Uuid;

    #[test]
    fn mock_transport_connection() {
        let transport = MockTransport::new();
        assert!(transport.is_connected());

        transport.set_connected(false);
        assert!(!transport.is_connected());

        transport.set_connected(true);
        transport.close().unwrap();
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn mock_transport_not_connected_error() {
        let transport = MockTransport::new();
        transport.set_connected(false);

        let result = transport.reset(&FileRequest::new("budget-1", None)).await;
        assert!(matches!(result, Err(SyncError::NotConnected)));
    }

    #[tokio::test]
    async fn mock_transport_replays_in_order() {
        let transport = MockTransport::new();
        let ack = Ack {
            group_id: Uuid::nil(),
            root: TrieHash::default(),
        };
        transport.queue_ack(Ok(ack.clone()));
        transport.queue_ack(Err(SyncError::Timeout));

        let request = FileRequest::new("budget-1", None);
        assert_eq!(transport.repair(&request).await.unwrap(), ack);
        assert!(matches!(
            transport.repair(&request).await,
            Err(SyncError::Timeout)
        ));
        assert!(matches!(
            transport.repair(&request).await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn mock_transport_records_requests() {
        let transport = MockTransport::new();
        let request = PushRequest::new("budget-1", None, None, vec![]);
        let _ = transport.push(&request).await;
        assert_eq!(transport.pushes(), vec![request]);
    }
}
