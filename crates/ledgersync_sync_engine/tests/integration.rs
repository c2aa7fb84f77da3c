//! Integration tests for sync engine and relay.

use ledgersync_codec::{EncryptedMessage, Message, NodeId, Timestamp, Value, NONCE_LEN};
use ledgersync_core::{wall_millis, Cipher, Ledger, LedgerConfig};
use ledgersync_sync_engine::{
    HttpClient, HttpTransport, LoopbackClient, LoopbackServer, RetryConfig, SyncConfig,
    SyncEngine, SyncError, SyncState, UserFacingFailure,
};
use ledgersync_sync_server::{RelayServer, ServerConfig};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const FILE: &str = "budget-1";
const SECRET: &[u8] = b"correct horse battery staple";

/// Routes loopback requests to an in-process relay.
#[derive(Clone)]
struct InProcessRelay(Arc<RelayServer>);

impl InProcessRelay {
    fn new() -> Self {
        Self(Arc::new(RelayServer::new(ServerConfig::default())))
    }

    fn with_config(config: ServerConfig) -> Self {
        Self(Arc::new(RelayServer::new(config)))
    }

    fn inject(&self, envelope: EncryptedMessage) {
        self.0.store().with_file(FILE, |file| file.insert(envelope));
    }
}

impl LoopbackServer for InProcessRelay {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

/// Fails the first few requests as if the connection dropped.
struct FlakyRelay {
    inner: InProcessRelay,
    failures: AtomicU32,
}

impl LoopbackServer for FlakyRelay {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let left = self.failures.load(Ordering::SeqCst);
        if left > 0 {
            self.failures.store(left - 1, Ordering::SeqCst);
            return Err("connection reset by peer".into());
        }
        self.inner.handle_post(path, body)
    }
}

/// Never answers in time.
struct StalledClient;

impl HttpClient for StalledClient {
    async fn post(&self, _url: &str, _body: Vec<u8>) -> Result<Vec<u8>, String> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Err("stalled".into())
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

/// Answers every request after a fixed delay.
struct SlowClient {
    inner: LoopbackClient<InProcessRelay>,
    delay: Duration,
}

impl HttpClient for SlowClient {
    async fn post(&self, url: &str, body: Vec<u8>) -> Result<Vec<u8>, String> {
        tokio::time::sleep(self.delay).await;
        self.inner.post(url, body).await
    }

    fn is_healthy(&self) -> bool {
        true
    }
}

type Hook = Box<dyn FnOnce() -> Result<(), String> + Send>;

/// Runs a one-off action the first time the relay serves `path`, before
/// answering. An action error is returned in place of the answer.
struct HookedRelay {
    inner: InProcessRelay,
    hook: Mutex<Option<(&'static str, Hook)>>,
}

impl HookedRelay {
    fn new(inner: &InProcessRelay) -> Arc<Self> {
        Arc::new(Self {
            inner: inner.clone(),
            hook: Mutex::new(None),
        })
    }

    fn on(&self, path: &'static str, action: impl FnOnce() -> Result<(), String> + Send + 'static) {
        *self.hook.lock() = Some((path, Box::new(action)));
    }
}

impl LoopbackServer for HookedRelay {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        let due = {
            let mut hook = self.hook.lock();
            if hook.as_ref().is_some_and(|(at, _)| *at == path) {
                hook.take()
            } else {
                None
            }
        };
        if let Some((_, action)) = due {
            action()?;
        }
        self.inner.handle_post(path, body)
    }
}

type Engine<S> = SyncEngine<HttpTransport<LoopbackClient<S>>>;

fn config() -> SyncConfig {
    SyncConfig::new(FILE, "memory://relay").with_retry(RetryConfig::no_retry())
}

fn device_with<S: LoopbackServer + Send + Sync>(server: S, config: SyncConfig) -> Engine<S> {
    let ledger = Ledger::in_memory(LedgerConfig::testing()).unwrap();
    let transport = HttpTransport::new(config.server_url.clone(), LoopbackClient::new(server));
    SyncEngine::new(config, transport, Arc::new(Mutex::new(ledger)))
}

fn device(relay: &InProcessRelay) -> Engine<InProcessRelay> {
    device_with(relay.clone(), config())
}

/// Two devices sharing one key.
fn pair(relay: &InProcessRelay) -> (Engine<InProcessRelay>, Engine<InProcessRelay>) {
    let a = device(relay);
    let b = device(relay);
    a.keys().derive_and_store_key(SECRET).unwrap();
    b.keys()
        .adopt_key(a.keys().active_record().unwrap(), SECRET)
        .unwrap();
    (a, b)
}

fn record<S: LoopbackServer + Send + Sync>(
    engine: &Engine<S>,
    row: &str,
    column: &str,
    value: impl Into<Value>,
) -> Message {
    engine
        .ledger()
        .lock()
        .record("categories", row, column, value)
        .unwrap()
}

fn get<S: LoopbackServer + Send + Sync>(engine: &Engine<S>, row: &str, column: &str) -> Option<Value> {
    engine.ledger().lock().get("categories", row, column).cloned()
}

fn count<S: LoopbackServer + Send + Sync>(engine: &Engine<S>) -> usize {
    engine.ledger().lock().message_count()
}

fn root<S: LoopbackServer + Send + Sync>(engine: &Engine<S>) -> ledgersync_core::TrieHash {
    engine.ledger().lock().root_hash()
}

/// A message from a third device sealed under `engine`'s key.
fn foreign_envelope(engine: &Engine<InProcessRelay>, millis: u64) -> EncryptedMessage {
    let message = Message::new(
        Timestamp::new(millis, NodeId::new(0x0bad), 0),
        "categories",
        "cat9",
        "name",
        "Utilities",
    );
    engine.ledger().lock().keyring().seal(&message).unwrap()
}

#[tokio::test]
async fn later_edit_wins_on_both_devices() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);

    let groceries = record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();

    std::thread::sleep(Duration::from_millis(5));
    let food = record(&b, "cat1", "name", "Food");
    assert!(food.timestamp > groceries.timestamp);

    let result = b.sync().await.unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(result.superseded, 1);
    a.sync().await.unwrap();

    assert_eq!(get(&a, "cat1", "name"), Some(Value::from("Food")));
    assert_eq!(get(&b, "cat1", "name"), Some(Value::from("Food")));
    assert_eq!(root(&a), root(&b));
    assert_eq!(root(&a), relay.0.root_hash(FILE));
}

#[tokio::test]
async fn offline_devices_exchange_everything() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);

    for i in 0..50 {
        record(&a, &format!("a{i}"), "name", format!("from a {i}"));
        record(&b, &format!("b{i}"), "name", format!("from b {i}"));
    }

    a.sync().await.unwrap();
    b.sync().await.unwrap();
    a.sync().await.unwrap();

    assert_eq!(count(&a), 100);
    assert_eq!(count(&b), 100);
    assert_eq!(relay.0.message_count(FILE), 100);
    assert_eq!(root(&a), root(&b));
    assert_eq!(get(&a, "b17", "name"), Some(Value::from("from b 17")));
    assert_eq!(get(&b, "a42", "name"), Some(Value::from("from a 42")));

    // Already converged: one round, nothing moves.
    let result = b.sync().await.unwrap();
    assert_eq!(result.rounds, 1);
    assert_eq!(result.pushed, 0);
    assert_eq!(result.pulled, 0);
}

#[tokio::test]
async fn fresh_device_pulls_history_without_pushing_it_back() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);
    for i in 0..10 {
        record(&a, &format!("cat{i}"), "name", format!("c{i}"));
    }
    a.sync().await.unwrap();

    let result = b.sync().await.unwrap();
    assert_eq!(result.applied, 10);
    assert_eq!(count(&b), 10);

    let result = b.sync().await.unwrap();
    assert_eq!(result.pushed, 0);
    assert_eq!(b.ledger().lock().watermark(), a.ledger().lock().latest_timestamp());
}

#[tokio::test]
async fn malformed_message_is_dropped() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);
    record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();

    // Authenticates fine but the payload stops mid-message.
    let timestamp = Timestamp::new(wall_millis(), NodeId::new(0x0bad), 0);
    let payload = Message::new(timestamp, "categories", "cat9", "name", "Utilities")
        .encode()
        .unwrap();
    let key = a.keys().active_record().unwrap().unlock(SECRET).unwrap();
    let data = Cipher::new(&key)
        .encrypt(&payload[..payload.len() / 2], &timestamp.to_bytes())
        .unwrap();
    let mut nonce = [0u8; NONCE_LEN];
    nonce.copy_from_slice(&data[..NONCE_LEN]);
    relay.inject(EncryptedMessage {
        timestamp,
        key_id: key_id(&a),
        nonce,
        sealed: data[NONCE_LEN..].to_vec(),
    });

    let result = b.sync().await.unwrap();
    assert_eq!(result.dropped, 1);
    assert_eq!(result.applied, 1);
    assert_eq!(get(&b, "cat1", "name"), Some(Value::from("Groceries")));
    assert_eq!(get(&b, "cat9", "name"), None);
    assert_eq!(b.stats().messages_dropped, 1);
    assert_eq!(b.state(), SyncState::Idle);
}

fn key_id(engine: &Engine<InProcessRelay>) -> uuid::Uuid {
    engine.keys().active_key_id().unwrap()
}

#[tokio::test]
async fn tampered_batch_is_not_applied() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);
    record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();

    let mut envelope = foreign_envelope(&a, wall_millis());
    envelope.sealed[0] ^= 0x01;
    relay.inject(envelope);

    let err = b.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::AuthenticationFailed));
    assert_eq!(err.user_facing(), UserFacingFailure::PasswordIncorrect);
    assert_eq!(count(&b), 0);
    assert_eq!(b.state(), SyncState::Failed);
}

#[tokio::test]
async fn different_key_is_a_mismatch() {
    let relay = InProcessRelay::new();
    let a = device(&relay);
    let b = device(&relay);
    a.keys().derive_and_store_key(SECRET).unwrap();
    b.keys().derive_and_store_key(b"another secret").unwrap();

    record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();

    let err = b.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::KeyMismatch { key_id } if key_id == a.keys().active_key_id().unwrap()));
    assert_eq!(count(&b), 0);
}

#[tokio::test]
async fn future_timestamps_are_refused() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);
    record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();
    relay.inject(foreign_envelope(&a, wall_millis() + 3_600_000));

    let err = b.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::ClockDrift { .. }));
    assert_eq!(count(&b), 0);
    // The clock did not jump an hour ahead.
    assert!(b.ledger().lock().clock_floor().millis() < wall_millis() + 60_000);
}

#[tokio::test]
async fn rotated_key_history_stays_readable() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);
    record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();
    b.sync().await.unwrap();

    a.keys().rotate_key(b"new secret").unwrap();
    record(&a, "cat2", "name", "Rent");
    a.sync().await.unwrap();

    // B only knows the old key.
    let err = b.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::KeyMismatch { .. }));

    b.keys()
        .adopt_key(a.keys().active_record().unwrap(), b"new secret")
        .unwrap();
    b.sync().await.unwrap();
    assert_eq!(get(&b, "cat2", "name"), Some(Value::from("Rent")));

    // A fresh device that holds both keys reads the whole history.
    let c = device(&relay);
    let records: Vec<_> = a.ledger().lock().keyring().records().to_vec();
    c.keys().adopt_key(records[0].clone(), SECRET).unwrap();
    c.keys().adopt_key(records[1].clone(), b"new secret").unwrap();
    c.sync().await.unwrap();
    assert_eq!(count(&c), 2);
}

#[tokio::test]
async fn reset_by_another_device() {
    let relay = InProcessRelay::new();
    let (a, b) = pair(&relay);
    record(&a, "cat1", "name", "Groceries");
    record(&b, "cat2", "name", "Rent");
    a.sync().await.unwrap();
    b.sync().await.unwrap();
    a.sync().await.unwrap();
    let before = relay.0.group_id(FILE).unwrap();

    let group = a.reset().await.unwrap();
    assert_ne!(group, before);
    assert_eq!(relay.0.message_count(FILE), 0);
    assert!(root(&a).is_zero());
    assert_eq!(count(&a), 2);

    // A re-uploads its full log into the new generation.
    let result = a.sync().await.unwrap();
    assert_eq!(result.pushed, 2);

    let err = b.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::FileReset { .. }));
    assert_eq!(err.user_facing(), UserFacingFailure::HistoryDiverged);

    b.reset_local().unwrap();
    b.sync().await.unwrap();
    a.sync().await.unwrap();
    assert_eq!(b.group_id(), Some(group));
    assert_eq!(root(&a), root(&b));
    assert_eq!(relay.0.message_count(FILE), 2);
}

#[tokio::test]
async fn unacknowledged_push_is_diverged_history() {
    let relay = InProcessRelay::new();
    let (a, _b) = pair(&relay);
    a.sync().await.unwrap();

    // The ledger believes the relay holds this edit, but it never arrived.
    let lost = record(&a, "cat1", "name", "Groceries");
    a.ledger().lock().advance_watermark(lost.timestamp);

    let err = a.sync().await.unwrap_err();
    match &err {
        SyncError::DivergedHistory { buckets } => assert!(!buckets.is_empty()),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.user_facing(), UserFacingFailure::HistoryDiverged);

    a.reset_local().unwrap();
    a.sync().await.unwrap();
    assert_eq!(relay.0.message_count(FILE), 1);
    assert_eq!(root(&a), relay.0.root_hash(FILE));
}

#[tokio::test]
async fn repair_rebuilds_both_sides() {
    let relay = InProcessRelay::new();
    let (a, _b) = pair(&relay);
    record(&a, "cat1", "name", "Groceries");
    a.sync().await.unwrap();

    let ack = a.repair().await.unwrap();
    assert_eq!(ack.root, root(&a));
    a.sync().await.unwrap();
}

#[tokio::test]
async fn retry_rides_out_flaky_connection() {
    let relay = InProcessRelay::new();
    let flaky = FlakyRelay {
        inner: relay.clone(),
        failures: AtomicU32::new(2),
    };
    let retry = RetryConfig::new(4)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false);
    let engine = device_with(flaky, config().with_retry(retry));
    engine.keys().derive_and_store_key(SECRET).unwrap();
    record(&engine, "cat1", "name", "Groceries");

    let err = engine.sync().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(err.user_facing(), UserFacingFailure::RetryLater);
    assert_eq!(
        engine.transport().last_error().as_deref(),
        Some("connection reset by peer")
    );

    engine.sync_with_retry().await.unwrap();
    assert_eq!(engine.stats().retries, 1);
    assert_eq!(relay.0.message_count(FILE), 1);
    assert!(engine.transport().last_error().is_none());
}

#[tokio::test]
async fn stalled_relay_times_out() {
    let config = config().with_timeout(Duration::from_millis(20));
    let transport = HttpTransport::new("memory://relay", StalledClient);
    let ledger = Ledger::in_memory(LedgerConfig::testing()).unwrap();
    let engine = SyncEngine::new(config, transport, Arc::new(Mutex::new(ledger)));

    let err = engine.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert!(err.is_retryable());
    assert_eq!(engine.state(), SyncState::Failed);
}

#[tokio::test]
async fn relay_tokens_are_checked() {
    let relay = InProcessRelay::with_config(ServerConfig::new().with_auth(b"relay secret".to_vec()));
    let token = relay.0.create_token(FILE).unwrap();

    let anonymous = device(&relay);
    let err = anonymous.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Unauthorized(_)));
    assert_eq!(err.user_facing(), UserFacingFailure::PasswordIncorrect);

    let trusted = device_with(relay.clone(), config().with_token(token));
    trusted.keys().derive_and_store_key(SECRET).unwrap();
    record(&trusted, "cat1", "name", "Groceries");
    trusted.sync().await.unwrap();
    assert_eq!(relay.0.message_count(FILE), 1);
}

#[tokio::test]
async fn on_disk_ledger_resumes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let relay = InProcessRelay::new();
    let writer = device(&relay);
    writer.keys().derive_and_store_key(SECRET).unwrap();
    let record_for_reader = writer.keys().active_record().unwrap();
    record(&writer, "cat1", "name", "Groceries");
    writer.sync().await.unwrap();

    let open = || {
        let ledger = Ledger::open(dir.path(), LedgerConfig::testing()).unwrap();
        let transport = HttpTransport::new(
            "memory://relay",
            LoopbackClient::new(relay.clone()),
        );
        SyncEngine::new(config(), transport, Arc::new(Mutex::new(ledger)))
    };

    {
        let reader = open();
        reader.keys().adopt_key(record_for_reader, SECRET).unwrap();
        reader.sync().await.unwrap();
        assert_eq!(count(&reader), 1);
    }

    // Keys come back locked; the watermark and trie come back as they were.
    let reader = open();
    assert_eq!(count(&reader), 1);
    assert!(!reader.ledger().lock().keyring().is_unlocked());
    reader.keys().unlock(SECRET).unwrap();
    let result = reader.sync().await.unwrap();
    assert_eq!(result.pulled, 0);
    assert_eq!(result.pushed, 0);
}

#[tokio::test]
async fn edit_during_diff_is_pushed_by_next_sync() {
    let relay = InProcessRelay::new();
    let hooked = HookedRelay::new(&relay);
    let a = device_with(Arc::clone(&hooked), config());
    a.keys().derive_and_store_key(SECRET).unwrap();
    record(&a, "cat1", "name", "Groceries");

    let ledger = Arc::clone(a.ledger());
    hooked.on("/sync/pull-diff", move || {
        ledger
            .lock()
            .record("categories", "cat9", "name", "Utilities")
            .map(|_| ())
            .map_err(|e| e.to_string())
    });

    // Converges against the trie sent before the edit landed.
    a.sync().await.unwrap();
    assert_eq!(relay.0.message_count(FILE), 1);
    assert_eq!(count(&a), 2);
    assert_eq!(a.ledger().lock().pending_push().len(), 1);

    let result = a.sync().await.unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(relay.0.message_count(FILE), 2);
    assert_eq!(root(&a), relay.0.root_hash(FILE));
    assert!(a.ledger().lock().pending_push().is_empty());
}

#[tokio::test]
async fn edit_between_push_and_diff_is_pushed_in_next_round() {
    let relay = InProcessRelay::new();
    let hooked = HookedRelay::new(&relay);
    let a = device_with(Arc::clone(&hooked), config());
    a.keys().derive_and_store_key(SECRET).unwrap();
    record(&a, "cat1", "name", "Groceries");

    let ledger = Arc::clone(a.ledger());
    hooked.on("/sync/push", move || {
        ledger
            .lock()
            .record("categories", "cat9", "name", "Utilities")
            .map(|_| ())
            .map_err(|e| e.to_string())
    });

    let result = a.sync().await.unwrap();
    assert_eq!(result.rounds, 2);
    assert_eq!(result.pushed, 2);
    assert_eq!(relay.0.message_count(FILE), 2);
    assert_eq!(root(&a), relay.0.root_hash(FILE));
}

#[tokio::test]
async fn late_cancel_does_not_stop_the_next_sync() {
    let relay = InProcessRelay::new();
    let hooked = HookedRelay::new(&relay);
    let a = Arc::new(device_with(Arc::clone(&hooked), config()));
    a.keys().derive_and_store_key(SECRET).unwrap();
    record(&*a, "cat1", "name", "Groceries");

    // Arrives after the last cancellation point of a sync that converges.
    let engine = Arc::downgrade(&a);
    hooked.on("/sync/pull-diff", move || {
        if let Some(engine) = engine.upgrade() {
            engine.cancel();
        }
        Ok(())
    });
    a.sync().await.unwrap();

    record(&*a, "cat2", "name", "Rent");
    let result = a.sync().await.unwrap();
    assert_eq!(result.pushed, 1);
    assert_eq!(relay.0.message_count(FILE), 2);
}

#[tokio::test]
async fn cancel_wins_over_retryable_failure() {
    let relay = InProcessRelay::new();
    let hooked = HookedRelay::new(&relay);
    let retry = RetryConfig::new(3)
        .with_initial_delay(Duration::from_millis(1))
        .with_jitter(false);
    let a = Arc::new(device_with(Arc::clone(&hooked), config().with_retry(retry)));

    let engine = Arc::downgrade(&a);
    hooked.on("/sync/pull-diff", move || {
        if let Some(engine) = engine.upgrade() {
            engine.cancel();
        }
        Err("connection reset by peer".into())
    });

    let err = a.sync_with_retry().await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));
    assert_eq!(a.stats().retries, 0);

    // Spent: the next sync runs normally.
    a.sync().await.unwrap();
    assert_eq!(a.state(), SyncState::Idle);
}

fn slow_device(
    relay: &InProcessRelay,
    ledger: &Arc<Mutex<Ledger>>,
    timeout: Duration,
) -> SyncEngine<HttpTransport<SlowClient>> {
    let client = SlowClient {
        inner: LoopbackClient::new(relay.clone()),
        delay: Duration::from_millis(40),
    };
    let config = config().with_push_batch_size(1).with_timeout(timeout);
    let transport = HttpTransport::new(config.server_url.clone(), client);
    SyncEngine::new(config, transport, Arc::clone(ledger))
}

#[tokio::test]
async fn timeout_bounds_the_whole_sync() {
    let relay = InProcessRelay::new();
    let ledger = Arc::new(Mutex::new(
        Ledger::in_memory(LedgerConfig::testing()).unwrap(),
    ));

    // Every request fits in the deadline; three pushes and a diff do not.
    let hurried = slow_device(&relay, &ledger, Duration::from_millis(100));
    hurried.keys().derive_and_store_key(SECRET).unwrap();
    for i in 0..3 {
        ledger
            .lock()
            .record("categories", format!("cat{i}"), "name", "Groceries")
            .unwrap();
    }

    let err = hurried.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert_eq!(hurried.state(), SyncState::Failed);
    assert!(relay.0.message_count(FILE) < 3);

    // What was acknowledged stays acknowledged; the rest goes up next time.
    let patient = slow_device(&relay, &ledger, Duration::from_secs(10));
    patient.sync().await.unwrap();
    assert_eq!(relay.0.message_count(FILE), 3);
    assert_eq!(ledger.lock().root_hash(), relay.0.root_hash(FILE));
}

#[tokio::test]
async fn request_timeout_bounds_each_call() {
    let config = config().with_request_timeout(Duration::from_millis(20));
    let transport = HttpTransport::new("memory://relay", StalledClient);
    let ledger = Ledger::in_memory(LedgerConfig::testing()).unwrap();
    let engine = SyncEngine::new(config, transport, Arc::new(Mutex::new(ledger)));

    let started = std::time::Instant::now();
    let err = engine.sync().await.unwrap_err();
    assert!(matches!(err, SyncError::Timeout));
    assert!(started.elapsed() < Duration::from_secs(5));
}
