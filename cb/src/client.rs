//! ClientProxy - caller-side API for issuing instructions
//!
//! A call publishes a request and parks a oneshot in the pending table under
//! `(mode, id)`. One response pump per mode listens on the response lane and
//! completes the matching entry, removing it as it fires. Calls are correlated
//! purely by id, so any number may be outstanding at once.
//!
//! An abandoned call (dropped or timed out) leaves a tombstone behind. Its id
//! stays reserved until the late response arrives and is consumed, so a new
//! call can never be answered with an older call's response.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Subscription};
use crate::config::ClientConfig;
use crate::envelope::{Channel, Envelope, Mode, Outcome, new_correlation_id};
use crate::error::CallError;
use crate::registry::INFO_INSTRUCTION;

type PendingKey = (Mode, String);

/// One slot in the pending table
struct PendingEntry {
    /// Distinguishes calls that reuse the same id over time
    token: u64,
    /// `None` once the caller abandoned the call
    waiter: Option<oneshot::Sender<Outcome>>,
}

#[derive(Default)]
struct PendingTable {
    calls: HashMap<PendingKey, PendingEntry>,
    next_token: u64,
    closed: bool,
}

impl PendingTable {
    fn waiting(&self) -> usize {
        self.calls.values().filter(|entry| entry.waiter.is_some()).count()
    }

    fn abandoned(&self) -> usize {
        self.calls.len() - self.waiting()
    }
}

type SharedPending = Arc<Mutex<PendingTable>>;

fn lock(pending: &SharedPending) -> MutexGuard<'_, PendingTable> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

struct ClientInner {
    bus: Arc<EventBus>,
    pending: SharedPending,
    pumps: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
    default_timeout: Duration,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for pump in self.pumps.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            pump.abort();
        }
    }
}

/// Caller-side handle for issuing instructions to the other peer
///
/// Cheap to clone; all clones share one pending table.
#[derive(Clone)]
pub struct ClientProxy {
    inner: Arc<ClientInner>,
}

impl ClientProxy {
    /// Start a client on `bus` with default settings
    ///
    /// Spawns the response pumps, so it must be called inside a tokio runtime.
    pub fn start(bus: Arc<EventBus>) -> Self {
        Self::with_config(bus, &ClientConfig::default())
    }

    /// Start a client using the given configuration
    pub fn with_config(bus: Arc<EventBus>, config: &ClientConfig) -> Self {
        debug!(?config, "ClientProxy::with_config: called");
        let pending: SharedPending = Arc::new(Mutex::new(PendingTable::default()));

        let pumps = Mode::ALL
            .iter()
            .map(|mode| {
                let subscription = bus.subscribe_responses(*mode);
                tokio::spawn(pump_responses(subscription, pending.clone()))
            })
            .collect();

        Self {
            inner: Arc::new(ClientInner {
                bus,
                pending,
                pumps: Mutex::new(pumps),
                closed: AtomicBool::new(false),
                default_timeout: config.request_timeout(),
            }),
        }
    }

    /// Timeout used by [`ClientProxy::call_sync`] and friends
    pub fn default_timeout(&self) -> Duration {
        self.inner.default_timeout
    }

    /// Issue an instruction on `mode` and get a handle to its eventual outcome
    ///
    /// An id is generated when the envelope has none. Fails immediately when
    /// the id is already outstanding on `mode` (including abandoned calls whose
    /// response has not arrived yet), when no dispatcher is listening, or when
    /// the client has been closed.
    pub fn call(&self, mut envelope: Envelope, mode: Mode) -> Result<PendingCall, CallError> {
        let id = envelope.id().map(str::to_string).unwrap_or_else(new_correlation_id);
        envelope.id = Some(id.clone());
        envelope.mode = mode;
        debug!(instruction = ?envelope.instruction, %id, %mode, "ClientProxy::call: called");

        let (tx, rx) = oneshot::channel();
        let key = (mode, id.clone());
        let token = {
            let mut pending = lock(&self.inner.pending);
            if pending.closed {
                return Err(CallError::Closed { id });
            }
            if pending.calls.contains_key(&key) {
                return Err(CallError::DuplicateId { id, mode });
            }
            let token = pending.next_token;
            pending.next_token += 1;
            pending.calls.insert(
                key.clone(),
                PendingEntry {
                    token,
                    waiter: Some(tx),
                },
            );
            token
        };

        let reached = self.inner.bus.publish_request(mode, envelope);
        if reached == 0 {
            lock(&self.inner.pending).calls.remove(&key);
            warn!(%id, %mode, "ClientProxy::call: no dispatcher listening");
            return Err(CallError::NoReceiver {
                channel: Channel::Request(mode).to_string(),
            });
        }

        Ok(PendingCall {
            id,
            mode,
            token,
            rx,
            pending: self.inner.pending.clone(),
        })
    }

    /// Issue a call and wait for its outcome with no deadline
    pub async fn request(&self, envelope: Envelope, mode: Mode) -> Result<Outcome, CallError> {
        self.call(envelope, mode)?.await
    }

    /// Issue a call and give up after `timeout`
    ///
    /// On timeout the call is abandoned; the handler still runs to completion
    /// and its response is discarded when it arrives.
    pub async fn call_with_timeout(&self, envelope: Envelope, mode: Mode, timeout: Duration) -> Result<Outcome, CallError> {
        let call = self.call(envelope, mode)?;
        let id = call.id().to_string();

        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%id, %mode, ?timeout, "ClientProxy::call_with_timeout: timed out");
                Err(CallError::Timeout {
                    id,
                    timeout_ms: timeout_millis(timeout),
                })
            }
        }
    }

    /// Call `instruction` on the sync lane using the default timeout
    pub async fn call_sync(&self, instruction: &str, data: Map<String, Value>) -> Result<Outcome, CallError> {
        let envelope = Envelope::new(instruction).with_data(data);
        self.call_with_timeout(envelope, Mode::Sync, self.default_timeout()).await
    }

    /// Call `instruction` on the async lane using the default timeout
    pub async fn call_async(&self, instruction: &str, data: Map<String, Value>) -> Result<Outcome, CallError> {
        let envelope = Envelope::new(instruction).with_data(data);
        self.call_with_timeout(envelope, Mode::Async, self.default_timeout()).await
    }

    /// Ask the peer which instructions it serves on `mode` and what they require
    ///
    /// An empty `filter` returns every instruction.
    pub async fn info(&self, mode: Mode, filter: &[&str]) -> Result<BTreeMap<String, Vec<String>>, CallError> {
        let mut envelope = Envelope::new(INFO_INSTRUCTION);
        match filter {
            [] => {}
            [name] => envelope = envelope.with_param("message", *name),
            names => envelope = envelope.with_param("messages", names.to_vec()),
        }

        let outcome = self.call_with_timeout(envelope, mode, self.default_timeout()).await?;
        let report = outcome
            .data()
            .iter()
            .map(|(name, params)| {
                let params = params
                    .as_array()
                    .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default();
                (name.clone(), params)
            })
            .collect();

        Ok(report)
    }

    /// Number of calls still waiting for a response
    pub fn outstanding(&self) -> usize {
        lock(&self.inner.pending).waiting()
    }

    /// Number of abandoned calls whose late response has not arrived yet
    pub fn abandoned(&self) -> usize {
        lock(&self.inner.pending).abandoned()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Tear the client down
    ///
    /// Every outstanding call resolves to [`CallError::Closed`] and later
    /// calls are refused.
    pub fn close(&self) {
        let abandoned = {
            let mut pending = lock(&self.inner.pending);
            pending.closed = true;
            let count = pending.waiting();
            pending.calls.clear();
            count
        };
        self.inner.closed.store(true, Ordering::Release);

        for pump in self.inner.pumps.lock().unwrap_or_else(|e| e.into_inner()).drain(..) {
            pump.abort();
        }

        info!(abandoned, "ClientProxy closed");
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Route responses from one lane to the pending calls waiting on them
async fn pump_responses(mut subscription: Subscription<Outcome>, pending: SharedPending) {
    let mode = subscription.channel().mode();
    debug!(%mode, "pump_responses: started");

    while let Some(outcome) = subscription.recv().await {
        let Some(id) = outcome.id().map(str::to_string) else {
            debug!(%mode, "pump_responses: response without id, ignoring");
            continue;
        };

        let entry = lock(&pending).calls.remove(&(mode, id.clone()));
        match entry.map(|entry| entry.waiter) {
            Some(Some(tx)) => {
                if tx.send(outcome).is_err() {
                    debug!(%id, %mode, "pump_responses: caller went away");
                }
            }
            Some(None) => debug!(%id, %mode, "pump_responses: consumed response of abandoned call"),
            None => debug!(%id, %mode, "pump_responses: orphaned response"),
        }
    }

    debug!(%mode, "pump_responses: bus closed");
}

/// An outstanding call; resolves to the peer's outcome
///
/// Dropping it abandons the call: its entry becomes a tombstone that keeps the
/// id reserved, and the handler on the other side still runs and publishes a
/// response the pump then discards.
pub struct PendingCall {
    id: String,
    mode: Mode,
    token: u64,
    rx: oneshot::Receiver<Outcome>,
    pending: SharedPending,
}

impl PendingCall {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }
}

impl Future for PendingCall {
    type Output = Result<Outcome, CallError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(Ok(outcome)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(CallError::Closed { id: this.id.clone() })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !matches!(self.rx.try_recv(), Err(TryRecvError::Empty)) {
            return;
        }

        let mut pending = lock(&self.pending);
        // the slot may already belong to a newer call with the same id
        if let Some(entry) = pending.calls.get_mut(&(self.mode, self.id.clone()))
            && entry.token == self.token
        {
            debug!(id = %self.id, mode = %self.mode, "PendingCall: abandoned, leaving tombstone");
            entry.waiter = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;

    /// A fake peer that answers every request on `mode` after `delay`
    fn echo_peer(bus: &Arc<EventBus>, mode: Mode, delay: Duration) -> JoinHandle<()> {
        let mut requests = bus.subscribe_requests(mode);
        let bus = bus.clone();
        tokio::spawn(async move {
            while let Some(envelope) = requests.recv().await {
                let bus = bus.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let mut outcome = Outcome::from_request(&envelope);
                    outcome.succeed();
                    bus.publish_response(mode, outcome);
                });
            }
        })
    }

    #[tokio::test]
    async fn test_call_generates_id_and_resolves() {
        let bus = Arc::new(EventBus::new(100));
        let _peer = echo_peer(&bus, Mode::Sync, Duration::ZERO);
        let client = ClientProxy::start(bus);

        let call = client.call(Envelope::new("ping"), Mode::Sync).unwrap();
        let id = call.id().to_string();
        assert!(!id.is_empty());
        assert_eq!(client.outstanding(), 1);

        let outcome = call.await.unwrap();
        assert!(outcome.result);
        assert_eq!(outcome.id(), Some(id.as_str()));
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_call_without_dispatcher_fails_fast() {
        let bus = Arc::new(EventBus::new(100));
        let client = ClientProxy::start(bus);

        let result = client.call(Envelope::new("ping"), Mode::Async);
        assert!(matches!(result, Err(CallError::NoReceiver { .. })));
        assert_eq!(client.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_outstanding_id_rejected() {
        let bus = Arc::new(EventBus::new(100));
        let _peer = echo_peer(&bus, Mode::Sync, Duration::from_millis(50));
        let client = ClientProxy::start(bus);

        let first = client.call(Envelope::new("ping").with_id("same"), Mode::Sync).unwrap();
        let second = client.call(Envelope::new("ping").with_id("same"), Mode::Sync);
        assert!(matches!(second, Err(CallError::DuplicateId { .. })));
        first.await.unwrap();

        // once resolved the id may be reused
        let again = client.call(Envelope::new("ping").with_id("same"), Mode::Sync).unwrap();
        assert!(again.await.unwrap().result);
    }

    #[tokio::test]
    async fn test_dropping_call_leaves_tombstone_until_response() {
        let bus = Arc::new(EventBus::new(100));
        let _peer = echo_peer(&bus, Mode::Sync, Duration::from_millis(100));
        let client = ClientProxy::start(bus);

        let call = client.call(Envelope::new("ping").with_id("d-1"), Mode::Sync).unwrap();
        assert_eq!(client.outstanding(), 1);
        drop(call);
        assert_eq!(client.outstanding(), 0);
        assert_eq!(client.abandoned(), 1);

        // the id stays reserved while the late response is in flight
        assert!(matches!(
            client.call(Envelope::new("ping").with_id("d-1"), Mode::Sync),
            Err(CallError::DuplicateId { .. })
        ));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(client.abandoned(), 0);
        let again = client.call(Envelope::new("ping").with_id("d-1"), Mode::Sync).unwrap();
        assert!(again.await.unwrap().result);
    }

    #[tokio::test]
    async fn test_stale_drop_does_not_touch_newer_call() {
        let bus = Arc::new(EventBus::new(100));
        let _peer = echo_peer(&bus, Mode::Sync, Duration::from_secs(5));
        let client = ClientProxy::start(bus);

        let old = client.call(Envelope::new("ping").with_id("r-1"), Mode::Sync).unwrap();
        // the pump has taken the old entry but not yet sent on it
        let in_flight = lock(&client.inner.pending).calls.remove(&(Mode::Sync, "r-1".to_string()));
        let newer = client.call(Envelope::new("ping").with_id("r-1"), Mode::Sync).unwrap();

        drop(old);
        assert_eq!(client.outstanding(), 1);
        assert_eq!(client.abandoned(), 0);
        drop(in_flight);
        drop(newer);
    }

    #[test]
    fn test_timeout_millis_saturate() {
        assert_eq!(timeout_millis(Duration::from_millis(30)), 30);
        assert_eq!(timeout_millis(Duration::from_secs(u64::MAX)), u64::MAX);
    }

    #[tokio::test]
    async fn test_call_with_timeout_expires() {
        let bus = Arc::new(EventBus::new(100));
        let _peer = echo_peer(&bus, Mode::Sync, Duration::from_secs(5));
        let client = ClientProxy::start(bus);

        let result = client
            .call_with_timeout(Envelope::new("slow").with_id("t-1"), Mode::Sync, Duration::from_millis(30))
            .await;

        assert_eq!(
            result,
            Err(CallError::Timeout {
                id: "t-1".to_string(),
                timeout_ms: 30
            })
        );
        assert_eq!(client.outstanding(), 0);
        assert_eq!(client.abandoned(), 1);
    }

    #[tokio::test]
    async fn test_close_resolves_outstanding_calls() {
        let bus = Arc::new(EventBus::new(100));
        let _peer = echo_peer(&bus, Mode::Async, Duration::from_secs(5));
        let client = ClientProxy::start(bus);

        let call = client.call(Envelope::new("slow").with_id("c-1"), Mode::Async).unwrap();
        client.close();

        assert_eq!(call.await, Err(CallError::Closed { id: "c-1".to_string() }));
        assert!(client.is_closed());
        assert!(matches!(
            client.call(Envelope::new("ping"), Mode::Async),
            Err(CallError::Closed { .. })
        ));
    }

    #[tokio::test]
    async fn test_default_timeout_from_config() {
        let bus = Arc::new(EventBus::new(10));
        let config = ClientConfig {
            request_timeout_ms: 1234,
        };
        let client = ClientProxy::with_config(bus, &config);
        assert_eq!(client.default_timeout(), Duration::from_millis(1234));
    }
}
