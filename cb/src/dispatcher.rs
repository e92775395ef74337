//! Dispatcher - receiver-side entry point for inbound requests
//!
//! The dispatcher listens on both request lanes, rejects malformed envelopes,
//! and hands everything else to the registry for the envelope's mode. Every
//! request it sees yields exactly one response, whether or not a handler
//! exists for it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::{EventBus, Subscription};
use crate::envelope::{Envelope, Mode, Outcome};
use crate::error::DispatchError;
use crate::registry::HandlerRegistry;

/// What the dispatcher did with one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchDecision {
    /// Missing `instruction` or `id`; answered without touching a registry
    Malformed,
    /// No handler for the instruction; answered with `result=false`
    Unknown,
    /// Handed to a registry, which will publish the response
    Routed,
}

/// Dispatcher counters for observability
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchMetrics {
    pub received: u64,
    pub malformed: u64,
    pub unknown: u64,
    pub routed: u64,
}

#[derive(Debug, Default)]
struct Counters {
    received: AtomicU64,
    malformed: AtomicU64,
    unknown: AtomicU64,
    routed: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> DispatchMetrics {
        DispatchMetrics {
            received: self.received.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            routed: self.routed.load(Ordering::Relaxed),
        }
    }
}

/// Routes inbound envelopes to the registry matching their mode
pub struct Dispatcher {
    bus: Arc<EventBus>,
    sync_registry: Arc<HandlerRegistry>,
    async_registry: Arc<HandlerRegistry>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    /// Create a dispatcher over one registry per mode
    pub fn new(
        bus: Arc<EventBus>,
        sync_registry: Arc<HandlerRegistry>,
        async_registry: Arc<HandlerRegistry>,
    ) -> Result<Self, DispatchError> {
        for (mounted, registry) in [(Mode::Sync, &sync_registry), (Mode::Async, &async_registry)] {
            if registry.mode() != mounted {
                return Err(DispatchError::ModeMismatch {
                    registry: registry.mode(),
                    mounted,
                });
            }
        }

        Ok(Self {
            bus,
            sync_registry,
            async_registry,
            counters: Arc::new(Counters::default()),
        })
    }

    /// Registry serving `mode`
    pub fn registry(&self, mode: Mode) -> &Arc<HandlerRegistry> {
        match mode {
            Mode::Sync => &self.sync_registry,
            Mode::Async => &self.async_registry,
        }
    }

    pub fn stats(&self) -> DispatchMetrics {
        self.counters.snapshot()
    }

    /// Handle one inbound request
    ///
    /// Must be called inside a tokio runtime (handlers run on spawned tasks).
    pub fn dispatch(&self, envelope: Envelope) -> DispatchDecision {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        let (instruction, id) = match (envelope.instruction(), envelope.id()) {
            (Some(instruction), Some(id)) => (instruction.to_string(), id.to_string()),
            _ => {
                warn!(
                    instruction = ?envelope.instruction,
                    id = ?envelope.id,
                    mode = %envelope.mode,
                    "Dispatcher: malformed request"
                );
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                self.reply_failure(&envelope);
                return DispatchDecision::Malformed;
            }
        };

        debug!(%instruction, %id, mode = %envelope.mode, "Dispatcher::dispatch: routing");
        let registry = self.registry(envelope.mode);
        if registry.execute(&instruction, &id, envelope.clone()) {
            self.counters.routed.fetch_add(1, Ordering::Relaxed);
            DispatchDecision::Routed
        } else {
            debug!(%instruction, %id, "Dispatcher::dispatch: no handler");
            self.counters.unknown.fetch_add(1, Ordering::Relaxed);
            self.reply_failure(&envelope);
            DispatchDecision::Unknown
        }
    }

    /// Publish a bare `result=false` response carrying the request fields
    fn reply_failure(&self, envelope: &Envelope) {
        let outcome = Outcome::from_request(envelope);
        self.bus.publish_response(envelope.mode, outcome);
    }

    /// Subscribe to both request lanes and serve until shutdown
    pub async fn run(self, shutdown_rx: mpsc::Receiver<()>) {
        let sync_rx = self.bus.subscribe_requests(Mode::Sync);
        let async_rx = self.bus.subscribe_requests(Mode::Async);
        self.serve(sync_rx, async_rx, shutdown_rx).await;
    }

    /// Start serving on a background task
    ///
    /// The request subscriptions exist before this returns, so a call made
    /// right afterwards is never missed.
    pub fn spawn(self) -> DispatcherHandle {
        let sync_rx = self.bus.subscribe_requests(Mode::Sync);
        let async_rx = self.bus.subscribe_requests(Mode::Async);
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let counters = self.counters.clone();

        let task = tokio::spawn(self.serve(sync_rx, async_rx, shutdown_rx));

        DispatcherHandle {
            shutdown_tx,
            task,
            counters,
        }
    }

    async fn serve(
        self,
        mut sync_rx: Subscription<Envelope>,
        mut async_rx: Subscription<Envelope>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        info!("Dispatcher started");

        loop {
            tokio::select! {
                request = sync_rx.recv() => match request {
                    Some(envelope) => {
                        self.dispatch(envelope);
                    }
                    None => break,
                },
                request = async_rx.recv() => match request {
                    Some(envelope) => {
                        self.dispatch(envelope);
                    }
                    None => break,
                },
                _ = shutdown_rx.recv() => {
                    debug!("Dispatcher: shutdown signal received");
                    break;
                }
            }
        }

        info!(stats = ?self.stats(), "Dispatcher stopped");
    }
}

/// Handle to a dispatcher running on a background task
///
/// Dropping the handle stops the dispatcher.
pub struct DispatcherHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
    counters: Arc<Counters>,
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatchMetrics {
        self.counters.snapshot()
    }

    /// Stop serving and wait for the task to finish
    ///
    /// Handlers already running keep going and still publish their responses.
    pub async fn shutdown(self) {
        debug!("DispatcherHandle::shutdown: called");
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.task.await {
            warn!(error = %e, "DispatcherHandle::shutdown: dispatcher task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct Fixture {
        bus: Arc<EventBus>,
        dispatcher: Dispatcher,
        invoked: Arc<AtomicUsize>,
    }

    fn fixture() -> Fixture {
        let bus = Arc::new(EventBus::new(100));
        let sink = Arc::new(MemorySink::new());
        let invoked = Arc::new(AtomicUsize::new(0));

        let mut sync_registry = HandlerRegistry::new(Mode::Sync, bus.clone(), sink.clone());
        let counter = invoked.clone();
        sync_registry
            .register_fn("ping", move |_id, request: Envelope, _simulate| {
                counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    let mut outcome = Outcome::from_request(&request);
                    outcome.succeed();
                    outcome
                }
            })
            .unwrap();
        let async_registry = HandlerRegistry::new(Mode::Async, bus.clone(), sink);

        let dispatcher = Dispatcher::new(bus.clone(), Arc::new(sync_registry), Arc::new(async_registry)).unwrap();
        Fixture {
            bus,
            dispatcher,
            invoked,
        }
    }

    async fn next(rx: &mut Subscription<Outcome>) -> Outcome {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("response timed out")
            .expect("bus closed")
    }

    #[test]
    fn test_new_rejects_swapped_registries() {
        let bus = Arc::new(EventBus::new(10));
        let sink = Arc::new(MemorySink::new());
        let sync_registry = Arc::new(HandlerRegistry::new(Mode::Sync, bus.clone(), sink.clone()));
        let async_registry = Arc::new(HandlerRegistry::new(Mode::Async, bus.clone(), sink));

        let result = Dispatcher::new(bus, async_registry, sync_registry);
        assert!(matches!(result, Err(DispatchError::ModeMismatch { .. })));
    }

    #[tokio::test]
    async fn test_missing_id_short_circuits() {
        let f = fixture();
        let mut rx = f.bus.subscribe_responses(Mode::Sync);

        let decision = f.dispatcher.dispatch(Envelope::new("ping"));
        assert_eq!(decision, DispatchDecision::Malformed);

        let outcome = next(&mut rx).await;
        assert!(!outcome.result);
        assert_eq!(outcome.instruction(), Some("ping"));
        assert_eq!(f.invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_instruction_short_circuits() {
        let f = fixture();
        let mut rx = f.bus.subscribe_responses(Mode::Sync);

        let envelope = Envelope {
            id: Some("m-1".to_string()),
            ..Default::default()
        };
        assert_eq!(f.dispatcher.dispatch(envelope), DispatchDecision::Malformed);

        let outcome = next(&mut rx).await;
        assert!(!outcome.result);
        assert_eq!(outcome.id(), Some("m-1"));
        assert_eq!(f.invoked.load(Ordering::SeqCst), 0);
        assert_eq!(f.dispatcher.stats().malformed, 1);
    }

    #[tokio::test]
    async fn test_unknown_instruction_yields_quiet_failure() {
        let f = fixture();
        let mut rx = f.bus.subscribe_responses(Mode::Sync);

        let decision = f.dispatcher.dispatch(Envelope::new("launch").with_id("u-1"));
        assert_eq!(decision, DispatchDecision::Unknown);

        let outcome = next(&mut rx).await;
        assert!(!outcome.result);
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.id(), Some("u-1"));
        assert_eq!(outcome.instruction(), Some("launch"));
    }

    #[tokio::test]
    async fn test_padded_instruction_is_unknown() {
        let f = fixture();
        let mut rx = f.bus.subscribe_responses(Mode::Sync);

        let decision = f.dispatcher.dispatch(Envelope::new(" ping ").with_id("pad-1"));
        assert_eq!(decision, DispatchDecision::Unknown);

        let outcome = next(&mut rx).await;
        assert!(!outcome.result);
        assert_eq!(outcome.instruction(), Some(" ping "));
        assert_eq!(f.invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_mode_selects_registry() {
        let f = fixture();
        let mut async_rx = f.bus.subscribe_responses(Mode::Async);

        // ping only exists on the sync registry
        let request = Envelope::new("ping").with_id("a-1").with_mode(Mode::Async);
        assert_eq!(f.dispatcher.dispatch(request), DispatchDecision::Unknown);

        let outcome = next(&mut async_rx).await;
        assert_eq!(outcome.mode(), Mode::Async);
        assert!(!outcome.result);
        assert_eq!(f.invoked.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_spawned_dispatcher_routes_and_shuts_down() {
        let f = fixture();
        let bus = f.bus.clone();
        let mut rx = bus.subscribe_responses(Mode::Sync);
        let handle = f.dispatcher.spawn();

        bus.publish_request(Mode::Sync, Envelope::new("ping").with_id("p-1"));

        let outcome = next(&mut rx).await;
        assert!(outcome.result);
        assert_eq!(outcome.id(), Some("p-1"));
        assert_eq!(handle.stats().routed, 1);
        assert_eq!(f.invoked.load(Ordering::SeqCst), 1);

        handle.shutdown().await;
        assert_eq!(bus.subscriber_count(crate::envelope::Channel::Request(Mode::Sync)), 0);
    }
}
