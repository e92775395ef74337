//! EventBus - four lanes shared by both peers

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use super::subscription::Subscription;
use crate::envelope::{Channel, Envelope, Mode, Outcome};

/// Default backlog (queued messages per subscription) before a warning is logged
pub const DEFAULT_CHANNEL_CAPACITY: usize = 10_000;

/// One named lane: a list of subscriber queues fed in publish order
struct Lane<T> {
    channel: Channel,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> Lane<T> {
    fn new(channel: Channel) -> Self {
        Self {
            channel,
            subscribers: Mutex::new(Vec::new()),
        }
    }

    fn subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<T>>> {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| !tx.is_closed());
        subscribers
    }

    fn publish(&self, msg: T) -> usize {
        let subscribers = self.subscribers();
        subscribers.iter().filter(|tx| tx.send(msg.clone()).is_ok()).count()
    }

    fn subscribe(&self, backlog_warning: usize) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers().push(tx);
        Subscription::new(self.channel, rx, backlog_warning)
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

/// Shared publish/subscribe medium for one host/client pair
///
/// Requests and responses travel on separate lanes per mode. Every
/// subscription gets its own queue, so a slow subscriber never loses
/// messages; it only falls behind. Publishing with nobody listening drops the
/// message.
pub struct EventBus {
    sync_requests: Lane<Envelope>,
    async_requests: Lane<Envelope>,
    sync_responses: Lane<Outcome>,
    async_responses: Lane<Outcome>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus that warns once a subscription has `capacity` unread messages
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        debug!(capacity, "EventBus::new: creating event bus");
        Self {
            sync_requests: Lane::new(Channel::Request(Mode::Sync)),
            async_requests: Lane::new(Channel::Request(Mode::Async)),
            sync_responses: Lane::new(Channel::Response(Mode::Sync)),
            async_responses: Lane::new(Channel::Response(Mode::Async)),
            capacity,
        }
    }

    /// Create a new bus with default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn request_lane(&self, mode: Mode) -> &Lane<Envelope> {
        match mode {
            Mode::Sync => &self.sync_requests,
            Mode::Async => &self.async_requests,
        }
    }

    fn response_lane(&self, mode: Mode) -> &Lane<Outcome> {
        match mode {
            Mode::Sync => &self.sync_responses,
            Mode::Async => &self.async_responses,
        }
    }

    /// Publish a request on the request lane for `mode`
    ///
    /// Returns the number of subscribers that will see it (zero is not an error).
    pub fn publish_request(&self, mode: Mode, envelope: Envelope) -> usize {
        debug!(
            channel = %Channel::Request(mode),
            instruction = ?envelope.instruction,
            id = ?envelope.id,
            "EventBus::publish_request"
        );
        self.request_lane(mode).publish(envelope)
    }

    /// Publish a response on the response lane for `mode`
    pub fn publish_response(&self, mode: Mode, outcome: Outcome) -> usize {
        debug!(
            channel = %Channel::Response(mode),
            instruction = ?outcome.envelope.instruction,
            id = ?outcome.envelope.id,
            result = outcome.result,
            "EventBus::publish_response"
        );
        self.response_lane(mode).publish(outcome)
    }

    /// Subscribe to requests published on `mode` from now on
    pub fn subscribe_requests(&self, mode: Mode) -> Subscription<Envelope> {
        debug!(channel = %Channel::Request(mode), "EventBus::subscribe_requests");
        self.request_lane(mode).subscribe(self.capacity)
    }

    /// Subscribe to responses published on `mode` from now on
    pub fn subscribe_responses(&self, mode: Mode) -> Subscription<Outcome> {
        debug!(channel = %Channel::Response(mode), "EventBus::subscribe_responses");
        self.response_lane(mode).subscribe(self.capacity)
    }

    /// Number of live subscriptions on a lane
    pub fn subscriber_count(&self, channel: Channel) -> usize {
        match channel {
            Channel::Request(mode) => self.request_lane(mode).subscriber_count(),
            Channel::Response(mode) => self.response_lane(mode).subscriber_count(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Create an event bus wrapped in an Arc for shared ownership
pub fn create_event_bus(capacity: usize) -> Arc<EventBus> {
    Arc::new(EventBus::new(capacity))
}
