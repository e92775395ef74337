//! ctxbridge - cross-context instruction dispatch
//!
//! Two peers share an [`EventBus`](bus::EventBus). The client side issues
//! named instructions through a [`ClientProxy`](client::ClientProxy); the host
//! side routes them through a [`Dispatcher`](dispatcher::Dispatcher) to the
//! [`HandlerRegistry`](registry::HandlerRegistry) for the request's mode, and
//! exactly one correlated response comes back per request.
//!
//! # Modules
//!
//! - [`envelope`] - request/response payloads, modes, log entries
//! - [`bus`] - publish/subscribe lanes between the peers
//! - [`registry`] - named handlers, responses, `info` introspection
//! - [`dispatcher`] - host-side request routing
//! - [`client`] - caller-side calls with correlation and timeouts
//! - [`sink`] - where handler log entries end up
//! - [`handlers`] - built-in `ping`, `echo` and `sleep`
//! - [`bridge`] - host and client wired together from a [`Config`](config::Config)
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod bridge;
pub mod bus;
pub mod cli;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod sink;

pub use bridge::Bridge;
pub use bus::{EventBus, Subscription};
pub use client::{ClientProxy, PendingCall};
pub use config::Config;
pub use dispatcher::{DispatchDecision, DispatchMetrics, Dispatcher, DispatcherHandle};
pub use envelope::{Channel, Envelope, LogEntry, LogLevel, Mode, Outcome};
pub use error::{CallError, DispatchError};
pub use registry::{FnHandler, Handler, HandlerRegistry};
pub use sink::{LogSink, MemorySink, TracingSink};
