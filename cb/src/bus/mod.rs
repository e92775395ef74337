//! Event Bus - the shared medium between the two peers
//!
//! One bus exists per host/client pair. It carries four lanes: a request lane
//! and a response lane for each [`Mode`](crate::envelope::Mode).
//!
//! # Architecture
//!
//! ```text
//!   CLIENT PEER                      EVENT BUS                       HOST PEER
//! ┌─────────────┐  publish    ┌──────────────────┐  subscribe  ┌──────────────┐
//! │ ClientProxy │ ──────────► │ request:sync     │ ──────────► │ Dispatcher   │
//! │             │             │ request:async    │             │   │          │
//! │  pending    │  subscribe  │ response:sync    │   publish   │   ▼          │
//! │  table      │ ◄────────── │ response:async   │ ◄────────── │ Registry     │
//! └─────────────┘             └──────────────────┘             └──────────────┘
//! ```
//!
//! Delivery is at-most-once and non-durable: a subscription only sees what is
//! published after it was created, in FIFO order per lane.

mod event_bus;
mod subscription;

pub use event_bus::{DEFAULT_CHANNEL_CAPACITY, EventBus, create_event_bus};
pub use subscription::Subscription;
