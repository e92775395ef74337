//! Handler Registry for one peer and one mode
//!
//! A registry owns the named instruction handlers and the shared machinery
//! around them:
//! - **execute:** route a request to its handler (`false` when unknown)
//! - **respond:** drain log entries into the sink and publish the reply
//! - **info:** dry-run every handler to report its required parameters
//!
//! Handlers must finish all validation before any side effect, so running
//! them with `simulate=true` is always safe.

mod core;
mod handler;

pub use self::core::{HandlerRegistry, INFO_INSTRUCTION};
pub use handler::{FnHandler, Handler};
