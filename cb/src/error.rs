//! Error types for registration and calls
//!
//! Nothing here crosses the bus: failures inside dispatch are encoded as
//! `result=false` outcomes. These errors cover the local API surface only.

use thiserror::Error;

use crate::envelope::Mode;

/// Errors raised while wiring registries and dispatchers together
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Instruction name '{name}' is reserved")]
    ReservedInstruction { name: String },

    #[error("Handler already registered for instruction '{name}'")]
    DuplicateHandler { name: String },

    #[error("Invalid instruction name: '{name}'")]
    InvalidInstruction { name: String },

    #[error("Registry serves {registry} but was mounted for {mounted}")]
    ModeMismatch { registry: Mode, mounted: Mode },

    #[error("Unknown mode '{0}' (expected 'sync' or 'async')")]
    UnknownMode(String),
}

/// Errors a caller can observe while waiting on a call
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("Call id '{id}' is already outstanding on the {mode} channel")]
    DuplicateId { id: String, mode: Mode },

    #[error("No dispatcher subscribed to {channel}")]
    NoReceiver { channel: String },

    #[error("Call '{id}' timed out after {timeout_ms}ms")]
    Timeout { id: String, timeout_ms: u64 },

    #[error("Client closed before call '{id}' resolved")]
    Closed { id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_mismatch_message() {
        let err = DispatchError::ModeMismatch {
            registry: Mode::Async,
            mounted: Mode::Sync,
        };

        let msg = err.to_string();
        assert!(msg.contains("async"));
        assert!(msg.contains("sync"));
    }

    #[test]
    fn test_timeout_message() {
        let err = CallError::Timeout {
            id: "call-1".to_string(),
            timeout_ms: 250,
        };

        let msg = err.to_string();
        assert!(msg.contains("call-1"));
        assert!(msg.contains("250ms"));
    }
}
