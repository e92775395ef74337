//! Logging sinks for handler messages
//!
//! Every non-simulated response has its `messages` forwarded to a [`LogSink`]
//! before it is published. The default sink routes entries into `tracing`.

use std::sync::Mutex;

use tracing::{debug, error, info, warn};

use crate::envelope::{LogEntry, LogLevel, Mode, Outcome};

/// Where an entry came from
#[derive(Debug, Clone, Copy)]
pub struct SinkContext<'a> {
    pub instruction: Option<&'a str>,
    pub id: Option<&'a str>,
    pub mode: Mode,
}

impl<'a> From<&'a Outcome> for SinkContext<'a> {
    fn from(outcome: &'a Outcome) -> Self {
        Self {
            instruction: outcome.instruction(),
            id: outcome.id(),
            mode: outcome.mode(),
        }
    }
}

/// Receiver of handler log entries
pub trait LogSink: Send + Sync {
    fn write(&self, context: &SinkContext<'_>, entry: &LogEntry);
}

/// Sink that emits entries as `tracing` events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink {
    threshold: LogLevel,
}

impl TracingSink {
    pub fn new(threshold: LogLevel) -> Self {
        Self { threshold }
    }

    /// Forced entries always pass; others must reach the threshold
    pub fn accepts(&self, entry: &LogEntry) -> bool {
        entry.force || entry.level >= self.threshold
    }
}

impl LogSink for TracingSink {
    fn write(&self, context: &SinkContext<'_>, entry: &LogEntry) {
        if !self.accepts(entry) {
            return;
        }

        let instruction = context.instruction.unwrap_or("-");
        let id = context.id.unwrap_or("-");
        let args = serde_json::Value::Array(entry.args.clone());

        // a forced debug entry is raised to info so the subscriber filter keeps it
        match entry.level {
            LogLevel::Debug if entry.force => {
                info!(%instruction, %id, mode = %context.mode, %args, "{}", entry.text)
            }
            LogLevel::Debug => debug!(%instruction, %id, mode = %context.mode, %args, "{}", entry.text),
            LogLevel::Info => info!(%instruction, %id, mode = %context.mode, %args, "{}", entry.text),
            LogLevel::Warning => warn!(%instruction, %id, mode = %context.mode, %args, "{}", entry.text),
            LogLevel::Error => error!(%instruction, %id, mode = %context.mode, %args, "{}", entry.text),
        }
    }
}

/// An entry captured by [`MemorySink`]
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEntry {
    pub instruction: Option<String>,
    pub id: Option<String>,
    pub mode: Mode,
    pub entry: LogEntry,
}

/// Sink that keeps every entry in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    entries: Mutex<Vec<RecordedEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything written so far
    pub fn entries(&self) -> Vec<RecordedEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove and return everything written so far
    pub fn take(&self) -> Vec<RecordedEntry> {
        std::mem::take(&mut *self.entries.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl LogSink for MemorySink {
    fn write(&self, context: &SinkContext<'_>, entry: &LogEntry) {
        let recorded = RecordedEntry {
            instruction: context.instruction.map(str::to_string),
            id: context.id.map(str::to_string),
            mode: context.mode,
            entry: entry.clone(),
        };
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).push(recorded);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;

    #[test]
    fn test_tracing_sink_threshold() {
        let sink = TracingSink::new(LogLevel::Warning);
        assert!(!sink.accepts(&LogEntry::info("quiet")));
        assert!(sink.accepts(&LogEntry::info("loud").forced()));
        assert!(sink.accepts(&LogEntry::error("bad")));
    }

    #[test]
    fn test_tracing_sink_write_does_not_panic() {
        let sink = TracingSink::default();
        let outcome = Outcome::from_request(&Envelope::new("ping").with_id("x"));
        let ctx = SinkContext::from(&outcome);
        sink.write(&ctx, &LogEntry::debug("hidden").forced().with_arg("a"));
        sink.write(&ctx, &LogEntry::error("shown"));
    }

    #[test]
    fn test_memory_sink_records_context() {
        let sink = MemorySink::new();
        let outcome = Outcome::from_request(&Envelope::new("echo").with_id("abc").with_mode(Mode::Async));

        sink.write(&SinkContext::from(&outcome), &LogEntry::warning("careful"));

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].instruction.as_deref(), Some("echo"));
        assert_eq!(entries[0].id.as_deref(), Some("abc"));
        assert_eq!(entries[0].mode, Mode::Async);
        assert_eq!(entries[0].entry.text, "careful");

        assert_eq!(sink.take().len(), 1);
        assert!(sink.is_empty());
    }
}
