//! Envelope types - the request/response shapes exchanged between peers
//!
//! A request is an [`Envelope`]; its reply is an [`Outcome`], which carries the
//! original envelope unchanged plus the response-only fields (`result`,
//! `messages`, `missingParams`). Both travel over the [`EventBus`] only.
//!
//! [`EventBus`]: crate::bus::EventBus

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::error::DispatchError;

/// Delivery class of a call; selects the registry and channel pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Sync,
    Async,
}

impl Mode {
    /// Both modes, in channel order
    pub const ALL: [Mode; 2] = [Mode::Sync, Mode::Async];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Sync => "sync",
            Mode::Async => "async",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(Mode::Sync),
            "async" => Ok(Mode::Async),
            other => Err(DispatchError::UnknownMode(other.to_string())),
        }
    }
}

/// One of the four named lanes on the bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Request(Mode),
    Response(Mode),
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Request(Mode::Sync) => "request:sync",
            Channel::Request(Mode::Async) => "request:async",
            Channel::Response(Mode::Sync) => "response:sync",
            Channel::Response(Mode::Async) => "response:async",
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Channel::Request(mode) | Channel::Response(mode) => *mode,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Severity of a [`LogEntry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// Side-channel log line a handler wants surfaced to the caller's sink
///
/// Entries never affect control flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub text: String,
    pub level: LogLevel,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default)]
    pub force: bool,
}

impl LogEntry {
    pub fn new(level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            level,
            args: Vec::new(),
            force: false,
        }
    }

    pub fn debug(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Debug, text)
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, text)
    }

    pub fn warning(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, text)
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, text)
    }

    /// Attach a structured argument
    pub fn with_arg(mut self, arg: impl Into<Value>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Mark the entry as bypassing the sink's level threshold
    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

/// Generate a fresh correlation id
pub fn new_correlation_id() -> String {
    Uuid::now_v7().to_string()
}

/// Qualify a parameter path so it always reads `data.<path>`
pub(crate) fn qualify_param(path: &str) -> String {
    let path = path.trim();
    if path == "data" || path.starts_with("data.") {
        path.to_string()
    } else {
        format!("data.{}", path)
    }
}

/// A request travelling from a caller to the peer that owns the handlers
///
/// `instruction` and `id` are optional so a malformed request can still be
/// represented and answered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instruction: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub mode: Mode,

    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Envelope {
    /// Create a request for `instruction` with empty data and no id yet
    pub fn new(instruction: impl Into<String>) -> Self {
        Self {
            instruction: Some(instruction.into()),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Set a single top-level key in `data`
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Instruction name, if present and not blank
    ///
    /// The name is returned verbatim; padding is not stripped, so a padded
    /// name never matches a registered handler.
    pub fn instruction(&self) -> Option<&str> {
        self.instruction.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Correlation id, if present and non-empty
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|s| !s.is_empty())
    }

    /// Resolve a dotted path into `data`
    ///
    /// Accepts `data.window.width` as well as `window.width`. Array elements
    /// are addressed by index (`data.items.0`). A JSON `null` counts as absent.
    pub fn param(&self, path: &str) -> Option<&Value> {
        let qualified = qualify_param(path);
        let mut segments = qualified.split('.').skip(1);

        let first = segments.next()?;
        let mut current = self.data.get(first)?;

        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }

        if current.is_null() { None } else { Some(current) }
    }
}

/// The response shape every handler fills in
///
/// Built from the request by [`Outcome::from_request`], so a reply always has
/// every field even when a handler never touches it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Outcome {
    #[serde(flatten)]
    pub envelope: Envelope,

    pub result: bool,

    #[serde(default)]
    pub messages: Vec<LogEntry>,

    #[serde(default)]
    pub missing_params: BTreeSet<String>,
}

impl Outcome {
    /// Clone the request and initialise the response fields to failure
    pub fn from_request(request: &Envelope) -> Self {
        debug!(instruction = ?request.instruction, id = ?request.id, "Outcome::from_request: called");
        Self {
            envelope: request.clone(),
            result: false,
            messages: Vec::new(),
            missing_params: BTreeSet::new(),
        }
    }

    pub fn instruction(&self) -> Option<&str> {
        self.envelope.instruction()
    }

    pub fn id(&self) -> Option<&str> {
        self.envelope.id()
    }

    pub fn mode(&self) -> Mode {
        self.envelope.mode
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.envelope.data
    }

    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.envelope.data
    }

    /// Look up a required parameter, recording it as missing when absent
    ///
    /// A missing parameter also queues an error entry so the caller sees why
    /// the call failed.
    pub fn require(&mut self, path: &str) -> Option<Value> {
        if let Some(value) = self.envelope.param(path) {
            return Some(value.clone());
        }

        let qualified = qualify_param(path);
        debug!(param = %qualified, "Outcome::require: missing parameter");
        self.messages
            .push(LogEntry::error(format!("Missing required parameter: {}", qualified)));
        self.missing_params.insert(qualified);
        None
    }

    /// True when no required parameter has been reported missing
    pub fn is_valid(&self) -> bool {
        self.missing_params.is_empty()
    }

    pub fn succeed(&mut self) {
        self.result = true;
    }

    /// Mark the outcome failed and queue an error entry
    pub fn fail(&mut self, reason: impl Into<String>) {
        self.result = false;
        self.messages.push(LogEntry::error(reason));
    }

    pub fn log(&mut self, entry: LogEntry) {
        self.messages.push(entry);
    }
}
