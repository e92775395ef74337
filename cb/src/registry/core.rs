//! HandlerRegistry - named handlers plus dispatch, response and introspection

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Map, Value};
use tracing::{debug, error};

use super::handler::{FnHandler, Handler};
use crate::bus::EventBus;
use crate::envelope::{Envelope, Mode, Outcome, new_correlation_id};
use crate::error::DispatchError;
use crate::sink::{LogSink, SinkContext};

/// Reserved instruction answered by the registry itself
pub const INFO_INSTRUCTION: &str = "info";

/// Handlers for one mode on one peer
///
/// The handler table is filled at startup and then shared behind an `Arc`;
/// it is never mutated while requests are flowing.
pub struct HandlerRegistry {
    mode: Mode,
    handlers: HashMap<String, Arc<dyn Handler>>,
    bus: Arc<EventBus>,
    sink: Arc<dyn LogSink>,
}

impl HandlerRegistry {
    /// Create an empty registry answering on the response lane for `mode`
    pub fn new(mode: Mode, bus: Arc<EventBus>, sink: Arc<dyn LogSink>) -> Self {
        debug!(%mode, "HandlerRegistry::new: called");
        Self {
            mode,
            handlers: HashMap::new(),
            bus,
            sink,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Register a handler under an instruction name
    pub fn register<H: Handler + 'static>(&mut self, name: impl Into<String>, handler: H) -> Result<(), DispatchError> {
        self.register_arc(name, Arc::new(handler))
    }

    /// Register a shared handler (the same instance may serve both modes)
    pub fn register_arc(&mut self, name: impl Into<String>, handler: Arc<dyn Handler>) -> Result<(), DispatchError> {
        let name = name.into();
        debug!(%name, mode = %self.mode, "HandlerRegistry::register: called");

        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(DispatchError::InvalidInstruction { name });
        }
        if name == INFO_INSTRUCTION {
            return Err(DispatchError::ReservedInstruction { name });
        }
        if self.handlers.contains_key(&name) {
            return Err(DispatchError::DuplicateHandler { name });
        }

        self.handlers.insert(name, handler);
        Ok(())
    }

    /// Register an async closure as a handler
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> Result<(), DispatchError>
    where
        F: Fn(String, Envelope, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Outcome> + Send + 'static,
    {
        self.register(name, FnHandler(f))
    }

    /// True for registered instructions and for `info`
    pub fn has_handler(&self, instruction: &str) -> bool {
        instruction == INFO_INSTRUCTION || self.handlers.contains_key(instruction)
    }

    /// Registered instruction names, sorted, excluding `info`
    pub fn instruction_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Starting shape for every reply: the request plus failed response fields
    pub fn response_data(&self, envelope: &Envelope) -> Outcome {
        Outcome::from_request(envelope)
    }

    /// Route a request to its handler
    ///
    /// Returns `false` without side effects when no handler matches. Otherwise
    /// the handler runs on a spawned task and exactly one response is
    /// published when it finishes. Must be called inside a tokio runtime.
    pub fn execute(self: &Arc<Self>, instruction: &str, id: &str, envelope: Envelope) -> bool {
        debug!(%instruction, %id, mode = %self.mode, "HandlerRegistry::execute: called");
        if !self.has_handler(instruction) {
            debug!(%instruction, "HandlerRegistry::execute: unknown instruction");
            return false;
        }

        let registry = Arc::clone(self);
        let instruction = instruction.to_string();
        let id = id.to_string();
        tokio::spawn(async move {
            if let Some(outcome) = registry.run_handler(&instruction, &id, envelope, false).await {
                registry.respond(outcome, false);
            }
        });

        true
    }

    /// Dry-run a handler in-process: nothing is published or logged
    pub async fn simulate(&self, instruction: &str, envelope: Envelope) -> Option<Outcome> {
        let id = envelope.id().map(str::to_string).unwrap_or_else(new_correlation_id);
        let outcome = self.run_handler(instruction, &id, envelope, true).await?;
        self.respond(outcome, true)
    }

    /// Deliver a finished outcome
    ///
    /// With `simulate` the outcome is handed straight back. Otherwise every
    /// queued message goes to the sink and the outcome is published on this
    /// registry's response lane; `None` is returned.
    pub fn respond(&self, mut outcome: Outcome, simulate: bool) -> Option<Outcome> {
        if simulate {
            debug!(instruction = ?outcome.instruction(), "HandlerRegistry::respond: simulated, not publishing");
            return Some(outcome);
        }

        outcome.envelope.mode = self.mode;

        let context = SinkContext::from(&outcome);
        for entry in &outcome.messages {
            self.sink.write(&context, entry);
        }

        let reached = self.bus.publish_response(self.mode, outcome);
        if reached == 0 {
            debug!(mode = %self.mode, "HandlerRegistry::respond: no listener for response");
        }
        None
    }

    /// Required parameters per instruction, discovered by dry-running handlers
    ///
    /// Each handler runs once with `simulate=true` and empty data. `filter`
    /// restricts the report to the named instructions.
    pub async fn introspect(&self, filter: Option<&[String]>) -> BTreeMap<String, Vec<String>> {
        debug!(?filter, mode = %self.mode, "HandlerRegistry::introspect: called");
        let mut report: BTreeMap<String, Vec<String>> = BTreeMap::new();

        for name in self.instruction_names() {
            if let Some(wanted) = filter
                && !wanted.iter().any(|w| *w == name)
            {
                continue;
            }
            let Some(handler) = self.handlers.get(&name).cloned() else {
                continue;
            };

            let id = new_correlation_id();
            let sample = Envelope::new(name.clone()).with_id(id.clone()).with_mode(self.mode);
            let outcome = self.run_guarded(handler, &name, &id, sample, true).await;
            let params = self
                .respond(outcome, true)
                .map(|o| o.missing_params.into_iter().collect())
                .unwrap_or_default();

            report.insert(name, params);
        }

        report
    }

    /// Run the named handler (or `info`) and return its outcome unpublished
    async fn run_handler(&self, instruction: &str, id: &str, envelope: Envelope, simulate: bool) -> Option<Outcome> {
        if instruction == INFO_INSTRUCTION {
            return Some(self.info(envelope).await);
        }

        let handler = self.handlers.get(instruction)?.clone();
        Some(self.run_guarded(handler, instruction, id, envelope, simulate).await)
    }

    async fn info(&self, request: Envelope) -> Outcome {
        let filter = info_filter(&request);
        let report = self.introspect(filter.as_deref()).await;

        let mut outcome = self.response_data(&request);
        let data: Map<String, Value> = report
            .into_iter()
            .map(|(name, params)| (name, Value::from(params)))
            .collect();
        outcome.envelope.data = data;
        outcome.succeed();
        outcome
    }

    /// Invoke a handler, turning a panic into a failed outcome
    async fn run_guarded(
        &self,
        handler: Arc<dyn Handler>,
        instruction: &str,
        id: &str,
        request: Envelope,
        simulate: bool,
    ) -> Outcome {
        let fallback = self.response_data(&request);
        let call = handler.handle(id.to_string(), request, simulate);

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(mut outcome) => {
                // correlation fields always come from the request
                outcome.envelope.instruction = fallback.envelope.instruction;
                outcome.envelope.id = fallback.envelope.id;
                outcome.envelope.mode = fallback.envelope.mode;
                outcome
            }
            Err(panic) => {
                let reason = panic_reason(panic.as_ref());
                error!(%instruction, %id, %reason, "HandlerRegistry: handler panicked");
                let mut outcome = fallback;
                outcome.fail(format!("Handler '{}' faulted: {}", instruction, reason));
                outcome
            }
        }
    }
}

/// Names requested through `data.message` or `data.messages`
fn info_filter(request: &Envelope) -> Option<Vec<String>> {
    match (request.param("message"), request.param("messages")) {
        (Some(Value::String(name)), _) => Some(vec![name.clone()]),
        (_, Some(Value::Array(names))) => Some(names.iter().filter_map(Value::as_str).map(str::to_string).collect()),
        (_, Some(Value::String(name))) => Some(vec![name.clone()]),
        _ => None,
    }
}

fn panic_reason(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
