//! echo - returns the caller's data

use async_trait::async_trait;

use crate::envelope::{Envelope, LogEntry, Outcome};
use crate::registry::Handler;

/// Requires `data.text`; succeeds with the request data unchanged
pub struct EchoHandler;

#[async_trait]
impl Handler for EchoHandler {
    async fn handle(&self, _id: String, request: Envelope, simulate: bool) -> Outcome {
        let mut outcome = Outcome::from_request(&request);
        let text = outcome.require("text");
        if simulate {
            return outcome;
        }
        let Some(text) = text else {
            return outcome;
        };

        outcome.log(LogEntry::debug("echoing").with_arg(text));
        outcome.succeed();
        outcome
    }
}
