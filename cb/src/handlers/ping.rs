//! ping - liveness check

use async_trait::async_trait;

use crate::envelope::{Envelope, Outcome};
use crate::registry::Handler;

/// Answers with `data.pong = true`
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, _id: String, request: Envelope, simulate: bool) -> Outcome {
        let mut outcome = Outcome::from_request(&request);
        if simulate {
            return outcome;
        }

        outcome.data_mut().insert("pong".to_string(), true.into());
        outcome.succeed();
        outcome
    }
}
