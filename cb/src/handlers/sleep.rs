//! sleep - waits `data.ms` milliseconds before answering

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::envelope::{Envelope, Outcome};
use crate::registry::Handler;

/// Upper bound on a single sleep
const MAX_SLEEP_MS: u64 = 60_000;

/// Requires `data.ms`; resolves after that many milliseconds
pub struct SleepHandler;

#[async_trait]
impl Handler for SleepHandler {
    async fn handle(&self, id: String, request: Envelope, simulate: bool) -> Outcome {
        let mut outcome = Outcome::from_request(&request);
        let ms = outcome.require("ms");
        if simulate {
            return outcome;
        }
        let Some(ms) = ms else {
            return outcome;
        };
        let Some(ms) = ms.as_u64() else {
            outcome.fail(format!("data.ms must be a non-negative integer, got {}", ms));
            return outcome;
        };
        if ms > MAX_SLEEP_MS {
            outcome.fail(format!("data.ms must be at most {}", MAX_SLEEP_MS));
            return outcome;
        }

        debug!(%id, ms, "SleepHandler: sleeping");
        tokio::time::sleep(Duration::from_millis(ms)).await;

        outcome.data_mut().insert("slept-ms".to_string(), ms.into());
        outcome.succeed();
        outcome
    }
}
