//! Handler trait definition

use std::future::Future;

use async_trait::async_trait;

use crate::envelope::{Envelope, Outcome};

/// An instruction handler plugged into a [`HandlerRegistry`]
///
/// Start from [`Outcome::from_request`], validate `request.data` first, and
/// return before any externally visible effect when `simulate` is set.
///
/// [`HandlerRegistry`]: super::HandlerRegistry
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, id: String, request: Envelope, simulate: bool) -> Outcome;
}

/// Adapter turning an async closure into a [`Handler`]
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(String, Envelope, bool) -> Fut + Send + Sync,
    Fut: Future<Output = Outcome> + Send + 'static,
{
    async fn handle(&self, id: String, request: Envelope, simulate: bool) -> Outcome {
        (self.0)(id, request, simulate).await
    }
}
