//! The embedder-facing service trait.
//!
//! One [`ServiceHandler`] drives every worker. The handler itself is shared
//! across threads (`Send + Sync`), while the thread data it creates stays on
//! the worker that made it, so callbacks run without any cross-thread
//! synchronization.

use async_trait::async_trait;
use thiserror::Error;

use crate::protocol::{EngineError, SendError};
use crate::request::Request;

/// A callback signaled failure; the engine answers 500 and records
/// [`Outcome::InternalError`](crate::protocol::Outcome::InternalError).
#[derive(Debug, Error)]
#[error("handler error: {reason}")]
pub struct HandlerError {
    reason: String,
}

impl HandlerError {
    pub fn new<S: ToString>(reason: S) -> Self {
        Self { reason: reason.to_string() }
    }
}

impl From<SendError> for HandlerError {
    fn from(e: SendError) -> Self {
        Self::new(e)
    }
}

/// Request lifecycle callbacks plus the per-worker data factory.
///
/// Callback futures run on the worker's local set and need not be `Send`.
/// Returning `Err` from any callback is terminal for the request: remaining
/// callbacks are skipped, a 500 is generated if nothing was sent yet, and the
/// connection is closed.
#[async_trait(?Send)]
pub trait ServiceHandler: Send + Sync + 'static {
    /// Data created once per worker thread, shared by all its requests.
    type ThreadData: 'static;

    /// Builds this worker's thread data. Runs on the worker thread before it
    /// accepts anything; an `Err` aborts the whole server start.
    fn create_thread_data(&self) -> Result<Self::ThreadData, EngineError>;

    /// A request head was parsed and a pooled core bound to it.
    async fn on_url(&self, request: &mut Request<Self::ThreadData>) -> Result<(), HandlerError>;

    /// A body fragment arrived; [`Request::chunk`] holds it and
    /// [`Request::body`] everything accumulated so far.
    async fn on_chunk(&self, request: &mut Request<Self::ThreadData>) -> Result<(), HandlerError> {
        let _ = request;
        Ok(())
    }

    /// The message is complete and no response has been written yet.
    ///
    /// The default answers an empty 200 so a handler that responded from
    /// `on_url` needs no override.
    async fn on_request_complete(
        &self,
        request: &mut Request<Self::ThreadData>,
    ) -> Result<(), HandlerError> {
        request.write_simple_response(None, None, b"").await?;
        Ok(())
    }
}
