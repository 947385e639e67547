use super::rate_limit::RateLimitInfo;
use crate::types::Event;
use anyhow::Result;
use futures::future::BoxFuture;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    pub prompt: String,
    pub model: Option<String>,
}

impl ExecutionRequest {
    pub fn new(prompt: impl Into<String>, model: Option<String>) -> Self {
        Self {
            prompt: prompt.into(),
            model,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: i32,
    /// Set when the executor saw a throttle signal outside the event stream,
    /// for example on the assistant's own stderr.
    pub rate_limit: Option<RateLimitInfo>,
}

/// Runs one assistant invocation.
///
/// Implementations send every normalized record to `events` in emission
/// order and resolve once the invocation has finished. An `Err` means the
/// invocation could not be started or its output could not be read.
pub trait Executor: Send + Sync {
    fn execute(
        &self,
        request: ExecutionRequest,
        events: mpsc::Sender<Event>,
    ) -> BoxFuture<'_, Result<ExecutionOutcome>>;
}
