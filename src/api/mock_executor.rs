use super::executor::{ExecutionOutcome, ExecutionRequest, Executor};
use super::normalizer::LineParser;
use super::rate_limit::RateLimitInfo;
use crate::types::Event;
use anyhow::{anyhow, Result};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// One scripted invocation: the stream-json lines to replay and how it ends.
#[derive(Debug, Clone, Default)]
pub struct MockRun {
    pub lines: Vec<String>,
    pub exit_code: i32,
    pub rate_limit: Option<RateLimitInfo>,
    pub start_error: Option<String>,
}

impl MockRun {
    pub fn success(lines: Vec<String>) -> Self {
        Self {
            lines,
            ..Self::default()
        }
    }

    pub fn exit(lines: Vec<String>, exit_code: i32) -> Self {
        Self {
            lines,
            exit_code,
            ..Self::default()
        }
    }

    pub fn rate_limited(exit_code: i32, info: RateLimitInfo) -> Self {
        Self {
            exit_code,
            rate_limit: Some(info),
            ..Self::default()
        }
    }

    pub fn start_failure(message: impl Into<String>) -> Self {
        Self {
            start_error: Some(message.into()),
            exit_code: 1,
            ..Self::default()
        }
    }
}

/// Replays scripted runs in order; records every request it receives.
#[derive(Clone, Default)]
pub struct MockExecutor {
    runs: Arc<Mutex<VecDeque<MockRun>>>,
    requests: Arc<Mutex<Vec<ExecutionRequest>>>,
}

impl MockExecutor {
    pub fn new(runs: Vec<MockRun>) -> Self {
        Self {
            runs: Arc::new(Mutex::new(runs.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests
            .lock()
            .map(|requests| requests.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    pub fn remaining_runs(&self) -> usize {
        self.runs.lock().map(|runs| runs.len()).unwrap_or(0)
    }

    fn next_run(&self, request: ExecutionRequest) -> Result<MockRun> {
        self.requests
            .lock()
            .map_err(|_| anyhow!("MockExecutor: request log poisoned"))?
            .push(request);
        self.runs
            .lock()
            .map_err(|_| anyhow!("MockExecutor: run queue poisoned"))?
            .pop_front()
            .ok_or_else(|| anyhow!("MockExecutor: no more runs configured"))
    }
}

impl Executor for MockExecutor {
    fn execute(
        &self,
        request: ExecutionRequest,
        events: mpsc::Sender<Event>,
    ) -> BoxFuture<'_, Result<ExecutionOutcome>> {
        Box::pin(async move {
            let run = self.next_run(request)?;
            if let Some(message) = run.start_error {
                return Err(anyhow!(message));
            }

            let mut parser = LineParser::new();
            for line in &run.lines {
                let framed = if line.ends_with('\n') {
                    line.clone()
                } else {
                    format!("{line}\n")
                };
                for event in parser.process(framed.as_bytes()) {
                    if events.send(event).await.is_err() {
                        break;
                    }
                }
            }

            Ok(ExecutionOutcome {
                exit_code: run.exit_code,
                rate_limit: run.rate_limit,
            })
        })
    }
}
