use crate::api::rate_limit::{wait_time, DEFAULT_BACKOFF};
use crate::error::OrchestrationError;
use crate::runtime::results::{QueueSummary, StepResult, StoryResult};
use crate::runtime::runner::{RunOutcome, Runner, EXIT_CANCELLED, EXIT_FAILURE};
use crate::runtime::status::StatusSource;
use crate::state::{Route, Router, StoryStatus};
use std::time::{Duration, Instant};

/// How many times one story's workflow may run when attempts keep hitting
/// provider rate limits. Other failures are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn none() -> Self {
        Self::new(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueReport {
    pub results: Vec<StoryResult>,
    pub summary: QueueSummary,
    pub exit_code: i32,
}

impl QueueReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Walks a list of stories strictly in order, routing each by its current
/// status and stopping at the first failure.
pub struct QueueOrchestrator<S> {
    runner: Runner,
    status: S,
    router: Router,
    retry: RetryPolicy,
}

impl<S: StatusSource> QueueOrchestrator<S> {
    pub fn new(runner: Runner, status: S, router: Router) -> Self {
        let retry = RetryPolicy::new(runner.config().max_retries);
        Self {
            runner,
            status,
            router,
            retry,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    pub fn runner_mut(&mut self) -> &mut Runner {
        &mut self.runner
    }

    pub async fn run_queue(&mut self, keys: &[String]) -> QueueReport {
        let started = Instant::now();
        let total = keys.len();
        let mut results = Vec::with_capacity(total);
        let mut exit_code = 0;

        for (index, key) in keys.iter().enumerate() {
            if self.runner.cancel_token().is_cancelled() {
                exit_code = EXIT_CANCELLED;
                break;
            }

            let result = self.run_story(index + 1, total, key).await;
            self.runner.printer_mut().story_end(&result);
            let failed = !result.success;
            let code = result.exit_code;
            results.push(result);
            if failed {
                tracing::warn!(story_key = %key, exit_code = code, "stopping queue after failure");
                exit_code = code;
                break;
            }
        }

        let summary = QueueSummary::from_results(&results, total, started.elapsed());
        let report = QueueReport {
            results,
            summary,
            exit_code,
        };
        tracing::info!(
            succeeded = summary.succeeded,
            skipped = summary.skipped,
            failed = summary.failed,
            not_attempted = summary.not_attempted,
            exit_code,
            "queue finished"
        );
        self.runner.printer_mut().queue_summary(&report);
        report
    }

    /// Drive one story from its current status to a terminal one, running one
    /// routed workflow per step.
    pub async fn run_lifecycle(&mut self, key: &str) -> StoryResult {
        let started = Instant::now();
        let limit = self.runner.config().max_lifecycle_steps;
        let mut previous: Option<(String, StoryStatus)> = None;
        let mut steps = 0usize;
        let mut attempts = 0u32;

        self.runner.printer_mut().story_start(1, 1, key, None);
        let result = loop {
            if self.runner.cancel_token().is_cancelled() {
                let error = OrchestrationError::Cancelled;
                break self.fail(key, None, started, EXIT_CANCELLED, error, attempts);
            }

            let status = match self.status.status(key) {
                Ok(status) => status,
                Err(source) => {
                    let error = OrchestrationError::Status {
                        key: key.to_string(),
                        source,
                    };
                    break self.fail(key, None, started, EXIT_FAILURE, error, attempts);
                }
            };

            if let Some((workflow, before)) = &previous {
                if *before == status {
                    let error = OrchestrationError::Stalled {
                        key: key.to_string(),
                        workflow: workflow.clone(),
                        status: status.clone(),
                    };
                    break self.fail(key, Some(status), started, EXIT_FAILURE, error, attempts);
                }
            }

            let workflow = match self.router.route(&status) {
                Route::Complete if steps == 0 => {
                    break StoryResult::skipped(key, status, started.elapsed());
                }
                Route::Complete => {
                    let last = previous.map(|(workflow, _)| workflow).unwrap_or_default();
                    break StoryResult::succeeded(key, status, last, started.elapsed(), attempts);
                }
                Route::Unroutable => {
                    let error = OrchestrationError::Routing {
                        key: key.to_string(),
                        status: status.clone(),
                    };
                    break self.fail(key, Some(status), started, EXIT_FAILURE, error, attempts);
                }
                Route::Continue(workflow) => workflow,
            };

            if steps >= limit {
                let error = OrchestrationError::StepLimit {
                    key: key.to_string(),
                    limit,
                };
                break self.fail(key, Some(status), started, EXIT_FAILURE, error, attempts);
            }

            steps += 1;
            self.runner.printer_mut().step_start(steps, limit, &workflow);
            let (outcome, used) = self.execute_with_retry(&workflow, key).await;
            attempts += used;
            let step = StepResult::new(workflow.as_str(), outcome.duration, outcome.exit_code);
            self.runner.printer_mut().step_end(&step);

            if !outcome.success() {
                break self.workflow_failure(key, status, workflow, started, &outcome, attempts);
            }
            previous = Some((workflow, status));
        };

        self.runner.printer_mut().story_end(&result);
        result
    }

    /// Run `workflow`, re-running it while attempts fail on a rate limit.
    pub async fn execute_with_retry(&mut self, workflow: &str, key: &str) -> (RunOutcome, u32) {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let outcome = self.runner.run_workflow(workflow, key).await;
            let retryable = !outcome.success() && !outcome.cancelled && outcome.rate_limited();
            if !retryable || attempt >= max_attempts {
                return (outcome, attempt);
            }

            let wait = if outcome.backed_off {
                Duration::ZERO
            } else {
                outcome
                    .rate_limit
                    .map(|info| wait_time(&info))
                    .unwrap_or(DEFAULT_BACKOFF)
            };
            tracing::warn!(
                workflow,
                story_key = key,
                attempt,
                max_attempts,
                wait_secs = wait.as_secs(),
                "rate limited; retrying"
            );
            attempt += 1;
            self.runner.printer_mut().retry(attempt, max_attempts, wait);
            if !wait.is_zero() && !self.runner.pause(wait).await {
                let cancelled = RunOutcome {
                    exit_code: EXIT_CANCELLED,
                    cancelled: true,
                    ..outcome
                };
                return (cancelled, attempt - 1);
            }
        }
    }

    async fn run_story(&mut self, index: usize, total: usize, key: &str) -> StoryResult {
        let started = Instant::now();
        let status = match self.status.status(key) {
            Ok(status) => status,
            Err(source) => {
                self.runner.printer_mut().story_start(index, total, key, None);
                let error = OrchestrationError::Status {
                    key: key.to_string(),
                    source,
                };
                return self.fail(key, None, started, EXIT_FAILURE, error, 0);
            }
        };

        match self.router.route(&status) {
            Route::Complete => {
                tracing::info!(story_key = key, status = %status, "story already complete; skipping");
                self.runner.printer_mut().story_start(index, total, key, None);
                StoryResult::skipped(key, status, started.elapsed())
            }
            Route::Unroutable => {
                self.runner.printer_mut().story_start(index, total, key, None);
                let error = OrchestrationError::Routing {
                    key: key.to_string(),
                    status: status.clone(),
                };
                self.fail(key, Some(status), started, EXIT_FAILURE, error, 0)
            }
            Route::Continue(workflow) => {
                tracing::info!(story_key = key, status = %status, workflow = %workflow, "running story");
                self.runner
                    .printer_mut()
                    .story_start(index, total, key, Some(&workflow));
                let (outcome, attempts) = self.execute_with_retry(&workflow, key).await;
                if outcome.success() {
                    StoryResult::succeeded(key, status, workflow, started.elapsed(), attempts)
                } else {
                    self.workflow_failure(key, status, workflow, started, &outcome, attempts)
                }
            }
        }
    }

    fn workflow_failure(
        &mut self,
        key: &str,
        status: StoryStatus,
        workflow: String,
        started: Instant,
        outcome: &RunOutcome,
        attempts: u32,
    ) -> StoryResult {
        let stage = if outcome.cancelled {
            OrchestrationError::Cancelled.stage()
        } else {
            crate::error::FailureStage::Workflow(workflow)
        };
        tracing::error!(
            story_key = key,
            stage = %stage,
            exit_code = outcome.exit_code,
            "story failed"
        );
        StoryResult::failed(
            key,
            Some(status),
            started.elapsed(),
            outcome.exit_code,
            stage,
            attempts,
        )
    }

    fn fail(
        &mut self,
        key: &str,
        status: Option<StoryStatus>,
        started: Instant,
        exit_code: i32,
        error: OrchestrationError,
        attempts: u32,
    ) -> StoryResult {
        tracing::error!(story_key = key, %error, "story failed");
        if !matches!(error, OrchestrationError::Cancelled) {
            self.runner.printer_mut().error(&error.to_string());
        }
        StoryResult::failed(
            key,
            status,
            started.elapsed(),
            exit_code,
            error.stage(),
            attempts,
        )
    }
}
