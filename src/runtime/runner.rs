use crate::api::rate_limit::{check_line, wait_time};
use crate::api::{ExecutionOutcome, ExecutionRequest, Executor, RateLimitInfo};
use crate::config::Config;
use crate::error::OrchestrationError;
use crate::output::Printer;
use crate::runtime::results::{CycleReport, StepResult};
use crate::state::{MatchPolicy, ToolCorrelator};
use crate::types::{Event, TokenUsage, ToolResult, ToolUse};
use anyhow::Result;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Events buffered between the executor and the runner. Small on purpose so
/// a backoff pause in the runner also pauses the producer.
const EVENT_CHANNEL_CAPACITY: usize = 32;
const CHARS_PER_TOKEN: usize = 4;

pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunOutcome {
    pub exit_code: i32,
    pub duration: Duration,
    pub usage: TokenUsage,
    pub rate_limit: Option<RateLimitInfo>,
    /// The runner already waited out `rate_limit` mid-stream.
    pub backed_off: bool,
    pub cancelled: bool,
    pub error: Option<String>,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn rate_limited(&self) -> bool {
        self.rate_limit.is_some_and(|info| info.is_rate_limit)
    }

    pub(crate) fn failed(message: String) -> Self {
        Self {
            exit_code: EXIT_FAILURE,
            error: Some(message),
            ..Self::default()
        }
    }

    pub(crate) fn cancelled(duration: Duration) -> Self {
        Self {
            exit_code: EXIT_CANCELLED,
            duration,
            cancelled: true,
            ..Self::default()
        }
    }
}

/// Drives one assistant execution at a time and turns its event stream into
/// printer calls.
pub struct Runner {
    executor: Arc<dyn Executor>,
    printer: Box<dyn Printer>,
    config: Arc<Config>,
    correlator: ToolCorrelator<ToolUse>,
    cancel: CancellationToken,
    usage: TokenUsage,
    rate_limit: Option<RateLimitInfo>,
    backed_off: bool,
}

impl Runner {
    pub fn new(
        executor: Arc<dyn Executor>,
        printer: Box<dyn Printer>,
        config: Arc<Config>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            executor,
            printer,
            config,
            correlator: ToolCorrelator::default(),
            cancel,
            usage: TokenUsage::default(),
            rate_limit: None,
            backed_off: false,
        }
    }

    pub fn with_match_policy(mut self, policy: MatchPolicy) -> Self {
        self.correlator = ToolCorrelator::new(policy);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn printer_mut(&mut self) -> &mut dyn Printer {
        self.printer.as_mut()
    }

    /// Run a raw prompt to completion.
    pub async fn run_prompt(&mut self, request: ExecutionRequest) -> RunOutcome {
        self.execute("prompt", request).await
    }

    /// Render the configured template for `workflow` and run it.
    pub async fn run_workflow(&mut self, workflow: &str, story_key: &str) -> RunOutcome {
        let request = match self.config.request_for(workflow, story_key) {
            Ok(request) => request,
            Err(error) => {
                tracing::error!(workflow, story_key, %error, "cannot build workflow prompt");
                self.printer.error(&error.to_string());
                return RunOutcome::failed(error.to_string());
            }
        };
        tracing::info!(workflow, story_key, "starting workflow");
        self.execute(workflow, request).await
    }

    /// Run every configured cycle step in order, stopping at the first failure.
    pub async fn run_full_cycle(&mut self, story_key: &str) -> CycleReport {
        let started = Instant::now();
        let steps = self.config.full_cycle_steps.clone();
        let total = steps.len();
        let mut results = Vec::with_capacity(total);
        let mut exit_code = 0;

        for (index, step) in steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                exit_code = EXIT_CANCELLED;
                break;
            }
            self.printer.step_start(index + 1, total, step);
            let outcome = self.run_workflow(step, story_key).await;
            let result = StepResult::new(step.as_str(), outcome.duration, outcome.exit_code);
            self.printer.step_end(&result);
            results.push(result);
            if !outcome.success() {
                tracing::warn!(story_key, step = %step, exit_code = outcome.exit_code, "cycle step failed");
                exit_code = outcome.exit_code;
                break;
            }
        }

        let report = CycleReport {
            story_key: story_key.to_string(),
            steps: results,
            duration: started.elapsed(),
            exit_code,
        };
        self.printer.cycle_summary(&report);
        report
    }

    /// Sleep for `wait` unless cancelled first. Returns false on cancellation.
    pub async fn pause(&self, wait: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(wait) => true,
        }
    }

    async fn execute(&mut self, label: &str, request: ExecutionRequest) -> RunOutcome {
        self.correlator.reset();
        self.usage = TokenUsage::default();
        self.rate_limit = None;
        self.backed_off = false;
        let started = Instant::now();

        if self.cancel.is_cancelled() {
            return RunOutcome::cancelled(Duration::ZERO);
        }

        let (tx, mut rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let executor = Arc::clone(&self.executor);
        let cancel = self.cancel.clone();
        let execution = executor.execute(request, tx);
        tokio::pin!(execution);

        let mut finished: Option<Result<ExecutionOutcome>> = None;
        let mut cancelled = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => {
                        if !self.handle_event(event).await {
                            cancelled = true;
                            break;
                        }
                    }
                    None => break,
                },
                result = &mut execution, if finished.is_none() => {
                    finished = Some(result);
                }
            }
        }
        if cancelled {
            // Print what the executor already produced, without pausing again.
            while let Ok(event) = rx.try_recv() {
                self.account_tokens(&event);
                if !event.session_complete() {
                    self.render_event(&event);
                }
            }
        }
        drop(rx);

        // The executor may close its sender before it has reaped the child.
        if !cancelled && finished.is_none() {
            tokio::select! {
                _ = cancel.cancelled() => cancelled = true,
                result = &mut execution => finished = Some(result),
            }
        }

        if cancelled {
            tracing::warn!(label, "execution cancelled");
            self.flush_pending();
            self.printer.session_end(None);
            let outcome = RunOutcome {
                usage: self.usage,
                rate_limit: self.rate_limit,
                ..RunOutcome::cancelled(started.elapsed())
            };
            self.printer.execution_end(&outcome);
            return outcome;
        }

        self.flush_pending();
        let mut outcome = RunOutcome {
            duration: started.elapsed(),
            usage: self.usage,
            backed_off: self.backed_off,
            ..RunOutcome::default()
        };
        match finished {
            Some(Ok(result)) => {
                outcome.exit_code = result.exit_code;
                outcome.rate_limit = self.rate_limit.or(result.rate_limit);
            }
            Some(Err(source)) => {
                let error = OrchestrationError::ExecutionStart {
                    workflow: label.to_string(),
                    source,
                };
                tracing::error!(%error, "execution failed to start");
                self.printer.error(&error.to_string());
                outcome.exit_code = EXIT_FAILURE;
                outcome.error = Some(error.to_string());
            }
            None => {
                outcome.exit_code = EXIT_FAILURE;
                outcome.error = Some("executor finished without a result".to_string());
            }
        }

        tracing::info!(
            label,
            exit_code = outcome.exit_code,
            duration_ms = outcome.duration.as_millis() as u64,
            input_tokens = outcome.usage.input_tokens,
            output_tokens = outcome.usage.output_tokens,
            "execution finished"
        );
        self.printer.execution_end(&outcome);
        outcome
    }

    /// Dispatch one event. Returns false when a backoff pause was cancelled.
    async fn handle_event(&mut self, event: Event) -> bool {
        tracing::debug!(kind = event.kind().as_str(), subtype = event.subtype(), "event");
        self.account_tokens(&event);
        self.render_event(&event);

        if event.is_tool_result() {
            if let Some(result) = event.tool_result() {
                return self.check_rate_limit(result).await;
            }
        }
        true
    }

    fn render_event(&mut self, event: &Event) {
        if event.session_started() {
            tracing::debug!(
                session_id = event.session_id().unwrap_or_default(),
                model = event.model().unwrap_or_default(),
                "session started"
            );
            self.printer.session_start();
        }

        if event.is_text() {
            self.flush_pending();
            self.printer.text(event.text());
        }

        if event.is_tool_use() {
            if let Some(tool) = event.tool_use() {
                self.correlator.add_tool_use(tool.id.clone(), tool.clone());
            }
        }

        if event.is_tool_result() {
            if let Some(result) = event.tool_result() {
                match self.correlator.match_result(&result.tool_use_id) {
                    Some(tool) => self.printer.tool_use(&tool),
                    None => tracing::debug!(
                        tool_use_id = %result.tool_use_id,
                        "tool result without a pending tool use"
                    ),
                }
                self.printer.tool_result(result);
            }
        }

        if event.session_complete() {
            self.flush_pending();
            self.printer.session_end(event.summary());
        }
    }

    async fn check_rate_limit(&mut self, result: &ToolResult) -> bool {
        if result.stderr.trim().is_empty() {
            return true;
        }
        let Some(info) = result
            .stderr
            .lines()
            .map(check_line)
            .find(|info| info.is_rate_limit)
        else {
            return true;
        };

        let wait = wait_time(&info);
        tracing::warn!(wait_secs = wait.as_secs(), reset = ?info.reset_time, "rate limit reported by tool output");
        self.rate_limit = Some(info);
        self.printer.rate_limit(wait, &info);
        if !self.pause(wait).await {
            return false;
        }
        self.backed_off = true;
        true
    }

    fn account_tokens(&mut self, event: &Event) {
        let reported = event.usage();
        // The closing record carries session totals.
        if event.session_complete() && !reported.is_empty() {
            self.usage = reported;
            return;
        }
        self.usage.input_tokens += reported.input_tokens;
        if reported.output_tokens > 0 {
            self.usage.output_tokens += reported.output_tokens;
        } else if event.is_text() {
            self.usage.output_tokens += estimate_tokens(event.text());
        }
    }

    fn flush_pending(&mut self) {
        for pending in self.correlator.flush() {
            self.printer.tool_use(&pending.params);
        }
    }
}

fn estimate_tokens(text: &str) -> u64 {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::mock_executor::{MockExecutor, MockRun};
    use crate::output::{ChannelPrinter, ProgressUpdate};
    use tokio::sync::mpsc::UnboundedReceiver;

    const INIT: &str = r#"{"type":"system","subtype":"init","session_id":"s1","model":"m"}"#;
    const RESULT: &str = r#"{"type":"result","subtype":"success","is_error":false,"result":"ok"}"#;

    fn runner(runs: Vec<MockRun>) -> (Runner, Arc<MockExecutor>, UnboundedReceiver<ProgressUpdate>) {
        let executor = Arc::new(MockExecutor::new(runs));
        let (printer, rx) = ChannelPrinter::channel();
        let runner = Runner::new(
            executor.clone(),
            Box::new(printer),
            Arc::new(Config::default()),
            CancellationToken::new(),
        );
        (runner, executor, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ProgressUpdate>) -> Vec<ProgressUpdate> {
        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        updates
    }

    fn tool_use_line(id: &str, name: &str) -> String {
        format!(
            r#"{{"type":"assistant","message":{{"content":[{{"type":"tool_use","id":"{id}","name":"{name}","input":{{"command":"ls"}}}}]}}}}"#
        )
    }

    fn tool_result_line(id: &str, stderr: &str) -> String {
        format!(
            r#"{{"type":"user","message":{{"content":[{{"type":"tool_result","tool_use_id":"{id}","content":""}}]}},"tool_use_result":{{"stdout":"out","stderr":"{stderr}"}}}}"#
        )
    }

    #[tokio::test]
    async fn test_tool_use_is_printed_with_its_result() {
        let (mut runner, _, mut rx) = runner(vec![MockRun::success(vec![
            INIT.to_string(),
            tool_use_line("t1", "Bash"),
            tool_result_line("t1", ""),
            RESULT.to_string(),
        ])]);

        let outcome = runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        assert_eq!(outcome.exit_code, 0);

        let updates = drain(&mut rx);
        assert!(matches!(updates[0], ProgressUpdate::SessionStart));
        assert!(matches!(&updates[1], ProgressUpdate::ToolUse(tool) if tool.id == "t1"));
        assert!(matches!(&updates[2], ProgressUpdate::ToolResult(result) if result.stdout == "out"));
        assert!(matches!(updates[3], ProgressUpdate::SessionEnd(Some(_))));
        assert!(matches!(&updates[4], ProgressUpdate::ExecutionEnd(outcome) if outcome.exit_code == 0));
    }

    #[tokio::test]
    async fn test_text_flushes_pending_tools_first() {
        let (mut runner, _, mut rx) = runner(vec![MockRun::success(vec![
            tool_use_line("t1", "Bash"),
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"thinking"}]}}"#
                .to_string(),
        ])]);

        runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        let updates = drain(&mut rx);
        assert!(matches!(&updates[0], ProgressUpdate::ToolUse(tool) if tool.id == "t1"));
        assert!(matches!(&updates[1], ProgressUpdate::Text(text) if text == "thinking"));
    }

    #[tokio::test]
    async fn test_id_only_policy_prints_unmatched_result_alone() {
        let (runner, _, mut rx) = runner(vec![MockRun::success(vec![
            tool_use_line("t1", "Bash"),
            tool_result_line("other", ""),
            RESULT.to_string(),
        ])]);
        let mut runner = runner.with_match_policy(MatchPolicy::IdOnly);

        runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        let updates = drain(&mut rx);
        assert!(matches!(&updates[0], ProgressUpdate::ToolResult(result) if result.tool_use_id == "other"));
        // The unmatched invocation is still shown once the session ends.
        assert!(matches!(&updates[1], ProgressUpdate::ToolUse(tool) if tool.id == "t1"));
        assert!(matches!(updates[2], ProgressUpdate::SessionEnd(Some(_))));
    }

    #[tokio::test]
    async fn test_start_failure_reports_error_and_exit_one() {
        let (mut runner, _, mut rx) = runner(vec![MockRun::start_failure("binary not found")]);
        let outcome = runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        assert_eq!(outcome.exit_code, EXIT_FAILURE);
        assert!(outcome.error.unwrap().contains("could not be started"));
        let updates = drain(&mut rx);
        assert!(matches!(&updates[0], ProgressUpdate::Error(message) if message.contains("binary not found")));
    }

    #[tokio::test]
    async fn test_estimates_output_tokens_when_unreported() {
        let (mut runner, _, _rx) = runner(vec![MockRun::success(vec![
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"abcdefghij"}]}}"#
                .to_string(),
        ])]);
        let outcome = runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        assert_eq!(outcome.usage.output_tokens, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_in_tool_stderr_pauses_for_backoff() {
        let (mut runner, _, mut rx) = runner(vec![MockRun::success(vec![
            tool_use_line("t1", "Bash"),
            tool_result_line("t1", "Error: 429 Too Many Requests"),
            RESULT.to_string(),
        ])]);

        let started = tokio::time::Instant::now();
        let outcome = runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        assert!(started.elapsed() >= crate::api::rate_limit::DEFAULT_BACKOFF);
        assert!(outcome.rate_limited());
        assert!(outcome.backed_off);

        let updates = drain(&mut rx);
        assert!(updates.iter().any(|update| matches!(
            update,
            ProgressUpdate::RateLimit { wait, .. } if *wait == crate::api::rate_limit::DEFAULT_BACKOFF
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_returns_130_and_flushes() {
        let (mut runner, _, mut rx) = runner(vec![MockRun::success(vec![
            tool_use_line("t1", "Bash"),
            tool_result_line("t1", "rate limit exceeded"),
            tool_use_line("t2", "Read"),
            RESULT.to_string(),
        ])]);
        let cancel = runner.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let outcome = runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        assert_eq!(outcome.exit_code, EXIT_CANCELLED);
        assert!(outcome.cancelled);

        let updates = drain(&mut rx);
        assert!(updates
            .iter()
            .any(|update| matches!(update, ProgressUpdate::SessionEnd(None))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prints_events_already_buffered() {
        let (mut runner, _, mut rx) = runner(vec![MockRun::success(vec![
            tool_use_line("t1", "Bash"),
            tool_result_line("t1", "rate limit exceeded"),
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"still here"}]}}"#
                .to_string(),
            tool_use_line("t2", "Read"),
        ])]);
        let cancel = runner.cancel_token().clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            cancel.cancel();
        });

        let outcome = runner.run_prompt(ExecutionRequest::new("hi", None)).await;
        assert!(outcome.cancelled);
        assert!(!outcome.backed_off);

        let updates = drain(&mut rx);
        let text = updates
            .iter()
            .position(|update| matches!(update, ProgressUpdate::Text(text) if text == "still here"))
            .expect("buffered text printed");
        let pending = updates
            .iter()
            .position(|update| matches!(update, ProgressUpdate::ToolUse(tool) if tool.id == "t2"))
            .expect("buffered tool use flushed");
        let end = updates
            .iter()
            .position(|update| matches!(update, ProgressUpdate::SessionEnd(None)))
            .expect("session end");
        assert!(text < pending && pending < end);
    }

    #[tokio::test]
    async fn test_full_cycle_stops_at_first_failure() {
        let (mut runner, executor, mut rx) = runner(vec![
            MockRun::success(vec![RESULT.to_string()]),
            MockRun::exit(vec![], 3),
            MockRun::success(vec![]),
        ]);

        let report = runner.run_full_cycle("1-2-login").await;
        assert_eq!(report.exit_code, 3);
        assert_eq!(report.steps.len(), 2);
        assert_eq!(report.failed_step().map(|step| step.name.as_str()), Some("dev-story"));
        assert_eq!(executor.remaining_runs(), 1);
        assert_eq!(executor.requests()[0].prompt, "/create-story 1-2-login");

        let updates = drain(&mut rx);
        assert!(matches!(updates.last(), Some(ProgressUpdate::CycleSummary(report)) if report.steps.len() == 2));
    }

    #[tokio::test]
    async fn test_unknown_workflow_fails_without_executing() {
        let (mut runner, executor, _rx) = runner(vec![]);
        let outcome = runner.run_workflow("deploy", "1-1").await;
        assert_eq!(outcome.exit_code, EXIT_FAILURE);
        assert!(executor.requests().is_empty());
    }
}
