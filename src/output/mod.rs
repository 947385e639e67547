pub mod channel;
pub mod console;

pub use channel::{spawn_observer, ChannelPrinter};
pub use console::{ConsolePrinter, Theme};

use crate::api::RateLimitInfo;
use crate::runtime::{CycleReport, QueueReport, RunOutcome, StepResult, StoryResult};
use crate::types::{SessionSummary, ToolResult, ToolUse};
use std::time::Duration;

/// Presentation sink for everything the runner and queue report.
///
/// Implementations must not fail the run: write errors are swallowed.
pub trait Printer: Send {
    fn session_start(&mut self);
    fn session_end(&mut self, summary: Option<&SessionSummary>);
    fn text(&mut self, text: &str);
    fn tool_use(&mut self, tool: &ToolUse);
    fn tool_result(&mut self, result: &ToolResult);
    fn execution_end(&mut self, outcome: &RunOutcome);
    fn rate_limit(&mut self, wait: Duration, info: &RateLimitInfo);
    fn error(&mut self, message: &str);

    fn step_start(&mut self, _index: usize, _total: usize, _name: &str) {}
    fn step_end(&mut self, _result: &StepResult) {}
    fn cycle_summary(&mut self, _report: &CycleReport) {}

    fn story_start(&mut self, _index: usize, _total: usize, _key: &str, _workflow: Option<&str>) {}
    fn story_end(&mut self, _result: &StoryResult) {}
    fn retry(&mut self, _attempt: u32, _max_attempts: u32, _wait: Duration) {}
    fn queue_summary(&mut self, _report: &QueueReport) {}
}

/// Owned copy of one `Printer` call, for handing output to another task.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressUpdate {
    SessionStart,
    SessionEnd(Option<SessionSummary>),
    Text(String),
    ToolUse(ToolUse),
    ToolResult(ToolResult),
    ExecutionEnd(RunOutcome),
    RateLimit { wait: Duration, info: RateLimitInfo },
    Error(String),
    StepStart { index: usize, total: usize, name: String },
    StepEnd(StepResult),
    CycleSummary(CycleReport),
    StoryStart {
        index: usize,
        total: usize,
        key: String,
        workflow: Option<String>,
    },
    StoryEnd(StoryResult),
    Retry {
        attempt: u32,
        max_attempts: u32,
        wait: Duration,
    },
    QueueSummary(QueueReport),
}

impl ProgressUpdate {
    /// Replay this update against a concrete printer.
    pub fn apply(self, printer: &mut dyn Printer) {
        match self {
            Self::SessionStart => printer.session_start(),
            Self::SessionEnd(summary) => printer.session_end(summary.as_ref()),
            Self::Text(text) => printer.text(&text),
            Self::ToolUse(tool) => printer.tool_use(&tool),
            Self::ToolResult(result) => printer.tool_result(&result),
            Self::ExecutionEnd(outcome) => printer.execution_end(&outcome),
            Self::RateLimit { wait, info } => printer.rate_limit(wait, &info),
            Self::Error(message) => printer.error(&message),
            Self::StepStart { index, total, name } => printer.step_start(index, total, &name),
            Self::StepEnd(result) => printer.step_end(&result),
            Self::CycleSummary(report) => printer.cycle_summary(&report),
            Self::StoryStart {
                index,
                total,
                key,
                workflow,
            } => printer.story_start(index, total, &key, workflow.as_deref()),
            Self::StoryEnd(result) => printer.story_end(&result),
            Self::Retry {
                attempt,
                max_attempts,
                wait,
            } => printer.retry(attempt, max_attempts, wait),
            Self::QueueSummary(report) => printer.queue_summary(&report),
        }
    }
}
