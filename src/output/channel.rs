use super::{Printer, ProgressUpdate};
use crate::api::RateLimitInfo;
use crate::runtime::{CycleReport, QueueReport, RunOutcome, StepResult, StoryResult};
use crate::types::{SessionSummary, ToolResult, ToolUse};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Forwards every call as a `ProgressUpdate`. Sends never block, and a
/// closed receiver is ignored so rendering can never stall a run.
#[derive(Clone)]
pub struct ChannelPrinter {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelPrinter {
    pub fn new(tx: mpsc::UnboundedSender<ProgressUpdate>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, update: ProgressUpdate) {
        if self.tx.send(update).is_err() {
            tracing::trace!("progress observer is gone; dropping update");
        }
    }
}

impl Printer for ChannelPrinter {
    fn session_start(&mut self) {
        self.send(ProgressUpdate::SessionStart);
    }

    fn session_end(&mut self, summary: Option<&SessionSummary>) {
        self.send(ProgressUpdate::SessionEnd(summary.cloned()));
    }

    fn text(&mut self, text: &str) {
        self.send(ProgressUpdate::Text(text.to_string()));
    }

    fn tool_use(&mut self, tool: &ToolUse) {
        self.send(ProgressUpdate::ToolUse(tool.clone()));
    }

    fn tool_result(&mut self, result: &ToolResult) {
        self.send(ProgressUpdate::ToolResult(result.clone()));
    }

    fn execution_end(&mut self, outcome: &RunOutcome) {
        self.send(ProgressUpdate::ExecutionEnd(outcome.clone()));
    }

    fn rate_limit(&mut self, wait: Duration, info: &RateLimitInfo) {
        self.send(ProgressUpdate::RateLimit { wait, info: *info });
    }

    fn error(&mut self, message: &str) {
        self.send(ProgressUpdate::Error(message.to_string()));
    }

    fn step_start(&mut self, index: usize, total: usize, name: &str) {
        self.send(ProgressUpdate::StepStart {
            index,
            total,
            name: name.to_string(),
        });
    }

    fn step_end(&mut self, result: &StepResult) {
        self.send(ProgressUpdate::StepEnd(result.clone()));
    }

    fn cycle_summary(&mut self, report: &CycleReport) {
        self.send(ProgressUpdate::CycleSummary(report.clone()));
    }

    fn story_start(&mut self, index: usize, total: usize, key: &str, workflow: Option<&str>) {
        self.send(ProgressUpdate::StoryStart {
            index,
            total,
            key: key.to_string(),
            workflow: workflow.map(ToOwned::to_owned),
        });
    }

    fn story_end(&mut self, result: &StoryResult) {
        self.send(ProgressUpdate::StoryEnd(result.clone()));
    }

    fn retry(&mut self, attempt: u32, max_attempts: u32, wait: Duration) {
        self.send(ProgressUpdate::Retry {
            attempt,
            max_attempts,
            wait,
        });
    }

    fn queue_summary(&mut self, report: &QueueReport) {
        self.send(ProgressUpdate::QueueSummary(report.clone()));
    }
}

/// Drain updates into `printer` until every sender is dropped.
pub fn spawn_observer<P>(mut rx: mpsc::UnboundedReceiver<ProgressUpdate>, mut printer: P) -> JoinHandle<()>
where
    P: Printer + 'static,
{
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            update.apply(&mut printer);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default, Clone)]
    struct Transcript(Arc<Mutex<Vec<String>>>);

    impl Printer for Transcript {
        fn session_start(&mut self) {
            self.0.lock().unwrap().push("start".into());
        }
        fn session_end(&mut self, _summary: Option<&SessionSummary>) {
            self.0.lock().unwrap().push("end".into());
        }
        fn text(&mut self, text: &str) {
            self.0.lock().unwrap().push(format!("text:{text}"));
        }
        fn tool_use(&mut self, tool: &ToolUse) {
            self.0.lock().unwrap().push(format!("tool:{}", tool.name));
        }
        fn tool_result(&mut self, _result: &ToolResult) {}
        fn execution_end(&mut self, _outcome: &RunOutcome) {}
        fn rate_limit(&mut self, _wait: Duration, _info: &RateLimitInfo) {}
        fn error(&mut self, message: &str) {
            self.0.lock().unwrap().push(format!("error:{message}"));
        }
    }

    #[tokio::test]
    async fn test_observer_replays_updates_in_order() {
        let (mut printer, rx) = ChannelPrinter::channel();
        let transcript = Transcript::default();
        let handle = spawn_observer(rx, transcript.clone());

        printer.session_start();
        printer.text("hello");
        printer.tool_use(&ToolUse::new("t1", "Bash", serde_json::json!({"command": "ls"})));
        printer.error("boom");
        printer.session_end(None);
        drop(printer);

        handle.await.unwrap();
        assert_eq!(
            *transcript.0.lock().unwrap(),
            vec!["start", "text:hello", "tool:Bash", "error:boom", "end"]
        );
    }

    #[test]
    fn test_send_after_observer_dropped_is_ignored() {
        let (mut printer, rx) = ChannelPrinter::channel();
        drop(rx);
        printer.text("nobody listening");
    }
}
