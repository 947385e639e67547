use super::executor::{ExecutionOutcome, ExecutionRequest, Executor};
use super::normalizer::LineParser;
use super::rate_limit::{check_line, RateLimitInfo};
use crate::config::Config;
use crate::types::Event;
use anyhow::{Context, Result};
use futures::future::BoxFuture;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Drives the assistant CLI in non-interactive `stream-json` mode.
#[derive(Debug, Clone)]
pub struct ClaudeCli {
    binary: String,
    extra_args: Vec<String>,
    working_dir: PathBuf,
}

impl ClaudeCli {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.claude_binary.clone(),
            extra_args: config.claude_args.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    fn command(&self, request: &ExecutionRequest) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .arg("--print")
            .arg(&request.prompt)
            .args(["--output-format", "stream-json", "--verbose"])
            .args(&self.extra_args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(model) = request.model.as_deref().filter(|model| !model.is_empty()) {
            command.args(["--model", model]);
        }
        command
    }

    async fn run(
        &self,
        request: ExecutionRequest,
        events: mpsc::Sender<Event>,
    ) -> Result<ExecutionOutcome> {
        let mut child = self
            .command(&request)
            .spawn()
            .with_context(|| format!("failed to start assistant CLI '{}'", self.binary))?;
        tracing::debug!(binary = %self.binary, pid = ?child.id(), "assistant started");

        let mut stdout = child
            .stdout
            .take()
            .context("assistant stdout was not captured")?;
        let stderr = child
            .stderr
            .take()
            .context("assistant stderr was not captured")?;
        let stderr_task = tokio::spawn(scan_stderr(stderr));

        let mut parser = LineParser::new();
        let mut chunk = vec![0u8; READ_CHUNK_BYTES];
        'read: loop {
            let read = stdout
                .read(&mut chunk)
                .await
                .context("failed to read assistant output")?;
            if read == 0 {
                break;
            }
            for event in parser.process(&chunk[..read]) {
                if events.send(event).await.is_err() {
                    break 'read;
                }
            }
        }
        if let Some(event) = parser.finish() {
            let _ = events.send(event).await;
        }
        drop(events);

        let status = child
            .wait()
            .await
            .context("failed to wait for assistant exit")?;
        let rate_limit = stderr_task.await.unwrap_or_default();

        Ok(ExecutionOutcome {
            exit_code: status.code().unwrap_or(1),
            rate_limit,
        })
    }
}

impl Executor for ClaudeCli {
    fn execute(
        &self,
        request: ExecutionRequest,
        events: mpsc::Sender<Event>,
    ) -> BoxFuture<'_, Result<ExecutionOutcome>> {
        Box::pin(self.run(request, events))
    }
}

async fn scan_stderr<R: AsyncRead + Unpin>(stderr: R) -> Option<RateLimitInfo> {
    let mut lines = BufReader::new(stderr).lines();
    let mut detected = None;
    while let Ok(Some(line)) = lines.next_line().await {
        let info = check_line(&line);
        if info.is_rate_limit {
            tracing::warn!(line = %line, "assistant reported a rate limit");
            detected = Some(info);
        } else if !line.trim().is_empty() {
            tracing::debug!(line = %line, "assistant stderr");
        }
    }
    detected
}
