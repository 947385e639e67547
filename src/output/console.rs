use super::Printer;
use crate::api::RateLimitInfo;
use crate::runtime::{CycleReport, QueueReport, RunOutcome, StepResult, StoryResult};
use crate::types::{SessionSummary, ToolInput, ToolResult, ToolUse};
use crate::util::{format_duration, parse_bool_flag, truncate_to_display_width};
use crossterm::style::{Color, Stylize};
use std::io::{self, IsTerminal, Write};
use std::time::Duration;

const DEFAULT_WIDTH: usize = 100;
const DEFAULT_MAX_OUTPUT_LINES: usize = 6;

/// Colors and layout limits for console output. Built once and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Theme {
    pub colors: bool,
    pub width: usize,
    pub max_output_lines: usize,
    pub accent: Color,
    pub success: Color,
    pub failure: Color,
    pub warning: Color,
    pub muted: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            colors: true,
            width: DEFAULT_WIDTH,
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            accent: Color::Cyan,
            success: Color::Green,
            failure: Color::Red,
            warning: Color::Yellow,
            muted: Color::DarkGrey,
        }
    }
}

impl Theme {
    /// Pick colors and width from the environment and the attached terminal.
    pub fn detect() -> Self {
        let width = if io::stdout().is_terminal() {
            crossterm::terminal::size()
                .map(|(cols, _)| usize::from(cols))
                .unwrap_or(DEFAULT_WIDTH)
        } else {
            DEFAULT_WIDTH
        };
        Self {
            colors: detect_color_support(),
            width: width.max(20),
            ..Self::default()
        }
    }

    pub fn plain() -> Self {
        Self {
            colors: false,
            ..Self::default()
        }
    }
}

fn detect_color_support() -> bool {
    if std::env::var("STORYPILOT_FORCE_COLOR")
        .ok()
        .and_then(parse_bool_flag)
        .unwrap_or(false)
    {
        return true;
    }

    if std::env::var_os("NO_COLOR").is_some() {
        return false;
    }

    io::stdout().is_terminal()
}

pub struct ConsolePrinter {
    out: Box<dyn Write + Send>,
    theme: Theme,
}

impl ConsolePrinter {
    pub fn new(theme: Theme) -> Self {
        Self::with_writer(theme, Box::new(io::stdout()))
    }

    pub fn with_writer(theme: Theme, out: Box<dyn Write + Send>) -> Self {
        Self { out, theme }
    }

    pub fn theme(&self) -> &Theme {
        &self.theme
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.theme.colors {
            text.with(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        if self.theme.colors {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    fn line(&mut self, text: &str) {
        // Output is best-effort; a closed stdout must not abort the run.
        let _ = writeln!(self.out, "{text}");
        let _ = self.out.flush();
    }

    fn fit(&self, text: &str, indent: usize) -> String {
        let first_line = text.lines().next().unwrap_or_default();
        truncate_to_display_width(first_line, self.theme.width.saturating_sub(indent))
    }

    fn tool_detail(&self, tool: &ToolUse) -> Vec<String> {
        match &tool.input {
            ToolInput::Bash(input) if !input.description.is_empty() => {
                vec![input.command.clone(), format!("# {}", input.description)]
            }
            ToolInput::Edit(input) => {
                let mut lines = vec![input.file_path.clone()];
                if let Some(old) = input.old_string.lines().next() {
                    lines.push(format!("- {old}"));
                }
                if let Some(new) = input.new_string.lines().next() {
                    lines.push(format!("+ {new}"));
                }
                lines
            }
            ToolInput::Write(input) => vec![format!(
                "{} ({} lines)",
                input.file_path,
                input.content.lines().count()
            )],
            ToolInput::Grep(input) => {
                let scope = input
                    .path
                    .as_deref()
                    .or(input.glob.as_deref())
                    .map(|scope| format!(" in {scope}"))
                    .unwrap_or_default();
                vec![format!("{}{scope}", input.pattern)]
            }
            ToolInput::Task(input) if !input.subagent_type.is_empty() => {
                vec![format!("{} [{}]", input.description, input.subagent_type)]
            }
            ToolInput::Skill(input) => match input.args.as_deref() {
                Some(args) if !args.is_empty() => vec![format!("{} {args}", input.skill)],
                _ => vec![input.skill.clone()],
            },
            ToolInput::TodoWrite(input) => input
                .todos
                .iter()
                .map(|todo| {
                    let mark = match todo.status.as_str() {
                        "completed" => "[x]",
                        "in_progress" => "[~]",
                        _ => "[ ]",
                    };
                    format!("{mark} {}", todo.content)
                })
                .collect(),
            ToolInput::AskUserQuestion(input) => input
                .questions
                .iter()
                .map(|question| {
                    let options: Vec<&str> = question
                        .options
                        .iter()
                        .map(|option| option.label.as_str())
                        .collect();
                    if options.is_empty() {
                        question.question.clone()
                    } else {
                        format!("{} ({})", question.question, options.join(" / "))
                    }
                })
                .collect(),
            ToolInput::Other => vec![tool.raw_input.to_string()],
            input => input
                .primary_argument()
                .map(|argument| vec![argument.to_string()])
                .unwrap_or_default(),
        }
    }
}

impl Printer for ConsolePrinter {
    fn session_start(&mut self) {
        let text = self.paint("▶ session started", self.theme.muted);
        self.line(&text);
    }

    fn session_end(&mut self, summary: Option<&SessionSummary>) {
        let mut text = String::from("■ session complete");
        if let Some(summary) = summary {
            if let Some(turns) = summary.num_turns {
                text.push_str(&format!(", {turns} turns"));
            }
            if let Some(cost) = summary.total_cost_usd {
                text.push_str(&format!(", ${cost:.4}"));
            }
            if summary.is_error {
                text.push_str(" (error)");
            }
        }
        let color = if summary.is_some_and(|summary| summary.is_error) {
            self.theme.failure
        } else {
            self.theme.muted
        };
        let text = self.paint(&text, color);
        self.line(&text);
    }

    fn text(&mut self, text: &str) {
        let text = text.trim_end().to_string();
        self.line(&text);
    }

    fn tool_use(&mut self, tool: &ToolUse) {
        let details = self.tool_detail(tool);
        let name = self.bold(&self.paint(&format!("● {}", tool.name), self.theme.accent));
        match details.split_first() {
            Some((first, rest)) => {
                let first = self.fit(first, tool.name.len() + 3);
                self.line(&format!("{name} {first}"));
                for detail in rest {
                    let detail = self.paint(&self.fit(detail, 4), self.theme.muted);
                    self.line(&format!("    {detail}"));
                }
            }
            None => self.line(&name),
        }
    }

    fn tool_result(&mut self, result: &ToolResult) {
        if result.stdout.trim().is_empty() && result.stderr.trim().is_empty() {
            let text = self.paint("  ⎿ (no output)", self.theme.muted);
            self.line(&text);
            return;
        }

        let max_lines = self.theme.max_output_lines.max(1);
        for (body, color) in [
            (&result.stdout, self.theme.muted),
            (&result.stderr, self.theme.failure),
        ] {
            let lines: Vec<&str> = body.lines().filter(|line| !line.trim().is_empty()).collect();
            for line in lines.iter().take(max_lines) {
                let text = self.paint(&format!("  ⎿ {}", self.fit(line, 4)), color);
                self.line(&text);
            }
            if lines.len() > max_lines {
                let more = self.paint(
                    &format!("    … {} more lines", lines.len() - max_lines),
                    self.theme.muted,
                );
                self.line(&more);
            }
        }
    }

    fn execution_end(&mut self, outcome: &RunOutcome) {
        let mut text = format!(
            "exit {} in {}",
            outcome.exit_code,
            format_duration(outcome.duration)
        );
        if !outcome.usage.is_empty() {
            text.push_str(&format!(
                " ({} in / {} out tokens)",
                outcome.usage.input_tokens, outcome.usage.output_tokens
            ));
        }
        let color = if outcome.success() {
            self.theme.muted
        } else {
            self.theme.failure
        };
        let text = self.paint(&text, color);
        self.line(&text);
    }

    fn rate_limit(&mut self, wait: Duration, info: &RateLimitInfo) {
        let mut text = format!("⏸ rate limited; waiting {}", format_duration(wait));
        if let Some(reset) = info.reset_time {
            text.push_str(&format!(" (resets {})", reset.format("%H:%M:%S UTC")));
        }
        let text = self.paint(&text, self.theme.warning);
        self.line(&text);
    }

    fn error(&mut self, message: &str) {
        let text = self.paint(&format!("✗ {message}"), self.theme.failure);
        self.line(&text);
    }

    fn step_start(&mut self, index: usize, total: usize, name: &str) {
        let text = self.bold(&self.paint(&format!("[{index}/{total}] {name}"), self.theme.accent));
        self.line(&text);
    }

    fn step_end(&mut self, result: &StepResult) {
        let (mark, color) = if result.success {
            ("✓", self.theme.success)
        } else {
            ("✗", self.theme.failure)
        };
        let text = self.paint(
            &format!("{mark} {} ({})", result.name, format_duration(result.duration)),
            color,
        );
        self.line(&text);
    }

    fn cycle_summary(&mut self, report: &CycleReport) {
        let header = self.bold(&format!("Cycle summary for {}", report.story_key));
        self.line(&header);
        for step in &report.steps {
            let status = if step.success {
                self.paint("ok", self.theme.success)
            } else {
                self.paint(&format!("exit {}", step.exit_code), self.theme.failure)
            };
            self.line(&format!(
                "  {:<16} {:>10}  {status}",
                step.name,
                format_duration(step.duration)
            ));
        }
        let total = self.paint(
            &format!("  total {}", format_duration(report.duration)),
            self.theme.muted,
        );
        self.line(&total);
    }

    fn story_start(&mut self, index: usize, total: usize, key: &str, workflow: Option<&str>) {
        let mut text = format!("═ story {index}/{total}: {key}");
        if let Some(workflow) = workflow {
            text.push_str(&format!(" → {workflow}"));
        }
        let text = self.bold(&self.paint(&text, self.theme.accent));
        self.line(&text);
    }

    fn story_end(&mut self, result: &StoryResult) {
        let text = if result.skipped {
            let status = result
                .status
                .as_ref()
                .map(|status| status.as_str())
                .unwrap_or("complete");
            self.paint(&format!("↷ {} already {status}", result.key), self.theme.muted)
        } else if result.success {
            self.paint(
                &format!("✓ {} ({})", result.key, format_duration(result.duration)),
                self.theme.success,
            )
        } else {
            let stage = result
                .failed_at
                .as_ref()
                .map(|stage| stage.tag())
                .unwrap_or("unknown");
            self.paint(
                &format!(
                    "✗ {} failed at {stage} (exit {})",
                    result.key, result.exit_code
                ),
                self.theme.failure,
            )
        };
        self.line(&text);
    }

    fn retry(&mut self, attempt: u32, max_attempts: u32, wait: Duration) {
        let text = self.paint(
            &format!(
                "↻ attempt {attempt}/{max_attempts} in {}",
                format_duration(wait)
            ),
            self.theme.warning,
        );
        self.line(&text);
    }

    fn queue_summary(&mut self, report: &QueueReport) {
        let summary = &report.summary;
        let header = self.bold("Queue summary");
        self.line(&header);
        for result in &report.results {
            let status = if result.skipped {
                self.paint("skipped", self.theme.muted)
            } else if result.success {
                self.paint("ok", self.theme.success)
            } else {
                let stage = result
                    .failed_at
                    .as_ref()
                    .map(|stage| stage.tag())
                    .unwrap_or("unknown");
                self.paint(&format!("failed at {stage}"), self.theme.failure)
            };
            self.line(&format!(
                "  {:<24} {:>10}  {status}",
                result.key,
                format_duration(result.duration)
            ));
        }
        let mut totals = format!(
            "  {} succeeded, {} skipped, {} failed",
            summary.succeeded, summary.skipped, summary.failed
        );
        if summary.not_attempted > 0 {
            totals.push_str(&format!(", {} not attempted", summary.not_attempted));
        }
        totals.push_str(&format!(" in {}", format_duration(summary.duration)));
        self.line(&totals);
    }
}
