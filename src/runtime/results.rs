use crate::error::FailureStage;
use crate::state::StoryStatus;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepResult {
    pub name: String,
    pub duration: Duration,
    pub success: bool,
    pub exit_code: i32,
}

impl StepResult {
    pub fn new(name: impl Into<String>, duration: Duration, exit_code: i32) -> Self {
        Self {
            name: name.into(),
            duration,
            success: exit_code == 0,
            exit_code,
        }
    }
}

/// Outcome of one full-cycle run for a story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub story_key: String,
    pub steps: Vec<StepResult>,
    pub duration: Duration,
    pub exit_code: i32,
}

impl CycleReport {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|step| !step.success)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryResult {
    pub key: String,
    pub status: Option<StoryStatus>,
    pub workflow: Option<String>,
    pub duration: Duration,
    pub success: bool,
    pub exit_code: i32,
    pub skipped: bool,
    pub failed_at: Option<FailureStage>,
    pub attempts: u32,
}

impl StoryResult {
    pub fn skipped(key: impl Into<String>, status: StoryStatus, duration: Duration) -> Self {
        Self {
            key: key.into(),
            status: Some(status),
            workflow: None,
            duration,
            success: true,
            exit_code: 0,
            skipped: true,
            failed_at: None,
            attempts: 0,
        }
    }

    pub fn succeeded(
        key: impl Into<String>,
        status: StoryStatus,
        workflow: impl Into<String>,
        duration: Duration,
        attempts: u32,
    ) -> Self {
        Self {
            key: key.into(),
            status: Some(status),
            workflow: Some(workflow.into()),
            duration,
            success: true,
            exit_code: 0,
            skipped: false,
            failed_at: None,
            attempts,
        }
    }

    pub fn failed(
        key: impl Into<String>,
        status: Option<StoryStatus>,
        duration: Duration,
        exit_code: i32,
        stage: FailureStage,
        attempts: u32,
    ) -> Self {
        let workflow = match &stage {
            FailureStage::Workflow(workflow) | FailureStage::Stalled(workflow) => {
                Some(workflow.clone())
            }
            _ => None,
        };
        Self {
            key: key.into(),
            status,
            workflow,
            duration,
            success: false,
            exit_code: if exit_code == 0 { 1 } else { exit_code },
            skipped: false,
            failed_at: Some(stage),
            attempts,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueSummary {
    pub requested: usize,
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
    pub not_attempted: usize,
    pub duration: Duration,
}

impl QueueSummary {
    pub fn from_results(results: &[StoryResult], requested: usize, duration: Duration) -> Self {
        let skipped = results.iter().filter(|result| result.skipped).count();
        let failed = results.iter().filter(|result| !result.success).count();
        Self {
            requested,
            succeeded: results.len() - skipped - failed,
            skipped,
            failed,
            not_attempted: requested.saturating_sub(results.len()),
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_story_never_reports_exit_zero() {
        let result = StoryResult::failed(
            "1-1",
            None,
            Duration::ZERO,
            0,
            FailureStage::Routing,
            0,
        );
        assert_eq!(result.exit_code, 1);
        assert_eq!(result.workflow, None);
    }

    #[test]
    fn test_summary_counts() {
        let results = vec![
            StoryResult::skipped("1-1", "done".into(), Duration::ZERO),
            StoryResult::succeeded("1-2", "review".into(), "code-review", Duration::ZERO, 1),
            StoryResult::failed(
                "1-3",
                Some("backlog".into()),
                Duration::ZERO,
                2,
                FailureStage::Workflow("create-story".into()),
                1,
            ),
        ];
        let summary = QueueSummary::from_results(&results, 5, Duration::from_secs(3));
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_attempted, 2);
        assert_eq!(results[2].workflow.as_deref(), Some("create-story"));
    }
}
