use crate::state::StoryStatus;

/// Failures the runner and queue report upward with enough context to
/// decide whether to continue.
#[derive(Debug, thiserror::Error)]
pub enum OrchestrationError {
    #[error("story {key}: status '{status}' has no route")]
    Routing { key: String, status: StoryStatus },
    #[error("story {key}: failed to read status: {source}")]
    Status {
        key: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("no prompt template for workflow '{0}'")]
    UnknownWorkflow(String),
    #[error("workflow '{workflow}' could not be started: {source}")]
    ExecutionStart {
        workflow: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("story {key}: workflow '{workflow}' left status '{status}' unchanged")]
    Stalled {
        key: String,
        workflow: String,
        status: StoryStatus,
    },
    #[error("story {key}: still not complete after {limit} workflows")]
    StepLimit { key: String, limit: usize },
    #[error("cancelled")]
    Cancelled,
}

/// Which stage a failed story stopped at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureStage {
    Routing,
    Status,
    Workflow(String),
    Stalled(String),
    StepLimit,
    Cancelled,
}

impl FailureStage {
    pub fn tag(&self) -> &str {
        match self {
            Self::Routing => "routing",
            Self::Status => "status",
            Self::Workflow(workflow) => workflow,
            Self::Stalled(_) => "stalled",
            Self::StepLimit => "step-limit",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl OrchestrationError {
    pub fn stage(&self) -> FailureStage {
        match self {
            Self::Routing { .. } => FailureStage::Routing,
            Self::Status { .. } => FailureStage::Status,
            Self::UnknownWorkflow(workflow) | Self::ExecutionStart { workflow, .. } => {
                FailureStage::Workflow(workflow.clone())
            }
            Self::Stalled { workflow, .. } => FailureStage::Stalled(workflow.clone()),
            Self::StepLimit { .. } => FailureStage::StepLimit,
            Self::Cancelled => FailureStage::Cancelled,
        }
    }
}
