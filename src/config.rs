use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::api::ExecutionRequest;
use crate::error::OrchestrationError;
use crate::state::Router;

pub const STORY_KEY_PLACEHOLDER: &str = "{story_key}";
const DEFAULT_CLAUDE_ARGS: &str = "--dangerously-skip-permissions";
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_MAX_LIFECYCLE_STEPS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowConfig {
    pub prompt_template: String,
    #[serde(default)]
    pub model: Option<String>,
}

impl WorkflowConfig {
    pub fn new(prompt_template: impl Into<String>) -> Self {
        Self {
            prompt_template: prompt_template.into(),
            model: None,
        }
    }

    pub fn render(&self, story_key: &str) -> String {
        self.prompt_template
            .replace(STORY_KEY_PLACEHOLDER, story_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub claude_binary: String,
    pub claude_args: Vec<String>,
    pub model: Option<String>,
    pub working_dir: PathBuf,
    pub status_file: PathBuf,
    pub workflows: BTreeMap<String, WorkflowConfig>,
    pub full_cycle_steps: Vec<String>,
    pub max_retries: u32,
    pub max_lifecycle_steps: usize,
}

/// Optional JSON overlay named by `STORYPILOT_CONFIG`.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    workflows: BTreeMap<String, WorkflowConfig>,
    #[serde(default)]
    full_cycle_steps: Option<Vec<String>>,
    #[serde(default)]
    claude_args: Option<Vec<String>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            claude_binary: "claude".to_string(),
            claude_args: split_args(DEFAULT_CLAUDE_ARGS),
            model: None,
            working_dir: PathBuf::from("."),
            status_file: PathBuf::from("sprint-status.yaml"),
            workflows: default_workflows(),
            full_cycle_steps: ["create-story", "dev-story", "code-review", "git-commit"]
                .iter()
                .map(|step| step.to_string())
                .collect(),
            max_retries: DEFAULT_MAX_RETRIES,
            max_lifecycle_steps: DEFAULT_MAX_LIFECYCLE_STEPS,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self {
            working_dir: std::env::current_dir()?,
            ..Self::default()
        };

        if let Some(binary) = non_empty_env("STORYPILOT_CLAUDE_BIN") {
            config.claude_binary = binary;
        }
        if let Ok(args) = std::env::var("STORYPILOT_CLAUDE_ARGS") {
            config.claude_args = split_args(&args);
        }
        config.model = non_empty_env("STORYPILOT_MODEL");
        if let Some(path) = non_empty_env("STORYPILOT_STATUS_FILE") {
            config.status_file = PathBuf::from(path);
        }
        if let Some(value) = non_empty_env("STORYPILOT_MAX_RETRIES") {
            let parsed: u32 = value
                .trim()
                .parse()
                .with_context(|| format!("STORYPILOT_MAX_RETRIES must be a number, got '{value}'"))?;
            config.max_retries = parsed.clamp(1, 10);
        }
        if let Some(value) = non_empty_env("STORYPILOT_MAX_LIFECYCLE_STEPS") {
            config.max_lifecycle_steps = value.trim().parse().with_context(|| {
                format!("STORYPILOT_MAX_LIFECYCLE_STEPS must be a number, got '{value}'")
            })?;
        }
        if let Some(path) = non_empty_env("STORYPILOT_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }

        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        self.workflows.extend(file.workflows);
        if let Some(steps) = file.full_cycle_steps {
            self.full_cycle_steps = steps;
        }
        if let Some(args) = file.claude_args {
            self.claude_args = args;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.claude_binary.trim().is_empty() {
            bail!("STORYPILOT_CLAUDE_BIN must not be empty");
        }

        for (name, workflow) in &self.workflows {
            if !workflow.prompt_template.contains(STORY_KEY_PLACEHOLDER) {
                bail!(
                    "Prompt template for workflow '{}' must contain {}",
                    name,
                    STORY_KEY_PLACEHOLDER
                );
            }
        }

        if self.full_cycle_steps.is_empty() {
            bail!("full_cycle_steps must name at least one workflow");
        }
        if let Some(step) = self
            .full_cycle_steps
            .iter()
            .find(|step| !self.workflows.contains_key(*step))
        {
            bail!("full cycle step '{step}' has no workflow template");
        }

        if self.max_retries == 0 {
            bail!("max_retries must be at least 1");
        }
        if self.max_lifecycle_steps == 0 {
            bail!("max_lifecycle_steps must be at least 1");
        }

        Ok(())
    }

    /// Every workflow the router can select must have a template.
    pub fn validate_router(&self, router: &Router) -> Result<()> {
        if let Some(missing) = router
            .workflows()
            .find(|workflow| !self.workflows.contains_key(*workflow))
        {
            bail!("routing table names workflow '{missing}' which has no template");
        }
        Ok(())
    }

    pub fn request_for(
        &self,
        workflow: &str,
        story_key: &str,
    ) -> Result<ExecutionRequest, OrchestrationError> {
        let template = self
            .workflows
            .get(workflow)
            .ok_or_else(|| OrchestrationError::UnknownWorkflow(workflow.to_string()))?;
        let model = template.model.clone().or_else(|| self.model.clone());
        Ok(ExecutionRequest::new(template.render(story_key), model))
    }
}

pub fn default_workflows() -> BTreeMap<String, WorkflowConfig> {
    [
        ("create-story", "/create-story {story_key}"),
        ("dev-story", "/dev-story {story_key}"),
        ("code-review", "/code-review {story_key}"),
        (
            "git-commit",
            "Commit all changes for story {story_key} with a descriptive commit message. Do not push.",
        ),
    ]
    .into_iter()
    .map(|(name, template)| (name.to_string(), WorkflowConfig::new(template)))
    .collect()
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(ToOwned::to_owned).collect()
}
