use crate::state::StoryStatus;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Where the orchestrator learns a story's current status.
pub trait StatusSource: Send + Sync {
    fn status(&self, story_key: &str) -> Result<StoryStatus>;
}

#[derive(Debug, Deserialize)]
struct SprintStatus {
    #[serde(default)]
    development_status: BTreeMap<String, serde_yaml::Value>,
}

/// Sprint status document on disk. Re-read on every lookup so edits made by a
/// workflow are visible to the next routing decision.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<SprintStatus> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read status file {}", self.path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("invalid status file {}", self.path.display()))
    }
}

impl StatusSource for StatusFile {
    fn status(&self, story_key: &str) -> Result<StoryStatus> {
        let document = self.load()?;
        let Some(value) = document.development_status.get(story_key) else {
            bail!(
                "story '{story_key}' is not listed in {}",
                self.path.display()
            );
        };
        match value.as_str().map(str::trim) {
            Some(status) if !status.is_empty() => Ok(StoryStatus::new(status)),
            _ => bail!("story '{story_key}' has no status value"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = "\
project: demo
development_status:
  epic-1: in-progress
  1-1-login: done
  1-2-signup: ready-for-dev
  1-3-reset: ~
";

    fn status_file() -> (tempfile::TempDir, StatusFile) {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("sprint-status.yaml");
        std::fs::write(&path, DOCUMENT).expect("write status");
        (dir, StatusFile::new(path))
    }

    #[test]
    fn test_reads_story_status() {
        let (_dir, file) = status_file();
        assert_eq!(file.status("1-2-signup").unwrap().as_str(), "ready-for-dev");
        assert_eq!(file.status("1-1-login").unwrap().as_str(), "done");
    }

    #[test]
    fn test_missing_story_and_empty_value_are_errors() {
        let (_dir, file) = status_file();
        let missing = file.status("9-9-nope").expect_err("missing story");
        assert!(missing.to_string().contains("9-9-nope"));
        assert!(file.status("1-3-reset").is_err());
    }

    #[test]
    fn test_rereads_file_after_change() {
        let (_dir, file) = status_file();
        assert_eq!(file.status("1-2-signup").unwrap().as_str(), "ready-for-dev");
        std::fs::write(
            file.path(),
            DOCUMENT.replace("1-2-signup: ready-for-dev", "1-2-signup: review"),
        )
        .unwrap();
        assert_eq!(file.status("1-2-signup").unwrap().as_str(), "review");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let file = StatusFile::new("/nonexistent/sprint-status.yaml");
        let error = file.status("1-1").expect_err("no file");
        assert!(format!("{error:#}").contains("failed to read status file"));
    }
}
