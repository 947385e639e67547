use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A story's status as reported by the status source. Compared verbatim.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoryStatus(String);

impl StoryStatus {
    pub fn new(status: impl Into<String>) -> Self {
        Self(status.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoryStatus {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteTarget {
    Workflow(String),
    Complete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Continue(String),
    Complete,
    Unroutable,
}

impl Route {
    pub fn workflow(&self) -> Option<&str> {
        match self {
            Self::Continue(workflow) => Some(workflow.as_str()),
            Self::Complete | Self::Unroutable => None,
        }
    }
}

/// Fixed status → next-workflow table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Router {
    table: BTreeMap<StoryStatus, RouteTarget>,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(default_table())
    }
}

impl Router {
    pub fn new(table: BTreeMap<StoryStatus, RouteTarget>) -> Self {
        Self { table }
    }

    /// Statuses missing from the table are `Unroutable`; there is no default
    /// workflow.
    pub fn route(&self, status: &StoryStatus) -> Route {
        match self.table.get(status) {
            Some(RouteTarget::Workflow(workflow)) => Route::Continue(workflow.clone()),
            Some(RouteTarget::Complete) => Route::Complete,
            None => Route::Unroutable,
        }
    }

    pub fn workflows(&self) -> impl Iterator<Item = &str> {
        self.table.values().filter_map(|target| match target {
            RouteTarget::Workflow(workflow) => Some(workflow.as_str()),
            RouteTarget::Complete => None,
        })
    }
}

pub fn default_table() -> BTreeMap<StoryStatus, RouteTarget> {
    let workflow = |name: &str| RouteTarget::Workflow(name.to_string());
    BTreeMap::from([
        (StoryStatus::from("backlog"), workflow("create-story")),
        (StoryStatus::from("ready-for-dev"), workflow("dev-story")),
        (StoryStatus::from("in-progress"), workflow("dev-story")),
        (StoryStatus::from("review"), workflow("code-review")),
        (StoryStatus::from("done"), RouteTarget::Complete),
        (StoryStatus::from("deferred"), RouteTarget::Complete),
        (StoryStatus::from("optional"), RouteTarget::Complete),
    ])
}
