pub mod queue;
pub mod results;
pub mod runner;
pub mod status;

pub use queue::{QueueOrchestrator, QueueReport, RetryPolicy};
pub use results::{CycleReport, QueueSummary, StepResult, StoryResult};
pub use runner::{RunOutcome, Runner, EXIT_CANCELLED, EXIT_FAILURE};
pub use status::{StatusFile, StatusSource};
