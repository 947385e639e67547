pub mod correlator;
pub mod router;

pub use correlator::{MatchPolicy, PendingTool, ToolCorrelator};
pub use router::{Route, RouteTarget, Router, StoryStatus};
