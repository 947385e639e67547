pub mod event;
pub mod raw;

pub use event::{
    Event, EventKind, SessionSummary, TokenUsage, ToolInput, ToolResult, ToolUse,
};
pub use raw::{RawContentBlock, RawMessage, RawRecord, RawUsage};
