use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    System,
    Assistant,
    User,
    Result,
    /// A record whose `type` this crate does not know. Carried so callers can
    /// log it; every dispatch predicate is false for it.
    Unknown(String),
}

impl EventKind {
    pub fn from_record_type(record_type: &str) -> Self {
        match record_type {
            "system" => Self::System,
            "assistant" => Self::Assistant,
            "user" => Self::User,
            "result" => Self::Result,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::System => "system",
            Self::Assistant => "assistant",
            Self::User => "user",
            Self::Result => "result",
            Self::Unknown(other) => other,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn is_empty(&self) -> bool {
        self.input_tokens == 0 && self.output_tokens == 0
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Closing summary carried by a `result` record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSummary {
    pub is_error: bool,
    pub result: String,
    pub duration_ms: Option<u64>,
    pub num_turns: Option<u32>,
    pub total_cost_usd: Option<f64>,
}

/// A tool invocation requested by the assistant.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: ToolInput,
    /// The parameter object exactly as the provider sent it, kept even when
    /// `input` is a typed variant.
    pub raw_input: Value,
}

impl ToolUse {
    pub fn new(id: impl Into<String>, name: impl Into<String>, raw_input: Value) -> Self {
        let name = name.into();
        let input = ToolInput::from_parts(&name, &raw_input);
        Self {
            id: id.into(),
            name,
            input,
            raw_input,
        }
    }

    pub fn raw_input_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.raw_input).unwrap_or_else(|_| b"{}".to_vec())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub stdout: String,
    pub stderr: String,
    pub is_error: bool,
}

/// Typed parameters for the tools the assistant ships with.
///
/// `Other` covers tools added after this crate was written and known tools
/// whose parameters no longer match the expected shape; the full payload is
/// still available through `ToolUse::raw_input`.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInput {
    Bash(BashInput),
    Read(ReadInput),
    Write(WriteInput),
    Edit(EditInput),
    Glob(GlobInput),
    Grep(GrepInput),
    WebFetch(WebFetchInput),
    WebSearch(WebSearchInput),
    Task(TaskInput),
    NotebookEdit(NotebookEditInput),
    AskUserQuestion(AskUserQuestionInput),
    Skill(SkillInput),
    TodoWrite(TodoWriteInput),
    Other,
}

impl ToolInput {
    pub fn from_parts(name: &str, input: &Value) -> Self {
        match name {
            "Bash" => parse_input(input, Self::Bash),
            "Read" => parse_input(input, Self::Read),
            "Write" => parse_input(input, Self::Write),
            "Edit" => parse_input(input, Self::Edit),
            "Glob" => parse_input(input, Self::Glob),
            "Grep" => parse_input(input, Self::Grep),
            "WebFetch" => parse_input(input, Self::WebFetch),
            "WebSearch" => parse_input(input, Self::WebSearch),
            "Task" => parse_input(input, Self::Task),
            "NotebookEdit" => parse_input(input, Self::NotebookEdit),
            "AskUserQuestion" => parse_input(input, Self::AskUserQuestion),
            "Skill" => parse_input(input, Self::Skill),
            "TodoWrite" => parse_input(input, Self::TodoWrite),
            _ => Self::Other,
        }
    }

    pub fn is_other(&self) -> bool {
        matches!(self, Self::Other)
    }

    /// The single parameter that best identifies the call, for one-line
    /// previews and log fields.
    pub fn primary_argument(&self) -> Option<&str> {
        let value = match self {
            Self::Bash(input) => input.command.as_str(),
            Self::Read(input) => input.file_path.as_str(),
            Self::Write(input) => input.file_path.as_str(),
            Self::Edit(input) => input.file_path.as_str(),
            Self::Glob(input) => input.pattern.as_str(),
            Self::Grep(input) => input.pattern.as_str(),
            Self::WebFetch(input) => input.url.as_str(),
            Self::WebSearch(input) => input.query.as_str(),
            Self::Task(input) => input.description.as_str(),
            Self::NotebookEdit(input) => input.notebook_path.as_str(),
            Self::AskUserQuestion(input) => input
                .questions
                .first()
                .map(|question| question.question.as_str())
                .unwrap_or_default(),
            Self::Skill(input) => input.skill.as_str(),
            Self::TodoWrite(_) | Self::Other => return None,
        };
        (!value.is_empty()).then_some(value)
    }
}

fn parse_input<T: DeserializeOwned>(input: &Value, wrap: fn(T) -> ToolInput) -> ToolInput {
    serde_json::from_value::<T>(input.clone())
        .map(wrap)
        .unwrap_or(ToolInput::Other)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BashInput {
    pub command: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadInput {
    pub file_path: String,
    #[serde(default)]
    pub offset: Option<u64>,
    #[serde(default)]
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteInput {
    pub file_path: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditInput {
    pub file_path: String,
    #[serde(default)]
    pub old_string: String,
    #[serde(default)]
    pub new_string: String,
    #[serde(default)]
    pub replace_all: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobInput {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrepInput {
    pub pattern: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub glob: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebFetchInput {
    pub url: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSearchInput {
    pub query: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskInput {
    #[serde(default)]
    pub subagent_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotebookEditInput {
    pub notebook_path: String,
    #[serde(default)]
    pub cell_id: Option<String>,
    #[serde(default)]
    pub new_source: String,
    #[serde(default)]
    pub cell_type: Option<String>,
    #[serde(default)]
    pub edit_mode: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AskUserQuestionInput {
    pub questions: Vec<Question>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, rename = "multiSelect")]
    pub multi_select: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillInput {
    #[serde(alias = "command")]
    pub skill: String,
    #[serde(default)]
    pub args: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoWriteInput {
    pub todos: Vec<TodoItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, rename = "activeForm")]
    pub active_form: String,
}

/// One normalized record of assistant output.
///
/// Built only by the normalizer; the kind never changes after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    kind: EventKind,
    pub(crate) subtype: String,
    pub(crate) text: String,
    pub(crate) tool_use: Option<ToolUse>,
    pub(crate) tool_result: Option<ToolResult>,
    pub(crate) usage: TokenUsage,
    pub(crate) session_id: Option<String>,
    pub(crate) model: Option<String>,
    pub(crate) summary: Option<SessionSummary>,
}

impl Event {
    pub(crate) fn new(kind: EventKind) -> Self {
        Self {
            kind,
            subtype: String::new(),
            text: String::new(),
            tool_use: None,
            tool_result: None,
            usage: TokenUsage::default(),
            session_id: None,
            model: None,
            summary: None,
        }
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn subtype(&self) -> &str {
        &self.subtype
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn tool_use(&self) -> Option<&ToolUse> {
        self.tool_use.as_ref()
    }

    pub fn tool_result(&self) -> Option<&ToolResult> {
        self.tool_result.as_ref()
    }

    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn summary(&self) -> Option<&SessionSummary> {
        self.summary.as_ref()
    }

    pub fn session_started(&self) -> bool {
        self.kind == EventKind::System && self.subtype == "init"
    }

    pub fn session_complete(&self) -> bool {
        self.kind == EventKind::Result
    }

    pub fn has_tool_result(&self) -> bool {
        self.tool_result.is_some()
    }

    pub fn is_text(&self) -> bool {
        self.kind == EventKind::Assistant && !self.text.is_empty()
    }

    pub fn is_tool_use(&self) -> bool {
        self.kind == EventKind::Assistant
            && self
                .tool_use
                .as_ref()
                .is_some_and(|tool| !tool.name.is_empty())
    }

    pub fn is_tool_result(&self) -> bool {
        self.kind == EventKind::User && self.has_tool_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_known_tool_with_wrong_shape_falls_back_to_other() {
        let tool = ToolUse::new("toolu_1", "Bash", json!({"cmd": 42}));
        assert!(tool.input.is_other());
        assert_eq!(tool.raw_input, json!({"cmd": 42}));
    }

    #[test]
    fn test_skill_accepts_command_alias() {
        let tool = ToolUse::new("", "Skill", json!({"command": "pdf", "args": "--fast"}));
        match tool.input {
            ToolInput::Skill(skill) => {
                assert_eq!(skill.skill, "pdf");
                assert_eq!(skill.args.as_deref(), Some("--fast"));
            }
            other => panic!("unexpected input: {other:?}"),
        }
    }

    #[test]
    fn test_primary_argument_for_common_tools() {
        let read = ToolUse::new("", "Read", json!({"file_path": "src/lib.rs"}));
        assert_eq!(read.input.primary_argument(), Some("src/lib.rs"));

        let todo = ToolUse::new("", "TodoWrite", json!({"todos": []}));
        assert_eq!(todo.input.primary_argument(), None);
    }

    #[test]
    fn test_unknown_kind_has_no_dispatch_predicate() {
        let mut event = Event::new(EventKind::Unknown("stream_event".into()));
        event.text = "ignored".into();
        assert!(!event.is_text());
        assert!(!event.is_tool_use());
        assert!(!event.is_tool_result());
        assert!(!event.session_started());
        assert!(!event.session_complete());
    }
}
