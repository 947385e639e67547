use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line of the assistant's `stream-json` output, as emitted.
///
/// Every field is optional so that records from newer CLI versions still
/// deserialize; the `type` discriminator is kept as a plain string and mapped
/// by the normalizer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "type", default)]
    pub record_type: String,
    #[serde(default)]
    pub subtype: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub message: Option<RawMessage>,
    #[serde(default)]
    pub tool_use_result: Option<Value>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub is_error: Option<bool>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub num_turns: Option<u32>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Value,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

impl RawMessage {
    /// Content blocks of the message. A plain string body becomes a single
    /// text block; blocks that do not match a known shape become `Unknown`.
    pub fn blocks(&self) -> Vec<RawContentBlock> {
        match &self.content {
            Value::String(text) => vec![RawContentBlock::Text { text: text.clone() }],
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    serde_json::from_value::<RawContentBlock>(item.clone())
                        .unwrap_or(RawContentBlock::Unknown)
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RawContentBlock {
    Text {
        #[serde(default)]
        text: String,
    },
    ToolUse {
        #[serde(default)]
        id: String,
        #[serde(default)]
        name: String,
        #[serde(default = "default_json_object")]
        input: Value,
    },
    ToolResult {
        #[serde(default)]
        tool_use_id: String,
        #[serde(default)]
        content: Value,
        #[serde(default)]
        is_error: bool,
    },
    #[serde(other)]
    Unknown,
}

fn default_json_object() -> Value {
    Value::Object(serde_json::Map::new())
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_input_tokens: u64,
    #[serde(default)]
    pub cache_read_input_tokens: u64,
}
