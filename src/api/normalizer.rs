use crate::types::{
    Event, EventKind, RawContentBlock, RawRecord, SessionSummary, TokenUsage, ToolResult, ToolUse,
};
use anyhow::{Context, Result};
use serde_json::Value;

const MAX_LOGGED_LINE_CHARS: usize = 200;

/// Translate one provider record into the canonical event shape.
///
/// Never fails: records of an unrecognized type come back as
/// `EventKind::Unknown` with every dispatch predicate false.
pub fn normalize(record: RawRecord) -> Event {
    let kind = EventKind::from_record_type(&record.record_type);
    let mut event = Event::new(kind.clone());
    event.subtype = record.subtype.clone().unwrap_or_default();

    match kind {
        EventKind::System => {
            event.session_id = record.session_id.clone();
            event.model = record.model.clone();
        }
        EventKind::Assistant | EventKind::User => {
            let blocks = record
                .message
                .as_ref()
                .map(|message| message.blocks())
                .unwrap_or_default();
            event.text = first_text(&blocks);
            event.tool_use = first_tool_use(&blocks);
            if kind == EventKind::User {
                event.tool_result = extract_tool_result(&record, &blocks);
            }
            let usage = record
                .message
                .as_ref()
                .and_then(|message| message.usage)
                .or(record.usage);
            event.usage = usage.map(token_usage).unwrap_or_default();
        }
        EventKind::Result => {
            event.session_id = record.session_id.clone();
            event.usage = record.usage.map(token_usage).unwrap_or_default();
            event.summary = Some(SessionSummary {
                is_error: record.is_error.unwrap_or(false),
                result: record.result.clone().unwrap_or_default(),
                duration_ms: record.duration_ms,
                num_turns: record.num_turns,
                total_cost_usd: record.total_cost_usd,
            });
        }
        EventKind::Unknown(_) => {}
    }

    event
}

/// Parse and normalize a single JSON line.
pub fn parse_line(line: &str) -> Result<Event> {
    let record: RawRecord = serde_json::from_str(line.trim())
        .with_context(|| format!("invalid stream record: {}", truncate_for_log(line)))?;
    Ok(normalize(record))
}

fn first_text(blocks: &[RawContentBlock]) -> String {
    blocks
        .iter()
        .find_map(|block| match block {
            RawContentBlock::Text { text } => Some(text.clone()),
            _ => None,
        })
        .unwrap_or_default()
}

/// One event per record, so only the first `tool_use` block survives.
fn first_tool_use(blocks: &[RawContentBlock]) -> Option<ToolUse> {
    let mut uses = blocks.iter().filter_map(|block| match block {
        RawContentBlock::ToolUse { id, name, input } => Some((id, name, input)),
        _ => None,
    });
    let (id, name, input) = uses.next()?;
    for (dropped_id, dropped_name, _) in uses {
        tracing::debug!(
            kept = %id,
            tool_use_id = %dropped_id,
            tool = %dropped_name,
            "dropping extra tool_use block in one record"
        );
    }
    Some(ToolUse::new(id.clone(), name.clone(), input.clone()))
}

fn extract_tool_result(record: &RawRecord, blocks: &[RawContentBlock]) -> Option<ToolResult> {
    let block = blocks.iter().find_map(|block| match block {
        RawContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => Some((tool_use_id, content, *is_error)),
        _ => None,
    });
    let structured = record.tool_use_result.as_ref();
    if block.is_none() && structured.is_none() {
        return None;
    }

    let mut result = ToolResult::default();
    if let Some((tool_use_id, _, is_error)) = block {
        result.tool_use_id = tool_use_id.clone();
        result.is_error = is_error;
    }

    match structured {
        Some(Value::Object(map)) if map.contains_key("stdout") || map.contains_key("stderr") => {
            result.stdout = string_field(map.get("stdout"));
            result.stderr = string_field(map.get("stderr"));
        }
        _ => {
            let body = match (block, structured) {
                (Some((_, content, _)), _) => content_text(content),
                (None, Some(other)) => content_text(other),
                (None, None) => String::new(),
            };
            if result.is_error {
                result.stderr = body;
            } else {
                result.stdout = body;
            }
        }
    }

    Some(result)
}

fn string_field(value: Option<&Value>) -> String {
    value
        .and_then(Value::as_str)
        .map(ToOwned::to_owned)
        .unwrap_or_default()
}

fn content_text(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(text) => Some(text.as_str()),
                Value::Object(map) => map.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => String::new(),
    }
}

fn token_usage(usage: crate::types::RawUsage) -> TokenUsage {
    TokenUsage {
        input_tokens: usage.input_tokens
            + usage.cache_creation_input_tokens
            + usage.cache_read_input_tokens,
        output_tokens: usage.output_tokens,
    }
}

fn truncate_for_log(line: &str) -> String {
    let trimmed = line.trim();
    if trimmed.chars().count() <= MAX_LOGGED_LINE_CHARS {
        return trimmed.to_string();
    }
    let head: String = trimmed.chars().take(MAX_LOGGED_LINE_CHARS).collect();
    format!("{head}...")
}

/// Splits a chunked byte stream into newline-delimited records.
#[derive(Default)]
pub struct LineParser {
    buffer: Vec<u8>,
}

impl LineParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return events for every complete line it finished.
    /// Lines that are not valid records are logged and skipped.
    pub fn process(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        let mut start = 0;

        while let Some(offset) = self.buffer[start..].iter().position(|byte| *byte == b'\n') {
            let end = start + offset;
            let line = String::from_utf8_lossy(&self.buffer[start..end]).into_owned();
            start = end + 1;
            if let Some(event) = parse_or_skip(&line) {
                events.push(event);
            }
        }

        if start > 0 {
            self.buffer.drain(..start);
        }

        events
    }

    /// Parse whatever is left after the stream closed without a trailing newline.
    pub fn finish(&mut self) -> Option<Event> {
        let rest = self.flush();
        parse_or_skip(&rest)
    }

    pub fn flush(&mut self) -> String {
        let rest = std::mem::take(&mut self.buffer);
        String::from_utf8_lossy(&rest).into_owned()
    }
}

fn parse_or_skip(line: &str) -> Option<Event> {
    if line.trim().is_empty() {
        return None;
    }
    match parse_line(line) {
        Ok(event) => Some(event),
        Err(error) => {
            tracing::warn!(error = %error, "skipping unparsable stream line");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_without_output_is_still_a_result() {
        let event = parse_line(
            r#"{"type":"user","message":{"role":"user","content":[{"type":"tool_result","tool_use_id":"toolu_1","content":""}]},"tool_use_result":{"stdout":"","stderr":"","interrupted":false}}"#,
        )
        .unwrap();
        assert!(event.is_tool_result());
        let result = event.tool_result().unwrap();
        assert_eq!(result.tool_use_id, "toolu_1");
        assert!(result.stdout.is_empty());
        assert!(result.stderr.is_empty());
    }

    #[test]
    fn test_only_first_tool_use_block_is_kept() {
        let event = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"two tools"},{"type":"tool_use","id":"t1","name":"Read","input":{"file_path":"a.rs"}},{"type":"tool_use","id":"t2","name":"Bash","input":{"command":"ls"}}]}}"#,
        )
        .unwrap();
        assert!(event.is_tool_use());
        let tool = event.tool_use().unwrap();
        assert_eq!(tool.id, "t1");
        assert_eq!(tool.name, "Read");
    }

    #[test]
    fn test_tool_result_error_content_goes_to_stderr() {
        let event = parse_line(
            r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t","is_error":true,"content":[{"type":"text","text":"permission denied"}]}]}}"#,
        )
        .unwrap();
        let result = event.tool_result().unwrap();
        assert!(result.is_error);
        assert_eq!(result.stderr, "permission denied");
        assert!(result.stdout.is_empty());
    }

    #[test]
    fn test_user_text_without_tool_result_is_not_a_result() {
        let event =
            parse_line(r#"{"type":"user","message":{"role":"user","content":"hello"}}"#).unwrap();
        assert!(!event.has_tool_result());
        assert!(!event.is_text());
        assert_eq!(event.text(), "hello");
    }

    #[test]
    fn test_assistant_usage_includes_cache_tokens() {
        let event = parse_line(
            r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hi"}],"usage":{"input_tokens":3,"cache_read_input_tokens":7,"output_tokens":2}}}"#,
        )
        .unwrap();
        assert_eq!(event.usage().input_tokens, 10);
        assert_eq!(event.usage().output_tokens, 2);
    }

    #[test]
    fn test_result_record_carries_summary() {
        let event = parse_line(
            r#"{"type":"result","subtype":"success","is_error":false,"result":"done","duration_ms":1200,"num_turns":4,"total_cost_usd":0.12}"#,
        )
        .unwrap();
        let summary = event.summary().unwrap();
        assert_eq!(summary.result, "done");
        assert_eq!(summary.num_turns, Some(4));
        assert!(!summary.is_error);
    }

    #[test]
    fn test_line_parser_handles_split_chunks_and_garbage() {
        let mut parser = LineParser::new();
        assert!(parser.process(br#"{"type":"sys"#).is_empty());
        let events = parser.process(b"tem\",\"subtype\":\"init\"}\nnot json\n\n{\"type\":\"result\"}");
        assert_eq!(events.len(), 1);
        assert!(events[0].session_started());

        let tail = parser.finish().unwrap();
        assert!(tail.session_complete());
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_line_parser_keeps_multibyte_characters_split_across_chunks() {
        let mut parser = LineParser::new();
        let line = "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"caf\u{e9}\"}]}}\n";
        let bytes = line.as_bytes();
        let split = line.find('\u{e9}').unwrap() + 1;
        assert!(parser.process(&bytes[..split]).is_empty());
        let events = parser.process(&bytes[split..]);
        assert_eq!(events[0].text(), "caf\u{e9}");
    }
}
