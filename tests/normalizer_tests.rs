use serde_json::json;
use storypilot::api::{parse_line, LineParser};
use storypilot::types::{EventKind, ToolInput};

#[test]
fn test_init_record_starts_session() {
    let event = parse_line(
        r#"{"type":"system","subtype":"init","session_id":"abc","model":"claude-sonnet"}"#,
    )
    .expect("valid record");
    assert!(event.session_started());
    assert!(!event.session_complete());
    assert_eq!(event.session_id(), Some("abc"));
    assert_eq!(event.model(), Some("claude-sonnet"));
}

#[test]
fn test_non_init_system_record_does_not_start_session() {
    let event = parse_line(r#"{"type":"system","subtype":"compact_boundary"}"#).unwrap();
    assert_eq!(event.kind(), &EventKind::System);
    assert!(!event.session_started());
}

#[test]
fn test_result_record_completes_session_even_on_error() {
    for line in [
        r#"{"type":"result","subtype":"success","is_error":false}"#,
        r#"{"type":"result","subtype":"error_max_turns","is_error":true}"#,
        r#"{"type":"result"}"#,
    ] {
        let event = parse_line(line).unwrap();
        assert!(event.session_complete(), "{line}");
        assert!(!event.session_started());
    }
}

#[test]
fn test_unknown_tool_keeps_raw_parameters() {
    let event = parse_line(
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_9","name":"FutureTool","input":{"foo":"bar","count":42}}]}}"#,
    )
    .unwrap();
    assert!(event.is_tool_use());
    let tool = event.tool_use().unwrap();
    assert_eq!(tool.name, "FutureTool");
    assert_eq!(tool.input, ToolInput::Other);
    assert_eq!(tool.raw_input, json!({"foo": "bar", "count": 42}));

    let decoded: serde_json::Value = serde_json::from_slice(&tool.raw_input_bytes()).unwrap();
    assert_eq!(decoded, json!({"foo": "bar", "count": 42}));
}

#[test]
fn test_bash_tool_populates_typed_fields() {
    let event = parse_line(
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"toolu_1","name":"Bash","input":{"command":"ls -la","description":"List files"}}]}}"#,
    )
    .unwrap();
    match &event.tool_use().unwrap().input {
        ToolInput::Bash(input) => {
            assert_eq!(input.command, "ls -la");
            assert_eq!(input.description, "List files");
        }
        other => panic!("unexpected input: {other:?}"),
    }
}

#[test]
fn test_unknown_record_type_has_no_predicates() {
    let event = parse_line(r#"{"type":"stream_event","message":{"content":"hi"}}"#).unwrap();
    assert_eq!(event.kind(), &EventKind::Unknown("stream_event".to_string()));
    assert!(!event.is_text());
    assert!(!event.is_tool_use());
    assert!(!event.is_tool_result());
    assert!(!event.session_started());
    assert!(!event.session_complete());
}

#[test]
fn test_dispatch_predicates_are_exclusive() {
    let lines = [
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"hello"}]}}"#,
        r#"{"type":"assistant","message":{"content":[{"type":"tool_use","id":"t","name":"Read","input":{"file_path":"a.rs"}}]}}"#,
        r#"{"type":"user","message":{"content":[{"type":"tool_result","tool_use_id":"t","content":"fn main() {}"}]}}"#,
    ];
    for line in lines {
        let event = parse_line(line).unwrap();
        let hits = [event.is_text(), event.is_tool_use(), event.is_tool_result()]
            .iter()
            .filter(|hit| **hit)
            .count();
        assert_eq!(hits, 1, "{line}");
    }
}

#[test]
fn test_invalid_json_is_an_error_for_single_lines() {
    assert!(parse_line("{not json").is_err());
}

#[test]
fn test_line_parser_yields_events_in_order() {
    let stream = concat!(
        r#"{"type":"system","subtype":"init"}"#,
        "\n",
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"one"}]}}"#,
        "\n",
        r#"{"type":"assistant","message":{"content":[{"type":"text","text":"two"}]}}"#,
        "\n",
        r#"{"type":"result"}"#,
        "\n",
    );
    let mut parser = LineParser::new();
    let mut events = Vec::new();
    for chunk in stream.as_bytes().chunks(7) {
        events.extend(parser.process(chunk));
    }
    assert!(parser.finish().is_none());
    assert_eq!(events.len(), 4);
    assert!(events[0].session_started());
    assert_eq!(events[1].text(), "one");
    assert_eq!(events[2].text(), "two");
    assert!(events[3].session_complete());
}
