//! Text-embedded tool calls.
//!
//! Providers without native function calling emit tool calls inline as
//! `[Tool: name({"key": "value"})]`. This module extracts every such call
//! and returns the visible content with the call syntax stripped.

use av_domain::message::ToolCall;
use regex::Regex;
use std::sync::OnceLock;

/// `[Tool: name(args)]` — name is a word, args run to the first `)]`.
const TOOL_CALL_PATTERN: &str = r"\[Tool:\s*(\w+)\((.*?)\)\]";

fn tool_call_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(TOOL_CALL_PATTERN).expect("tool call pattern"))
}

/// Extraction result: the cleaned visible text plus the calls in order.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    pub content: String,
    pub calls: Vec<ToolCall>,
}

/// Extract all text-embedded tool calls from `content`.
///
/// The cleaned content has each `[Tool: …]` span removed in place; the
/// surrounding text (including whitespace the model wrote around the span)
/// is otherwise untouched.
pub fn extract(content: &str) -> Extracted {
    let re = tool_call_regex();
    if !re.is_match(content) {
        return Extracted {
            content: content.to_owned(),
            calls: Vec::new(),
        };
    }

    let mut calls = Vec::new();
    for caps in re.captures_iter(content) {
        calls.push(ToolCall {
            name: caps[1].to_owned(),
            arguments_json: caps[2].to_owned(),
        });
    }

    Extracted {
        content: re.replace_all(content, "").into_owned(),
        calls,
    }
}

/// Whether the content contains any text-embedded tool call.
pub fn contains_call(content: &str) -> bool {
    tool_call_regex().is_match(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_single_call_and_strips_syntax() {
        let input = r#"正在查找…[Tool: schedule_query({"range":"today"})] 稍等。"#;
        let out = extract(input);
        assert_eq!(out.content, "正在查找… 稍等。");
        assert_eq!(out.calls.len(), 1);
        assert_eq!(out.calls[0].name, "schedule_query");
        assert_eq!(out.calls[0].arguments_json, r#"{"range":"today"}"#);
    }

    #[test]
    fn extracts_multiple_calls_in_order() {
        let input = r#"a [Tool: memo_search({"query":"x"})] b [Tool: schedule_add({})] c"#;
        let out = extract(input);
        assert_eq!(out.content, "a  b  c");
        assert_eq!(out.calls.len(), 2);
        assert_eq!(out.calls[0].name, "memo_search");
        assert_eq!(out.calls[1].name, "schedule_add");
    }

    #[test]
    fn plain_text_passes_through() {
        let out = extract("no calls here");
        assert_eq!(out.content, "no calls here");
        assert!(out.calls.is_empty());
    }

    #[test]
    fn empty_arguments_allowed() {
        let out = extract("[Tool: list_memos()]");
        assert_eq!(out.calls[0].name, "list_memos");
        assert_eq!(out.calls[0].arguments_json, "");
        assert_eq!(out.content, "");
    }

    #[test]
    fn contains_call_detection() {
        assert!(contains_call("x [Tool: a({})] y"));
        assert!(!contains_call("Tool: a({})"));
        assert!(!contains_call("[tool: a()]")); // case-sensitive marker
    }
}
