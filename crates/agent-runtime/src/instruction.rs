//! Instruction-level tool calls (§4.6): `{{ tool:<name> <args> }}`
//! placeholders in system-message text, rewritten into synthetic tool calls
//! before the standard dispatch path runs. Only system-role text is ever
//! scanned — user/assistant content is never expanded, so a user can't smuggle
//! a tool invocation through prompt injection.

use agent_core::ToolCall;
use regex::Regex;
use std::sync::OnceLock;

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| Regex::new(r"\{\{\s*tool:(\S+)\s*(.*?)\s*\}\}").unwrap())
}

/// A placeholder found in a system message, with a freshly generated call id.
pub struct InstructionToolCall {
    pub call: ToolCall,
}

/// Strip every `{{ tool:<name> <args> }}` placeholder out of `system_text`
/// and return the cleaned text plus one synthesized `ToolCall` per match, in
/// source order. `<args>` is treated as a raw string argument unless it
/// parses as JSON, in which case the parsed value is forwarded as-is.
pub fn expand(system_text: &str) -> (String, Vec<InstructionToolCall>) {
    let re = placeholder_regex();
    let mut calls = Vec::new();
    for (idx, caps) in re.captures_iter(system_text).enumerate() {
        let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default().to_string();
        let raw_args = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let arguments = match serde_json::from_str::<serde_json::Value>(raw_args) {
            Ok(value) if value.is_object() => value.to_string(),
            _ => serde_json::json!({ "input": raw_args }).to_string(),
        };
        let id = format!("instr-{idx}-{}", uuid::Uuid::new_v4());
        calls.push(InstructionToolCall { call: ToolCall::new(id, name, arguments) });
    }
    let cleaned = re.replace_all(system_text, "").to_string();
    (cleaned, calls)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_placeholder_and_strips_text() {
        let (cleaned, calls) = expand("Before {{ tool:read_file readme.md }} after");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].call.function.name, "read_file");
        assert!(!cleaned.contains("tool:read_file"));
        assert!(cleaned.contains("Before"));
        assert!(cleaned.contains("after"));
    }

    #[test]
    fn no_placeholder_is_a_no_op() {
        let (cleaned, calls) = expand("just a system prompt");
        assert!(calls.is_empty());
        assert_eq!(cleaned, "just a system prompt");
    }

    #[test]
    fn json_object_args_pass_through() {
        let (_, calls) = expand(r#"{{ tool:search {"query": "rust"} }}"#);
        assert_eq!(calls.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&calls[0].call.function.arguments).unwrap();
        assert_eq!(parsed["query"], "rust");
    }
}
