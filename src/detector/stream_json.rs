//! Accessors over Claude `stream-json` output lines.
//!
//! # Functional Core
//! Pure functions over parsed JSON. No I/O, no registry state.

use serde_json::Value;

use crate::error::ParseError;

static NULL: Value = Value::Null;

/// Tool names that spawn a sub-agent.
pub const SUBAGENT_TOOLS: [&str; 2] = ["Task", "Agent"];

#[derive(Debug, Clone, PartialEq)]
pub struct ToolUse<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub input: &'a Value,
}

impl ToolUse<'_> {
    pub fn spawns_subagent(&self) -> bool {
        SUBAGENT_TOOLS.contains(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult<'a> {
    pub tool_use_id: &'a str,
    pub content: &'a Value,
    pub is_error: bool,
}

pub fn parse_line(line: &str) -> Result<Value, ParseError> {
    let value: Value = serde_json::from_str(line).map_err(|e| ParseError::Json(e.to_string()))?;
    if value.is_object() {
        Ok(value)
    } else {
        Err(ParseError::InvalidFormat(format!("expected object, got {value}")))
    }
}

pub fn line_type(line: &Value) -> Option<&str> {
    line.get("type").and_then(Value::as_str)
}

pub fn session_id(line: &Value) -> Option<&str> {
    line.get("session_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

pub fn parent_tool_use_id(line: &Value) -> Option<&str> {
    line.get("parent_tool_use_id")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn content_blocks<'a>(line: &'a Value, of_type: &'a str) -> impl Iterator<Item = &'a Value> {
    line.get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter(move |block| block.get("type").and_then(Value::as_str) == Some(of_type))
}

/// `tool_use` blocks of an assistant line.
pub fn tool_uses(line: &Value) -> Vec<ToolUse<'_>> {
    if line_type(line) != Some("assistant") {
        return Vec::new();
    }
    content_blocks(line, "tool_use")
        .filter_map(|block| {
            Some(ToolUse {
                id: block.get("id")?.as_str().filter(|s| !s.is_empty())?,
                name: block.get("name")?.as_str()?,
                input: block.get("input").unwrap_or(&NULL),
            })
        })
        .collect()
}

/// `tool_result` blocks of a user line.
pub fn tool_results(line: &Value) -> Vec<ToolResult<'_>> {
    if line_type(line) != Some("user") {
        return Vec::new();
    }
    content_blocks(line, "tool_result")
        .filter_map(|block| {
            Some(ToolResult {
                tool_use_id: block.get("tool_use_id")?.as_str().filter(|s| !s.is_empty())?,
                content: block.get("content").unwrap_or(&NULL),
                is_error: block.get("is_error").and_then(Value::as_bool).unwrap_or(false),
            })
        })
        .collect()
}

/// Body of a line's message: text blocks joined, or the raw content when it
/// has no text.
pub fn message_body(line: &Value) -> Value {
    let Some(content) = line.get("message").and_then(|m| m.get("content")) else {
        return line.get("message").cloned().unwrap_or(Value::Null);
    };
    match content {
        Value::String(_) => content.clone(),
        Value::Array(blocks) => {
            let texts: Vec<&str> = blocks
                .iter()
                .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|b| b.get("text").and_then(Value::as_str))
                .collect();
            if texts.is_empty() {
                content.clone()
            } else {
                Value::String(texts.join("\n"))
            }
        }
        other => other.clone(),
    }
}
