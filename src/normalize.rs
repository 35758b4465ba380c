//! Maps heterogeneous raw payloads onto `NormalizedMessage`.
//!
//! # Functional Core
//! Pure and total: every payload produces a message. Shapes the table does
//! not recognize degrade to a `System` entry carrying the payload verbatim.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::model::{MessageKind, NormalizedMessage, Provenance, RawEvent, Subtype, TopicKind};

/// Keys under which a payload names the sub-agent it is about.
const TOOL_KEYS: [&str; 4] = ["tool_id", "toolId", "parent_tool_use_id", "subagent_id"];

/// Fields only a start payload carries.
const START_KEYS: [&str; 3] = ["description", "prompt", "subagent_type"];

/// Marker some producers put in `type` for reasoning output.
pub const THINKING_MARKER: &str = "subagent_thinking";

/// Epoch values above this are taken as milliseconds.
const EPOCH_MILLIS_THRESHOLD: u64 = 100_000_000_000;

/// Payload shapes seen on the wire, resolved once per event.
#[derive(Debug, Clone, PartialEq)]
pub enum PayloadShape<'a> {
    /// Bare string payload.
    Text(&'a str),
    /// `{message: {type?, subtype?, message|text|content: "<string>"}}`
    NestedText {
        type_hint: Option<&'a str>,
        subtype: Option<&'a str>,
        text: &'a str,
    },
    /// `{message: {type?, subtype?, message|content: {..}}}`
    NestedObject {
        type_hint: Option<&'a str>,
        subtype: Option<&'a str>,
        content: &'a Value,
    },
    /// `{output|message: "<string>", type?}` as sent on output topics.
    Output {
        type_hint: Option<&'a str>,
        text: &'a str,
    },
    Generic(&'a Value),
}

impl<'a> PayloadShape<'a> {
    pub fn classify(payload: &'a Value) -> Self {
        let obj = match payload {
            Value::String(s) => return PayloadShape::Text(s),
            Value::Object(obj) => obj,
            other => return PayloadShape::Generic(other),
        };

        let outer_type = obj.get("type").and_then(Value::as_str);

        if let Some(Value::Object(message)) = obj.get("message") {
            let type_hint = message.get("type").and_then(Value::as_str);
            let subtype = message.get("subtype").and_then(Value::as_str);
            let body = message
                .get("message")
                .or_else(|| message.get("text"))
                .or_else(|| message.get("content"));
            return match body {
                Some(Value::String(text)) => PayloadShape::NestedText {
                    type_hint,
                    subtype,
                    text,
                },
                Some(content @ (Value::Object(_) | Value::Array(_))) => PayloadShape::NestedObject {
                    type_hint,
                    subtype,
                    content,
                },
                _ => PayloadShape::Generic(payload),
            };
        }

        let text = obj
            .get("output")
            .and_then(Value::as_str)
            .or_else(|| obj.get("message").and_then(Value::as_str));
        match text {
            Some(text) => PayloadShape::Output {
                type_hint: outer_type,
                text,
            },
            None => PayloadShape::Generic(payload),
        }
    }
}

/// Kind and subtype implied by a producer `type` string.
///
/// Types naming a message kind set the kind; anything else becomes the
/// subtype of an assistant message (e.g. `status`).
fn kind_from_hint(type_hint: Option<&str>, subtype: Option<&str>) -> (MessageKind, Option<Subtype>) {
    let explicit_subtype = subtype.map(Subtype::parse);
    match type_hint {
        Some(t) => match MessageKind::from_type_str(t) {
            Some(kind) => (kind, explicit_subtype),
            None => (
                MessageKind::Assistant,
                explicit_subtype.or_else(|| Some(Subtype::parse(t))),
            ),
        },
        None => (MessageKind::Assistant, explicit_subtype),
    }
}

/// Parse RFC 3339 strings or epoch numbers (seconds or milliseconds).
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => {
            let raw = n.as_i64()?;
            if raw.unsigned_abs() >= EPOCH_MILLIS_THRESHOLD {
                Utc.timestamp_millis_opt(raw).single()
            } else {
                Utc.timestamp_opt(raw, 0).single()
            }
        }
        _ => None,
    }
}

fn payload_timestamp(payload: &Value) -> Option<DateTime<Utc>> {
    payload
        .get("timestamp")
        .and_then(parse_timestamp)
        .or_else(|| {
            payload
                .get("message")
                .and_then(|m| m.get("timestamp"))
                .and_then(parse_timestamp)
        })
}

/// Best-effort readable text of a result-like value.
///
/// Handles strings, arrays of `{type: "text", text}` blocks, and objects with
/// `content`, `output`, `text`, `result`, `error` or `message`.
pub fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::String(s) => Some(s.as_str()),
                    other => other.get("text").and_then(Value::as_str),
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        Value::Object(obj) => ["content", "output", "text", "result", "error", "message"]
            .iter()
            .filter_map(|key| obj.get(*key))
            .find_map(|v| match v {
                Value::Object(_) => None,
                other => text_of(other),
            }),
        _ => None,
    }
}

/// Start, completion or failure marker carried by a bare payload.
///
/// Only payloads that name a tool qualify. Messages and output chunks never
/// count, whatever else they carry.
fn marker_in_payload(payload: &Value) -> Option<TopicKind> {
    let obj = payload.as_object()?;
    let names_tool = TOOL_KEYS
        .iter()
        .any(|key| obj.get(*key).and_then(Value::as_str).is_some_and(|id| !id.is_empty()));
    if !names_tool || obj.contains_key("message") || obj.contains_key("output") {
        return None;
    }

    let failed = obj.get("is_error").and_then(Value::as_bool).unwrap_or(false)
        || obj.get("error").is_some_and(|e| !e.is_null());
    if failed {
        return Some(TopicKind::Error);
    }
    if obj.contains_key("result") {
        return Some(TopicKind::Complete);
    }
    START_KEYS
        .iter()
        .any(|key| obj.contains_key(*key))
        .then_some(TopicKind::Started)
}

/// Lifecycle meaning of an event.
///
/// Lifecycle topics state it in their name. A copy relayed on a broadcast
/// topic only has its payload, so start and result markers are read off the
/// payload fields instead.
pub fn lifecycle_kind(raw: &RawEvent) -> Option<TopicKind> {
    if raw.topic.is_broadcast() {
        marker_in_payload(&raw.payload)
    } else {
        raw.topic.kind()
    }
}

fn is_thinking(payload: &Value) -> bool {
    let outer = payload.get("type").and_then(Value::as_str);
    let nested = payload
        .get("message")
        .and_then(|m| m.get("type"))
        .and_then(Value::as_str);
    outer == Some(THINKING_MARKER) || nested == Some(THINKING_MARKER)
}

/// Normalize one raw event. Never fails.
pub fn normalize(raw: &RawEvent) -> NormalizedMessage {
    let payload = &raw.payload;
    let timestamp = payload_timestamp(payload).unwrap_or_else(Utc::now);

    let mut msg = match PayloadShape::classify(payload) {
        PayloadShape::Text(text) => NormalizedMessage::new(MessageKind::Assistant, timestamp).with_text(text),
        PayloadShape::NestedText {
            type_hint,
            subtype,
            text,
        } => {
            let (kind, subtype) = kind_from_hint(type_hint, subtype);
            let mut msg = NormalizedMessage::new(kind, timestamp).with_text(text);
            msg.subtype = subtype;
            msg
        }
        PayloadShape::NestedObject {
            type_hint,
            subtype,
            content,
        } => {
            let (kind, subtype) = kind_from_hint(type_hint, subtype);
            let mut msg = NormalizedMessage::new(kind, timestamp).with_structured(content.clone());
            msg.subtype = subtype;
            msg
        }
        PayloadShape::Output { type_hint, text } => {
            let (kind, subtype) = kind_from_hint(type_hint, None);
            let mut msg = NormalizedMessage::new(kind, timestamp).with_text(text);
            msg.subtype = subtype;
            msg
        }
        PayloadShape::Generic(value) => {
            NormalizedMessage::new(MessageKind::System, timestamp).with_structured(value.clone())
        }
    };

    if is_thinking(payload) {
        msg.subtype = Some(Subtype::Thinking);
    }

    match lifecycle_kind(raw) {
        Some(TopicKind::Started) => {
            msg.subtype = Some(Subtype::Started);
            if msg.text.is_none() {
                msg.text = payload
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string);
            }
        }
        Some(TopicKind::Complete) => {
            msg.kind = MessageKind::Result;
            msg.subtype = Some(Subtype::Completed);
            if msg.text.is_none() {
                msg.text = payload.get("result").and_then(text_of);
            }
        }
        Some(TopicKind::Error) => {
            msg.kind = MessageKind::System;
            msg.subtype = Some(Subtype::Error);
            if msg.text.is_none() {
                msg.text = text_of(payload);
            }
        }
        _ => {}
    }

    msg.with_provenance(Provenance::from_topic(raw.topic.clone()))
}
