//! Turns the parent agent's `stream-json` output into sub-agent lifecycle
//! events.
//!
//! The detector only decides what to publish. Publishing is left to the
//! caller so an aggregator can be opened for a new sub-agent before its start
//! event goes out.

pub mod stream_json;

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::bus::LocalBus;
use crate::model::{ParentSessionId, SessionIdentity, Topic, TopicKind, ToolId};
use stream_json::{message_body, parse_line, parent_tool_use_id, session_id, tool_results, tool_uses};

#[derive(Debug, Clone, PartialEq)]
pub struct SubagentInfo {
    pub identity: SessionIdentity,
    pub description: String,
    pub subagent_type: Option<String>,
}

/// One event the detector wants published.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub topic: Topic,
    pub payload: Value,
    /// Set on the start event of a newly registered sub-agent.
    pub started: Option<SessionIdentity>,
}

impl Emission {
    fn new(topic: Topic, payload: Value) -> Self {
        Self {
            topic,
            payload,
            started: None,
        }
    }

    pub fn publish(self, bus: &LocalBus) -> usize {
        bus.publish(&self.topic, self.payload)
    }
}

#[derive(Debug)]
pub struct SubagentDetector {
    parent: Option<ParentSessionId>,
    broadcast: Topic,
    active: HashMap<ToolId, SubagentInfo>,
}

impl SubagentDetector {
    /// `parent` may be left unset; it is then adopted from the first line
    /// carrying a `session_id`.
    pub fn new(parent: Option<ParentSessionId>, broadcast: Topic) -> Self {
        Self {
            parent,
            broadcast,
            active: HashMap::new(),
        }
    }

    pub fn parent(&self) -> Option<&ParentSessionId> {
        self.parent.as_ref()
    }

    pub fn is_active(&self, tool_id: &str) -> bool {
        self.active.contains_key(&ToolId::new(tool_id))
    }

    pub fn active(&self) -> impl Iterator<Item = &SubagentInfo> {
        self.active.values()
    }

    /// Inspect one output line. Never fails: lines that cannot be routed to a
    /// sub-agent go to the broadcast topic as-is.
    pub fn inspect(&mut self, line: &str) -> Vec<Emission> {
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let value = match parse_line(line) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "non-json output line");
                return vec![self.broadcast_line(Value::String(line.to_string()))];
            }
        };

        if self.parent.is_none() {
            if let Some(id) = session_id(&value) {
                info!(parent = id, "adopted parent session id");
                self.parent = Some(ParentSessionId::new(id));
            }
        }
        let Some(parent) = self.parent.clone() else {
            return vec![self.broadcast_line(value)];
        };

        let mut emissions = Vec::new();

        if let Some(tool_id) = parent_tool_use_id(&value) {
            if self.is_active(tool_id) {
                emissions.push(Self::message_event(&parent, tool_id, &value));
                return emissions;
            }
        }

        for tool_use in tool_uses(&value).into_iter().filter(|u| u.spawns_subagent()) {
            let identity = SessionIdentity::new(parent.clone(), tool_use.id);
            let description = tool_use
                .input
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or("Unknown task")
                .to_string();
            let subagent_type = tool_use
                .input
                .get("subagent_type")
                .and_then(Value::as_str)
                .map(str::to_string);
            info!(
                tool_id = tool_use.id,
                %description,
                subagent_type = subagent_type.as_deref().unwrap_or("-"),
                "sub-agent started"
            );

            emissions.push(Emission {
                topic: Topic::lifecycle(TopicKind::Started, parent.clone()),
                payload: json!({
                    "subagent_id": identity.subagent_id(),
                    "tool_id": tool_use.id,
                    "description": description,
                    "prompt": tool_use.input.get("prompt"),
                    "subagent_type": subagent_type,
                }),
                started: Some(identity.clone()),
            });
            self.active.insert(
                identity.tool_id.clone(),
                SubagentInfo {
                    identity,
                    description,
                    subagent_type,
                },
            );
        }

        for result in tool_results(&value) {
            let Some(info) = self.active.remove(&ToolId::new(result.tool_use_id)) else {
                continue;
            };
            let kind = if result.is_error {
                TopicKind::Error
            } else {
                TopicKind::Complete
            };
            info!(tool_id = result.tool_use_id, is_error = result.is_error, "sub-agent finished");
            emissions.push(Emission::new(
                Topic::lifecycle(kind, parent.clone()),
                json!({
                    "subagent_id": info.identity.subagent_id(),
                    "tool_id": result.tool_use_id,
                    "result": result.content,
                    "is_error": result.is_error,
                }),
            ));
        }

        if emissions.is_empty() {
            emissions.push(self.broadcast_line(value));
        }
        emissions
    }

    fn broadcast_line(&self, payload: Value) -> Emission {
        Emission::new(self.broadcast.clone(), payload)
    }

    fn message_event(parent: &ParentSessionId, tool_id: &str, line: &Value) -> Emission {
        let mut message = json!({
            "type": line.get("type").cloned().unwrap_or(Value::Null),
            "message": message_body(line),
        });
        if let Some(ts) = line.get("timestamp") {
            message["timestamp"] = ts.clone();
        }
        Emission::new(
            Topic::lifecycle(TopicKind::Message, parent.clone()),
            json!({ "tool_id": tool_id, "message": message }),
        )
    }
}
