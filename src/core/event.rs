use crate::api::WireEvent;
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::warn;

pub const DATA_PREFIX: &str = "data: ";
pub const DONE_SENTINEL: &str = "[DONE]";

/// A typed server event. Parsing maps each frame to exactly one variant;
/// event kinds this client does not know about become [`Event::Unknown`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    AgentStart {
        agent_name: String,
        agent_role: String,
    },
    /// `content` is the agent's full text so far, not a delta.
    AgentMessage {
        agent_name: String,
        content: String,
    },
    AgentDone {
        agent_name: String,
        content: String,
    },
    FeedbackRequested {
        agent_name: String,
        agent_role: String,
        available_agents: BTreeSet<String>,
    },
    /// Incremental text for single-agent replies.
    Chunk {
        content: String,
    },
    FullMessage {
        content: String,
    },
    Status {
        content: String,
    },
    TokenUsage {
        input: Option<u64>,
        output: Option<u64>,
    },
    Error {
        content: String,
    },
    /// The team run finished; every agent is done.
    Done {
        content: String,
    },
    Unknown {
        kind: String,
    },
    StreamEnd,
}

impl Event {
    pub fn kind(&self) -> &str {
        match self {
            Event::AgentStart { .. } => "agent_start",
            Event::AgentMessage { .. } => "agent_message",
            Event::AgentDone { .. } => "agent_done",
            Event::FeedbackRequested { .. } => "feedback_request",
            Event::Chunk { .. } => "chunk",
            Event::FullMessage { .. } => "message",
            Event::Status { .. } => "status",
            Event::TokenUsage { .. } => "token_usage",
            Event::Error { .. } => "error",
            Event::Done { .. } => "done",
            Event::Unknown { kind } => kind,
            Event::StreamEnd => DONE_SENTINEL,
        }
    }
}

pub fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix(DATA_PREFIX)
}

/// Parse one decoded line. Returns `None` for lines that are not data
/// frames and for frames whose JSON cannot be decoded.
pub fn parse_line(line: &str) -> Option<Event> {
    let payload = data_payload(line)?;
    if payload.trim_end() == DONE_SENTINEL {
        return Some(Event::StreamEnd);
    }

    match serde_json::from_str::<WireEvent>(payload) {
        Ok(wire) => Some(Event::from(wire)),
        Err(err) => {
            warn!(error = %err, payload, "Skipping malformed event frame");
            None
        }
    }
}

fn content_text(content: Option<Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text,
        Some(other) => other.to_string(),
    }
}

fn token_field(data: &Value, primary: &str, fallback: &str) -> Option<u64> {
    data.get(primary)
        .and_then(Value::as_u64)
        .or_else(|| data.get(fallback).and_then(Value::as_u64))
}

/// Token counts arrive nested under `tokens`, nested under `token_usage`, or
/// flat on the frame, with either `input`/`output` or
/// `prompt_tokens`/`completion_tokens` naming.
fn token_counts(wire: &WireEvent) -> (Option<u64>, Option<u64>) {
    let nested = [&wire.tokens, &wire.token_usage]
        .into_iter()
        .flatten()
        .find(|value| value.is_object());

    match nested {
        Some(data) => (
            token_field(data, "input", "prompt_tokens"),
            token_field(data, "output", "completion_tokens"),
        ),
        None => (
            wire.input.or(wire.prompt_tokens),
            wire.output.or(wire.completion_tokens),
        ),
    }
}

impl From<WireEvent> for Event {
    fn from(mut wire: WireEvent) -> Self {
        let kind = std::mem::take(&mut wire.kind);
        match kind.as_str() {
            "agent_start" | "agent_message" | "agent_done" | "feedback_request"
                if wire.agent_name.is_none() =>
            {
                Event::Unknown { kind: kind.clone() }
            }
            "agent_start" => {
                let agent_name = wire.agent_name.unwrap_or_default();
                let agent_role = wire.agent_role.unwrap_or_else(|| agent_name.clone());
                Event::AgentStart {
                    agent_name,
                    agent_role,
                }
            }
            "agent_message" => Event::AgentMessage {
                agent_name: wire.agent_name.unwrap_or_default(),
                content: content_text(wire.content),
            },
            "agent_done" => Event::AgentDone {
                agent_name: wire.agent_name.unwrap_or_default(),
                content: content_text(wire.content),
            },
            "feedback_request" => {
                let agent_name = wire.agent_name.unwrap_or_default();
                let agent_role = wire.agent_role.unwrap_or_else(|| agent_name.clone());
                Event::FeedbackRequested {
                    agent_name,
                    agent_role,
                    available_agents: wire
                        .available_agents
                        .unwrap_or_default()
                        .into_iter()
                        .collect(),
                }
            }
            "chunk" => Event::Chunk {
                content: content_text(wire.content),
            },
            "message" => Event::FullMessage {
                content: content_text(wire.content),
            },
            "status" => Event::Status {
                content: content_text(wire.content),
            },
            "tokens" | "token_usage" => {
                let (input, output) = token_counts(&wire);
                Event::TokenUsage { input, output }
            }
            "error" => Event::Error {
                content: content_text(wire.content),
            },
            "done" => Event::Done {
                content: content_text(wire.content),
            },
            _ => Event::Unknown { kind: kind.clone() },
        }
    }
}
