//! Wire payloads exchanged with the chat backend.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Body shared by the normal and testcase stream endpoints.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StandardChatRequest {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
    pub is_feedback: bool,
    pub conversation_id: Option<String>,
    pub target_agent: Option<String>,
}

/// Body of the orchestration stream endpoint. `file_ids` is always sent.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct OrchestrationChatRequest {
    pub message: String,
    pub session_id: Option<String>,
    pub file_ids: Vec<String>,
    pub is_feedback: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum ChatRequest {
    Standard(StandardChatRequest),
    Orchestration(OrchestrationChatRequest),
}

/// One `data:` frame as emitted by the backend. Every field besides `type`
/// is optional because each event kind fills in a different subset.
#[derive(Debug, Clone, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: Option<Value>,
    pub agent_name: Option<String>,
    pub agent_role: Option<String>,
    pub available_agents: Option<Vec<String>>,
    pub tokens: Option<Value>,
    pub token_usage: Option<Value>,
    pub input: Option<u64>,
    pub output: Option<u64>,
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileParseResult {
    pub filename: String,
    pub success: bool,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl FileParseResult {
    pub fn failure_reason(&self) -> String {
        self.error
            .clone()
            .or_else(|| self.message.clone())
            .unwrap_or_else(|| "parse failed".to_string())
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FileParseResponse {
    pub results: Vec<FileParseResult>,
    #[serde(default)]
    pub total: usize,
    #[serde(default)]
    pub success_count: usize,
    #[serde(default)]
    pub failed_count: usize,
}
