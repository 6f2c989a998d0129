use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Identifier of a message within one conversation. Ids grow monotonically
/// and are never reused, even across a clear.
pub type MessageId = u64;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenCount {
    pub input: Option<u64>,
    pub output: Option<u64>,
}

/// One agent's output inside a team-mode reply. `content` always holds the
/// latest full text reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTranscript {
    pub name: String,
    pub role: String,
    pub content: String,
    pub done: bool,
}

impl AgentTranscript {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            content: String::new(),
            done: false,
        }
    }
}

/// A mid-turn pause where the backend asks the user to approve or redirect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub agent_name: String,
    pub agent_role: String,
    pub available_agents: BTreeSet<String>,
    /// Session id of the turn that asked, so a later reply reattaches to it.
    pub origin_session_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserMessage {
    pub attached_file_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub streaming: bool,
    pub errored: bool,
    pub team_mode: bool,
    pub agents: Vec<AgentTranscript>,
    pub pending_feedback: Option<FeedbackRequest>,
    /// Backup copy of the session id seen in this turn's response headers.
    pub session_id: Option<String>,
}

impl AssistantMessage {
    pub fn placeholder(team_mode: bool) -> Self {
        Self {
            streaming: true,
            team_mode,
            ..Default::default()
        }
    }

    pub fn agent(&self, name: &str) -> Option<&AgentTranscript> {
        self.agents.iter().find(|agent| agent.name == name)
    }

    pub fn agent_mut(&mut self, name: &str) -> Option<&mut AgentTranscript> {
        self.agents.iter_mut().find(|agent| agent.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum MessageBody {
    User(UserMessage),
    Assistant(AssistantMessage),
}

/// Lifecycle of an assistant reply, derived from its flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssistantState {
    Created,
    Streaming,
    Completed,
    Errored,
    AwaitingFeedback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub token_count: Option<TokenCount>,
    pub body: MessageBody,
}

impl Message {
    pub fn user(id: MessageId, content: impl Into<String>, attached_file_count: usize) -> Self {
        Self {
            id,
            content: content.into(),
            created_at: Utc::now(),
            token_count: None,
            body: MessageBody::User(UserMessage {
                attached_file_count,
            }),
        }
    }

    pub fn assistant_placeholder(id: MessageId, team_mode: bool) -> Self {
        Self {
            id,
            content: String::new(),
            created_at: Utc::now(),
            token_count: None,
            body: MessageBody::Assistant(AssistantMessage::placeholder(team_mode)),
        }
    }

    pub fn is_user(&self) -> bool {
        matches!(self.body, MessageBody::User(_))
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.body, MessageBody::Assistant(_))
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match &self.body {
            MessageBody::Assistant(assistant) => Some(assistant),
            MessageBody::User(_) => None,
        }
    }

    pub fn as_assistant_mut(&mut self) -> Option<&mut AssistantMessage> {
        match &mut self.body {
            MessageBody::Assistant(assistant) => Some(assistant),
            MessageBody::User(_) => None,
        }
    }

    pub fn as_user(&self) -> Option<&UserMessage> {
        match &self.body {
            MessageBody::User(user) => Some(user),
            MessageBody::Assistant(_) => None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.as_assistant()
            .is_some_and(|assistant| assistant.streaming)
    }

    pub fn token_count_mut(&mut self) -> &mut TokenCount {
        self.token_count.get_or_insert_with(TokenCount::default)
    }

    pub fn assistant_state(&self) -> Option<AssistantState> {
        let assistant = self.as_assistant()?;
        let state = if assistant.errored {
            AssistantState::Errored
        } else if assistant.streaming {
            if self.content.is_empty() && assistant.agents.is_empty() {
                AssistantState::Created
            } else {
                AssistantState::Streaming
            }
        } else if assistant.pending_feedback.is_some() {
            AssistantState::AwaitingFeedback
        } else {
            AssistantState::Completed
        };
        Some(state)
    }
}
