use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend chat mode. Each mode has its own endpoint, session header and
/// conversation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub enum ChatMode {
    #[default]
    Normal,
    Orchestration,
    Testcase,
}

impl ChatMode {
    pub const ALL: [ChatMode; 3] = [ChatMode::Normal, ChatMode::Orchestration, ChatMode::Testcase];

    pub fn as_str(self) -> &'static str {
        match self {
            ChatMode::Normal => "normal",
            ChatMode::Orchestration => "orchestration",
            ChatMode::Testcase => "testcase",
        }
    }

    pub fn endpoint(self) -> &'static str {
        match self {
            ChatMode::Normal => "api/chat/normal/stream",
            ChatMode::Orchestration => "api/v1/normal_chat/stream_aitest",
            ChatMode::Testcase => "api/chat/testcase/stream",
        }
    }

    /// Response header carrying the backend session id for this mode.
    pub fn session_header(self) -> &'static str {
        match self {
            ChatMode::Orchestration => "x-session-id",
            ChatMode::Normal | ChatMode::Testcase => "X-Conversation-ID",
        }
    }

    pub fn storage_key(self) -> String {
        format!("{}_conversation_id", self.as_str())
    }

    /// Team mode: assistant replies carry one transcript per agent.
    pub fn is_team(self) -> bool {
        self == ChatMode::Testcase
    }
}

impl fmt::Display for ChatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ChatMode {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_ascii_lowercase().as_str() {
            "normal" => Ok(ChatMode::Normal),
            "orchestration" => Ok(ChatMode::Orchestration),
            "testcase" => Ok(ChatMode::Testcase),
            _ => Err(format!(
                "invalid chat mode: {value} (expected normal, orchestration or testcase)"
            )),
        }
    }
}

impl TryFrom<String> for ChatMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::try_from(value.as_str())
    }
}

impl FromStr for ChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s)
    }
}

impl From<ChatMode> for String {
    fn from(value: ChatMode) -> Self {
        value.as_str().to_string()
    }
}
