use super::message::{FeedbackRequest, Message, MessageId};
use super::mode::ChatMode;
use std::fmt;

/// Feedback the backend is waiting on, with the assistant message that asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFeedback {
    pub message_id: MessageId,
    pub request: FeedbackRequest,
}

/// Returned when a turn is started while another is still streaming.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversationBusy;

impl fmt::Display for ConversationBusy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a reply is still streaming in this conversation")
    }
}

impl std::error::Error for ConversationBusy {}

/// Message history for one chat mode.
#[derive(Debug, Clone)]
pub struct Conversation {
    mode: ChatMode,
    pub session_id: Option<String>,
    messages: Vec<Message>,
    awaiting_feedback: Option<PendingFeedback>,
    next_id: MessageId,
}

impl Conversation {
    pub fn new(mode: ChatMode) -> Self {
        Self {
            mode,
            session_id: None,
            messages: Vec::new(),
            awaiting_feedback: None,
            next_id: 1,
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|message| message.id == id)
    }

    pub fn message_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|message| message.id == id)
    }

    pub fn is_streaming(&self) -> bool {
        self.messages.iter().any(Message::is_streaming)
    }

    pub fn streaming_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_streaming()).count()
    }

    pub fn awaiting_feedback(&self) -> Option<&PendingFeedback> {
        self.awaiting_feedback.as_ref()
    }

    pub(crate) fn set_awaiting_feedback(&mut self, pending: PendingFeedback) {
        self.awaiting_feedback = Some(pending);
    }

    /// Drop every pending feedback marker, conversation-wide and per message.
    pub fn clear_pending_feedback(&mut self) {
        self.awaiting_feedback = None;
        for message in &mut self.messages {
            if let Some(assistant) = message.as_assistant_mut() {
                assistant.pending_feedback = None;
            }
        }
    }

    /// Append a user message and its streaming assistant placeholder.
    pub fn begin_turn(
        &mut self,
        content: impl Into<String>,
        attached_file_count: usize,
    ) -> Result<(MessageId, MessageId), ConversationBusy> {
        if self.is_streaming() {
            return Err(ConversationBusy);
        }

        let user_id = self.allocate_id();
        let assistant_id = self.allocate_id();
        self.messages
            .push(Message::user(user_id, content, attached_file_count));
        self.messages.push(Message::assistant_placeholder(
            assistant_id,
            self.mode.is_team(),
        ));
        Ok((user_id, assistant_id))
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.session_id = None;
        self.awaiting_feedback = None;
    }

    /// Most recent session id stored on an assistant message as a backup.
    pub fn last_session_backup(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter_map(Message::as_assistant)
            .find_map(|assistant| assistant.session_id.as_deref())
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|message| message.is_user())
    }

    pub fn last_assistant_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.is_assistant())
    }

    /// Most recent user message whose text equals `content`.
    pub fn last_user_message_with_content_mut(&mut self, content: &str) -> Option<&mut Message> {
        self.messages
            .iter_mut()
            .rev()
            .find(|message| message.is_user() && message.content == content)
    }

    /// Replace the text of a user message. Returns false for unknown ids and
    /// assistant messages.
    pub fn edit_user_message(&mut self, id: MessageId, content: impl Into<String>) -> bool {
        match self.message_mut(id) {
            Some(message) if message.is_user() => {
                message.content = content.into();
                true
            }
            _ => false,
        }
    }

    fn allocate_id(&mut self) -> MessageId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}
