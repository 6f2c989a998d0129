//! Folds parsed stream events into a [`Conversation`].
//!
//! A [`Turn`] remembers which messages the current request owns and carries
//! the display gate for team-mode agents. Every mutation happens inside
//! [`Turn::apply`], so the read loop stays a plain decode/parse/apply pipe.

use super::conversation::{Conversation, PendingFeedback};
use super::event::Event;
use super::gate::AgentGate;
use super::message::{AgentTranscript, AssistantMessage, FeedbackRequest, MessageBody, MessageId};
use tracing::debug;

/// What the read loop should do after an event was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
    Errored,
    AwaitFeedback,
}

/// Out-of-band text for the user that does not live in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Status(String),
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub flow: Flow,
    pub notice: Option<Notice>,
}

impl Reduction {
    fn proceed() -> Self {
        Self {
            flow: Flow::Continue,
            notice: None,
        }
    }

    fn flow(flow: Flow) -> Self {
        Self { flow, notice: None }
    }
}

#[derive(Debug, Clone)]
pub struct Turn {
    pub user_message_id: MessageId,
    pub assistant_message_id: MessageId,
    pub user_text: String,
    gate: AgentGate,
}

impl Turn {
    pub fn new(
        user_message_id: MessageId,
        assistant_message_id: MessageId,
        user_text: impl Into<String>,
        gate: AgentGate,
    ) -> Self {
        Self {
            user_message_id,
            assistant_message_id,
            user_text: user_text.into(),
            gate,
        }
    }

    pub fn apply(&mut self, conversation: &mut Conversation, event: Event) -> Reduction {
        match event {
            Event::TokenUsage { input, output } => {
                self.apply_tokens(conversation, input, output);
                Reduction::proceed()
            }
            Event::Unknown { kind } => {
                debug!(kind = %kind, "Ignoring unrecognised stream event");
                Reduction::proceed()
            }
            Event::StreamEnd => {
                if let Some(assistant) = self.streaming_assistant(conversation) {
                    assistant.streaming = false;
                }
                Reduction::flow(Flow::Finished)
            }
            Event::Status { content } => Reduction {
                flow: Flow::Continue,
                notice: Some(Notice::Status(content)),
            },
            Event::FeedbackRequested {
                agent_name,
                agent_role,
                available_agents,
            } => {
                let request = FeedbackRequest {
                    agent_name,
                    agent_role,
                    available_agents,
                    origin_session_id: conversation.session_id.clone(),
                };
                self.apply_feedback(conversation, request)
            }
            other => self.apply_to_assistant(conversation, other),
        }
    }

    /// Finalize after the caller cancelled. The partial reply is kept.
    pub fn finish_cancelled(&mut self, conversation: &mut Conversation) {
        if let Some(assistant) = self.streaming_assistant(conversation) {
            assistant.streaming = false;
        }
    }

    /// Finalize after a transport failure, replacing whatever was received.
    pub fn finish_failed(&mut self, conversation: &mut Conversation, text: &str) {
        let Some(message) = conversation.message_mut(self.assistant_message_id) else {
            return;
        };
        if let MessageBody::Assistant(assistant) = &mut message.body {
            if !assistant.streaming {
                return;
            }
            assistant.streaming = false;
            assistant.errored = true;
            message.content = text.to_string();
        }
    }

    /// Finalize when the body ended without a `[DONE]` frame.
    pub fn finish_stream_closed(&mut self, conversation: &mut Conversation) {
        self.finish_cancelled(conversation);
    }

    fn streaming_assistant<'a>(
        &self,
        conversation: &'a mut Conversation,
    ) -> Option<&'a mut AssistantMessage> {
        conversation
            .message_mut(self.assistant_message_id)
            .and_then(|message| message.as_assistant_mut())
            .filter(|assistant| assistant.streaming)
    }

    fn apply_tokens(
        &self,
        conversation: &mut Conversation,
        input: Option<u64>,
        output: Option<u64>,
    ) {
        if let Some(input) = input {
            if let Some(user) = conversation.last_user_message_with_content_mut(&self.user_text) {
                user.token_count_mut().input = Some(input);
            }
        }
        if let Some(output) = output {
            if let Some(assistant) = conversation.message_mut(self.assistant_message_id) {
                assistant.token_count_mut().output = Some(output);
            }
        }
    }

    fn apply_feedback(
        &mut self,
        conversation: &mut Conversation,
        request: FeedbackRequest,
    ) -> Reduction {
        let Some(assistant) = self.streaming_assistant(conversation) else {
            return Reduction::proceed();
        };
        assistant.pending_feedback = Some(request.clone());
        assistant.streaming = false;
        conversation.set_awaiting_feedback(PendingFeedback {
            message_id: self.assistant_message_id,
            request,
        });
        Reduction::flow(Flow::AwaitFeedback)
    }

    fn apply_to_assistant(&mut self, conversation: &mut Conversation, event: Event) -> Reduction {
        let Some(message) = conversation.message_mut(self.assistant_message_id) else {
            return Reduction::proceed();
        };
        let content = &mut message.content;
        let MessageBody::Assistant(assistant) = &mut message.body else {
            return Reduction::proceed();
        };
        if !assistant.streaming {
            debug!(kind = event.kind(), "Event after the reply was finalized");
            return Reduction::proceed();
        }

        match event {
            Event::Chunk { content: delta } => {
                content.push_str(&delta);
                Reduction::proceed()
            }
            Event::FullMessage { content: full } => {
                *content = full;
                assistant.streaming = false;
                Reduction::proceed()
            }
            Event::Error { content: error } => {
                *content = format!("Error: {error}");
                assistant.errored = true;
                assistant.streaming = false;
                Reduction {
                    flow: Flow::Errored,
                    notice: Some(Notice::Error(error)),
                }
            }
            Event::AgentStart { .. }
            | Event::AgentMessage { .. }
            | Event::AgentDone { .. }
            | Event::Done { .. }
                if !assistant.team_mode =>
            {
                debug!(kind = event.kind(), "Ignoring agent event outside team mode");
                Reduction::proceed()
            }
            Event::AgentStart {
                agent_name,
                agent_role,
            } => {
                if self.gate.record_start(&agent_name, &agent_role) {
                    let agent = transcript_entry(assistant, &agent_name);
                    agent.role = agent_role;
                    agent.content.clear();
                    agent.done = false;
                }
                Reduction::proceed()
            }
            Event::AgentMessage {
                agent_name,
                content: text,
            } => {
                if self.gate.record_message(&agent_name, &text) {
                    transcript_entry(assistant, &agent_name).content = text;
                }
                Reduction::proceed()
            }
            Event::AgentDone {
                agent_name,
                content: text,
            } => {
                let (visible, unlocked) = self.gate.record_done(&agent_name, &text);
                if visible {
                    let agent = transcript_entry(assistant, &agent_name);
                    agent.content = text;
                    agent.done = true;
                }
                for name in unlocked {
                    self.flush(assistant, &name);
                }
                Reduction::proceed()
            }
            Event::Done { .. } => {
                for agent in &mut assistant.agents {
                    agent.done = true;
                }
                Reduction::proceed()
            }
            Event::TokenUsage { .. }
            | Event::StreamEnd
            | Event::Unknown { .. }
            | Event::Status { .. }
            | Event::FeedbackRequested { .. } => Reduction::proceed(),
        }
    }

    /// Copy a newly visible agent's buffered state into the transcript list.
    fn flush(&self, assistant: &mut AssistantMessage, agent_name: &str) {
        let Some(buffer) = self.gate.buffered(agent_name) else {
            return;
        };
        if !buffer.started {
            return;
        }
        let agent = transcript_entry(assistant, agent_name);
        agent.role = buffer.role.clone();
        agent.content = buffer.content.clone();
        agent.done = buffer.completed;
    }
}

fn transcript_entry<'a>(assistant: &'a mut AssistantMessage, name: &str) -> &'a mut AgentTranscript {
    let index = match assistant.agents.iter().position(|agent| agent.name == name) {
        Some(index) => index,
        None => {
            assistant.agents.push(AgentTranscript::new(name, name));
            assistant.agents.len() - 1
        }
    };
    &mut assistant.agents[index]
}
