//! Plain terminal rendering of streamed replies.

use std::collections::HashMap;
use std::io::{self, Write};

use tracing::debug;

use crate::core::chat_stream::{TurnObserver, TurnOutcome};
use crate::core::conversation::Conversation;
use crate::core::mention::short_agent_name;
use crate::core::message::MessageId;
use crate::core::reducer::Notice;

/// Prints reply text as it grows. Team replies get a `[Agent]` heading
/// whenever output moves to a different agent. Text that was rewritten
/// rather than extended is printed again in full on a new line.
pub struct StreamPrinter<W: Write> {
    out: W,
    shown: HashMap<String, String>,
    current: Option<String>,
    mid_line: bool,
}

impl<W: Write> StreamPrinter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: HashMap::new(),
            current: None,
            mid_line: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn show(&mut self, key: &str, heading: Option<&str>, text: &str) -> io::Result<()> {
        let shown = self.shown.entry(key.to_string()).or_default();
        if text == shown.as_str() {
            return Ok(());
        }

        let switched = self.current.as_deref() != Some(key);
        if switched {
            if self.mid_line {
                writeln!(self.out)?;
            }
            if let Some(heading) = heading {
                writeln!(self.out, "[{heading}]")?;
            }
            self.current = Some(key.to_string());
        }

        match text.strip_prefix(shown.as_str()) {
            Some(suffix) => write!(self.out, "{suffix}")?,
            _ => {
                if !switched {
                    writeln!(self.out)?;
                }
                write!(self.out, "{text}")?;
            }
        }
        *shown = text.to_string();
        self.mid_line = !text.ends_with('\n');
        self.out.flush()
    }

    fn render(&mut self, conversation: &Conversation, message_id: MessageId) -> io::Result<()> {
        let Some(message) = conversation.message(message_id) else {
            return Ok(());
        };
        match message.as_assistant() {
            Some(assistant) if assistant.team_mode && !assistant.agents.is_empty() => {
                for agent in &assistant.agents {
                    let key = format!("{message_id}:{}", agent.name);
                    self.show(&key, Some(short_agent_name(&agent.name)), &agent.content)?;
                }
                Ok(())
            }
            Some(_) => self.show(&message_id.to_string(), None, &message.content),
            None => Ok(()),
        }
    }

    fn note(&mut self, text: &str) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
        }
        writeln!(self.out, "({text})")?;
        self.mid_line = false;
        self.current = None;
        self.out.flush()
    }

    /// End the current line, if any, once a turn is over.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.mid_line {
            writeln!(self.out)?;
        }
        self.mid_line = false;
        self.current = None;
        self.out.flush()
    }
}

impl<W: Write + Send> TurnObserver for StreamPrinter<W> {
    fn on_update(&mut self, conversation: &Conversation, message_id: MessageId) {
        if let Err(err) = self.render(conversation, message_id) {
            debug!(error = %err, "Failed to print reply");
        }
    }

    fn on_notice(&mut self, notice: &Notice) {
        let result = match notice {
            Notice::Status(text) => self.note(text),
            Notice::Error(text) => self.note(&format!("error: {text}")),
        };
        if let Err(err) = result {
            debug!(error = %err, "Failed to print notice");
        }
    }
}

/// One-line summary for outcomes the streamed text does not already explain.
pub fn outcome_message(outcome: &TurnOutcome) -> Option<String> {
    match outcome {
        TurnOutcome::Completed | TurnOutcome::BackendError(_) => None,
        TurnOutcome::AwaitingFeedback(request) => {
            let mut text = format!(
                "{} ({}) is waiting for your feedback. Reply, /approve, or /to <agent> <feedback>.",
                short_agent_name(&request.agent_name),
                request.agent_role
            );
            if !request.available_agents.is_empty() {
                let names: Vec<&str> = request
                    .available_agents
                    .iter()
                    .map(|name| short_agent_name(name))
                    .collect();
                text.push_str(&format!(" Agents: {}", names.join(", ")));
            }
            Some(text)
        }
        TurnOutcome::Cancelled => Some("Reply cancelled.".to_string()),
        TurnOutcome::TimedOut => Some("Reply timed out.".to_string()),
        TurnOutcome::Failed(detail) => Some(format!("Request failed: {detail}")),
    }
}
