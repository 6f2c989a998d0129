//! Plain-text and markdown renderings of assistant replies.

use super::message::{AgentTranscript, Message};
use chrono::{DateTime, Local, Utc};
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const AGENT_SEPARATOR: &str = "\n\n---\n\n";

#[derive(Debug)]
pub enum ExportError {
    NotAnAssistantMessage,
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::NotAnAssistantMessage => f.write_str("only assistant replies can be exported"),
            ExportError::Write { path, source } => {
                write!(f, "Failed to write {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for ExportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ExportError::NotAnAssistantMessage => None,
            ExportError::Write { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDocument {
    pub file_name: String,
    pub contents: String,
}

fn team_agents(message: &Message) -> Option<&[AgentTranscript]> {
    message
        .as_assistant()
        .filter(|assistant| assistant.team_mode)
        .map(|assistant| assistant.agents.as_slice())
}

/// Reply as plain text. Team replies list every agent under its own heading.
pub fn message_text(message: &Message) -> Result<String, ExportError> {
    if !message.is_assistant() {
        return Err(ExportError::NotAnAssistantMessage);
    }
    Ok(match team_agents(message) {
        Some(agents) => agents
            .iter()
            .map(|agent| format!("## {}\n\n{}", agent.name, agent.content))
            .collect::<Vec<_>>()
            .join(AGENT_SEPARATOR),
        None => message.content.clone(),
    })
}

pub fn markdown_document(
    message: &Message,
    generated_at: DateTime<Utc>,
) -> Result<ExportDocument, ExportError> {
    if !message.is_assistant() {
        return Err(ExportError::NotAnAssistantMessage);
    }

    let stamp = generated_at.format("%Y-%m-%dT%H-%M-%S");
    let local = generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
    let document = match team_agents(message) {
        Some(agents) => {
            let mut contents = format!("# Test Case Team Reply\n\nGenerated: {local}\n\n---\n\n");
            for agent in agents {
                contents.push_str(&format!("## {}\n\n{}\n\n---\n\n", agent.name, agent.content));
            }
            ExportDocument {
                file_name: format!("testcase-team-{stamp}.md"),
                contents,
            }
        }
        None => ExportDocument {
            file_name: format!("ai-response-{stamp}.md"),
            contents: format!("# AI Reply\n\nGenerated: {local}\n\n---\n\n{}", message.content),
        },
    };
    Ok(document)
}

/// Write the markdown export into `dir`, replacing any file of the same name
/// atomically. Returns the written path.
pub fn save_markdown(
    message: &Message,
    dir: &Path,
    generated_at: DateTime<Utc>,
) -> Result<PathBuf, ExportError> {
    let document = markdown_document(message, generated_at)?;
    let path = dir.join(&document.file_name);
    let write_error = |source| ExportError::Write {
        path: path.clone(),
        source,
    };

    fs::create_dir_all(dir).map_err(write_error)?;
    let mut temp_file = NamedTempFile::new_in(dir).map_err(write_error)?;
    temp_file
        .write_all(document.contents.as_bytes())
        .map_err(write_error)?;
    temp_file
        .persist(&path)
        .map_err(|err| write_error(err.error))?;
    Ok(path)
}
