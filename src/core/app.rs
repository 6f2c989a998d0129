//! Client state shared by the interactive chat and one-shot commands.

use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::attachments::AttachmentSet;
use crate::core::chat_stream::{
    ChatClient, TurnError, TurnObserver, TurnOptions, TurnOrchestrator, TurnOutcome, UploadError,
};
use crate::core::config::data::Config;
use crate::core::conversation::Conversation;
use crate::core::export::save_markdown;
use crate::core::message::MessageId;
use crate::core::mode::ChatMode;
use crate::core::session::{FileSessionStore, SessionRegistry, SessionStore};
use crate::utils::logging::TranscriptLog;
use crate::utils::url::is_http_url;

/// Command-line overrides applied on top of `config.toml`.
#[derive(Debug, Clone, Default)]
pub struct AppInitConfig {
    pub mode: Option<ChatMode>,
    pub base_url: Option<String>,
    pub log_file: Option<PathBuf>,
}

/// What to send for the next turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnRequest {
    Message(String),
    Approve,
    /// Feedback for the waiting team, addressed to one agent.
    Feedback { text: String, target_agent: String },
    Resend(MessageId),
    Edit { id: MessageId, text: String },
}

pub struct App {
    orchestrator: TurnOrchestrator,
    mode: ChatMode,
    conversations: HashMap<ChatMode, Conversation>,
    pub attachments: AttachmentSet,
    pub logging: TranscriptLog,
    pub export_dir: PathBuf,
    status: Vec<String>,
}

/// Build the orchestrator described by `config`, talking to `base_url`.
pub fn build_orchestrator(
    config: &Config,
    base_url: &str,
    registry: Arc<SessionRegistry>,
) -> Result<TurnOrchestrator, Box<dyn Error>> {
    if !is_http_url(base_url) {
        return Err(format!("Backend URL must start with http:// or https://: {base_url}").into());
    }

    let mut orchestrator = TurnOrchestrator::new(ChatClient::new(base_url), registry)
        .with_mention_pattern(config.mention()?)
        .with_timeout(config.turn_timeout());
    for mode in ChatMode::ALL {
        orchestrator = orchestrator.with_gate(mode, config.gate_for(mode));
    }
    Ok(orchestrator)
}

/// Registry backed by the configured session file, or memory when there is
/// nowhere to keep it.
pub fn session_registry(config: &Config) -> SessionRegistry {
    let path = config
        .session_file
        .clone()
        .or_else(FileSessionStore::default_path);
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Using session file");
            let store: Box<dyn SessionStore> = Box::new(FileSessionStore::new(path));
            SessionRegistry::new(store)
        }
        None => {
            warn!("No data directory available; session ids will not be kept between runs");
            SessionRegistry::in_memory()
        }
    }
}

pub fn new_with_config(init: AppInitConfig, config: &Config) -> Result<App, Box<dyn Error>> {
    let base_url = init
        .base_url
        .unwrap_or_else(|| config.resolved_base_url());
    let registry = Arc::new(session_registry(config));
    let orchestrator = build_orchestrator(config, &base_url, registry)?;
    let mode = match init.mode {
        Some(mode) => mode,
        None => config.default_mode()?,
    };
    let export_dir = config
        .export_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("."));

    let mut app = App::new(orchestrator, mode, export_dir);
    app.logging = TranscriptLog::new(init.log_file)?;
    Ok(app)
}

impl App {
    pub fn new(orchestrator: TurnOrchestrator, mode: ChatMode, export_dir: PathBuf) -> Self {
        Self {
            orchestrator,
            mode,
            conversations: HashMap::new(),
            attachments: AttachmentSet::default(),
            logging: TranscriptLog::default(),
            export_dir,
            status: Vec::new(),
        }
    }

    pub fn mode(&self) -> ChatMode {
        self.mode
    }

    pub fn orchestrator(&self) -> &TurnOrchestrator {
        &self.orchestrator
    }

    /// Conversations are kept per mode; switching back resumes where it left off.
    pub fn switch_mode(&mut self, mode: ChatMode) {
        self.mode = mode;
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversations.get(&self.mode)
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        let mode = self.mode;
        self.conversations
            .entry(mode)
            .or_insert_with(|| Conversation::new(mode))
    }

    pub fn session_id(&self) -> Option<String> {
        self.orchestrator.registry().get(self.mode)
    }

    /// Drop the current mode's history and forget its backend session.
    pub fn clear_conversation(&mut self) {
        self.conversation_mut().clear();
        if let Err(err) = self.orchestrator.registry().clear(self.mode) {
            warn!(mode = %self.mode, error = %err, "Could not clear stored session id");
            self.set_status(format!("Cleared, but the stored session id remains: {err}"));
        }
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.status.push(status.into());
    }

    pub fn take_status(&mut self) -> Vec<String> {
        std::mem::take(&mut self.status)
    }

    pub async fn upload_attachments(&mut self) -> Result<usize, UploadError> {
        let client = self.orchestrator.client().clone();
        client.upload_attachments(&mut self.attachments).await
    }

    /// Run one turn in the current mode. Successfully parsed attachments ride
    /// along with new messages and are cleared once the turn starts.
    pub async fn run_turn(
        &mut self,
        request: TurnRequest,
        cancel_token: CancellationToken,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        let file_ids = match request {
            TurnRequest::Message(_) => self.attachments.file_ids(),
            _ => Vec::new(),
        };
        let options = TurnOptions {
            file_ids,
            cancel_token,
            ..Default::default()
        };

        let mode = self.mode;
        let conversation = self
            .conversations
            .entry(mode)
            .or_insert_with(|| Conversation::new(mode));
        let orchestrator = &self.orchestrator;
        let outcome = match &request {
            TurnRequest::Message(text) => {
                orchestrator
                    .submit_turn(conversation, text, options, observer)
                    .await
            }
            TurnRequest::Approve => orchestrator.approve(conversation, options, observer).await,
            TurnRequest::Feedback { text, target_agent } => {
                orchestrator
                    .send_feedback(conversation, text, target_agent, options, observer)
                    .await
            }
            TurnRequest::Resend(id) => {
                orchestrator
                    .resend(conversation, *id, options, observer)
                    .await
            }
            TurnRequest::Edit { id, text } => {
                orchestrator
                    .edit_and_resend(conversation, *id, text, options, observer)
                    .await
            }
        }?;

        if matches!(request, TurnRequest::Message(_)) {
            self.attachments.clear();
        }
        self.log_last_turn();
        Ok(outcome)
    }

    fn log_last_turn(&mut self) {
        if !self.logging.is_active() {
            return;
        }
        let Some(conversation) = self.conversations.get(&self.mode) else {
            return;
        };
        let turn = [
            conversation.last_user_message(),
            conversation.last_assistant_message(),
        ];
        let result = turn
            .into_iter()
            .flatten()
            .try_for_each(|message| self.logging.log_message(message));
        if let Err(err) = result {
            self.set_status(format!("Log error: {err}"));
        }
    }

    /// Save the newest reply as markdown in the export directory.
    pub fn save_last_reply(&self) -> Result<PathBuf, Box<dyn Error>> {
        let message = self
            .conversation()
            .and_then(Conversation::last_assistant_message)
            .ok_or("There is no reply to save yet.")?;
        Ok(save_markdown(message, &self.export_dir, Utc::now())?)
    }
}
