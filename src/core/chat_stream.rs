use futures_util::{Stream, StreamExt};
use reqwest::header::HeaderMap;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{
    ChatRequest, FileParseResponse, OrchestrationChatRequest, StandardChatRequest,
};
use crate::core::attachments::AttachmentSet;
use crate::core::conversation::{Conversation, ConversationBusy};
use crate::core::event::parse_line;
use crate::core::gate::AgentGate;
use crate::core::mention::MentionPattern;
use crate::core::message::{FeedbackRequest, MessageId};
use crate::core::mode::ChatMode;
use crate::core::reducer::{Flow, Notice, Turn};
use crate::core::session::SessionRegistry;
use crate::core::sse::SseLineBuffer;
use crate::utils::url::{endpoint_url, normalize_base_url};

#[cfg(test)]
mod tests;

pub const TRANSPORT_FAILURE_MESSAGE: &str = "Failed to get a response. Please try again.";
pub const APPROVE_MESSAGE: &str = "Approve";
pub const FILE_PARSE_ENDPOINT: &str = "api/files/parse";

/// Feedback routing supplied by the caller instead of being inferred from
/// the conversation, as the approve action does.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManualFeedback {
    pub session_id: Option<String>,
    pub target_agent: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub manual_feedback: Option<ManualFeedback>,
    pub file_ids: Vec<String>,
    pub cancel_token: CancellationToken,
}

/// How a submission is addressed to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRoute {
    pub is_feedback: bool,
    pub session_id: Option<String>,
    pub target_agent: Option<String>,
}

impl TurnRoute {
    pub fn request_body(&self, mode: ChatMode, message: &str, file_ids: Vec<String>) -> ChatRequest {
        match mode {
            ChatMode::Orchestration => ChatRequest::Orchestration(OrchestrationChatRequest {
                message: message.to_string(),
                session_id: self.session_id.clone(),
                file_ids,
                is_feedback: self.is_feedback,
            }),
            ChatMode::Normal | ChatMode::Testcase => ChatRequest::Standard(StandardChatRequest {
                message: message.to_string(),
                file_ids,
                is_feedback: self.is_feedback,
                conversation_id: self.session_id.clone(),
                target_agent: self.target_agent.clone(),
            }),
        }
    }
}

/// Decide whether `text` is feedback and which session it belongs to.
///
/// Feedback replies go to the session that asked for them, even if the
/// registry has moved on since. Regular turns use the registry, then the
/// conversation, then the newest assistant backup.
pub fn resolve_route(
    conversation: &Conversation,
    registry: &SessionRegistry,
    mention: &MentionPattern,
    text: &str,
    manual: Option<&ManualFeedback>,
) -> TurnRoute {
    if let Some(manual) = manual {
        return TurnRoute {
            is_feedback: true,
            session_id: manual.session_id.clone(),
            target_agent: manual.target_agent.clone(),
        };
    }

    if let Some(pending) = conversation.awaiting_feedback() {
        return TurnRoute {
            is_feedback: true,
            session_id: pending.request.origin_session_id.clone(),
            target_agent: mention.extract(text),
        };
    }

    let mode = conversation.mode();
    let session_id = registry
        .get(mode)
        .or_else(|| conversation.session_id.clone())
        .or_else(|| conversation.last_session_backup().map(str::to_string));
    if session_id.is_none() && !conversation.is_empty() {
        warn!(mode = %mode, "No session id for a conversation with history; the backend will start a new session");
    }

    TurnRoute {
        is_feedback: false,
        session_id,
        target_agent: None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The backend sent an error event; the text is also on the message.
    BackendError(String),
    AwaitingFeedback(FeedbackRequest),
    Cancelled,
    TimedOut,
    /// Connect error, non-success status or body read error.
    Failed(String),
}

#[derive(Debug)]
pub enum TurnError {
    EmptyMessage,
    Busy(ConversationBusy),
    NoPendingFeedback,
    UnknownMessage(MessageId),
}

impl fmt::Display for TurnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnError::EmptyMessage => f.write_str("cannot send an empty message"),
            TurnError::Busy(busy) => write!(f, "{busy}"),
            TurnError::NoPendingFeedback => f.write_str("no agent is waiting for feedback"),
            TurnError::UnknownMessage(id) => write!(f, "no user message with id {id}"),
        }
    }
}

impl StdError for TurnError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            TurnError::Busy(busy) => Some(busy),
            _ => None,
        }
    }
}

impl From<ConversationBusy> for TurnError {
    fn from(busy: ConversationBusy) -> Self {
        TurnError::Busy(busy)
    }
}

#[derive(Debug)]
pub enum UploadError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Request(reqwest::Error),
    Status {
        status: StatusCode,
        detail: Option<String>,
    },
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Read { path, source } => {
                write!(f, "Failed to read {}: {}", path.display(), source)
            }
            UploadError::Request(err) => write!(f, "Upload request failed: {err}"),
            UploadError::Status {
                status,
                detail: Some(detail),
            } => write!(f, "Upload rejected ({status}): {detail}"),
            UploadError::Status { status, detail: None } => {
                write!(f, "Upload rejected ({status})")
            }
        }
    }
}

impl StdError for UploadError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            UploadError::Read { source, .. } => Some(source),
            UploadError::Request(err) => Some(err),
            UploadError::Status { .. } => None,
        }
    }
}

/// Receives state changes while a turn runs. Both hooks default to no-ops.
pub trait TurnObserver: Send {
    fn on_update(&mut self, _conversation: &Conversation, _message_id: MessageId) {}
    fn on_notice(&mut self, _notice: &Notice) {}
}

pub struct NoopObserver;

impl TurnObserver for NoopObserver {}

/// Thin HTTP client for the chat backend.
#[derive(Debug, Clone)]
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
}

impl ChatClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: normalize_base_url(&base_url.into()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// POST a chat body and return the response once headers arrive.
    /// Non-success statuses are errors.
    pub async fn open_stream(
        &self,
        mode: ChatMode,
        body: &ChatRequest,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let url = endpoint_url(&self.base_url, mode.endpoint());
        self.http
            .post(url)
            .header("Accept", "text/event-stream")
            .json(body)
            .send()
            .await?
            .error_for_status()
    }

    /// Upload files for server-side parsing. Results come back in upload
    /// order.
    pub async fn parse_files(&self, paths: &[PathBuf]) -> Result<FileParseResponse, UploadError> {
        let mut form = Form::new();
        for path in paths {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| UploadError::Read {
                    path: path.clone(),
                    source,
                })?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload".to_string());
            form = form.part("files", Part::bytes(bytes).file_name(file_name));
        }
        let form = form
            .text("max_concurrent", "3")
            .text("output_format", "markdown");

        let url = endpoint_url(&self.base_url, FILE_PARSE_ENDPOINT);
        let response = self
            .http
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(UploadError::Request)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response
                .json::<serde_json::Value>()
                .await
                .ok()
                .and_then(|value| {
                    value
                        .get("detail")
                        .and_then(serde_json::Value::as_str)
                        .map(str::to_string)
                });
            return Err(UploadError::Status { status, detail });
        }

        response
            .json::<FileParseResponse>()
            .await
            .map_err(UploadError::Request)
    }

    /// Upload every pending attachment in one batch and record the results.
    /// On failure the whole batch is marked failed with the error text.
    pub async fn upload_attachments(&self, attachments: &mut AttachmentSet) -> Result<usize, UploadError> {
        let (batch, paths): (Vec<u64>, Vec<PathBuf>) = attachments.pending().into_iter().unzip();
        if batch.is_empty() {
            return Ok(0);
        }

        match self.parse_files(&paths).await {
            Ok(response) => {
                info!(
                    total = response.total,
                    succeeded = response.success_count,
                    failed = response.failed_count,
                    "Parsed attachments"
                );
                attachments.apply_results(&batch, &response.results);
                Ok(response.success_count)
            }
            Err(err) => {
                attachments.mark_failed(&batch, &err.to_string());
                Err(err)
            }
        }
    }
}

/// Runs turns against the backend and folds the streamed reply into a
/// conversation.
#[derive(Debug, Clone)]
pub struct TurnOrchestrator {
    client: ChatClient,
    registry: Arc<SessionRegistry>,
    mention: MentionPattern,
    gates: HashMap<ChatMode, Vec<String>>,
    timeout: Option<Duration>,
}

impl TurnOrchestrator {
    pub fn new(client: ChatClient, registry: Arc<SessionRegistry>) -> Self {
        Self {
            client,
            registry,
            mention: MentionPattern::default(),
            gates: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_mention_pattern(mut self, mention: MentionPattern) -> Self {
        self.mention = mention;
        self
    }

    pub fn with_gate(mut self, mode: ChatMode, chain: Vec<String>) -> Self {
        if chain.is_empty() {
            self.gates.remove(&mode);
        } else {
            self.gates.insert(mode, chain);
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn client(&self) -> &ChatClient {
        &self.client
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn mention_pattern(&self) -> &MentionPattern {
        &self.mention
    }

    /// Configured display order for `mode`, if any.
    pub fn gate_chain(&self, mode: ChatMode) -> Option<&[String]> {
        self.gates.get(&mode).map(Vec::as_slice)
    }

    fn gate_for(&self, mode: ChatMode) -> AgentGate {
        self.gates
            .get(&mode)
            .cloned()
            .map(AgentGate::new)
            .unwrap_or_else(AgentGate::transparent)
    }

    /// Send `text` as a new turn in `conversation` and stream the reply into
    /// it. Returns once the reply completed, errored, paused for feedback,
    /// was cancelled or timed out.
    pub async fn submit_turn(
        &self,
        conversation: &mut Conversation,
        text: &str,
        options: TurnOptions,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        if text.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        if conversation.is_streaming() {
            return Err(TurnError::Busy(ConversationBusy));
        }

        let TurnOptions {
            manual_feedback,
            file_ids,
            cancel_token,
        } = options;
        let mode = conversation.mode();
        let route = resolve_route(
            conversation,
            &self.registry,
            &self.mention,
            text,
            manual_feedback.as_ref(),
        );
        if route.is_feedback {
            conversation.clear_pending_feedback();
        }

        let (user_id, assistant_id) = conversation.begin_turn(text, file_ids.len())?;
        observer.on_update(conversation, assistant_id);
        debug!(
            mode = %mode,
            stream_id = assistant_id,
            is_feedback = route.is_feedback,
            session_id = route.session_id.as_deref().unwrap_or("<none>"),
            target_agent = route.target_agent.as_deref().unwrap_or("<none>"),
            "Starting turn"
        );

        let body = route.request_body(mode, text, file_ids);
        let mut turn = Turn::new(user_id, assistant_id, text, self.gate_for(mode));

        let cancel = cancel_token.child_token();
        let timer = self.timeout.map(|limit| {
            let token = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(limit).await;
                token.cancel();
            })
        });

        let outcome = self
            .run_turn(mode, conversation, &mut turn, &body, &cancel, observer)
            .await;

        if let Some(timer) = timer {
            timer.abort();
        }

        if outcome == TurnOutcome::Cancelled && !cancel_token.is_cancelled() {
            warn!(mode = %mode, stream_id = assistant_id, "Turn timed out");
            return Ok(TurnOutcome::TimedOut);
        }
        Ok(outcome)
    }

    /// Approve the pending feedback request, replying in the session that
    /// asked for it.
    pub async fn approve(
        &self,
        conversation: &mut Conversation,
        options: TurnOptions,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        let pending = conversation
            .awaiting_feedback()
            .ok_or(TurnError::NoPendingFeedback)?;
        let manual = ManualFeedback {
            session_id: pending.request.origin_session_id.clone(),
            target_agent: None,
        };
        let options = TurnOptions {
            manual_feedback: Some(manual),
            ..options
        };
        self.submit_turn(conversation, APPROVE_MESSAGE, options, observer)
            .await
    }

    /// Reply to the pending feedback request, addressed to `target_agent`
    /// regardless of any mention in `text`.
    pub async fn send_feedback(
        &self,
        conversation: &mut Conversation,
        text: &str,
        target_agent: &str,
        options: TurnOptions,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        let pending = conversation
            .awaiting_feedback()
            .ok_or(TurnError::NoPendingFeedback)?;
        let manual = ManualFeedback {
            session_id: pending.request.origin_session_id.clone(),
            target_agent: Some(target_agent.to_string()),
        };
        let options = TurnOptions {
            manual_feedback: Some(manual),
            ..options
        };
        self.submit_turn(conversation, text, options, observer).await
    }

    /// Send an earlier user message again as a new turn.
    pub async fn resend(
        &self,
        conversation: &mut Conversation,
        message_id: MessageId,
        options: TurnOptions,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        let text = conversation
            .message(message_id)
            .filter(|message| message.is_user())
            .map(|message| message.content.clone())
            .ok_or(TurnError::UnknownMessage(message_id))?;
        self.submit_turn(conversation, &text, options, observer).await
    }

    /// Replace an earlier user message's text, then send it as a new turn.
    pub async fn edit_and_resend(
        &self,
        conversation: &mut Conversation,
        message_id: MessageId,
        text: &str,
        options: TurnOptions,
        observer: &mut dyn TurnObserver,
    ) -> Result<TurnOutcome, TurnError> {
        if text.trim().is_empty() {
            return Err(TurnError::EmptyMessage);
        }
        if conversation.is_streaming() {
            return Err(TurnError::Busy(ConversationBusy));
        }
        if !conversation.edit_user_message(message_id, text) {
            return Err(TurnError::UnknownMessage(message_id));
        }
        self.submit_turn(conversation, text, options, observer).await
    }

    async fn run_turn(
        &self,
        mode: ChatMode,
        conversation: &mut Conversation,
        turn: &mut Turn,
        body: &ChatRequest,
        cancel: &CancellationToken,
        observer: &mut dyn TurnObserver,
    ) -> TurnOutcome {
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                turn.finish_cancelled(conversation);
                observer.on_update(conversation, turn.assistant_message_id);
                return TurnOutcome::Cancelled;
            }
            response = self.client.open_stream(mode, body) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                warn!(mode = %mode, stream_id = turn.assistant_message_id, error = %err, "Chat request failed");
                turn.finish_failed(conversation, TRANSPORT_FAILURE_MESSAGE);
                observer.on_update(conversation, turn.assistant_message_id);
                return TurnOutcome::Failed(err.to_string());
            }
        };

        self.record_session(mode, conversation, turn, response.headers());
        drive_stream(response.bytes_stream(), conversation, turn, cancel, observer).await
    }

    /// Store the session id from the response headers before any of the body
    /// is read.
    fn record_session(
        &self,
        mode: ChatMode,
        conversation: &mut Conversation,
        turn: &Turn,
        headers: &HeaderMap,
    ) {
        let header = mode.session_header();
        let Some(session_id) = headers
            .get(header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            warn!(mode = %mode, header, "Response carried no session id header");
            return;
        };

        debug!(mode = %mode, session_id, "Session id from response headers");
        if let Err(err) = self.registry.set(mode, session_id) {
            warn!(mode = %mode, error = %err, "Could not persist session id");
        }
        conversation.session_id = Some(session_id.to_string());
        if let Some(assistant) = conversation
            .message_mut(turn.assistant_message_id)
            .and_then(|message| message.as_assistant_mut())
        {
            assistant.session_id = Some(session_id.to_string());
        }
    }
}

enum Read<T> {
    Cancelled,
    Next(Option<T>),
}

/// Feed a byte stream through the line decoder, event parser and reducer
/// until the reply ends, pauses for feedback, fails or `cancel` fires.
/// Returning drops the stream, which closes the connection.
pub async fn drive_stream<S, B, E>(
    stream: S,
    conversation: &mut Conversation,
    turn: &mut Turn,
    cancel: &CancellationToken,
    observer: &mut dyn TurnObserver,
) -> TurnOutcome
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: fmt::Display,
{
    let mut stream = pin!(stream);
    let mut decoder = SseLineBuffer::default();
    let message_id = turn.assistant_message_id;

    loop {
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => Read::Cancelled,
            chunk = stream.next() => Read::Next(chunk),
        };

        let bytes = match read {
            Read::Cancelled => {
                debug!(stream_id = message_id, "Turn cancelled");
                turn.finish_cancelled(conversation);
                observer.on_update(conversation, message_id);
                return TurnOutcome::Cancelled;
            }
            Read::Next(None) => {
                decoder.finish();
                turn.finish_stream_closed(conversation);
                observer.on_update(conversation, message_id);
                return TurnOutcome::Completed;
            }
            Read::Next(Some(Err(err))) => {
                warn!(stream_id = message_id, error = %err, "Failed reading response body");
                turn.finish_failed(conversation, TRANSPORT_FAILURE_MESSAGE);
                observer.on_update(conversation, message_id);
                return TurnOutcome::Failed(err.to_string());
            }
            Read::Next(Some(Ok(bytes))) => bytes,
        };

        for line in decoder.push(bytes.as_ref()) {
            let Some(event) = parse_line(&line) else {
                continue;
            };
            let reduction = turn.apply(conversation, event);
            observer.on_update(conversation, message_id);
            if let Some(notice) = &reduction.notice {
                observer.on_notice(notice);
            }

            match reduction.flow {
                Flow::Continue => {}
                Flow::Finished => return TurnOutcome::Completed,
                Flow::Errored => {
                    let text = match reduction.notice {
                        Some(Notice::Error(text)) => text,
                        _ => String::new(),
                    };
                    return TurnOutcome::BackendError(text);
                }
                Flow::AwaitFeedback => {
                    debug!(stream_id = message_id, "Pausing turn for feedback");
                    return match conversation.awaiting_feedback() {
                        Some(pending) => TurnOutcome::AwaitingFeedback(pending.request.clone()),
                        None => TurnOutcome::Completed,
                    };
                }
            }
        }
    }
}
