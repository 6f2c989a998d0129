use super::*;
use crate::core::message::{AssistantState, Message};
use crate::core::reducer::Notice;
use futures_util::stream;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::convert::Infallible;
use std::future::Future;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};

const DONE_FRAME: &str = "data: [DONE]\n\n";

fn frame(value: Value) -> String {
    format!("data: {value}\n\n")
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .expect("test timed out")
}

#[derive(Debug)]
struct CapturedRequest {
    request_line: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl CapturedRequest {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("request body should be JSON")
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

struct ScriptedResponse {
    status: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<String>,
    release: Option<oneshot::Receiver<()>>,
}

impl ScriptedResponse {
    fn sse(headers: Vec<(&'static str, String)>, body: Vec<String>) -> Self {
        let mut headers = headers;
        headers.push(("Content-Type", "text/event-stream".to_string()));
        Self {
            status: "200 OK",
            headers,
            body,
            release: None,
        }
    }

    fn json(status: &'static str, body: Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type", "application/json".to_string())],
            body: vec![body.to_string()],
            release: None,
        }
    }

    fn held_until(mut self, release: oneshot::Receiver<()>) -> Self {
        self.release = Some(release);
        self
    }
}

async fn read_http_request(stream: &mut TcpStream) -> Result<CapturedRequest, String> {
    let mut buffer = Vec::new();
    let mut header_end = None;
    while header_end.is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP headers".to_string());
        }
        buffer.extend_from_slice(&chunk[..read]);
        header_end = buffer
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .map(|index| index + 4);
    }

    let header_end = header_end.expect("header end should exist");
    let header_text = std::str::from_utf8(&buffer[..header_end]).map_err(|err| err.to_string())?;
    let mut lines = header_text.split("\r\n").filter(|line| !line.is_empty());
    let request_line = lines
        .next()
        .ok_or_else(|| "Missing HTTP request line".to_string())?
        .to_string();

    let mut headers = Vec::new();
    let mut content_length = 0_usize;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            content_length = value.parse::<usize>().map_err(|err| err.to_string())?;
        }
        headers.push((name.to_string(), value));
    }

    let mut body = buffer[header_end..].to_vec();
    while body.len() < content_length {
        let mut chunk = vec![0_u8; content_length - body.len()];
        let read = stream.read(&mut chunk).await.map_err(|err| err.to_string())?;
        if read == 0 {
            return Err("Unexpected EOF while reading HTTP body".to_string());
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        request_line,
        headers,
        body,
    })
}

async fn write_response(stream: &mut TcpStream, response: ScriptedResponse) {
    let mut head = format!("HTTP/1.1 {}\r\nConnection: close\r\n", response.status);
    for (name, value) in &response.headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");
    if stream.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    let _ = stream.flush().await;

    if let Some(release) = response.release {
        let _ = release.await;
    }
    for part in response.body {
        if stream.write_all(part.as_bytes()).await.is_err() {
            return;
        }
        let _ = stream.flush().await;
    }
    let _ = stream.shutdown().await;
}

/// Serves one scripted response per accepted connection, in order.
async fn spawn_server(
    responses: Vec<ScriptedResponse>,
) -> (String, mpsc::UnboundedReceiver<CapturedRequest>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener should bind");
    let addr = listener.local_addr().expect("local addr should resolve");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        for response in responses {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(request) = read_http_request(&mut stream).await else {
                return;
            };
            let _ = tx.send(request);
            write_response(&mut stream, response).await;
        }
    });

    (format!("http://{addr}"), rx)
}

fn test_client(base_url: &str) -> ChatClient {
    let http = reqwest::Client::builder()
        .no_proxy()
        .build()
        .expect("client should build");
    ChatClient::with_client(http, base_url)
}

fn orchestrator(base_url: &str) -> TurnOrchestrator {
    TurnOrchestrator::new(test_client(base_url), Arc::new(SessionRegistry::in_memory()))
}

#[derive(Default)]
struct Recorder {
    notices: Vec<Notice>,
    updates: usize,
}

impl TurnObserver for Recorder {
    fn on_update(&mut self, _conversation: &Conversation, _message_id: MessageId) {
        self.updates += 1;
    }

    fn on_notice(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

struct CancelWhenContentIs {
    token: CancellationToken,
    trigger: &'static str,
}

impl TurnObserver for CancelWhenContentIs {
    fn on_update(&mut self, conversation: &Conversation, message_id: MessageId) {
        if conversation
            .message(message_id)
            .is_some_and(|message| message.content == self.trigger)
        {
            self.token.cancel();
        }
    }
}

fn last_reply(conversation: &Conversation) -> (&Message, &crate::core::message::AssistantMessage) {
    let message = conversation
        .last_assistant_message()
        .expect("assistant message");
    let assistant = message.as_assistant().expect("assistant body");
    (message, assistant)
}

fn feedback_frames() -> Vec<String> {
    vec![
        frame(json!({"type": "agent_start", "content": "", "agent_name": "A", "agent_role": "Analyst"})),
        frame(json!({"type": "agent_message", "content": "fu", "agent_name": "A"})),
        frame(json!({"type": "agent_done", "content": "full", "agent_name": "A"})),
        frame(json!({
            "type": "feedback_request",
            "content": "",
            "agent_name": "A",
            "agent_role": "Analyst",
            "available_agents": ["Y", "X"]
        })),
        frame(json!({"type": "chunk", "content": "late"})),
        DONE_FRAME.to_string(),
    ]
}

#[tokio::test]
async fn happy_path_streams_chunks_and_records_session() {
    let (base_url, mut requests) = spawn_server(vec![ScriptedResponse::sse(
        vec![("X-Conversation-ID", "conv-1".to_string())],
        vec![
            frame(json!({"type": "chunk", "content": "hi"})),
            frame(json!({"type": "chunk", "content": " there"})),
            DONE_FRAME.to_string(),
        ],
    )])
    .await;
    let orchestrator = orchestrator(&base_url);
    let mut conversation = Conversation::new(ChatMode::Normal);
    let mut recorder = Recorder::default();

    let outcome = within(orchestrator.submit_turn(
        &mut conversation,
        "hello",
        TurnOptions::default(),
        &mut recorder,
    ))
    .await
    .expect("turn should start");

    assert_eq!(outcome, TurnOutcome::Completed);
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, "hi there");
    assert_eq!(message.assistant_state(), Some(AssistantState::Completed));
    assert_eq!(assistant.session_id.as_deref(), Some("conv-1"));
    assert_eq!(conversation.session_id.as_deref(), Some("conv-1"));
    assert_eq!(
        orchestrator.registry().get(ChatMode::Normal).as_deref(),
        Some("conv-1")
    );
    assert!(recorder.updates >= 3);

    let request = requests.recv().await.expect("captured request");
    assert_eq!(request.request_line, "POST /api/chat/normal/stream HTTP/1.1");
    assert_eq!(request.header("accept"), Some("text/event-stream"));
    assert_eq!(
        request.json(),
        json!({
            "message": "hello",
            "is_feedback": false,
            "conversation_id": null,
            "target_agent": null
        })
    );
}

#[tokio::test]
async fn orchestration_turn_uses_its_own_body_and_header() {
    let (base_url, mut requests) = spawn_server(vec![ScriptedResponse::sse(
        vec![("x-session-id", "orch-1".to_string())],
        vec![
            frame(json!({"type": "status", "content": "thinking"})),
            frame(json!({"type": "message", "content": "the plan"})),
            frame(json!({"type": "tokens", "tokens": {"input": 12, "output": 34}})),
            DONE_FRAME.to_string(),
        ],
    )])
    .await;
    let orchestrator = orchestrator(&base_url);
    orchestrator
        .registry()
        .set(ChatMode::Orchestration, "orch-0")
        .expect("seed registry");
    let mut conversation = Conversation::new(ChatMode::Orchestration);
    let mut recorder = Recorder::default();

    let options = TurnOptions {
        file_ids: vec!["f-1".to_string()],
        ..TurnOptions::default()
    };
    let outcome = within(orchestrator.submit_turn(&mut conversation, "plan", options, &mut recorder))
        .await
        .expect("turn should start");

    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(recorder.notices, vec![Notice::Status("thinking".to_string())]);
    let (message, _) = last_reply(&conversation);
    assert_eq!(message.content, "the plan");
    assert_eq!(message.token_count.and_then(|t| t.output), Some(34));
    let user = conversation.last_user_message().expect("user message");
    assert_eq!(user.as_user().map(|u| u.attached_file_count), Some(1));
    assert_eq!(user.token_count.and_then(|t| t.input), Some(12));
    assert_eq!(
        orchestrator.registry().get(ChatMode::Orchestration).as_deref(),
        Some("orch-1")
    );

    let request = requests.recv().await.expect("captured request");
    assert_eq!(
        request.request_line,
        "POST /api/v1/normal_chat/stream_aitest HTTP/1.1"
    );
    assert_eq!(
        request.json(),
        json!({
            "message": "plan",
            "session_id": "orch-0",
            "file_ids": ["f-1"],
            "is_feedback": false
        })
    );
}

#[tokio::test]
async fn non_success_status_fails_with_fixed_text() {
    let (base_url, _requests) = spawn_server(vec![ScriptedResponse::json(
        "500 Internal Server Error",
        json!({"detail": "boom"}),
    )])
    .await;
    let orchestrator = orchestrator(&base_url);
    let mut conversation = Conversation::new(ChatMode::Normal);

    let outcome = within(orchestrator.submit_turn(
        &mut conversation,
        "hello",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");

    assert!(matches!(outcome, TurnOutcome::Failed(_)));
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, TRANSPORT_FAILURE_MESSAGE);
    assert!(assistant.errored && !assistant.streaming);
    assert_eq!(orchestrator.registry().get(ChatMode::Normal), None);
}

#[tokio::test]
async fn connection_refused_fails_turn() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let orchestrator = orchestrator(&format!("http://{addr}"));
    let mut conversation = Conversation::new(ChatMode::Testcase);
    let outcome = within(orchestrator.submit_turn(
        &mut conversation,
        "hello",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");

    assert!(matches!(outcome, TurnOutcome::Failed(_)));
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, TRANSPORT_FAILURE_MESSAGE);
    assert!(assistant.errored);
    assert!(!conversation.is_streaming());
}

#[tokio::test]
async fn session_is_recorded_before_body_arrives() {
    let (release_tx, release_rx) = oneshot::channel();
    let (base_url, _requests) = spawn_server(vec![ScriptedResponse::sse(
        vec![("X-Conversation-ID", "early".to_string())],
        vec![
            frame(json!({"type": "chunk", "content": "late body"})),
            DONE_FRAME.to_string(),
        ],
    )
    .held_until(release_rx)])
    .await;
    let orchestrator = orchestrator(&base_url);
    let registry = Arc::clone(orchestrator.registry());

    let task = tokio::spawn(async move {
        let mut conversation = Conversation::new(ChatMode::Testcase);
        let outcome = orchestrator
            .submit_turn(
                &mut conversation,
                "hello",
                TurnOptions::default(),
                &mut NoopObserver,
            )
            .await;
        (outcome, conversation)
    });

    within(async {
        while registry.get(ChatMode::Testcase).is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(registry.get(ChatMode::Testcase).as_deref(), Some("early"));
    release_tx.send(()).expect("server should be waiting");

    let (outcome, conversation) = within(task).await.expect("task should join");
    assert_eq!(outcome.expect("turn should start"), TurnOutcome::Completed);
    let (message, _) = last_reply(&conversation);
    assert_eq!(message.content, "late body");
}

#[tokio::test]
async fn feedback_pause_routes_next_message_to_origin_session() {
    let (base_url, mut requests) = spawn_server(vec![
        ScriptedResponse::sse(
            vec![("X-Conversation-ID", "sess-A".to_string())],
            feedback_frames(),
        ),
        ScriptedResponse::sse(
            vec![("X-Conversation-ID", "sess-A".to_string())],
            vec![
                frame(json!({"type": "agent_start", "agent_name": "TestCase_Writer", "agent_role": "Writer"})),
                frame(json!({"type": "agent_done", "agent_name": "TestCase_Writer", "content": "revised"})),
                DONE_FRAME.to_string(),
            ],
        ),
    ])
    .await;
    let orchestrator = orchestrator(&base_url);
    let mut conversation = Conversation::new(ChatMode::Testcase);

    let outcome = within(orchestrator.submit_turn(
        &mut conversation,
        "write tests",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");

    let TurnOutcome::AwaitingFeedback(request) = outcome else {
        panic!("expected a feedback pause, got {outcome:?}");
    };
    assert_eq!(
        request.available_agents,
        BTreeSet::from(["X".to_string(), "Y".to_string()])
    );
    assert_eq!(request.origin_session_id.as_deref(), Some("sess-A"));
    let (message, assistant) = last_reply(&conversation);
    let paused_id = message.id;
    assert!(message.content.is_empty());
    assert_eq!(assistant.agents.len(), 1);
    assert_eq!(assistant.agents[0].content, "full");
    assert!(assistant.agents[0].done);
    assert_eq!(
        message.assistant_state(),
        Some(AssistantState::AwaitingFeedback)
    );

    // Another client moved the registry on; the reply must still go to sess-A.
    orchestrator
        .registry()
        .set(ChatMode::Testcase, "sess-B")
        .expect("set");

    let outcome = within(orchestrator.submit_turn(
        &mut conversation,
        "@TestCase_Writer please revise",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");
    assert_eq!(outcome, TurnOutcome::Completed);
    assert!(conversation.awaiting_feedback().is_none());
    assert!(conversation
        .message(paused_id)
        .and_then(Message::as_assistant)
        .is_some_and(|a| a.pending_feedback.is_none()));

    let _first = requests.recv().await.expect("first request");
    let second = requests.recv().await.expect("second request");
    assert_eq!(
        second.json(),
        json!({
            "message": "@TestCase_Writer please revise",
            "is_feedback": true,
            "conversation_id": "sess-A",
            "target_agent": "TestCase_Writer"
        })
    );
}

#[tokio::test]
async fn approve_replies_with_fixed_text_and_no_target() {
    let (base_url, mut requests) = spawn_server(vec![
        ScriptedResponse::sse(
            vec![("X-Conversation-ID", "sess-A".to_string())],
            feedback_frames(),
        ),
        ScriptedResponse::sse(Vec::new(), vec![DONE_FRAME.to_string()]),
    ])
    .await;
    let orchestrator = orchestrator(&base_url);
    let mut conversation = Conversation::new(ChatMode::Testcase);

    within(orchestrator.submit_turn(
        &mut conversation,
        "write tests",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");
    assert!(conversation.awaiting_feedback().is_some());

    let outcome = within(orchestrator.approve(
        &mut conversation,
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("approve should start");
    assert_eq!(outcome, TurnOutcome::Completed);
    assert_eq!(
        conversation.last_user_message().map(|m| m.content.as_str()),
        Some(APPROVE_MESSAGE)
    );

    let _first = requests.recv().await.expect("first request");
    let second = requests.recv().await.expect("second request");
    assert_eq!(
        second.json(),
        json!({
            "message": "Approve",
            "is_feedback": true,
            "conversation_id": "sess-A",
            "target_agent": null
        })
    );
}

#[tokio::test]
async fn approve_without_pending_feedback_is_rejected() {
    let orchestrator = orchestrator("http://127.0.0.1:9");
    let mut conversation = Conversation::new(ChatMode::Testcase);
    let result = orchestrator
        .approve(&mut conversation, TurnOptions::default(), &mut NoopObserver)
        .await;
    assert!(matches!(result, Err(TurnError::NoPendingFeedback)));
    assert!(conversation.is_empty());
}

#[tokio::test]
async fn directed_feedback_names_the_target_explicitly() {
    let (base_url, mut requests) = spawn_server(vec![
        ScriptedResponse::sse(
            vec![("X-Conversation-ID", "sess-A".to_string())],
            feedback_frames(),
        ),
        ScriptedResponse::sse(Vec::new(), vec![DONE_FRAME.to_string()]),
    ])
    .await;
    let orchestrator = orchestrator(&base_url);
    let mut conversation = Conversation::new(ChatMode::Testcase);

    within(orchestrator.submit_turn(
        &mut conversation,
        "write tests",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");

    let outcome = within(orchestrator.send_feedback(
        &mut conversation,
        "fix the flows",
        "Interaction_Analyst",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("feedback should start");
    assert_eq!(outcome, TurnOutcome::Completed);
    assert!(conversation.awaiting_feedback().is_none());

    let _first = requests.recv().await.expect("first request");
    let second = requests.recv().await.expect("second request");
    assert_eq!(
        second.json(),
        json!({
            "message": "fix the flows",
            "is_feedback": true,
            "conversation_id": "sess-A",
            "target_agent": "Interaction_Analyst"
        })
    );
}

#[tokio::test]
async fn directed_feedback_without_pending_request_is_rejected() {
    let orchestrator = orchestrator("http://127.0.0.1:9");
    let mut conversation = Conversation::new(ChatMode::Testcase);
    let result = orchestrator
        .send_feedback(
            &mut conversation,
            "fix it",
            "Writer",
            TurnOptions::default(),
            &mut NoopObserver,
        )
        .await;
    assert!(matches!(result, Err(TurnError::NoPendingFeedback)));
    assert!(conversation.is_empty());
}

#[tokio::test]
async fn busy_and_empty_submissions_are_rejected() {
    let orchestrator = orchestrator("http://127.0.0.1:9");
    let mut conversation = Conversation::new(ChatMode::Normal);

    let empty = orchestrator
        .submit_turn(&mut conversation, "   ", TurnOptions::default(), &mut NoopObserver)
        .await;
    assert!(matches!(empty, Err(TurnError::EmptyMessage)));

    conversation.begin_turn("in flight", 0).expect("turn");
    let busy = orchestrator
        .submit_turn(&mut conversation, "again", TurnOptions::default(), &mut NoopObserver)
        .await;
    assert!(matches!(busy, Err(TurnError::Busy(_))));
    assert_eq!(conversation.messages().len(), 2);
}

#[tokio::test]
async fn timeout_cancels_a_stalled_turn() {
    let (_release_tx, release_rx) = oneshot::channel::<()>();
    let (base_url, _requests) = spawn_server(vec![ScriptedResponse::sse(
        Vec::new(),
        vec![DONE_FRAME.to_string()],
    )
    .held_until(release_rx)])
    .await;
    let orchestrator = orchestrator(&base_url).with_timeout(Some(Duration::from_millis(100)));
    let mut conversation = Conversation::new(ChatMode::Normal);

    let outcome = within(orchestrator.submit_turn(
        &mut conversation,
        "hello",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");

    assert_eq!(outcome, TurnOutcome::TimedOut);
    let (_, assistant) = last_reply(&conversation);
    assert!(!assistant.streaming && !assistant.errored);
}

#[tokio::test]
async fn edit_and_resend_submits_the_new_text() {
    let (base_url, mut requests) = spawn_server(vec![
        ScriptedResponse::sse(Vec::new(), vec![DONE_FRAME.to_string()]),
        ScriptedResponse::sse(Vec::new(), vec![DONE_FRAME.to_string()]),
        ScriptedResponse::sse(Vec::new(), vec![DONE_FRAME.to_string()]),
    ])
    .await;
    let orchestrator = orchestrator(&base_url);
    let mut conversation = Conversation::new(ChatMode::Normal);

    within(orchestrator.submit_turn(
        &mut conversation,
        "draft",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("turn should start");
    let first_user = conversation.last_user_message().map(|m| m.id).expect("user");

    within(orchestrator.edit_and_resend(
        &mut conversation,
        first_user,
        "final",
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("edit should start");
    within(orchestrator.resend(
        &mut conversation,
        first_user,
        TurnOptions::default(),
        &mut NoopObserver,
    ))
    .await
    .expect("resend should start");

    let messages: Vec<_> = requests_messages(&mut requests, 3).await;
    assert_eq!(messages, ["draft", "final", "final"]);
    assert_eq!(
        conversation.message(first_user).map(|m| m.content.as_str()),
        Some("final")
    );

    let missing = orchestrator
        .resend(&mut conversation, 999, TurnOptions::default(), &mut NoopObserver)
        .await;
    assert!(matches!(missing, Err(TurnError::UnknownMessage(999))));
}

async fn requests_messages(
    requests: &mut mpsc::UnboundedReceiver<CapturedRequest>,
    count: usize,
) -> Vec<String> {
    let mut messages = Vec::new();
    for _ in 0..count {
        let request = requests.recv().await.expect("captured request");
        messages.push(
            request.json()["message"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
        );
    }
    messages
}

#[test]
fn route_prefers_registry_then_conversation_then_backup() {
    let registry = SessionRegistry::in_memory();
    let mention = MentionPattern::default();
    let mut conversation = Conversation::new(ChatMode::Orchestration);

    let route = resolve_route(&conversation, &registry, &mention, "hi", None);
    assert_eq!(route.session_id, None);
    assert!(!route.is_feedback);

    let (_, assistant_id) = conversation.begin_turn("hi", 0).expect("turn");
    let assistant = conversation
        .message_mut(assistant_id)
        .and_then(Message::as_assistant_mut)
        .expect("assistant");
    assistant.session_id = Some("backup".into());
    assistant.streaming = false;
    let route = resolve_route(&conversation, &registry, &mention, "hi", None);
    assert_eq!(route.session_id.as_deref(), Some("backup"));

    conversation.session_id = Some("conversation".into());
    let route = resolve_route(&conversation, &registry, &mention, "hi", None);
    assert_eq!(route.session_id.as_deref(), Some("conversation"));

    registry
        .set(ChatMode::Orchestration, "registry")
        .expect("set");
    let route = resolve_route(&conversation, &registry, &mention, "@TestCase_X hi", None);
    assert_eq!(route.session_id.as_deref(), Some("registry"));
    assert_eq!(route.target_agent, None);
}

#[test]
fn manual_feedback_overrides_inference() {
    let registry = SessionRegistry::in_memory();
    registry.set(ChatMode::Testcase, "registry").expect("set");
    let conversation = Conversation::new(ChatMode::Testcase);
    let manual = ManualFeedback {
        session_id: Some("origin".into()),
        target_agent: None,
    };
    let route = resolve_route(
        &conversation,
        &registry,
        &MentionPattern::default(),
        "@TestCase_Writer ok",
        Some(&manual),
    );
    assert_eq!(
        route,
        TurnRoute {
            is_feedback: true,
            session_id: Some("origin".into()),
            target_agent: None,
        }
    );
}

fn stream_turn(mode: ChatMode) -> (Conversation, Turn) {
    let mut conversation = Conversation::new(mode);
    let (user_id, assistant_id) = conversation.begin_turn("question", 0).expect("turn");
    (
        conversation,
        Turn::new(user_id, assistant_id, "question", AgentGate::transparent()),
    )
}

#[tokio::test]
async fn cancellation_mid_stream_keeps_received_content() {
    let (mut conversation, mut turn) = stream_turn(ChatMode::Normal);
    let chunks = stream::iter(vec![Ok::<_, Infallible>(
        frame(json!({"type": "chunk", "content": "only"})).into_bytes(),
    )])
    .chain(stream::pending());
    let token = CancellationToken::new();
    let mut observer = CancelWhenContentIs {
        token: token.clone(),
        trigger: "only",
    };

    let outcome = within(drive_stream(
        chunks,
        &mut conversation,
        &mut turn,
        &token,
        &mut observer,
    ))
    .await;

    assert_eq!(outcome, TurnOutcome::Cancelled);
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, "only");
    assert!(!assistant.streaming && !assistant.errored);
}

#[tokio::test]
async fn stream_ending_without_done_is_finalized() {
    let (mut conversation, mut turn) = stream_turn(ChatMode::Normal);
    let body = format!(
        "{}data: {{\"type\":\"chunk\",\"content\":",
        frame(json!({"type": "chunk", "content": "partial"}))
    );
    let split = body.len() / 2;
    let chunks = stream::iter(vec![
        Ok::<_, Infallible>(body.as_bytes()[..split].to_vec()),
        Ok(body.as_bytes()[split..].to_vec()),
    ]);

    let outcome = within(drive_stream(
        chunks,
        &mut conversation,
        &mut turn,
        &CancellationToken::new(),
        &mut NoopObserver,
    ))
    .await;

    assert_eq!(outcome, TurnOutcome::Completed);
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, "partial");
    assert!(!assistant.streaming && !assistant.errored);
}

#[tokio::test]
async fn body_read_error_fails_the_turn() {
    let (mut conversation, mut turn) = stream_turn(ChatMode::Normal);
    let chunks = stream::iter(vec![
        Ok(frame(json!({"type": "chunk", "content": "half"})).into_bytes()),
        Err("connection reset"),
    ]);

    let outcome = within(drive_stream(
        chunks,
        &mut conversation,
        &mut turn,
        &CancellationToken::new(),
        &mut NoopObserver,
    ))
    .await;

    assert_eq!(outcome, TurnOutcome::Failed("connection reset".to_string()));
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, TRANSPORT_FAILURE_MESSAGE);
    assert!(assistant.errored);
}

#[tokio::test]
async fn backend_error_event_ends_the_turn() {
    let (mut conversation, mut turn) = stream_turn(ChatMode::Normal);
    let body = [
        frame(json!({"type": "chunk", "content": "so far"})),
        frame(json!({"type": "error", "content": "quota exceeded"})),
        frame(json!({"type": "chunk", "content": "ignored"})),
    ]
    .concat();
    let chunks = stream::iter(vec![Ok::<_, Infallible>(body.into_bytes())]);
    let mut recorder = Recorder::default();

    let outcome = within(drive_stream(
        chunks,
        &mut conversation,
        &mut turn,
        &CancellationToken::new(),
        &mut recorder,
    ))
    .await;

    assert_eq!(
        outcome,
        TurnOutcome::BackendError("quota exceeded".to_string())
    );
    assert_eq!(
        recorder.notices,
        vec![Notice::Error("quota exceeded".to_string())]
    );
    let (message, assistant) = last_reply(&conversation);
    assert_eq!(message.content, "Error: quota exceeded");
    assert!(assistant.errored && !assistant.streaming);
}

#[tokio::test]
async fn upload_matches_results_to_attachments_by_position() {
    let temp_dir = TempDir::new().expect("temp dir");
    let first = temp_dir.path().join("spec.txt");
    let second = temp_dir.path().join("broken.bin");
    std::fs::write(&first, "requirements").expect("write");
    std::fs::write(&second, [0_u8, 1, 2]).expect("write");

    let (base_url, mut requests) = spawn_server(vec![ScriptedResponse::json(
        "200 OK",
        json!({
            "results": [
                {"filename": "spec.txt", "success": true, "file_id": "f-1"},
                {"filename": "broken.bin", "success": false, "file_id": null, "message": "unsupported"}
            ],
            "total": 2,
            "success_count": 1,
            "failed_count": 1
        }),
    )])
    .await;
    let client = test_client(&base_url);
    let mut attachments = AttachmentSet::default();
    attachments.add(&first);
    attachments.add(&second);

    let succeeded = within(client.upload_attachments(&mut attachments))
        .await
        .expect("upload should succeed");
    assert_eq!(succeeded, 1);
    assert_eq!(attachments.file_ids(), vec!["f-1".to_string()]);
    assert!(!attachments.is_uploading());

    let request = requests.recv().await.expect("captured request");
    assert_eq!(request.request_line, "POST /api/files/parse HTTP/1.1");
    let body = String::from_utf8_lossy(&request.body);
    assert!(body.contains(r#"name="files"; filename="spec.txt""#));
    assert!(body.contains(r#"name="files"; filename="broken.bin""#));
    assert!(body.contains("requirements"));
}

#[tokio::test]
async fn rejected_upload_marks_the_batch_failed() {
    let temp_dir = TempDir::new().expect("temp dir");
    let path = temp_dir.path().join("huge.pdf");
    std::fs::write(&path, "pdf").expect("write");

    let (base_url, _requests) = spawn_server(vec![ScriptedResponse::json(
        "422 Unprocessable Entity",
        json!({"detail": "file too large"}),
    )])
    .await;
    let client = test_client(&base_url);
    let mut attachments = AttachmentSet::default();
    attachments.add(&path);

    let err = within(client.upload_attachments(&mut attachments))
        .await
        .expect_err("upload should fail");
    match &err {
        UploadError::Status { status, detail } => {
            assert_eq!(status.as_u16(), 422);
            assert_eq!(detail.as_deref(), Some("file too large"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(attachments.file_ids().is_empty());
    assert!(!attachments.is_uploading());
}

#[tokio::test]
async fn missing_upload_file_is_a_read_error() {
    let client = test_client("http://127.0.0.1:9");
    let result = client
        .parse_files(&[PathBuf::from("/definitely/not/here.txt")])
        .await;
    assert!(matches!(result, Err(UploadError::Read { .. })));
}
