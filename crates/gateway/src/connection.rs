//! One WebSocket client.
//!
//! The socket is split at upgrade: a writer task drains the client's
//! event channel so every engine shares one ordered outbound stream,
//! and the reader loop parses [`ClientCommand`] frames and dispatches
//! them. Long work — chat turns, approved browsing sessions, editing
//! tasks — runs in spawned tasks holding sink clones; the reader stays
//! free to take cancels.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use kindred_core::document::VersionAuthor;
use kindred_core::error::StoreError;
use kindred_core::message::{ConversationId, SessionId};
use kindred_merge::SaveOutcome;
use kindred_protocol::{ClientCommand, ConflictHunk, EventSink, ServerEvent};
use kindred_stream::SendDeduper;

use crate::SharedState;
use crate::sessions::BrowseCancel;
use crate::turn::run_turn;

/// Outbound event buffer per client.
const EVENT_BUFFER: usize = 256;

/// Browsing summaries kept for context assembly, newest last.
const WEB_SUMMARIES_KEPT: usize = 3;

/// Upgrade handler for `GET /ws`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut outbound, mut inbound) = socket.split();
    let (sink, mut events) = EventSink::channel(EVENT_BUFFER);

    // Single writer: every event for this client leaves here, in order.
    // It outlives the reader loop on purpose; sessions that survive the
    // socket keep emitting until their sinks drop or a send fails.
    let _writer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            let frame = match serde_json::to_string(&event) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(kind = event.kind(), error = %e, "event serialization failed");
                    continue;
                }
            };
            if outbound.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    let client = Client::new(state, sink);
    info!(conversation = %client.conversation.0, "client connected");

    while let Some(frame) = inbound.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "socket receive failed");
                break;
            }
        };
        match frame {
            WsMessage::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                Ok(command) => client.dispatch(command).await,
                Err(e) => {
                    client
                        .sink
                        .emit(ServerEvent::ChatError {
                            error: format!("unrecognized command: {e}"),
                        })
                        .await;
                }
            },
            WsMessage::Close(_) => break,
            WsMessage::Binary(_) | WsMessage::Ping(_) | WsMessage::Pong(_) => {}
        }
    }

    info!(conversation = %client.conversation.0, "client disconnected");
}

/// Per-connection command handling. One conversation, one dedup guard,
/// one turn at a time.
struct Client {
    state: SharedState,
    sink: EventSink,
    conversation: ConversationId,
    deduper: SendDeduper,
    turn_active: Arc<AtomicBool>,
    web_summaries: Arc<Mutex<Vec<String>>>,
}

impl Client {
    fn new(state: SharedState, sink: EventSink) -> Self {
        let deduper = state.container.send_deduper();
        Self {
            state,
            sink,
            conversation: ConversationId::new(),
            deduper,
            turn_active: Arc::new(AtomicBool::new(false)),
            web_summaries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn dispatch(&self, command: ClientCommand) {
        debug!(kind = command.kind(), "command received");
        match command {
            ClientCommand::ChatSend {
                content,
                privacy,
                agentic_mode,
            } => self.chat_send(content, privacy, agentic_mode).await,
            ClientCommand::AgentStart {
                query,
                max_pages,
                max_duration_ms,
            } => self.agent_start(query, max_pages, max_duration_ms).await,
            ClientCommand::AgentApprove { session_id } => self.agent_approve(session_id).await,
            ClientCommand::AgentCancel { session_id } => self.agent_cancel(session_id).await,
            ClientCommand::EditTaskRun {
                document_id,
                instruction,
                content,
                content_type,
                language,
            } => {
                self.edit_task_run(document_id, instruction, content, content_type, language)
                    .await;
            }
            ClientCommand::EditTaskCancel { document_id } => {
                self.edit_task_cancel(document_id).await;
            }
            ClientCommand::DocumentSaveVersion {
                document_id,
                content,
                description,
                base_version,
            } => {
                self.save_version(document_id, content, description, base_version)
                    .await;
            }
        }
    }

    // ── Chat ──

    async fn chat_send(&self, content: String, privacy: bool, agentic_mode: bool) {
        if !self.deduper.admit(&content) {
            return;
        }
        if self.turn_active.swap(true, Ordering::SeqCst) {
            self.sink
                .emit(ServerEvent::ChatError {
                    error: "a reply is already streaming; wait for it to finish".into(),
                })
                .await;
            return;
        }

        let state = self.state.clone();
        let sink = self.sink.clone();
        let conversation = self.conversation.clone();
        let web_summaries = self
            .web_summaries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let turn_active = self.turn_active.clone();
        tokio::spawn(async move {
            run_turn(
                state,
                sink,
                conversation,
                web_summaries,
                content,
                privacy,
                agentic_mode,
            )
            .await;
            turn_active.store(false, Ordering::SeqCst);
        });
    }

    // ── Browsing ──

    async fn agent_start(&self, query: String, max_pages: Option<u32>, max_duration_ms: Option<u64>) {
        let session_id = SessionId::new().0;
        let session = self.state.container.browsing_agent(
            &session_id,
            &query,
            max_pages,
            max_duration_ms,
            self.sink.clone(),
        );
        session.request_approval().await;
        self.state.sessions.park_pending(session).await;
        info!(session_id = %session_id, "browsing session awaits approval");
    }

    async fn agent_approve(&self, session_id: String) {
        let Some(session) = self.state.sessions.take_pending(&session_id).await else {
            self.sink
                .emit(ServerEvent::AgentError {
                    session_id,
                    error: "no pending session with this id".into(),
                    recoverable: false,
                    cancelled: false,
                })
                .await;
            return;
        };

        let token = session.cancellation_token();
        self.state.sessions.mark_active(&session_id, token).await;

        let sessions = self.state.sessions.clone();
        let web_summaries = self.web_summaries.clone();
        tokio::spawn(async move {
            let summary = session.approve().await;
            // Successful findings feed later turns as web context.
            if summary.success {
                let mut summaries = web_summaries.lock().unwrap_or_else(|e| e.into_inner());
                summaries.push(summary.summary);
                if summaries.len() > WEB_SUMMARIES_KEPT {
                    summaries.remove(0);
                }
            }
            sessions.release_browse(&session_id).await;
        });
    }

    async fn agent_cancel(&self, session_id: String) {
        match self.state.sessions.cancel_browse(&session_id).await {
            BrowseCancel::Pending(session) => {
                info!(session_id = %session_id, "pending session cancelled");
                session.cancel_pending().await;
            }
            BrowseCancel::Signalled => {
                info!(session_id = %session_id, "cancel signalled; session stops at its next safe point");
            }
            // Idempotent: a session past its grace period is simply gone.
            BrowseCancel::Unknown => {
                debug!(session_id = %session_id, "cancel for an unknown session");
            }
        }
    }

    // ── Editing ──

    async fn edit_task_run(
        &self,
        document_id: String,
        instruction: String,
        content: String,
        content_type: String,
        language: Option<String>,
    ) {
        let container = &self.state.container;
        let task_id = SessionId::new().0;

        // The store's current version is the base; the client's buffer is
        // the working copy. A document the store has never seen is created
        // from that buffer first.
        let base_version = match container.documents.get(&document_id).await {
            Ok(document) => document.version,
            Err(StoreError::NotFound { .. }) => {
                let created = container
                    .documents
                    .create(
                        &document_id,
                        &title_from(&content),
                        &content_type,
                        language.as_deref(),
                        &content,
                    )
                    .await;
                match created {
                    Ok(document) => document.version,
                    Err(e) => {
                        self.sink
                            .emit(ServerEvent::TaskError {
                                task_id,
                                error: format!("could not create {document_id}: {e}"),
                                recoverable: false,
                                suggestion: None,
                                cancelled: false,
                            })
                            .await;
                        return;
                    }
                }
            }
            Err(e) => {
                self.sink
                    .emit(ServerEvent::TaskError {
                        task_id,
                        error: format!("could not read {document_id}: {e}"),
                        recoverable: false,
                        suggestion: None,
                        cancelled: false,
                    })
                    .await;
                return;
            }
        };

        let agent = container
            .editing_agent(
                &task_id,
                &document_id,
                &instruction,
                &content,
                base_version,
                self.sink.clone(),
            )
            .with_content_type(&content_type, language);
        let token = agent.cancellation_token();

        if !self
            .state
            .sessions
            .claim_edit(&document_id, &task_id, token)
            .await
        {
            self.sink
                .emit(ServerEvent::TaskError {
                    task_id,
                    error: format!("{document_id} already has an active editing task"),
                    recoverable: true,
                    suggestion: Some("wait for the running task to finish, or cancel it".into()),
                    cancelled: false,
                })
                .await;
            return;
        }

        let sessions = self.state.sessions.clone();
        tokio::spawn(async move {
            agent.run().await;
            sessions.release_edit(&document_id).await;
        });
    }

    async fn edit_task_cancel(&self, document_id: String) {
        match self.state.sessions.cancel_edit(&document_id).await {
            Some(task_id) => {
                info!(task_id = %task_id, document = %document_id, "editing task cancelled");
            }
            // Idempotent: the task already finished and aged out.
            None => debug!(document = %document_id, "cancel for an idle document"),
        }
    }

    // ── Documents ──

    async fn save_version(
        &self,
        document_id: String,
        content: String,
        description: Option<String>,
        base_version: Option<u64>,
    ) {
        let container = &self.state.container;
        let gate = container.version_gate();

        match gate
            .save(
                &document_id,
                &content,
                base_version,
                VersionAuthor::User,
                description,
            )
            .await
        {
            Ok(SaveOutcome::Saved(version)) => {
                self.sink
                    .emit(ServerEvent::DocumentVersionSaved {
                        document_id,
                        version: version.version,
                    })
                    .await;
            }
            Ok(SaveOutcome::Conflict {
                base_version,
                stored_version,
                merge,
                ..
            }) => {
                // Every divergent region goes to the client; it resolves
                // and re-saves against the stored version. Nothing merges
                // on the user's behalf.
                let hunks = merge
                    .hunks()
                    .into_iter()
                    .map(|hunk| ConflictHunk {
                        index: hunk.index,
                        base: hunk.base_text(),
                        left: hunk.left_text(),
                        right: hunk.right_text(),
                    })
                    .collect();
                warn!(
                    document = %document_id,
                    base_version, stored_version, "save conflicted"
                );
                self.sink
                    .emit(ServerEvent::DocumentConflict {
                        document_id,
                        base_version,
                        stored_version,
                        hunks,
                    })
                    .await;
            }
            // First save of a client-minted id creates the document.
            Err(StoreError::NotFound { .. }) => {
                let created = container
                    .documents
                    .create(
                        &document_id,
                        &title_from(&content),
                        "text/markdown",
                        None,
                        &content,
                    )
                    .await;
                match created {
                    Ok(document) => {
                        self.sink
                            .emit(ServerEvent::DocumentVersionSaved {
                                document_id,
                                version: document.version,
                            })
                            .await;
                    }
                    Err(e) => {
                        self.sink
                            .emit(ServerEvent::DocumentError {
                                document_id,
                                error: e.to_string(),
                            })
                            .await;
                    }
                }
            }
            Err(e) => {
                self.sink
                    .emit(ServerEvent::DocumentError {
                        document_id,
                        error: e.to_string(),
                    })
                    .await;
            }
        }
    }
}

/// A title for a client-minted document: its first non-empty line,
/// shorn of markdown heading markers.
fn title_from(content: &str) -> String {
    content
        .lines()
        .map(|line| line.trim().trim_start_matches('#').trim())
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(60).collect())
        .unwrap_or_else(|| "Untitled".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use kindred_container::Container;
    use kindred_core::error::ModelError;
    use kindred_core::message::Role;
    use kindred_core::model::{CompletionRequest, ModelClient};
    use kindred_provider::ScriptedModel;
    use tokio::sync::mpsc;

    use crate::AppState;

    /// `complete` never resolves; holds a turn or task open.
    struct StuckModel;

    #[async_trait]
    impl ModelClient for StuckModel {
        fn name(&self) -> &str {
            "stuck"
        }

        async fn complete(&self, _request: CompletionRequest) -> Result<String, ModelError> {
            futures::future::pending().await
        }
    }

    fn client_with(container: Container) -> (Client, mpsc::Receiver<ServerEvent>) {
        let (sink, rx) = EventSink::channel(256);
        (Client::new(AppState::new(container), sink), rx)
    }

    async fn next_event(rx: &mut mpsc::Receiver<ServerEvent>) -> ServerEvent {
        rx.recv().await.expect("event stream ended early")
    }

    #[test]
    fn titles_come_from_the_first_real_line() {
        assert_eq!(title_from("# Morning Pages\n\nwrote a bit"), "Morning Pages");
        assert_eq!(title_from("\n\n  \nplain text body"), "plain text body");
        assert_eq!(title_from(""), "Untitled");
    }

    #[tokio::test]
    async fn save_version_creates_versions_and_conflicts() {
        let (client, mut rx) = client_with(Container::for_tests());

        client
            .dispatch(ClientCommand::DocumentSaveVersion {
                document_id: "doc_1".into(),
                content: "# Notes\n\nfirst".into(),
                description: None,
                base_version: None,
            })
            .await;
        match next_event(&mut rx).await {
            ServerEvent::DocumentVersionSaved { version, .. } => assert_eq!(version, 1),
            other => panic!("expected versionSaved, got {:?}", other.kind()),
        }

        client
            .dispatch(ClientCommand::DocumentSaveVersion {
                document_id: "doc_1".into(),
                content: "# Notes\n\nsecond".into(),
                description: Some("reworded".into()),
                base_version: Some(1),
            })
            .await;
        match next_event(&mut rx).await {
            ServerEvent::DocumentVersionSaved { version, .. } => assert_eq!(version, 2),
            other => panic!("expected versionSaved, got {:?}", other.kind()),
        }

        // Stale base: v1 was superseded while this client edited.
        client
            .dispatch(ClientCommand::DocumentSaveVersion {
                document_id: "doc_1".into(),
                content: "# Notes\n\nthird".into(),
                description: None,
                base_version: Some(1),
            })
            .await;
        match next_event(&mut rx).await {
            ServerEvent::DocumentConflict {
                base_version,
                stored_version,
                hunks,
                ..
            } => {
                assert_eq!(base_version, 1);
                assert_eq!(stored_version, 2);
                assert!(!hunks.is_empty());
            }
            other => panic!("expected conflict, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn duplicate_chat_send_runs_one_turn() {
        let (client, mut rx) = client_with(Container::for_tests());
        let state = client.state.clone();
        let conversation = client.conversation.clone();

        let send = ClientCommand::ChatSend {
            content: "hello hello".into(),
            privacy: false,
            agentic_mode: false,
        };
        client.dispatch(send.clone()).await;
        client.dispatch(send).await;

        // Dropping the client releases its sink; the channel closes once
        // the spawned turn finishes and drops its clone.
        drop(client);
        let mut completes = 0;
        while let Some(event) = rx.recv().await {
            if matches!(event, ServerEvent::ChatComplete { .. }) {
                completes += 1;
            }
        }
        assert_eq!(completes, 1);

        // One persisted user message, not two.
        let stored = state
            .container
            .conversations
            .recent(&conversation, 10)
            .await
            .expect("history");
        let users = stored.iter().filter(|m| m.role == Role::User).count();
        assert_eq!(users, 1);
    }

    #[tokio::test]
    async fn second_chat_send_during_a_turn_is_rejected() {
        let container = Container::builder()
            .with_model(Arc::new(StuckModel))
            .build();
        let (client, mut rx) = client_with(container);

        client
            .dispatch(ClientCommand::ChatSend {
                content: "first".into(),
                privacy: false,
                agentic_mode: false,
            })
            .await;
        client
            .dispatch(ClientCommand::ChatSend {
                content: "second".into(),
                privacy: false,
                agentic_mode: false,
            })
            .await;

        match next_event(&mut rx).await {
            ServerEvent::ChatError { error } => assert!(error.contains("already streaming")),
            other => panic!("expected chat.error, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn browsing_flows_from_approval_to_completion() {
        let container = Container::builder()
            .with_model(Arc::new(ScriptedModel::single(
                r#"{"action": "done", "answer": "Blue light scatters more."}"#,
            )))
            .build();
        let (client, mut rx) = client_with(container);

        client
            .dispatch(ClientCommand::AgentStart {
                query: "why is the sky blue".into(),
                max_pages: Some(2),
                max_duration_ms: None,
            })
            .await;
        let session_id = match next_event(&mut rx).await {
            ServerEvent::AgentRequestApproval {
                session_id,
                max_pages,
                ..
            } => {
                assert_eq!(max_pages, 2);
                session_id
            }
            other => panic!("expected approval request, got {:?}", other.kind()),
        };

        client
            .dispatch(ClientCommand::AgentApprove { session_id })
            .await;

        loop {
            match next_event(&mut rx).await {
                ServerEvent::AgentComplete {
                    summary,
                    pages_visited,
                    ..
                } => {
                    assert_eq!(pages_visited, 0);
                    assert_eq!(summary, "Blue light scatters more.");
                    break;
                }
                ServerEvent::AgentError { error, .. } => panic!("session failed: {error}"),
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn approving_an_unknown_session_is_an_error() {
        let (client, mut rx) = client_with(Container::for_tests());

        client
            .dispatch(ClientCommand::AgentApprove {
                session_id: "ghost".into(),
            })
            .await;

        match next_event(&mut rx).await {
            ServerEvent::AgentError {
                session_id,
                recoverable,
                cancelled,
                ..
            } => {
                assert_eq!(session_id, "ghost");
                assert!(!recoverable);
                assert!(!cancelled);
            }
            other => panic!("expected agent.error, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn cancelling_a_pending_session_reports_cancelled() {
        let (client, mut rx) = client_with(Container::for_tests());

        client
            .dispatch(ClientCommand::AgentStart {
                query: "anything".into(),
                max_pages: None,
                max_duration_ms: None,
            })
            .await;
        let session_id = match next_event(&mut rx).await {
            ServerEvent::AgentRequestApproval { session_id, .. } => session_id,
            other => panic!("expected approval request, got {:?}", other.kind()),
        };

        client
            .dispatch(ClientCommand::AgentCancel { session_id })
            .await;

        match next_event(&mut rx).await {
            ServerEvent::AgentError { cancelled, .. } => assert!(cancelled),
            other => panic!("expected agent.error, got {:?}", other.kind()),
        }
    }

    #[tokio::test]
    async fn one_editing_task_per_document_at_a_time() {
        let container = Container::builder()
            .with_model(Arc::new(StuckModel))
            .build();
        let (client, mut rx) = client_with(container);
        client
            .state
            .container
            .documents
            .create("doc_1", "Notes", "text/plain", None, "alpha")
            .await
            .expect("seed document");

        let run = ClientCommand::EditTaskRun {
            document_id: "doc_1".into(),
            instruction: "expand the notes".into(),
            content: "alpha".into(),
            content_type: "text/plain".into(),
            language: None,
        };
        client.dispatch(run.clone()).await;
        client.dispatch(run).await;

        loop {
            match next_event(&mut rx).await {
                ServerEvent::TaskError {
                    recoverable, error, ..
                } => {
                    assert!(recoverable);
                    assert!(error.contains("active editing task"));
                    break;
                }
                // The stuck first task emits task.start and phase events.
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn cancelling_an_idle_document_is_a_quiet_no_op() {
        let (client, mut rx) = client_with(Container::for_tests());

        client
            .dispatch(ClientCommand::EditTaskCancel {
                document_id: "doc_9".into(),
            })
            .await;

        assert!(matches!(
            rx.try_recv(),
            Err(mpsc::error::TryRecvError::Empty)
        ));
    }
}
