//! The autonomous browsing session.
//!
//! A [`BrowsingSession`] starts pending and touches the network only after
//! explicit approval; the approved bounds (page cap, duration) are hard
//! stops. Each iteration the model picks one URL, the fetcher reduces the
//! page to readable text, and the model summarizes what it contributes to
//! the query. The client-facing story is told in `agent.*` events mapped
//! from the engine's `task.*` stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kindred_core::error::{ModelError, TaskError};
use kindred_core::fetch::{FetchedPage, PageFetcher};
use kindred_core::message::Message;
use kindred_core::model::{CompletionRequest, ModelClient, extract_json};
use kindred_core::task::{GoalStatus, TaskBounds, TaskSummary, ToolInvocation, ToolOutcome};
use kindred_protocol::{EventSink, ServerEvent};

use crate::engine::{
    DEFAULT_BLOCKED_THRESHOLD, DEFAULT_HEARTBEAT_EVERY, TaskBehavior, TaskContext, TaskEngine,
    ThinkOutcome,
};

/// Page cap applied when `agent.start` does not name one.
pub const DEFAULT_MAX_PAGES: u32 = 5;

const FETCH_TOOL: &str = "fetch_page";

const PICK_SYSTEM: &str = "You are the research assistant behind an AI companion. \
You browse the web one page at a time to answer a query, and you stop as soon \
as the visited pages answer it.";

/// One browsing task, from approval request to terminal event.
pub struct BrowsingSession {
    session_id: String,
    query: String,
    bounds: TaskBounds,
    blocked_threshold: u32,
    heartbeat_every: Duration,
    model: Arc<dyn ModelClient>,
    model_name: String,
    fetcher: Arc<dyn PageFetcher>,
    sink: EventSink,
    cancel: CancellationToken,
}

impl BrowsingSession {
    /// Create a pending session. Nothing is fetched until
    /// [`approve`](Self::approve) runs it.
    pub fn new(
        session_id: impl Into<String>,
        query: impl Into<String>,
        bounds: TaskBounds,
        model: Arc<dyn ModelClient>,
        model_name: impl Into<String>,
        fetcher: Arc<dyn PageFetcher>,
        sink: EventSink,
    ) -> Self {
        // Browsing always runs under a page cap.
        let bounds = TaskBounds {
            max_pages: Some(bounds.max_pages.unwrap_or(DEFAULT_MAX_PAGES)),
            ..bounds
        };
        Self {
            session_id: session_id.into(),
            query: query.into(),
            bounds,
            blocked_threshold: DEFAULT_BLOCKED_THRESHOLD,
            heartbeat_every: DEFAULT_HEARTBEAT_EVERY,
            model,
            model_name: model_name.into(),
            fetcher,
            sink,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_blocked_threshold(mut self, threshold: u32) -> Self {
        self.blocked_threshold = threshold;
        self
    }

    pub fn with_heartbeat_every(mut self, every: Duration) -> Self {
        self.heartbeat_every = every;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Handle for cancelling the session from outside.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Ask the user to approve the session and its bounds.
    pub async fn request_approval(&self) {
        info!(
            session_id = %self.session_id,
            query = %self.query,
            "browsing session pending approval"
        );
        self.sink
            .emit(ServerEvent::AgentRequestApproval {
                session_id: self.session_id.clone(),
                query: self.query.clone(),
                max_pages: self.bounds.max_pages.unwrap_or(DEFAULT_MAX_PAGES),
                max_duration_ms: self.bounds.max_duration.as_millis() as u64,
            })
            .await;
    }

    /// Abandon a session that was never approved.
    pub async fn cancel_pending(self) {
        info!(session_id = %self.session_id, "pending browsing session cancelled");
        self.sink
            .emit(ServerEvent::AgentError {
                session_id: self.session_id,
                error: "cancelled by user".into(),
                recoverable: false,
                cancelled: true,
            })
            .await;
    }

    /// Run the approved session to a terminal state.
    pub async fn approve(self) -> TaskSummary {
        let BrowsingSession {
            session_id,
            query,
            bounds,
            blocked_threshold,
            heartbeat_every,
            model,
            model_name,
            fetcher,
            sink,
            cancel,
        } = self;

        info!(
            session_id = %session_id,
            max_pages = bounds.max_pages,
            "browsing session approved"
        );

        // Engine events flow through an internal channel and reach the
        // client as agent.* events; raw task.* detail stays inside.
        let (inner, mut events) = EventSink::channel(64);
        let forwarder = {
            let outer = sink;
            let sid = session_id.clone();
            tokio::spawn(async move {
                let mut step = 0u32;
                while let Some(ev) = events.recv().await {
                    if matches!(ev, ServerEvent::TaskThinking { .. }) {
                        step += 1;
                    }
                    if let Some(mapped) = agent_event(&sid, step, ev) {
                        outer.emit(mapped).await;
                    }
                }
            })
        };

        let estimated = bounds.max_pages.unwrap_or(DEFAULT_MAX_PAGES);
        let mut behavior = BrowsingBehavior {
            session_id: session_id.clone(),
            query: query.clone(),
            model,
            model_name,
            fetcher,
            sink: inner.clone(),
            visited: Vec::new(),
            answer: None,
            estimated,
        };

        let summary = TaskEngine::new(session_id, query, inner)
            .with_bounds(bounds)
            .with_blocked_threshold(blocked_threshold)
            .with_heartbeat_every(heartbeat_every)
            .with_cancellation(cancel)
            .run(&mut behavior)
            .await;

        // Close the internal channel so the forwarder drains and exits.
        drop(behavior);
        let _ = forwarder.await;

        summary
    }
}

/// Map one engine event to its client-facing form. `None` stays internal.
fn agent_event(session_id: &str, step: u32, ev: ServerEvent) -> Option<ServerEvent> {
    match ev {
        ServerEvent::TaskPhaseChanged { phase, .. } => Some(ServerEvent::AgentStatus {
            session_id: session_id.into(),
            phase,
            step,
        }),
        ServerEvent::TaskComplete {
            summary,
            changes_count,
            ..
        } => Some(ServerEvent::AgentComplete {
            session_id: session_id.into(),
            summary,
            pages_visited: changes_count,
        }),
        ServerEvent::TaskError {
            error,
            recoverable,
            cancelled,
            ..
        } => Some(ServerEvent::AgentError {
            session_id: session_id.into(),
            error,
            recoverable,
            cancelled,
        }),
        ev @ (ServerEvent::AgentPage { .. } | ServerEvent::TaskHeartbeat { .. }) => Some(ev),
        _ => None,
    }
}

/// What the model decided to do next.
#[derive(Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum PickVerdict {
    Fetch {
        url: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Done {
        answer: String,
    },
}

struct VisitedPage {
    url: String,
    summary: String,
}

/// The browsing tool surface: fetch-and-summarize one URL per step.
struct BrowsingBehavior {
    session_id: String,
    query: String,
    model: Arc<dyn ModelClient>,
    model_name: String,
    fetcher: Arc<dyn PageFetcher>,
    sink: EventSink,
    visited: Vec<VisitedPage>,
    answer: Option<String>,
    estimated: u32,
}

impl BrowsingBehavior {
    fn pick_prompt(&self) -> String {
        let mut prompt = format!("Research query: {}\n\n", self.query);
        if self.visited.is_empty() {
            prompt.push_str("No pages visited yet.\n");
        } else {
            prompt.push_str("Pages visited so far:\n");
            for (i, page) in self.visited.iter().enumerate() {
                prompt.push_str(&format!("{}. {} — {}\n", i + 1, page.url, page.summary));
            }
        }
        prompt.push_str(
            "\nIf the visited pages already answer the query, reply with JSON only:\n\
             {\"action\": \"done\", \"answer\": \"<the answer>\"}\n\
             Otherwise pick the single most promising URL to fetch next, JSON only:\n\
             {\"action\": \"fetch\", \"url\": \"<absolute URL>\", \"reason\": \"<why this page>\"}",
        );
        prompt
    }

    async fn summarize(&self, page: &FetchedPage) -> Result<String, ModelError> {
        let prompt = format!(
            "Query: {}\n\nPage: {} ({})\n\n{}\n\n\
             Summarize in two or three sentences what this page contributes \
             to the query. Note anything that answers it directly.",
            self.query,
            page.title.as_deref().unwrap_or("untitled"),
            page.url,
            page.text,
        );
        let request = CompletionRequest::new(&self.model_name, vec![Message::user(prompt)])
            .with_temperature(0.3);

        // One immediate retry on a transient backend failure.
        let first = self.model.complete(request.clone()).await;
        let reply = match first {
            Err(e) if e.is_transient() => {
                warn!(session_id = %self.session_id, error = %e, "transient summarize failure, retrying once");
                self.model.complete(request).await?
            }
            other => other?,
        };
        Ok(reply.trim().to_string())
    }
}

#[async_trait]
impl TaskBehavior for BrowsingBehavior {
    async fn think(&mut self, _ctx: &TaskContext<'_>) -> Result<ThinkOutcome, TaskError> {
        let request = CompletionRequest::new(
            &self.model_name,
            vec![
                Message::system(PICK_SYSTEM),
                Message::user(self.pick_prompt()),
            ],
        )
        .with_temperature(0.3);
        let reply = self.model.complete(request).await?;

        let Some(raw) = extract_json(&reply) else {
            // The model rambled instead of choosing; surface the text and
            // let the next iteration try again.
            return Ok(ThinkOutcome {
                narration: Some(reply.trim().to_string()),
                proposed: None,
                declared_done: false,
            });
        };

        match serde_json::from_str::<PickVerdict>(raw) {
            Ok(PickVerdict::Fetch { url, reason }) => Ok(ThinkOutcome {
                narration: reason.or_else(|| Some(format!("Fetching {url}"))),
                proposed: Some(ToolInvocation::new(FETCH_TOOL, json!({ "url": url }))),
                declared_done: false,
            }),
            Ok(PickVerdict::Done { answer }) => {
                self.answer = Some(answer.clone());
                Ok(ThinkOutcome {
                    narration: Some(answer),
                    proposed: None,
                    declared_done: true,
                })
            }
            Err(e) => {
                debug!(session_id = %self.session_id, error = %e, "unparseable pick, continuing");
                Ok(ThinkOutcome {
                    narration: Some(reply.trim().to_string()),
                    proposed: None,
                    declared_done: false,
                })
            }
        }
    }

    async fn execute(&mut self, call: &ToolInvocation) -> ToolOutcome {
        if call.tool != FETCH_TOOL {
            return ToolOutcome::failed(format!("unknown tool: {}", call.tool));
        }
        let Some(url) = call.params.get("url").and_then(|v| v.as_str()) else {
            return ToolOutcome::failed("fetch_page needs a url parameter");
        };

        let page = match self.fetcher.fetch(url).await {
            Ok(page) => page,
            Err(e) => return ToolOutcome::failed(format!("fetch failed: {e}")),
        };

        let summary = match self.summarize(&page).await {
            Ok(summary) => summary,
            Err(e) => return ToolOutcome::failed(format!("summarize failed: {e}")),
        };

        self.sink
            .emit(ServerEvent::AgentPage {
                session_id: self.session_id.clone(),
                url: page.url.clone(),
                title: page.title.clone(),
                summary: summary.clone(),
            })
            .await;

        self.visited.push(VisitedPage {
            url: page.url,
            summary: summary.clone(),
        });

        ToolOutcome::ok(format!("{url}: {}", first_line(&summary)))
    }

    async fn evaluate(&mut self, _ctx: &TaskContext<'_>) -> GoalStatus {
        if self.answer.is_some() {
            GoalStatus::Achieved
        } else {
            GoalStatus::InProgress
        }
    }

    fn changes_applied(&self) -> u32 {
        self.visited.len() as u32
    }

    fn estimated_steps(&self) -> u32 {
        self.estimated
    }

    fn outcome_summary(&self) -> String {
        match &self.answer {
            Some(answer) => answer.clone(),
            None => format!(
                "Visited {} pages without a conclusive answer.",
                self.visited.len()
            ),
        }
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or(text).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::error::FetchError;
    use kindred_provider::{ScriptedModel, StaticFetcher};
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Fetcher wrapper that counts calls and can fire a cancellation
    /// token mid-fetch.
    struct CountingFetcher {
        inner: StaticFetcher,
        calls: AtomicU32,
        cancel_on_fetch: std::sync::Mutex<Option<CancellationToken>>,
    }

    impl CountingFetcher {
        fn new(inner: StaticFetcher) -> Self {
            Self {
                inner,
                calls: AtomicU32::new(0),
                cancel_on_fetch: std::sync::Mutex::new(None),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }

        fn cancel_on_fetch(&self, token: CancellationToken) {
            *self.cancel_on_fetch.lock().unwrap() = Some(token);
        }
    }

    #[async_trait]
    impl PageFetcher for CountingFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(token) = self.cancel_on_fetch.lock().unwrap().as_ref() {
                token.cancel();
            }
            self.inner.fetch(url).await
        }
    }

    fn pick(url: &str) -> String {
        format!(r#"{{"action": "fetch", "url": "{url}", "reason": "looks relevant"}}"#)
    }

    fn done(answer: &str) -> String {
        format!(r#"{{"action": "done", "answer": "{answer}"}}"#)
    }

    fn three_pages() -> StaticFetcher {
        StaticFetcher::default()
            .with_page("https://a.example/one", Some("One"), "first page text")
            .with_page("https://a.example/two", Some("Two"), "second page text")
            .with_page("https://a.example/three", Some("Three"), "third page text")
    }

    fn session(
        model: Arc<ScriptedModel>,
        fetcher: Arc<CountingFetcher>,
        max_pages: u32,
        sink: EventSink,
    ) -> BrowsingSession {
        BrowsingSession::new(
            "browse_1",
            "what color is the sky",
            TaskBounds {
                max_pages: Some(max_pages),
                ..TaskBounds::default()
            },
            model,
            "kindred-chat-1",
            fetcher,
            sink,
        )
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        events
    }

    #[tokio::test]
    async fn pending_session_never_touches_the_network() {
        let (sink, mut rx) = EventSink::channel(64);
        let fetcher = Arc::new(CountingFetcher::new(three_pages()));
        let model = Arc::new(ScriptedModel::new(vec![]));

        let session = session(model, fetcher.clone(), 3, sink);
        session.request_approval().await;
        session.cancel_pending().await;

        assert_eq!(fetcher.calls(), 0);

        let events = drain(&mut rx);
        match &events[0] {
            ServerEvent::AgentRequestApproval {
                session_id,
                query,
                max_pages,
                ..
            } => {
                assert_eq!(session_id, "browse_1");
                assert_eq!(query, "what color is the sky");
                assert_eq!(*max_pages, 3);
            }
            other => panic!("expected approval request, got {other:?}"),
        }
        match events.last().unwrap() {
            ServerEvent::AgentError { cancelled, .. } => assert!(*cancelled),
            other => panic!("expected cancelled error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn page_bound_visits_exactly_max_pages() {
        let (sink, mut rx) = EventSink::channel(64);
        let fetcher = Arc::new(CountingFetcher::new(three_pages()));
        let model = Arc::new(ScriptedModel::texts(&[
            &pick("https://a.example/one"),
            "Page one is about clouds.",
            &pick("https://a.example/two"),
            "Page two is about sunsets.",
            &pick("https://a.example/three"),
            "Page three is about rain.",
        ]));

        let summary = session(model, fetcher.clone(), 3, sink).approve().await;

        // The bound is a hard stop with partial results, not an error.
        assert!(summary.success);
        assert!(summary.failure.is_none());
        assert_eq!(summary.changes_applied, 3);
        assert_eq!(summary.iterations, 3);
        assert_eq!(fetcher.calls(), 3);

        let events = drain(&mut rx);
        let pages = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::AgentPage { .. }))
            .count();
        assert_eq!(pages, 3);
        match events.last().unwrap() {
            ServerEvent::AgentComplete {
                pages_visited,
                summary,
                ..
            } => {
                assert_eq!(*pages_visited, 3);
                assert!(summary.contains("page limit"));
            }
            other => panic!("expected agent.complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn found_answer_completes_before_the_bound() {
        let (sink, mut rx) = EventSink::channel(64);
        let fetcher = Arc::new(CountingFetcher::new(three_pages()));
        let model = Arc::new(ScriptedModel::texts(&[
            &pick("https://a.example/one"),
            "Page one says the sky is blue.",
            &done("The sky is blue."),
        ]));

        let summary = session(model, fetcher.clone(), 3, sink).approve().await;

        assert!(summary.success);
        assert_eq!(summary.changes_applied, 1);
        assert_eq!(summary.summary, "The sky is blue.");
        assert_eq!(fetcher.calls(), 1);

        let events = drain(&mut rx);
        match events.last().unwrap() {
            ServerEvent::AgentComplete { pages_visited, .. } => assert_eq!(*pages_visited, 1),
            other => panic!("expected agent.complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancel_mid_fetch_finishes_the_page_first() {
        let (sink, mut rx) = EventSink::channel(64);
        let fetcher = Arc::new(CountingFetcher::new(three_pages()));
        let model = Arc::new(ScriptedModel::texts(&[
            &pick("https://a.example/one"),
            "Page one is about clouds.",
        ]));

        let session = session(model, fetcher.clone(), 3, sink);
        fetcher.cancel_on_fetch(session.cancellation_token());

        let summary = session.approve().await;

        assert!(!summary.success);
        assert!(summary.failure.unwrap().cancelled);
        assert_eq!(fetcher.calls(), 1);

        // The in-flight page's result landed before the terminal event.
        let events = drain(&mut rx);
        let page_at = events
            .iter()
            .position(|e| matches!(e, ServerEvent::AgentPage { .. }))
            .unwrap();
        let error_at = events
            .iter()
            .position(|e| matches!(e, ServerEvent::AgentError { .. }))
            .unwrap();
        assert!(page_at < error_at);
    }

    #[tokio::test]
    async fn rambling_pick_is_survived() {
        let (sink, _rx) = EventSink::channel(64);
        let fetcher = Arc::new(CountingFetcher::new(three_pages()));
        let model = Arc::new(ScriptedModel::texts(&[
            "Hmm, let me think about where to look first.",
            &done("The sky is blue."),
        ]));

        let summary = session(model, fetcher.clone(), 3, sink).approve().await;

        assert!(summary.success);
        assert_eq!(summary.changes_applied, 0);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn failed_fetch_blocks_the_iteration_then_recovers() {
        let (sink, mut rx) = EventSink::channel(64);
        let fetcher = Arc::new(CountingFetcher::new(three_pages()));
        let model = Arc::new(ScriptedModel::texts(&[
            &pick("https://a.example/missing"),
            &pick("https://a.example/one"),
            "Page one says the sky is blue.",
            &done("The sky is blue."),
        ]));

        let summary = session(model, fetcher.clone(), 3, sink).approve().await;

        assert!(summary.success);
        assert_eq!(summary.changes_applied, 1);
        assert_eq!(summary.iterations, 3);

        let events = drain(&mut rx);
        let pages = events
            .iter()
            .filter(|e| matches!(e, ServerEvent::AgentPage { .. }))
            .count();
        assert_eq!(pages, 1);
    }
}
