//! Dependency wiring for Kindred.
//!
//! A [`Container`] holds one `Arc` per collaborator boundary plus the
//! loaded [`AppConfig`]. It is constructed once — [`Container::production`]
//! for a deployment, [`Container::for_tests`] or a [`ContainerBuilder`]
//! in tests — and passed to every orchestration entry point. There is no
//! global instance: a test that wants different collaborators builds its
//! own container, and nothing leaks between tests.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use kindred_agentic::{BrowsingSession, EditingAgent};
use kindred_config::{AppConfig, ConfigError};
use kindred_context::ContextAssembler;
use kindred_core::document::DocumentStore;
use kindred_core::fetch::PageFetcher;
use kindred_core::insight::InnerThought;
use kindred_core::memory::MemoryStore;
use kindred_core::message::ConversationStore;
use kindred_core::model::ModelClient;
use kindred_core::persona::PersonaStore;
use kindred_core::task::TaskBounds;
use kindred_merge::VersionGate;
use kindred_protocol::EventSink;
use kindred_provider::{EchoModel, HttpPageFetcher, OpenAiModel, StaticFetcher};
use kindred_stores::{
    FixedPersona, InMemoryConversations, InMemoryDocuments, KeywordMemory, ModelInsight,
    NullMemory, PersonaEngine, StaticInsight,
};
use kindred_stream::{SendDeduper, StreamEngine};

/// Persona text used until a deployment configures its own.
const DEFAULT_PERSONA: &str = "Kin, a warm and attentive companion. Kin listens closely, \
     remembers what matters to the user, and speaks plainly rather than performing enthusiasm.";

/// Every collaborator the orchestration core needs, wired once.
pub struct Container {
    pub config: AppConfig,
    pub model: Arc<dyn ModelClient>,
    pub fetcher: Arc<dyn PageFetcher>,
    pub conversations: Arc<dyn ConversationStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub memory: Arc<dyn MemoryStore>,
    pub persona: Arc<dyn PersonaStore>,
    pub insight: Arc<dyn InnerThought>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container").finish_non_exhaustive()
    }
}

impl Container {
    /// Wire the production collaborators from `config`.
    ///
    /// Needs an API key — `model.api_key` in `kindred.toml` or the
    /// `KINDRED_API_KEY` variable. Without one this refuses to build
    /// rather than handing out a container that fails on the first turn.
    pub fn production(config: AppConfig) -> Result<Self, ConfigError> {
        let Some(api_key) = config.model.api_key.clone() else {
            return Err(ConfigError::ValidationError(
                "production wiring needs an API key: set model.api_key or KINDRED_API_KEY"
                    .to_string(),
            ));
        };
        let model: Arc<dyn ModelClient> =
            Arc::new(OpenAiModel::new(config.model.base_url.clone(), api_key));
        let memory = Arc::new(KeywordMemory::new(
            model.clone(),
            config.model.utility_model.clone(),
        ));
        let insight = Arc::new(ModelInsight::new(
            model.clone(),
            config.model.utility_model.clone(),
        ));
        info!(
            backend = model.name(),
            chat_model = %config.model.chat_model,
            utility_model = %config.model.utility_model,
            "container wired for production"
        );
        Ok(Self {
            config,
            model,
            fetcher: Arc::new(HttpPageFetcher::new()),
            conversations: Arc::new(InMemoryConversations::new()),
            documents: Arc::new(InMemoryDocuments::new()),
            memory,
            persona: Arc::new(PersonaEngine::new(DEFAULT_PERSONA)),
            insight,
        })
    }

    /// Deterministic stand-ins for every collaborator: echo model, static
    /// fetcher, null memory, fixed persona and guidance, fresh in-memory
    /// stores, default config.
    pub fn for_tests() -> Self {
        ContainerBuilder::new().build()
    }

    /// Test defaults with per-field overrides.
    pub fn builder() -> ContainerBuilder {
        ContainerBuilder::new()
    }

    // ── Pipeline factories ──

    /// Context assembly wired to the configured window and budget.
    pub fn context_assembler(&self) -> ContextAssembler {
        ContextAssembler::new(
            self.config.context.history_window,
            self.config.context.token_budget,
        )
    }

    /// Streaming engine wired to the configured batch size and debounce.
    pub fn stream_engine(&self) -> StreamEngine {
        StreamEngine::new(self.config.stream.batch_size, self.config.stream.debounce_ms)
    }

    /// Double-submit guard wired to the configured window.
    pub fn send_deduper(&self) -> SendDeduper {
        SendDeduper::new(Duration::from_millis(self.config.stream.dedup_window_ms))
    }

    /// Version gate over the shared document store.
    pub fn version_gate(&self) -> Arc<VersionGate> {
        Arc::new(VersionGate::new(self.documents.clone()))
    }

    /// A browsing session in the pending state. Bounds fall back to the
    /// configured defaults where the caller passes `None`.
    pub fn browsing_agent(
        &self,
        session_id: impl Into<String>,
        query: impl Into<String>,
        max_pages: Option<u32>,
        max_duration_ms: Option<u64>,
        sink: EventSink,
    ) -> BrowsingSession {
        let agent = &self.config.agent;
        let bounds = TaskBounds {
            max_iterations: agent.max_iterations,
            max_duration: Duration::from_millis(
                max_duration_ms.unwrap_or(agent.default_max_duration_ms),
            ),
            max_pages: Some(max_pages.unwrap_or(agent.default_max_pages)),
        };
        BrowsingSession::new(
            session_id,
            query,
            bounds,
            self.model.clone(),
            self.config.model.chat_model.clone(),
            self.fetcher.clone(),
            sink,
        )
        .with_blocked_threshold(agent.blocked_threshold)
        .with_heartbeat_every(Duration::from_secs(agent.heartbeat_interval_secs))
    }

    /// An editing agent over one document, ready to run. The caller
    /// supplies the content and version it read; planning and bounds
    /// come from config.
    pub fn editing_agent(
        &self,
        task_id: impl Into<String>,
        document_id: impl Into<String>,
        instruction: impl Into<String>,
        content: impl Into<String>,
        base_version: u64,
        sink: EventSink,
    ) -> EditingAgent {
        let agent = &self.config.agent;
        let bounds = TaskBounds {
            max_iterations: agent.max_iterations,
            max_duration: Duration::from_millis(agent.default_max_duration_ms),
            max_pages: None,
        };
        EditingAgent::new(
            task_id,
            document_id,
            instruction,
            content,
            base_version,
            self.model.clone(),
            self.config.model.chat_model.clone(),
            self.version_gate(),
            sink,
        )
        .with_planning(agent.edit_planning)
        .with_bounds(bounds)
        .with_blocked_threshold(agent.blocked_threshold)
        .with_heartbeat_every(Duration::from_secs(agent.heartbeat_interval_secs))
    }
}

/// Builds a [`Container`] from test stand-ins, any of which can be
/// swapped out before `build`.
#[derive(Default)]
pub struct ContainerBuilder {
    config: Option<AppConfig>,
    model: Option<Arc<dyn ModelClient>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    conversations: Option<Arc<dyn ConversationStore>>,
    documents: Option<Arc<dyn DocumentStore>>,
    memory: Option<Arc<dyn MemoryStore>>,
    persona: Option<Arc<dyn PersonaStore>>,
    insight: Option<Arc<dyn InnerThought>>,
}

impl ContainerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: AppConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_model(mut self, model: Arc<dyn ModelClient>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_conversations(mut self, conversations: Arc<dyn ConversationStore>) -> Self {
        self.conversations = Some(conversations);
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentStore>) -> Self {
        self.documents = Some(documents);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_persona(mut self, persona: Arc<dyn PersonaStore>) -> Self {
        self.persona = Some(persona);
        self
    }

    pub fn with_insight(mut self, insight: Arc<dyn InnerThought>) -> Self {
        self.insight = Some(insight);
        self
    }

    pub fn build(self) -> Container {
        Container {
            config: self.config.unwrap_or_default(),
            model: self.model.unwrap_or_else(|| Arc::new(EchoModel)),
            fetcher: self
                .fetcher
                .unwrap_or_else(|| Arc::new(StaticFetcher::new())),
            conversations: self
                .conversations
                .unwrap_or_else(|| Arc::new(InMemoryConversations::new())),
            documents: self
                .documents
                .unwrap_or_else(|| Arc::new(InMemoryDocuments::new())),
            memory: self.memory.unwrap_or_else(|| Arc::new(NullMemory)),
            persona: self
                .persona
                .unwrap_or_else(|| Arc::new(FixedPersona::default())),
            insight: self
                .insight
                .unwrap_or_else(|| Arc::new(StaticInsight::default())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use kindred_protocol::ServerEvent;
    use kindred_provider::ScriptedModel;

    #[test]
    fn for_tests_wires_deterministic_stubs() {
        let container = Container::for_tests();
        assert_eq!(container.model.name(), "echo");
        assert_eq!(container.memory.name(), "null");
        assert!(!container.config.has_api_key());
    }

    #[test]
    fn builder_overrides_a_single_collaborator() {
        let container = Container::builder()
            .with_model(Arc::new(ScriptedModel::single("hi")))
            .build();
        assert_eq!(container.model.name(), "scripted");
        assert_eq!(container.memory.name(), "null");
    }

    #[test]
    fn production_refuses_to_wire_without_an_api_key() {
        let err = Container::production(AppConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn production_wires_the_real_backends() {
        let mut config = AppConfig::default();
        config.model.api_key = Some("sk-test".to_string());
        let container = Container::production(config).expect("container");
        assert_eq!(container.model.name(), "openai");
        assert_eq!(container.memory.name(), "keyword");
        assert!(container.config.has_api_key());
    }

    #[tokio::test]
    async fn browsing_agent_fills_bounds_from_config() {
        let container = Container::for_tests();
        let (sink, mut events) = EventSink::channel(8);

        let session = container.browsing_agent("browse_1", "test query", None, Some(9_000), sink);
        session.request_approval().await;

        match events.try_recv().expect("approval event") {
            ServerEvent::AgentRequestApproval {
                session_id,
                query,
                max_pages,
                max_duration_ms,
            } => {
                assert_eq!(session_id, "browse_1");
                assert_eq!(query, "test query");
                assert_eq!(max_pages, container.config.agent.default_max_pages);
                assert_eq!(max_duration_ms, 9_000);
            }
            other => panic!("expected an approval request, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn editing_agent_writes_through_the_shared_document_store() {
        let write = serde_json::json!({
            "action": "write",
            "content": "hello\nworld",
            "description": "append world",
        })
        .to_string();
        let done = serde_json::json!({
            "action": "done",
            "summary": "Appended a line.",
        })
        .to_string();

        let mut config = AppConfig::default();
        config.agent.edit_planning = false;
        let container = Container::builder()
            .with_config(config)
            .with_model(Arc::new(ScriptedModel::texts(&[
                write.as_str(),
                done.as_str(),
            ])))
            .build();
        container
            .documents
            .create("doc_1", "Notes", "text/plain", None, "hello")
            .await
            .expect("seed document");

        let (sink, _events) = EventSink::channel(64);
        let summary = container
            .editing_agent("edit_1", "doc_1", "add a second line", "hello", 1, sink)
            .run()
            .await;

        assert!(summary.success);
        let doc = container.documents.get("doc_1").await.expect("document");
        assert_eq!(doc.version, 2);
        assert_eq!(doc.content, "hello\nworld");
    }
}
