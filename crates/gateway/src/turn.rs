//! One chat turn, end to end.
//!
//! Runs in its own task per turn: persist the user message, retrieve
//! what assembly needs, stream the model reply through the stream
//! engine, then hand the finished exchange to the memory store.
//! Everything the client sees leaves through the turn's [`EventSink`].

use kindred_context::TurnInput;
use kindred_core::insight::ResponseGuidance;
use kindred_core::message::{ConversationId, Message};
use kindred_core::model::CompletionRequest;
use kindred_protocol::{EventSink, ServerEvent};
use tracing::{debug, info, warn};

use crate::SharedState;

/// Run a whole chat turn. Failures before streaming surface as one
/// `chat.error`; mid-stream failures are reported by the stream engine.
pub async fn run_turn(
    state: SharedState,
    sink: EventSink,
    conversation: ConversationId,
    web_summaries: Vec<String>,
    content: String,
    privacy: bool,
    agentic_mode: bool,
) {
    let container = &state.container;
    let config = &container.config;

    // History is read before the new message lands; the assembler appends
    // the user text itself.
    let history = match container
        .conversations
        .recent(&conversation, config.context.history_window)
        .await
    {
        Ok(history) => history,
        Err(e) => {
            fail(&sink, format!("history unavailable: {e}")).await;
            return;
        }
    };

    if let Err(e) = container
        .conversations
        .append(&conversation, Message::user(&content))
        .await
    {
        fail(&sink, format!("could not persist the message: {e}")).await;
        return;
    }

    // Private turns never touch the memory store.
    let memories = if privacy {
        Vec::new()
    } else {
        match container
            .memory
            .retrieve(&content, config.context.memory_top_k)
            .await
        {
            Ok(memories) => memories,
            Err(e) => {
                warn!(error = %e, "memory retrieval failed; continuing without");
                Vec::new()
            }
        }
    };

    let persona = match container.persona.snapshot().await {
        Ok(persona) => persona,
        Err(e) => {
            fail(&sink, format!("persona unavailable: {e}")).await;
            return;
        }
    };

    let guidance = match container.insight.classify_context(&content, &history).await {
        Ok(guidance) => guidance,
        Err(e) => {
            warn!(error = %e, "inner-thought classification failed; replying unguided");
            ResponseGuidance::default()
        }
    };

    let assembled = match container.context_assembler().assemble(&TurnInput {
        persona: &persona,
        guidance: &guidance,
        web_summaries: &web_summaries,
        history: &history,
        memories: &memories,
        document: None,
        user_text: &content,
        private_turn: privacy,
        agentic_mode,
    }) {
        Ok(assembled) => assembled,
        Err(e) => {
            fail(&sink, format!("context assembly failed: {e}")).await;
            return;
        }
    };
    debug!(
        total_tokens = assembled.stats.total_tokens,
        history_included = assembled.stats.history_included,
        memories = memories.len(),
        "context assembled"
    );

    let request = CompletionRequest::new(&config.model.chat_model, assembled.into_messages())
        .with_temperature(config.model.temperature);
    let chunks = match container.model.stream(request).await {
        Ok(chunks) => chunks,
        Err(e) => {
            fail(&sink, e.to_string()).await;
            return;
        }
    };

    let outcome = match container
        .stream_engine()
        .run(chunks, &sink, container.conversations.as_ref(), &conversation)
        .await
    {
        Ok(outcome) => outcome,
        // The engine already emitted chat.error for whatever happened.
        Err(e) => {
            warn!(error = %e, "turn stream failed");
            return;
        }
    };

    if !privacy {
        match container
            .memory
            .classify_and_store(&content, &outcome.combined_text(), None)
            .await
        {
            Ok(Some(memory)) => debug!(kind = ?memory.kind, "turn stored a memory"),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "post-turn memory classification failed"),
        }
    }

    info!(
        conversation = %conversation.0,
        bubbles = outcome.messages.len(),
        private = privacy,
        "turn complete"
    );
}

async fn fail(sink: &EventSink, error: String) {
    sink.emit(ServerEvent::ChatError { error }).await;
}
