//! Context assembly pipeline — turns one chat turn into a provider prompt.
//!
//! Assembles the message list in a fixed five-step order:
//!
//! 1. **System message** (persona, mood/relationship, beliefs/goals, web
//!    findings, response guidance) — never contains memory content
//! 2. **History window** (last N visible turns, oldest first)
//! 3. **Memories** — a single synthetic user message in `[CONTEXT]` markers
//! 4. **Document context** — a single user message in `[DOCUMENT]` markers
//! 5. **Current user message** — always last
//!
//! Memories and document context ride as trailing user-role content so the
//! system message stays stable (and cacheable) across turns and retrieved
//! context sits closest to the query it supports.
//!
//! # Determinism
//!
//! Assembly is deterministic: identical inputs always produce an identical
//! system message and message ordering. No random or time-dependent logic
//! participates in layout decisions.

use kindred_core::{Document, Memory, Message, PersonaSnapshot, ResponseGuidance, Role};

use crate::token;

// ── Types ─────────────────────────────────────────────────────────────────

/// Everything the assembler needs for one turn. Retrieval happens before
/// assembly; the assembler itself never calls a collaborator.
pub struct TurnInput<'a> {
    /// Persona state fetched fresh for this turn.
    pub persona: &'a PersonaSnapshot,
    /// Response guidance from inner-thought classification.
    pub guidance: &'a ResponseGuidance,
    /// Summaries of prior web-browsing results relevant to this turn.
    pub web_summaries: &'a [String],
    /// Recent conversation history, oldest first.
    pub history: &'a [Message],
    /// Memories retrieved for this turn, already ranked.
    pub memories: &'a [Memory],
    /// Document attached to the turn, if any.
    pub document: Option<&'a Document>,
    /// The new user message.
    pub user_text: &'a str,
    /// Private turn: memories are neither injected here nor stored later.
    pub private_turn: bool,
    /// Agentic mode: autonomous browsing is enabled for this conversation.
    pub agentic_mode: bool,
}

/// The assembled prompt, ready for a provider call.
#[derive(Debug, Clone)]
pub struct AssembledContext {
    /// The system message (step 1).
    pub system_message: String,
    /// History window, memory/document context, and the current user
    /// message, in that order (steps 2-5).
    pub messages: Vec<Message>,
    /// Assembly accounting.
    pub stats: AssemblyStats,
}

impl AssembledContext {
    /// The full provider message list: system message first, then the rest.
    pub fn into_messages(self) -> Vec<Message> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        out.push(Message::system(self.system_message));
        out.extend(self.messages);
        out
    }
}

/// Accounting for one assembly pass.
#[derive(Debug, Clone)]
pub struct AssemblyStats {
    /// Estimated tokens across system message and all messages.
    pub total_tokens: usize,
    /// Configured token budget.
    pub budget: usize,
    /// History messages included after windowing and budget trimming.
    pub history_included: usize,
    /// Visible history messages available before trimming.
    pub history_available: usize,
    /// Estimated tokens of history dropped by budget trimming.
    pub history_tokens_dropped: usize,
    /// Memories injected (zero on private turns).
    pub memories_included: usize,
    /// Whether a document context message was appended.
    pub document_attached: bool,
}

/// Errors from context assembly.
///
/// History is the only layer that may be trimmed. When the untrimmable
/// parts alone exceed the budget, assembly fails rather than corrupt the
/// prompt.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AssemblyError {
    #[error(
        "untrimmable context ({fixed_tokens} tokens) exceeds the token budget ({budget} tokens)"
    )]
    BudgetExceeded { fixed_tokens: usize, budget: usize },
}

// ── Assembler ─────────────────────────────────────────────────────────────

/// The context assembler. Stateless — create one and reuse it across turns.
#[derive(Debug, Clone)]
pub struct ContextAssembler {
    history_window: usize,
    token_budget: usize,
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(20, 8192)
    }
}

impl ContextAssembler {
    /// Create an assembler with a history window (message count) and a
    /// total token budget.
    pub fn new(history_window: usize, token_budget: usize) -> Self {
        Self {
            history_window,
            token_budget,
        }
    }

    /// Assemble the prompt for one turn.
    ///
    /// # Algorithm
    ///
    /// 1. Render the system message and the trailing context messages
    ///    (memories, document, current user text). These never shrink.
    /// 2. If they already exceed the budget, fail.
    /// 3. Spend the remaining budget on the history window, dropping
    ///    messages strictly from the oldest end.
    pub fn assemble(&self, input: &TurnInput<'_>) -> Result<AssembledContext, AssemblyError> {
        let system_message = self.render_system(input);
        let system_tokens = token::estimate_tokens(&system_message);

        let memory_message = if input.private_turn || input.memories.is_empty() {
            None
        } else {
            Some(Message::user(render_memories(input.memories)))
        };
        let memories_included = if memory_message.is_some() {
            input.memories.len()
        } else {
            0
        };

        let document_message = input.document.map(|doc| Message::user(render_document(doc)));

        let user_message = Message::user(input.user_text);

        let mut fixed_tokens = system_tokens + token::estimate_message_tokens(&user_message);
        if let Some(msg) = &memory_message {
            fixed_tokens += token::estimate_message_tokens(msg);
        }
        if let Some(msg) = &document_message {
            fixed_tokens += token::estimate_message_tokens(msg);
        }

        if fixed_tokens > self.token_budget {
            return Err(AssemblyError::BudgetExceeded {
                fixed_tokens,
                budget: self.token_budget,
            });
        }

        let remaining = self.token_budget - fixed_tokens;
        let (history, history_available, history_tokens_dropped) =
            self.history_window_within(input.history, remaining);

        if history_tokens_dropped > 0 {
            tracing::debug!(
                dropped_tokens = history_tokens_dropped,
                included = history.len(),
                available = history_available,
                "history trimmed to fit token budget"
            );
        }

        let history_included = history.len();
        let mut messages = history;
        if let Some(msg) = memory_message {
            messages.push(msg);
        }
        if let Some(msg) = document_message {
            messages.push(msg);
        }
        messages.push(user_message);

        let total_tokens = system_tokens + token::estimate_messages_tokens(&messages);

        Ok(AssembledContext {
            system_message,
            messages,
            stats: AssemblyStats {
                total_tokens,
                budget: self.token_budget,
                history_included,
                history_available,
                history_tokens_dropped,
                memories_included,
                document_attached: input.document.is_some(),
            },
        })
    }

    // ── Step 1: system message ────────────────────────────────────────────

    fn render_system(&self, input: &TurnInput<'_>) -> String {
        let persona = input.persona;
        let mut sections: Vec<String> = Vec::new();

        sections.push(persona.persona_text.clone());

        sections.push(format!(
            "[Current State]\nMood: {} (valence {:.2}, arousal {:.2})\nRelationship: {} (closeness {:.2}, trust {:.2}, flirtation {:.2})",
            persona.mood.stance,
            persona.mood.valence,
            persona.mood.arousal,
            persona.relationship.stage,
            persona.relationship.closeness,
            persona.relationship.trust,
            persona.relationship.flirtation,
        ));

        if !persona.beliefs.is_empty() {
            sections.push(bullet_section("[Beliefs]", &persona.beliefs));
        }
        if !persona.goals.is_empty() {
            sections.push(bullet_section("[Goals]", &persona.goals));
        }
        if !input.web_summaries.is_empty() {
            sections.push(bullet_section("[Recent Web Findings]", input.web_summaries));
        }

        if !input.guidance.is_empty() {
            let mut guidance = String::from("[Response Guidance]");
            if !input.guidance.tone.is_empty() {
                guidance.push_str("\nTone: ");
                guidance.push_str(&input.guidance.tone);
            }
            for directive in &input.guidance.directives {
                guidance.push_str("\n- ");
                guidance.push_str(directive);
            }
            sections.push(guidance);
        }

        if input.agentic_mode {
            sections.push(
                "[Agentic Mode]\nAutonomous browsing is enabled for this conversation. \
                 Findings from browsing tasks appear under [Recent Web Findings]; weave \
                 them in naturally and never present them as the user's words."
                    .to_string(),
            );
        }

        sections.join("\n\n")
    }

    // ── Step 2: history window ────────────────────────────────────────────

    /// Apply the message-count window and the token budget to history.
    ///
    /// Returns the included messages (oldest first), the count of visible
    /// messages before trimming, and the estimated tokens dropped. Trimming
    /// is strictly oldest-first: once a message does not fit, everything
    /// older than it is dropped too.
    fn history_window_within(
        &self,
        history: &[Message],
        budget: usize,
    ) -> (Vec<Message>, usize, usize) {
        let visible: Vec<&Message> = history
            .iter()
            .filter(|m| m.role != Role::System && !m.is_hidden_from_history())
            .collect();
        let available = visible.len();

        let window_start = available.saturating_sub(self.history_window);
        let window = &visible[window_start..];

        let mut used = 0;
        let mut included: Vec<Message> = Vec::new();
        for msg in window.iter().rev() {
            let msg_tokens = token::estimate_message_tokens(msg);
            if used + msg_tokens > budget {
                break;
            }
            used += msg_tokens;
            included.push((*msg).clone());
        }
        included.reverse();

        let dropped_tokens: usize = window[..window.len() - included.len()]
            .iter()
            .map(|m| token::estimate_message_tokens(m))
            .sum();

        (included, available, dropped_tokens)
    }
}

// ── Steps 3 and 4: trailing context renderers ─────────────────────────────

fn render_memories(memories: &[Memory]) -> String {
    let mut out = String::from("[CONTEXT]\nRelevant background from memory:");
    for memory in memories {
        out.push_str("\n- ");
        out.push_str(&memory.content);
    }
    out.push_str("\n[/CONTEXT]");
    out
}

fn render_document(doc: &Document) -> String {
    let mut out = format!("[DOCUMENT]\nTitle: {}\nType: {}", doc.title, doc.content_type);
    if let Some(language) = &doc.language {
        out.push_str("\nLanguage: ");
        out.push_str(language);
    }
    out.push_str("\nContent:\n");
    out.push_str(&doc.content);
    out.push_str("\n[/DOCUMENT]");
    out
}

fn bullet_section(header: &str, items: &[String]) -> String {
    let mut out = String::from(header);
    for item in items {
        out.push_str("\n- ");
        out.push_str(item);
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────
