//! The streaming response engine.
//!
//! Sits between a provider token stream and the client's event channel.
//! Tokens are buffered and flushed either when the buffer holds a fixed
//! number of them or when a short debounce interval elapses, whichever
//! comes first, so clients render at a smooth rate without per-token
//! traffic. A split signal (an explicit chunk flag or the split marker
//! appearing in the text, even across chunk boundaries) closes the current
//! message bubble and opens the next one. On completion every bubble is
//! persisted through the conversation store and announced with its durable
//! id, then the turn is sealed with `chat.complete`.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use kindred_core::error::{ModelError, StoreError};
use kindred_core::message::{ConversationId, ConversationStore, Message};
use kindred_core::model::StreamChunk;
use kindred_protocol::{EventSink, ServerEvent};

/// Default split marker the model emits to break a turn into bubbles.
pub const SPLIT_MARKER: &str = "<<<SPLIT>>>";

/// Errors from a streamed turn. Whatever happens here was already surfaced
/// to the client as `chat.error`; the caller only needs it for control flow.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("model stream failed: {0}")]
    Model(#[from] ModelError),

    #[error("failed to persist streamed message: {0}")]
    Store(#[from] StoreError),
}

/// What a completed streamed turn produced.
#[derive(Debug, Clone)]
pub struct StreamOutcome {
    /// The persisted assistant bubbles, in display order.
    pub messages: Vec<Message>,
}

impl StreamOutcome {
    /// All bubble text joined, for post-turn classification.
    pub fn combined_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

// ── Engine ────────────────────────────────────────────────────────────────

/// The streaming engine. Stateless across turns; per-turn state lives
/// inside [`StreamEngine::run`].
#[derive(Debug, Clone)]
pub struct StreamEngine {
    batch_size: usize,
    debounce: Duration,
    split_marker: String,
}

impl Default for StreamEngine {
    fn default() -> Self {
        Self::new(10, 16)
    }
}

impl StreamEngine {
    /// Create an engine flushing every `batch_size` tokens or after
    /// `debounce_ms` milliseconds, whichever comes first.
    pub fn new(batch_size: usize, debounce_ms: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            debounce: Duration::from_millis(debounce_ms),
            split_marker: SPLIT_MARKER.to_string(),
        }
    }

    /// Override the split marker.
    pub fn with_split_marker(mut self, marker: impl Into<String>) -> Self {
        self.split_marker = marker.into();
        self
    }

    /// Drive one streamed turn to completion.
    ///
    /// Consumes the provider stream, emits `chat.token` / `chat.split`
    /// batches, persists the finished bubbles, and emits
    /// `chat.messageSaved` per bubble followed by `chat.complete`.
    ///
    /// On a mid-stream model error nothing is persisted: the client keeps
    /// only what it already rendered and receives `chat.error`.
    pub async fn run(
        &self,
        mut chunks: mpsc::Receiver<Result<StreamChunk, ModelError>>,
        sink: &EventSink,
        store: &dyn ConversationStore,
        conversation: &ConversationId,
    ) -> Result<StreamOutcome, StreamError> {
        let mut scanner = MarkerScanner::new(&self.split_marker);
        let mut turn = TurnState::default();

        loop {
            let wake = turn
                .deadline
                .unwrap_or_else(|| Instant::now() + Duration::from_secs(60));
            tokio::select! {
                maybe = chunks.recv() => {
                    let chunk = match maybe {
                        Some(Ok(chunk)) => chunk,
                        Some(Err(e)) => {
                            sink.emit(ServerEvent::ChatError {
                                error: e.to_string(),
                            })
                            .await;
                            return Err(e.into());
                        }
                        // Provider hung up without a done marker; treat the
                        // turn as complete with what we have.
                        None => break,
                    };

                    if let Some(delta) = &chunk.delta {
                        for segment in scanner.feed(delta) {
                            match segment {
                                Segment::Text(text) => turn.push_text(&text),
                                Segment::Split => turn.close_bubble(sink).await,
                            }
                        }
                        turn.tokens_buffered += 1;
                        if turn.deadline.is_none() {
                            turn.deadline = Some(Instant::now() + self.debounce);
                        }
                        if turn.tokens_buffered >= self.batch_size {
                            turn.flush(sink).await;
                        }
                    }

                    if chunk.split {
                        // A partial marker held back by the scanner is
                        // literal text once an explicit split cuts the
                        // stream.
                        if let Some(rest) = scanner.take_hold() {
                            turn.push_text(&rest);
                        }
                        turn.close_bubble(sink).await;
                    }

                    if chunk.done {
                        break;
                    }
                }
                _ = tokio::time::sleep_until(wake), if turn.deadline.is_some() => {
                    turn.flush(sink).await;
                }
            }
        }

        if let Some(rest) = scanner.take_hold() {
            turn.push_text(&rest);
        }
        turn.close_bubble(sink).await;

        let mut stored = Vec::with_capacity(turn.bubbles.len());
        for (index, text) in turn.bubbles.iter().enumerate() {
            let message = match store.append(conversation, Message::assistant(text)).await {
                Ok(message) => message,
                Err(e) => {
                    sink.emit(ServerEvent::ChatError {
                        error: e.to_string(),
                    })
                    .await;
                    return Err(e.into());
                }
            };
            sink.emit(ServerEvent::ChatMessageSaved {
                message_index: index as u32,
                message: message.clone(),
            })
            .await;
            stored.push(message);
        }

        sink.emit(ServerEvent::ChatComplete {
            message_count: stored.len() as u32,
        })
        .await;

        tracing::debug!(
            conversation = %conversation,
            bubbles = stored.len(),
            "streamed turn complete"
        );

        Ok(StreamOutcome { messages: stored })
    }
}

// ── Per-turn state ────────────────────────────────────────────────────────

#[derive(Default)]
struct TurnState {
    /// Closed bubbles awaiting persistence.
    bubbles: Vec<String>,
    /// Text of the open bubble, flushed and unflushed.
    current: String,
    /// Text received but not yet emitted to the client.
    unflushed: String,
    /// Tokens received since the last flush.
    tokens_buffered: usize,
    /// Debounce deadline, armed by the first buffered token.
    deadline: Option<Instant>,
    /// A bubble closed and the next flush must announce the split first.
    pending_split: bool,
    /// Bubble index for `chat.token` / `chat.messageSaved`.
    index: u32,
}

impl TurnState {
    fn push_text(&mut self, text: &str) {
        self.current.push_str(text);
        self.unflushed.push_str(text);
    }

    /// Emit buffered text. An empty buffer only disarms the timer; the
    /// pending split stays pending until real text follows, so a trailing
    /// marker never opens an empty bubble.
    async fn flush(&mut self, sink: &EventSink) {
        self.tokens_buffered = 0;
        self.deadline = None;
        if self.unflushed.is_empty() {
            return;
        }
        if self.pending_split {
            sink.emit(ServerEvent::ChatSplit).await;
            self.index += 1;
            self.pending_split = false;
        }
        let text = std::mem::take(&mut self.unflushed);
        sink.emit(ServerEvent::ChatToken {
            message_index: self.index,
            text,
        })
        .await;
    }

    /// Close the open bubble: flush its tail, move it to the finished
    /// list, and defer the split announcement until the next bubble has
    /// text. Closing an empty bubble is a no-op.
    async fn close_bubble(&mut self, sink: &EventSink) {
        self.flush(sink).await;
        if !self.current.is_empty() {
            self.bubbles.push(std::mem::take(&mut self.current));
            self.pending_split = true;
        }
    }
}

// ── Split marker scanning ─────────────────────────────────────────────────

enum Segment {
    Text(String),
    Split,
}

/// Finds split markers in a token stream, holding back any trailing text
/// that could still turn into a marker once the next chunk arrives.
struct MarkerScanner {
    marker: String,
    hold: String,
}

impl MarkerScanner {
    fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            hold: String::new(),
        }
    }

    /// Consume one delta and return the segments that are safe to release.
    fn feed(&mut self, delta: &str) -> Vec<Segment> {
        let mut out = Vec::new();
        let mut text = std::mem::take(&mut self.hold);
        text.push_str(delta);

        while let Some(pos) = text.find(&self.marker) {
            if pos > 0 {
                out.push(Segment::Text(text[..pos].to_string()));
            }
            out.push(Segment::Split);
            text = text[pos + self.marker.len()..].to_string();
        }

        let keep = self.partial_marker_len(&text);
        let cut = text.len() - keep;
        if cut > 0 {
            out.push(Segment::Text(text[..cut].to_string()));
        }
        self.hold = text[cut..].to_string();
        out
    }

    /// Release held text; at stream end a partial marker is literal text.
    fn take_hold(&mut self) -> Option<String> {
        if self.hold.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.hold))
        }
    }

    /// Length of the longest suffix of `text` that is a proper prefix of
    /// the marker.
    fn partial_marker_len(&self, text: &str) -> usize {
        for len in (1..self.marker.len()).rev() {
            if len <= text.len() && text.ends_with(&self.marker[..len]) {
                return len;
            }
        }
        0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────
