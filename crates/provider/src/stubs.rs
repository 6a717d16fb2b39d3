//! Scripted collaborators for tests and offline wiring.
//!
//! These are not mocks buried in test modules: the test container wires
//! them in as real collaborators so integration tests and demos run
//! without network access.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use kindred_core::error::{FetchError, ModelError};
use kindred_core::fetch::{FetchedPage, PageFetcher};
use kindred_core::message::Role;
use kindred_core::model::{CompletionRequest, ModelClient, StreamChunk};

/// A model that replies with the last user message.
pub struct EchoModel;

#[async_trait]
impl ModelClient for EchoModel {
    fn name(&self) -> &str {
        "echo"
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, ModelError> {
        let reply = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        Ok(reply)
    }
}

/// One scripted model reply.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Returned whole by `complete`, played back as one chunk by `stream`.
    Text(String),
    /// Played back verbatim by `stream`; `complete` joins the deltas.
    Chunks(Vec<StreamChunk>),
}

/// A model that returns a queue of scripted replies.
///
/// Each call pops the next reply in order. Panics if more calls are made
/// than replies provided.
pub struct ScriptedModel {
    replies: Mutex<Vec<ScriptedReply>>,
    call_count: Mutex<usize>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies),
            call_count: Mutex::new(0),
        }
    }

    /// Create a model that returns a single text reply.
    pub fn single(text: &str) -> Self {
        Self::new(vec![ScriptedReply::Text(text.into())])
    }

    /// Create a model from plain text replies, popped in order.
    pub fn texts(replies: &[&str]) -> Self {
        Self::new(
            replies
                .iter()
                .map(|t| ScriptedReply::Text((*t).into()))
                .collect(),
        )
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    fn next_reply(&self) -> ScriptedReply {
        let mut count = self.call_count.lock().unwrap();
        let replies = self.replies.lock().unwrap();

        if *count >= replies.len() {
            panic!(
                "ScriptedModel: no more replies (call #{}, have {})",
                *count,
                replies.len()
            );
        }

        let reply = replies[*count].clone();
        *count += 1;
        reply
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(
        &self,
        _request: CompletionRequest,
    ) -> std::result::Result<String, ModelError> {
        Ok(match self.next_reply() {
            ScriptedReply::Text(text) => text,
            ScriptedReply::Chunks(chunks) => chunks
                .iter()
                .filter_map(|c| c.delta.as_deref())
                .collect::<String>(),
        })
    }

    async fn stream(
        &self,
        _request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ModelError>>,
        ModelError,
    > {
        let chunks = match self.next_reply() {
            ScriptedReply::Text(text) => vec![StreamChunk::text(text), StreamChunk::done()],
            ScriptedReply::Chunks(chunks) => chunks,
        };

        // Buffer everything up front; the receiver drains at its own pace.
        let (tx, rx) = tokio::sync::mpsc::channel(chunks.len().max(1));
        for chunk in chunks {
            let _ = tx.send(Ok(chunk)).await;
        }
        Ok(rx)
    }
}

/// A fetcher that serves pages from a fixed map, 404s everything else.
#[derive(Default)]
pub struct StaticFetcher {
    pages: HashMap<String, FetchedPage>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(
        mut self,
        url: impl Into<String>,
        title: Option<&str>,
        text: impl Into<String>,
    ) -> Self {
        let url = url.into();
        self.pages.insert(
            url.clone(),
            FetchedPage {
                url,
                title: title.map(String::from),
                text: text.into(),
            },
        );
        self
    }
}

#[async_trait]
impl PageFetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<FetchedPage, FetchError> {
        self.pages
            .get(url)
            .cloned()
            .ok_or_else(|| FetchError::Http {
                status_code: 404,
                url: url.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_core::message::Message;

    fn request(messages: Vec<Message>) -> CompletionRequest {
        CompletionRequest::new("kindred-chat-1", messages)
    }

    #[tokio::test]
    async fn echo_returns_last_user_message() {
        let model = EchoModel;
        let reply = model
            .complete(request(vec![
                Message::system("persona"),
                Message::user("first"),
                Message::assistant("mid"),
                Message::user("second"),
            ]))
            .await
            .unwrap();
        assert_eq!(reply, "second");
    }

    #[tokio::test]
    async fn echo_with_no_user_message_is_empty() {
        let model = EchoModel;
        let reply = model
            .complete(request(vec![Message::system("persona")]))
            .await
            .unwrap();
        assert_eq!(reply, "");
    }

    #[tokio::test]
    async fn scripted_replies_pop_in_order() {
        let model = ScriptedModel::texts(&["one", "two"]);
        assert_eq!(model.complete(request(vec![])).await.unwrap(), "one");
        assert_eq!(model.complete(request(vec![])).await.unwrap(), "two");
        assert_eq!(model.call_count(), 2);
    }

    #[tokio::test]
    #[should_panic(expected = "no more replies")]
    async fn scripted_panics_when_exhausted() {
        let model = ScriptedModel::single("only");
        let _ = model.complete(request(vec![])).await;
        let _ = model.complete(request(vec![])).await;
    }

    #[tokio::test]
    async fn scripted_text_streams_as_one_chunk_then_done() {
        let model = ScriptedModel::single("hello");
        let mut rx = model.stream(request(vec![])).await.unwrap();

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(first.delta.as_deref(), Some("hello"));

        let last = rx.recv().await.unwrap().unwrap();
        assert!(last.done);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn scripted_chunks_play_back_verbatim() {
        let model = ScriptedModel::new(vec![ScriptedReply::Chunks(vec![
            StreamChunk::text("Hel"),
            StreamChunk::text("lo"),
            StreamChunk::split(),
            StreamChunk::text("there"),
            StreamChunk::done(),
        ])]);

        let mut rx = model.stream(request(vec![])).await.unwrap();
        let mut deltas = Vec::new();
        let mut splits = 0;
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk.unwrap();
            if chunk.split {
                splits += 1;
            }
            if let Some(text) = chunk.delta {
                deltas.push(text);
            }
        }
        assert_eq!(deltas, vec!["Hel", "lo", "there"]);
        assert_eq!(splits, 1);
    }

    #[tokio::test]
    async fn scripted_complete_joins_chunk_deltas() {
        let model = ScriptedModel::new(vec![ScriptedReply::Chunks(vec![
            StreamChunk::text("a"),
            StreamChunk::text("b"),
            StreamChunk::done(),
        ])]);
        assert_eq!(model.complete(request(vec![])).await.unwrap(), "ab");
    }

    #[tokio::test]
    async fn static_fetcher_serves_known_urls() {
        let fetcher = StaticFetcher::new().with_page(
            "https://example.com/a",
            Some("Page A"),
            "body text",
        );

        let page = fetcher.fetch("https://example.com/a").await.unwrap();
        assert_eq!(page.title.as_deref(), Some("Page A"));
        assert_eq!(page.text, "body text");
    }

    #[tokio::test]
    async fn static_fetcher_misses_with_404() {
        let fetcher = StaticFetcher::new();
        let err = fetcher.fetch("https://example.com/missing").await.unwrap_err();
        assert!(matches!(err, FetchError::Http { status_code: 404, .. }));
    }
}
