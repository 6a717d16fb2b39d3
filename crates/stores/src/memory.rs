//! Keyword memory store — keyword-scored retrieval, model-distilled writes.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use kindred_core::error::{MemoryError, ModelError};
use kindred_core::memory::{Memory, MemoryKind, MemoryStore};
use kindred_core::message::Message;
use kindred_core::model::{extract_json, CompletionRequest, ModelClient};

const CLASSIFIER_SYSTEM: &str = "You distill conversations into long-term memories for an AI \
     companion. Store only facts that will matter in future conversations.";

/// A memory store with keyword-scored retrieval over a Vec.
///
/// Writes go through the utility model: after each turn the exchange is
/// distilled into at most one memory, or none when the model judges it
/// not worth keeping.
pub struct KeywordMemory {
    memories: RwLock<Vec<Memory>>,
    model: Arc<dyn ModelClient>,
    utility_model: String,
}

impl KeywordMemory {
    pub fn new(model: Arc<dyn ModelClient>, utility_model: impl Into<String>) -> Self {
        Self {
            memories: RwLock::new(Vec::new()),
            model,
            utility_model: utility_model.into(),
        }
    }

    /// Insert a memory directly, bypassing classification. Used for
    /// seeding imported memories.
    pub async fn remember(&self, memory: Memory) {
        self.memories.write().await.push(memory);
    }
}

/// The utility model's verdict on one exchange.
#[derive(Debug, Deserialize)]
struct Verdict {
    store: bool,
    #[serde(default)]
    kind: Option<MemoryKind>,
    #[serde(default)]
    importance: f32,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl MemoryStore for KeywordMemory {
    fn name(&self) -> &str {
        "keyword"
    }

    async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
    ) -> std::result::Result<Vec<Memory>, MemoryError> {
        let memories = self.memories.read().await;
        let query_lower = query.to_lowercase();
        let words: Vec<&str> = query_lower
            .split_whitespace()
            .filter(|w| w.len() >= 3)
            .collect();

        if words.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(f32, Memory)> = memories
            .iter()
            .filter_map(|m| {
                let content = m.content.to_lowercase();
                let hits = words.iter().filter(|w| content.contains(*w)).count();
                if hits == 0 {
                    return None;
                }
                // Keyword hits weighted by importance
                let score = hits as f32 * (0.5 + m.importance);
                Some((score, m.clone()))
            })
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        Ok(scored.into_iter().take(top_k).map(|(_, m)| m).collect())
    }

    async fn classify_and_store(
        &self,
        user_text: &str,
        assistant_text: &str,
        importance_guidance: Option<&str>,
    ) -> std::result::Result<Option<Memory>, MemoryError> {
        let mut prompt = format!(
            "USER: {user_text}\nASSISTANT: {assistant_text}\n\n\
             Decide whether this exchange contains a fact worth remembering long-term.\n\
             Reply with JSON only:\n\
             {{\"store\": true|false, \"kind\": \"episodic\"|\"semantic\", \
             \"importance\": 0.0-1.0, \"content\": \"the fact, in one sentence\"}}"
        );
        if let Some(guidance) = importance_guidance {
            prompt.push_str(&format!("\nWeighting hint: {guidance}"));
        }

        let request = CompletionRequest::new(
            self.utility_model.clone(),
            vec![Message::system(CLASSIFIER_SYSTEM), Message::user(prompt)],
        )
        .with_temperature(0.2);

        let reply = self
            .model
            .complete(request)
            .await
            .map_err(|e: ModelError| MemoryError::Classification(e.to_string()))?;

        let Some(json) = extract_json(&reply) else {
            debug!(reply = %reply, "Memory verdict had no JSON, skipping storage");
            return Ok(None);
        };

        let verdict: Verdict = match serde_json::from_str(json) {
            Ok(v) => v,
            Err(e) => {
                debug!(error = %e, "Memory verdict failed to parse, skipping storage");
                return Ok(None);
            }
        };

        if !verdict.store {
            return Ok(None);
        }

        let Some(kind) = verdict.kind else {
            debug!("Memory verdict missing kind, skipping storage");
            return Ok(None);
        };

        if verdict.content.trim().is_empty() {
            return Ok(None);
        }

        let memory = Memory::new(kind, verdict.importance, verdict.content.trim());
        self.memories.write().await.push(memory.clone());
        debug!(kind = ?memory.kind, importance = memory.importance, "Stored new memory");

        Ok(Some(memory))
    }
}

/// A memory store that remembers nothing. Test wiring and privacy-first
/// deployments.
pub struct NullMemory;

#[async_trait]
impl MemoryStore for NullMemory {
    fn name(&self) -> &str {
        "null"
    }

    async fn retrieve(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> std::result::Result<Vec<Memory>, MemoryError> {
        Ok(Vec::new())
    }

    async fn classify_and_store(
        &self,
        _user_text: &str,
        _assistant_text: &str,
        _importance_guidance: Option<&str>,
    ) -> std::result::Result<Option<Memory>, MemoryError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kindred_provider::ScriptedModel;

    fn keyword_store(replies: &[&str]) -> KeywordMemory {
        KeywordMemory::new(Arc::new(ScriptedModel::texts(replies)), "kindred-utility-1")
    }

    #[tokio::test]
    async fn retrieval_ranks_by_hits_and_importance() {
        let store = keyword_store(&[]);
        store
            .remember(Memory::new(
                MemoryKind::Semantic,
                0.9,
                "The user loves jazz records",
            ))
            .await;
        store
            .remember(Memory::new(
                MemoryKind::Episodic,
                0.1,
                "Mentioned jazz once at a party",
            ))
            .await;
        store
            .remember(Memory::new(
                MemoryKind::Semantic,
                0.9,
                "The user's sister lives in Oslo",
            ))
            .await;

        let results = store.retrieve("what jazz do I like", 10).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].content.contains("loves jazz"));
    }

    #[tokio::test]
    async fn retrieval_requires_a_keyword_hit() {
        let store = keyword_store(&[]);
        store
            .remember(Memory::new(
                MemoryKind::Semantic,
                0.8,
                "The user is vegetarian",
            ))
            .await;

        let results = store.retrieve("quantum chromodynamics", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn short_query_words_are_ignored() {
        let store = keyword_store(&[]);
        store
            .remember(Memory::new(MemoryKind::Semantic, 0.8, "it is so"))
            .await;

        let results = store.retrieve("it is", 10).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn classify_stores_a_worthwhile_fact() {
        let store = keyword_store(&[
            r#"{"store": true, "kind": "semantic", "importance": 0.8, "content": "The user's cat is named Miso"}"#,
        ]);

        let stored = store
            .classify_and_store("my cat Miso knocked over a plant", "Oh no, classic Miso!", None)
            .await
            .unwrap();

        let memory = stored.expect("fact should be stored");
        assert_eq!(memory.kind, MemoryKind::Semantic);
        assert!((memory.importance - 0.8).abs() < f32::EPSILON);

        let results = store.retrieve("miso the cat", 5).await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn classify_skips_when_not_worth_keeping() {
        let store = keyword_store(&[r#"{"store": false}"#]);
        let stored = store
            .classify_and_store("hi", "hello!", None)
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn classify_skips_malformed_output() {
        let store = keyword_store(&["I think this is worth remembering, probably."]);
        let stored = store
            .classify_and_store("hi", "hello!", None)
            .await
            .unwrap();
        assert!(stored.is_none());
    }

    #[tokio::test]
    async fn classify_handles_fenced_json() {
        let store = keyword_store(&[
            "Sure! Here's my verdict:\n```json\n{\"store\": true, \"kind\": \"episodic\", \"importance\": 0.4, \"content\": \"We joked about plants\"}\n```",
        ]);

        let stored = store
            .classify_and_store("haha", "plants beware", None)
            .await
            .unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn null_memory_is_inert() {
        let store = NullMemory;
        assert_eq!(store.name(), "null");
        assert!(store.retrieve("anything", 5).await.unwrap().is_empty());
        assert!(
            store
                .classify_and_store("a", "b", None)
                .await
                .unwrap()
                .is_none()
        );
    }
}
