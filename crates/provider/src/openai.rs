//! OpenAI-compatible model client.
//!
//! Works with: OpenAI, OpenRouter, Ollama, vLLM, Together AI, and any
//! backend exposing an OpenAI-compatible `/chat/completions` endpoint.
//!
//! The client forwards text deltas as-is; split-marker detection and
//! message assembly live in the streaming engine, not here.

use async_trait::async_trait;
use futures::StreamExt;
use kindred_core::error::ModelError;
use kindred_core::message::{Message, Role};
use kindred_core::model::{CompletionRequest, ModelClient, StreamChunk};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

/// A `ModelClient` over an OpenAI-compatible HTTP backend.
pub struct OpenAiModel {
    name: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiModel {
    /// Create a client for an OpenAI-compatible endpoint.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::named("openai", base_url, api_key)
    }

    /// Create a client with an explicit backend name for logging.
    pub fn named(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
        }
    }

    /// Create an Ollama client (convenience constructor).
    pub fn ollama(base_url: Option<&str>) -> Self {
        Self::named(
            "ollama",
            base_url.unwrap_or("http://localhost:11434/v1"),
            "ollama", // Ollama doesn't need a real key
        )
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: match m.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                    Role::System => "system".into(),
                },
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        body
    }

    async fn post(
        &self,
        body: &serde_json::Value,
        streaming: bool,
    ) -> std::result::Result<reqwest::Response, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json");

        if streaming {
            request = request.header("Accept", "text/event-stream");
        }

        let response = request.json(body).send().await.map_err(|e| {
            if e.is_timeout() {
                ModelError::Timeout(e.to_string())
            } else {
                ModelError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ModelError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ModelError::AuthFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Model backend returned error");
            return Err(ModelError::Api {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl ModelClient for OpenAiModel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<String, ModelError> {
        debug!(backend = %self.name, model = %request.model, "Sending completion request");

        let body = Self::request_body(&request, false);
        let response = self.post(&body, false).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Malformed(format!("Failed to parse response: {e}")))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::Malformed("No choices in response".into()))?;

        Ok(choice.message.content.unwrap_or_default())
    }

    async fn stream(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<
        tokio::sync::mpsc::Receiver<std::result::Result<StreamChunk, ModelError>>,
        ModelError,
    > {
        debug!(backend = %self.name, model = %request.model, "Sending streaming request");

        let body = Self::request_body(&request, true);
        let response = self.post(&body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let backend = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut buffer = String::new();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ModelError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                // Append new bytes to our line buffer
                buffer.push_str(&String::from_utf8_lossy(&bytes));

                // Process complete lines
                while let Some(line_end) = buffer.find('\n') {
                    let line = buffer[..line_end].trim_end_matches('\r').to_string();
                    buffer = buffer[line_end + 1..].to_string();

                    // Skip empty lines and SSE comments
                    if line.is_empty() || line.starts_with(':') {
                        continue;
                    }

                    let Some(data) = line.strip_prefix("data: ") else {
                        continue;
                    };
                    let data = data.trim();

                    // "[DONE]" signals end of stream
                    if data == "[DONE]" {
                        let _ = tx.send(Ok(StreamChunk::done())).await;
                        return;
                    }

                    match serde_json::from_str::<StreamResponse>(data) {
                        Ok(parsed) => {
                            let delta = parsed
                                .choices
                                .into_iter()
                                .next()
                                .and_then(|c| c.delta.content)
                                .filter(|c| !c.is_empty());

                            if let Some(text) = delta {
                                if tx.send(Ok(StreamChunk::text(text))).await.is_err() {
                                    return; // receiver dropped
                                }
                            }
                        }
                        Err(e) => {
                            trace!(
                                backend = %backend,
                                data = %data,
                                error = %e,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]; still signal completion
            let _ = tx.send(Ok(StreamChunk::done())).await;
        });

        Ok(rx)
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}
