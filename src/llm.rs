//! Language-model adapter abstraction and the OpenAI-compatible client.
//!
//! A [`ChatModel`] turns a list of [`ChatMessage`]s into either a complete
//! answer ([`ChatModel::complete`]) or a lazy stream of text fragments
//! ([`ChatModel::stream`]). Streaming uses server-sent events: each
//! `data:` payload is a completion chunk whose `choices[0].delta.content`
//! is the next fragment, and `data: [DONE]` ends the stream.
//!
//! Dropping a [`FragmentStream`] cancels generation; the HTTP connection is
//! closed with it.
//!
//! | Provider | Endpoint | Credential |
//! |----------|----------|------------|
//! | `openai` | `{url}/chat/completions`, default `https://api.openai.com/v1` | bearer key from `llm.api_key_env` |
//! | `ollama` | `{url}/chat/completions`, default `http://localhost:11434/v1` | none |

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::config::{resolve_api_key, LlmConfig};
use crate::error::{RagError, Result};
use crate::history::{ChatTurn, Role};
use crate::http;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// One message sent to the language model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ChatTurn> for ChatMessage {
    fn from(turn: &ChatTurn) -> Self {
        match turn.role {
            Role::User => ChatMessage::user(turn.text.clone()),
            Role::Assistant => ChatMessage::assistant(turn.text.clone()),
        }
    }
}

/// Text fragments in production order. Ends after the last fragment or
/// after the first error.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_id(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String>;

    async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream>;
}

/// Build the chat model named by `config.provider`.
pub fn create_chat_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => {
            let api_key = resolve_api_key(&config.api_key_env)?;
            Ok(Arc::new(OpenAiChatModel::new(config, Some(api_key))?))
        }
        "ollama" => Ok(Arc::new(OpenAiChatModel::with_default_url(
            config,
            None,
            OLLAMA_DEFAULT_URL,
            "ollama",
        )?)),
        other => anyhow::bail!("Unknown llm provider: {}", other),
    }
}

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com/v1";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434/v1";

/// Client for an OpenAI-compatible chat completions API.
pub struct OpenAiChatModel {
    client: reqwest::Client,
    provider: &'static str,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_tokens: Option<u32>,
}

impl OpenAiChatModel {
    pub fn new(config: &LlmConfig, api_key: Option<String>) -> Result<Self> {
        Self::with_default_url(config, api_key, OPENAI_DEFAULT_URL, "openai")
    }

    fn with_default_url(
        config: &LlmConfig,
        api_key: Option<String>,
        default_url: &str,
        provider: &'static str,
    ) -> Result<Self> {
        Ok(Self {
            client: http::build_client(provider, config.timeout_secs)?,
            provider,
            base_url: http::base_url(config.url.as_deref(), default_url),
            api_key,
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> Result<reqwest::Response> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream,
        };
        debug!(
            provider = self.provider,
            model = %self.model,
            messages = messages.len(),
            stream,
            "sending chat completion request"
        );

        let mut request = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| http::transport_error(self.provider, e))?;

        if !response.status().is_success() {
            return Err(http::status_error(self.provider, response).await);
        }
        Ok(response)
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

/// In-band error object sent by the server after the stream has started.
#[derive(Deserialize)]
struct ChunkError {
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Extract the text fragment from one SSE `data:` payload.
///
/// Role-only and finish chunks carry no content and yield `None`. An
/// `error` payload fails the stream.
fn parse_chunk(provider: &str, data: &str) -> Result<Option<String>> {
    let chunk: CompletionChunk = serde_json::from_str(data)
        .map_err(|e| RagError::service(provider, format!("invalid stream chunk: {}", e), false))?;
    if let Some(error) = chunk.error {
        return Err(RagError::service(
            provider,
            format!("stream error: {}", error.message),
            true,
        ));
    }
    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.delta.content)
        .filter(|s| !s.is_empty()))
}

#[async_trait]
impl ChatModel for OpenAiChatModel {
    fn model_id(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let response = self.send(messages, false).await?;
        let parsed: ChatCompletionResponse = response.json().await.map_err(|e| {
            RagError::service(self.provider, format!("invalid response: {}", e), false)
        })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RagError::service(self.provider, "response has no choices", false))?;
        choice
            .message
            .content
            .ok_or_else(|| RagError::service(self.provider, "response has no content", false))
    }

    async fn stream(&self, messages: &[ChatMessage]) -> Result<FragmentStream> {
        let response = self.send(messages, true).await?;
        let provider = self.provider;

        // State is `None` once the stream has ended: after `[DONE]` or the
        // first error.
        let events = Box::pin(response.bytes_stream().eventsource());
        let fragments = stream::unfold(Some(events), move |state| async move {
            let mut events = state?;
            loop {
                let item = match events.next().await {
                    Some(Ok(event)) if event.data.trim() == "[DONE]" => return None,
                    Some(Ok(event)) => match parse_chunk(provider, &event.data) {
                        Ok(Some(fragment)) => return Some((Ok(fragment), Some(events))),
                        Ok(None) => continue,
                        Err(e) => Err(e),
                    },
                    Some(Err(e)) => Err(RagError::service(
                        provider,
                        format!("stream interrupted: {}", e),
                        true,
                    )),
                    None => Err(RagError::service(
                        provider,
                        "stream ended before [DONE]",
                        true,
                    )),
                };
                return Some((item, None));
            }
        });
        Ok(Box::pin(fragments))
    }
}
