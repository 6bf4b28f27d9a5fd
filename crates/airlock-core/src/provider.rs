//! LLM provider contract and implementations.
//!
//! The gateway consumes exactly one provider shape: a list of messages goes
//! in, and either a text answer or a `query` tool call comes out. Vendor
//! protocols beyond that shape are out of scope; the HTTP implementation
//! speaks the common chat-completions dialect and normalizes its reply.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Message roles in the transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Gateway- or operator-supplied instructions.
    System,
    /// End-user content.
    User,
    /// Model content.
    Assistant,
    /// Tool results fed back to the model.
    Tool,
}

/// One transcript message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl ChatMessage {
    /// A system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// An assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    /// A tool-result message.
    pub fn tool(content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
        }
    }
}

/// A model-emitted request to run a data query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Natural-language question for the planner.
    pub question: String,
    /// Target source name.
    pub source: String,
}

/// What a provider answered with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LlmReply {
    /// A final text answer.
    Text(String),
    /// A `query` tool call to satisfy before continuing.
    ToolCall(ToolCallRequest),
}

/// Provider failure classes; the orchestrator retries transient ones.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// 5xx or network trouble; retried with backoff.
    #[error("Transient provider error: {0}")]
    Transient(String),
    /// Anything else; fatal for the request.
    #[error("Provider error: {0}")]
    Fatal(String),
}

/// The provider seam.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends the transcript (and the standing `query` tool schema) and
    /// returns the model's reply.
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmReply, LlmError>;
}

/// Chat-completions HTTP provider.
///
/// Declares the single `query` tool and maps the reply back onto
/// [`LlmReply`]. 5xx and transport errors are transient; 4xx are fatal.
pub struct HttpProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl HttpProvider {
    /// Builds a provider client.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    /// The standing tool schema every request declares.
    fn tool_schema() -> serde_json::Value {
        json!([{
            "type": "function",
            "function": {
                "name": "query",
                "description": "Query an approved data source with a natural-language question",
                "parameters": {
                    "type": "object",
                    "properties": {
                        "question": { "type": "string" },
                        "source": { "type": "string" }
                    },
                    "required": ["question", "source"]
                }
            }
        }])
    }
}

#[async_trait]
impl LlmProvider for HttpProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmReply, LlmError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "tools": Self::tool_schema(),
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(LlmError::Transient(format!("provider returned {}", status)));
        }
        if !status.is_success() {
            return Err(LlmError::Fatal(format!("provider returned {}", status)));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| LlmError::Fatal(format!("unparseable provider reply: {}", e)))?;
        let message = &payload["choices"][0]["message"];

        if let Some(call) = message["tool_calls"][0]["function"].as_object() {
            let arguments: ToolCallRequest = call
                .get("arguments")
                .and_then(|a| a.as_str())
                .and_then(|a| serde_json::from_str(a).ok())
                .ok_or_else(|| LlmError::Fatal("malformed tool call arguments".to_string()))?;
            debug!(source = %arguments.source, "provider emitted tool call");
            return Ok(LlmReply::ToolCall(arguments));
        }

        let content = message["content"]
            .as_str()
            .ok_or_else(|| LlmError::Fatal("provider reply carries no content".to_string()))?;
        Ok(LlmReply::Text(content.to_string()))
    }
}

impl std::fmt::Debug for HttpProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print the API key.
        f.debug_struct("HttpProvider")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

/// Scripted provider for the test harness.
///
/// Plays back a fixed sequence of replies and spies on every transcript it
/// receives, so tests can prove what did (and did not) reach the model.
#[derive(Debug, Default)]
pub struct ScriptedProvider {
    replies: std::sync::Mutex<std::collections::VecDeque<Result<LlmReply, LlmError>>>,
    transcripts: std::sync::Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedProvider {
    /// A provider that answers with the given replies, in order.
    pub fn new(replies: Vec<Result<LlmReply, LlmError>>) -> Self {
        Self {
            replies: std::sync::Mutex::new(replies.into()),
            transcripts: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// A provider that answers every call with the same text.
    pub fn always_text(text: &str) -> Self {
        Self::new(vec![Ok(LlmReply::Text(text.to_string()))])
    }

    /// Replaces the remaining script. Used by harnesses that drive many
    /// requests through one provider instance.
    pub fn reset(&self, replies: Vec<Result<LlmReply, LlmError>>) {
        *self.replies.lock().expect("spy lock poisoned") = replies.into();
    }

    /// Number of completions served.
    pub fn call_count(&self) -> usize {
        self.transcripts.lock().expect("spy lock poisoned").len()
    }

    /// Every transcript the provider has seen.
    pub fn transcripts(&self) -> Vec<Vec<ChatMessage>> {
        self.transcripts.lock().expect("spy lock poisoned").clone()
    }

    /// True if `needle` appears anywhere in any received message.
    pub fn saw(&self, needle: &str) -> bool {
        self.transcripts()
            .iter()
            .flatten()
            .any(|m| m.content.contains(needle))
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<LlmReply, LlmError> {
        self.transcripts
            .lock()
            .expect("spy lock poisoned")
            .push(messages.to_vec());
        let mut replies = self.replies.lock().expect("spy lock poisoned");
        match replies.pop_front() {
            Some(reply) => {
                // The last scripted reply keeps repeating, so "model loops
                // forever on tool calls" scenarios stay one-liners.
                if replies.is_empty() {
                    replies.push_back(reply.clone());
                }
                reply
            }
            None => Err(LlmError::Fatal("script exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_provider_plays_in_order() {
        let provider = ScriptedProvider::new(vec![
            Ok(LlmReply::ToolCall(ToolCallRequest {
                question: "q".to_string(),
                source: "orders".to_string(),
            })),
            Ok(LlmReply::Text("done".to_string())),
        ]);

        let first = provider.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert!(matches!(first, LlmReply::ToolCall(_)));
        let second = provider.complete(&[ChatMessage::user("hi")]).await.unwrap();
        assert_eq!(second, LlmReply::Text("done".to_string()));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_provider_repeats_last() {
        let provider = ScriptedProvider::always_text("hello");
        for _ in 0..3 {
            let reply = provider.complete(&[]).await.unwrap();
            assert_eq!(reply, LlmReply::Text("hello".to_string()));
        }
    }

    #[tokio::test]
    async fn test_scripted_provider_spies() {
        let provider = ScriptedProvider::always_text("ok");
        provider
            .complete(&[ChatMessage::user("secret-marker")])
            .await
            .unwrap();
        assert!(provider.saw("secret-marker"));
        assert!(!provider.saw("absent"));
    }

    #[test]
    fn test_message_serialization() {
        let m = ChatMessage::user("hello");
        let json = serde_json::to_string(&m).unwrap();
        assert!(json.contains("\"role\":\"user\""));
    }
}
