//! OpenAI-compatible chat-completions client.
//!
//! Implements [`LlmClient`](super::LlmClient) against the `v1/chat/completions`
//! surface: JSON-schema response format for structured calls and SSE token
//! streaming for free-form completions. Any backend speaking the same
//! protocol works by overriding the base URL.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{
    with_backoff, ChunkSender, CompletionRequest, LlmClient, LlmError, LlmResult,
    StructuredRequest,
};

/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Default model identifier.
const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Per-request timeout for non-streaming calls.
const STRUCTURED_TIMEOUT: Duration = Duration::from_secs(60);

/// OpenAI-compatible chat client.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiClient {
    /// Create a new client for the given API key.
    pub fn new(api_key: String, model: Option<String>) -> Self {
        Self {
            api_key,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: DEFAULT_BASE_URL.to_string(),
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Point the client at a different OpenAI-compatible endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn messages(prompt: &str, system_prompt: Option<&str>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = system_prompt {
            messages.push(ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            });
        }
        messages.push(ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        });
        messages
    }

    async fn post_chat(&self, body: &ChatRequest) -> LlmResult<reqwest::Response> {
        let mut builder = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body);
        if !body.stream {
            builder = builder.timeout(STRUCTURED_TIMEOUT);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| LlmError::Api(format!("HTTP request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Api(format!("API error ({}): {}", status, error_text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn call_structured(&self, request: &StructuredRequest) -> LlmResult<serde_json::Value> {
        if self.api_key.is_empty() {
            return Err(LlmError::Config("API key is required".to_string()));
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::messages(&request.prompt, request.system_prompt.as_deref()),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: false,
            response_format: Some(ResponseFormat::json_schema(request.schema.clone())),
        };

        with_backoff("structured LLM call", || async {
            let response = self.post_chat(&body).await?;
            let parsed: ChatResponse = response
                .json()
                .await
                .map_err(|e| LlmError::Api(format!("Failed to read response: {}", e)))?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .map(|c| c.message.content)
                .ok_or_else(|| LlmError::Schema("response had no choices".to_string()))?;
            serde_json::from_str(&content)
                .map_err(|e| LlmError::Schema(format!("response is not valid JSON: {}", e)))
        })
        .await
    }

    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        chunks: Option<ChunkSender>,
    ) -> LlmResult<String> {
        if self.api_key.is_empty() {
            return Err(LlmError::Config("API key is required".to_string()));
        }

        let body = ChatRequest {
            model: self.model.clone(),
            messages: Self::messages(&request.prompt, request.system_prompt.as_deref()),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
            response_format: None,
        };

        // Only the connection phase is retried; once tokens have flowed a
        // failure surfaces to the caller.
        let response = with_backoff("streaming LLM call", || self.post_chat(&body)).await?;

        let mut events = response.bytes_stream().eventsource();
        let mut full_text = String::new();

        while let Some(event) = events.next().await {
            let event =
                event.map_err(|e| LlmError::Api(format!("SSE stream error: {}", e)))?;
            if event.data == "[DONE]" {
                break;
            }
            let chunk: StreamChunk = match serde_json::from_str(&event.data) {
                Ok(chunk) => chunk,
                Err(e) => {
                    debug!("skipping unparseable stream frame: {}", e);
                    continue;
                }
            };
            for choice in chunk.choices {
                if let Some(text) = choice.delta.content {
                    if text.is_empty() {
                        continue;
                    }
                    full_text.push_str(&text);
                    if let Some(sender) = &chunks {
                        if sender.send(text).is_err() {
                            return Err(LlmError::Cancelled);
                        }
                    }
                }
            }
        }

        Ok(full_text)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// API Types
// ============================================================================

#[derive(Debug, Clone, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
    json_schema: serde_json::Value,
}

impl ResponseFormat {
    fn json_schema(schema: serde_json::Value) -> Self {
        Self {
            format_type: "json_schema".to_string(),
            json_schema: serde_json::json!({
                "name": "response",
                "strict": true,
                "schema": schema,
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_handles_trailing_slash() {
        let client = OpenAiClient::new("key".to_string(), None)
            .with_base_url("https://example.com/v1/");
        assert_eq!(client.completions_url(), "https://example.com/v1/chat/completions");
    }

    #[test]
    fn test_request_serialization_includes_schema() {
        let body = ChatRequest {
            model: "m".to_string(),
            messages: OpenAiClient::messages("hi", Some("sys")),
            temperature: 0.15,
            max_tokens: 256,
            stream: false,
            response_format: Some(ResponseFormat::json_schema(serde_json::json!({
                "type": "object"
            }))),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["schema"]["type"], "object");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_chat_response_parsing() {
        let raw = r#"{
            "choices": [{"message": {"role": "assistant", "content": "{\"a\": 1}"}}]
        }"#;
        let parsed: ChatResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].message.content, "{\"a\": 1}");
    }

    #[test]
    fn test_stream_chunk_parsing() {
        let raw = r#"{"choices":[{"delta":{"content":"Hel"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.choices[0].delta.content.as_deref(), Some("Hel"));

        // Role-only frames carry no content.
        let raw = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        let parsed: StreamChunk = serde_json::from_str(raw).unwrap();
        assert!(parsed.choices[0].delta.content.is_none());
    }

    #[tokio::test]
    async fn test_empty_api_key_is_config_error() {
        let client = OpenAiClient::new(String::new(), None);
        let request = StructuredRequest {
            prompt: "hi".to_string(),
            system_prompt: None,
            schema: serde_json::json!({"type": "object"}),
            temperature: 0.1,
            max_tokens: 64,
        };
        let result = client.call_structured(&request).await;
        assert!(matches!(result, Err(LlmError::Config(_))));
    }
}
