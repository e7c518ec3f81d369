//! LLM client abstraction.
//!
//! This module defines the interface the pipeline uses to talk to a large
//! language model: a structured call that must return JSON matching a schema,
//! and a free-form streaming completion. Implementations live in submodules
//! (currently an OpenAI-compatible chat client).
//!
//! Both operations retry transient failures with exponential backoff before
//! giving up, so callers see at most one error per logical call.

pub mod openai;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Errors that can occur when calling the LLM.
#[derive(Debug, Error)]
pub enum LlmError {
    /// Network, transport, or non-2xx API response.
    #[error("API request failed: {0}")]
    Api(String),

    /// The model's output did not match the requested schema.
    #[error("Schema validation failed: {0}")]
    Schema(String),

    /// Configuration error (e.g. missing API key).
    #[error("Configuration error: {0}")]
    Config(String),

    /// The consumer of a streaming call went away.
    #[error("Streaming consumer cancelled")]
    Cancelled,

    /// Other unexpected errors.
    #[error("Unexpected LLM error: {0}")]
    Other(String),
}

impl LlmError {
    /// Whether a retry could plausibly succeed. API transport errors and
    /// malformed model output are retryable; configuration problems and
    /// cancellation are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Api(_) | LlmError::Schema(_))
    }
}

/// Result type for LLM operations.
pub type LlmResult<T> = Result<T, LlmError>;

/// Channel end used to forward streamed tokens. Sending never blocks the
/// LLM consumer; a closed channel signals cancellation.
pub type ChunkSender = tokio::sync::mpsc::UnboundedSender<String>;

/// A structured-output request: the model must answer with JSON matching
/// `schema`.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    /// User-turn prompt.
    pub prompt: String,

    /// Optional system prompt.
    pub system_prompt: Option<String>,

    /// JSON Schema the response must satisfy.
    pub schema: serde_json::Value,

    /// Sampling temperature.
    pub temperature: f64,

    /// Token ceiling for the response.
    pub max_tokens: u32,
}

/// A free-form completion request, streamed token by token.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    /// User-turn prompt.
    pub prompt: String,

    /// Optional system prompt.
    pub system_prompt: Option<String>,

    /// Sampling temperature.
    pub temperature: f64,

    /// Token ceiling for the response.
    pub max_tokens: u32,
}

/// Trait for LLM back-ends.
///
/// Implementations are responsible for their own retry behavior (see
/// [`with_backoff`]) and must keep `stream_completion` non-blocking with
/// respect to the model: chunks go out through an unbounded channel so a slow
/// downstream never stalls token consumption.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Call the model demanding JSON output that matches the request schema.
    ///
    /// # Errors
    /// Returns `LlmError` after retries are exhausted or on non-retryable
    /// failures.
    async fn call_structured(&self, request: &StructuredRequest) -> LlmResult<serde_json::Value>;

    /// Stream a completion, forwarding each text chunk through `chunks` when
    /// provided, and return the accumulated full text.
    ///
    /// # Errors
    /// Returns `LlmError::Cancelled` when the chunk receiver is dropped
    /// mid-stream, or another `LlmError` on transport failure.
    async fn stream_completion(
        &self,
        request: &CompletionRequest,
        chunks: Option<ChunkSender>,
    ) -> LlmResult<String>;

    /// Model identifier, for logging.
    fn model_name(&self) -> &str;
}

/// Maximum retry attempts after the initial call.
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay; doubles on each retry (1s, 2s, 4s).
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Run `op`, retrying retryable failures up to `MAX_RETRIES` times with
/// exponential backoff.
pub async fn with_backoff<T, F, Fut>(what: &str, op: F) -> LlmResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = LlmResult<T>>,
{
    let mut delay = INITIAL_BACKOFF;
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < MAX_RETRIES => {
                attempt += 1;
                warn!(
                    "{} failed (attempt {}/{}), retrying in {:?}: {}",
                    what,
                    attempt,
                    MAX_RETRIES,
                    delay,
                    err
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}
