//! Feature tagging: LLM classification of a page into five dimensions.
//!
//! Tags a page's content with the closed-vocabulary five-tuple used by the
//! personalization bandit. Pages with very short bodies skip tagging
//! entirely; an LLM failure on an adequately long body substitutes the
//! neutral default tuple so the document still participates in ranking
//! (though, with all-neutral arms, the boost it can earn is generic).

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use crate::llm::{LlmClient, StructuredRequest};
use crate::models::ContentFeatures;

/// Sampling temperature: classification should be near-deterministic.
const TEMPERATURE: f64 = 0.1;

/// Token ceiling: the answer is a tiny JSON object.
const MAX_TOKENS: u32 = 120;

/// How much of the body the classifier sees.
const BODY_WINDOW: usize = 1500;

/// Bodies shorter than this skip tagging rather than produce
/// confident-looking defaults.
const MIN_BODY_CHARS: usize = 280;

const SYSTEM_PROMPT: &str = "You classify web page content. Given a page \
title and body, answer with JSON selecting exactly one value per dimension: \
depth (introductory | intermediate | expert), style (academic | technical | \
journalistic | conversational), format (tutorial | research | opinion | \
reference), approach (conceptual | practical | data-driven), density \
(concise | moderate | comprehensive).";

/// LLM-backed content classifier.
pub struct FeatureTagger {
    llm: Arc<dyn LlmClient>,
}

impl FeatureTagger {
    /// Create a tagger over the given LLM client.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Classify a page. Returns `None` when the body is too short to
    /// classify; returns the neutral default when the model fails.
    pub async fn tag(&self, title: &str, body: &str) -> Option<ContentFeatures> {
        if body.len() < MIN_BODY_CHARS {
            debug!(
                "body of {:?} too short to tag ({} chars)",
                title,
                body.len()
            );
            return None;
        }

        let window_end = (0..=BODY_WINDOW.min(body.len()))
            .rev()
            .find(|&i| body.is_char_boundary(i))
            .unwrap_or(0);
        let request = StructuredRequest {
            prompt: format!("Title: {}\n\nBody:\n{}", title, &body[..window_end]),
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            schema: json!({
                "type": "object",
                "properties": {
                    "depth": {"enum": ["introductory", "intermediate", "expert"]},
                    "style": {"enum": ["academic", "technical", "journalistic", "conversational"]},
                    "format": {"enum": ["tutorial", "research", "opinion", "reference"]},
                    "approach": {"enum": ["conceptual", "practical", "data-driven"]},
                    "density": {"enum": ["concise", "moderate", "comprehensive"]},
                },
                "required": ["depth", "style", "format", "approach", "density"],
                "additionalProperties": false,
            }),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let value = match self.llm.call_structured(&request).await {
            Ok(value) => value,
            Err(err) => {
                warn!("feature tagging failed for {:?}, using neutral default: {}", title, err);
                return Some(ContentFeatures::neutral());
            }
        };

        match serde_json::from_value::<ContentFeatures>(value) {
            Ok(features) if features.is_complete() => Some(features),
            Ok(_) => {
                warn!("tagger returned a partial tuple for {:?}, using neutral default", title);
                Some(ContentFeatures::neutral())
            }
            Err(err) => {
                warn!(
                    "tagger output failed validation for {:?}, using neutral default: {}",
                    title, err
                );
                Some(ContentFeatures::neutral())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ChunkSender, CompletionRequest, LlmError, LlmResult};
    use crate::models::{Approach, Density, Depth, DocFormat, Style};
    use async_trait::async_trait;

    struct StubLlm {
        structured: Option<serde_json::Value>,
    }

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn call_structured(
            &self,
            _request: &StructuredRequest,
        ) -> LlmResult<serde_json::Value> {
            self.structured
                .clone()
                .ok_or_else(|| LlmError::Api("stub failure".to_string()))
        }

        async fn stream_completion(
            &self,
            _request: &CompletionRequest,
            _chunks: Option<ChunkSender>,
        ) -> LlmResult<String> {
            Ok(String::new())
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn long_body() -> String {
        "An adequately long body of text about the subject at hand. ".repeat(10)
    }

    #[tokio::test]
    async fn test_valid_classification() {
        let tagger = FeatureTagger::new(Arc::new(StubLlm {
            structured: Some(serde_json::json!({
                "depth": "expert",
                "style": "technical",
                "format": "research",
                "approach": "data-driven",
                "density": "comprehensive",
            })),
        }));
        let features = tagger.tag("Title", &long_body()).await.unwrap();
        assert_eq!(features.depth, Some(Depth::Expert));
        assert_eq!(features.style, Some(Style::Technical));
        assert_eq!(features.format, Some(DocFormat::Research));
        assert_eq!(features.approach, Some(Approach::DataDriven));
        assert_eq!(features.density, Some(Density::Comprehensive));
    }

    #[tokio::test]
    async fn test_llm_failure_yields_neutral_default() {
        let tagger = FeatureTagger::new(Arc::new(StubLlm { structured: None }));
        let features = tagger.tag("Title", &long_body()).await.unwrap();
        assert_eq!(features, ContentFeatures::neutral());
    }

    #[tokio::test]
    async fn test_invalid_value_yields_neutral_default() {
        let tagger = FeatureTagger::new(Arc::new(StubLlm {
            structured: Some(serde_json::json!({
                "depth": "galaxy-brain",
                "style": "technical",
                "format": "research",
                "approach": "practical",
                "density": "moderate",
            })),
        }));
        let features = tagger.tag("Title", &long_body()).await.unwrap();
        assert_eq!(features, ContentFeatures::neutral());
    }

    #[tokio::test]
    async fn test_partial_tuple_yields_neutral_default() {
        let tagger = FeatureTagger::new(Arc::new(StubLlm {
            structured: Some(serde_json::json!({"depth": "expert"})),
        }));
        let features = tagger.tag("Title", &long_body()).await.unwrap();
        assert_eq!(features, ContentFeatures::neutral());
    }

    #[tokio::test]
    async fn test_short_body_skips_tagging() {
        let tagger = FeatureTagger::new(Arc::new(StubLlm {
            structured: Some(serde_json::json!({
                "depth": "expert",
                "style": "technical",
                "format": "research",
                "approach": "practical",
                "density": "moderate",
            })),
        }));
        assert!(tagger.tag("Title", "tiny body").await.is_none());
    }
}
