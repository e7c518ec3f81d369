//! Citation-enforced answer synthesis.
//!
//! Builds the numbered-source prompt, streams the model's answer through a
//! chunk channel, then validates every inline `[n]` citation against the
//! source list. In-range citations become `Citation` records; out-of-range
//! indices are stripped down to bare numbers (never remapped to a source the
//! model did not cite) and logged.

use std::collections::HashSet;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::llm::{ChunkSender, CompletionRequest, LlmClient, LlmError};
use crate::models::{AnswerPacket, Citation, RankedDoc};

/// Sampling temperature for synthesis.
const TEMPERATURE: f64 = 0.3;

/// Token ceiling for the answer.
const MAX_TOKENS: u32 = 1500;

/// At most this many sources go into the prompt.
pub const MAX_SOURCES: usize = 8;

/// Citation passages carry at most this many characters of the excerpt.
const PASSAGE_MAX: usize = 200;

const SYSTEM_PROMPT: &str = "You are a research assistant that answers \
questions using only the numbered sources provided. Requirements: (1) after \
every factual claim, cite the supporting source inline as [N] using its \
number from the source list; (2) draw on a diverse set of the sources rather \
than citing one repeatedly; (3) write 2 to 5 paragraphs; (4) when sources \
conflict, say so explicitly and cite both sides; (5) if the sources do not \
cover the question, say so plainly instead of speculating.";

/// Errors that can occur during synthesis. Unlike planning or tagging,
/// synthesis failure is fatal to the request.
#[derive(Debug, Error)]
pub enum SynthesisError {
    /// The streaming completion failed after retries.
    #[error("Synthesis LLM call failed: {0}")]
    Llm(#[from] LlmError),

    /// There is nothing to synthesize from.
    #[error("No sources available for synthesis")]
    NoSources,
}

/// Result type for synthesis operations.
pub type SynthesisResult<T> = Result<T, SynthesisError>;

/// Streaming answer synthesizer.
pub struct Synthesizer {
    llm: Arc<dyn LlmClient>,
}

impl Synthesizer {
    /// Create a synthesizer over the given LLM client.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Synthesize an answer over the top sources, forwarding streamed
    /// chunks through `chunks` when provided.
    ///
    /// # Errors
    /// Returns `SynthesisError::NoSources` for an empty source list, or a
    /// wrapped `LlmError` (including `Cancelled`) from the streaming call.
    pub async fn synthesize(
        &self,
        query: &str,
        query_id: &str,
        sources: &[RankedDoc],
        chunks: Option<ChunkSender>,
    ) -> SynthesisResult<AnswerPacket> {
        if sources.is_empty() {
            return Err(SynthesisError::NoSources);
        }
        let sources = &sources[..sources.len().min(MAX_SOURCES)];

        let request = CompletionRequest {
            prompt: format!(
                "Question: {}\n\nSources:\n{}\nAnswer the question using the \
                 sources above.",
                query,
                source_list(sources)
            ),
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let raw_text = self.llm.stream_completion(&request, chunks).await?;
        let (text, citations) = validate_citations(&raw_text, sources);
        debug!(
            "synthesized {} chars with {} citations over {} sources",
            text.len(),
            citations.len(),
            sources.len()
        );

        Ok(AnswerPacket {
            query_id: query_id.to_string(),
            text,
            citations,
            sources: sources.to_vec(),
        })
    }
}

/// Render the numbered source list for the prompt.
fn source_list(sources: &[RankedDoc]) -> String {
    let mut out = String::new();
    for (i, doc) in sources.iter().enumerate() {
        out.push_str(&format!(
            "[{}] {} ({})\n    {}\n",
            i + 1,
            doc.title,
            doc.domain,
            doc.excerpt
        ));
    }
    out
}

/// Resolve a cited index against the source list. Strip-only policy: an
/// in-range index maps to itself, anything else resolves to nothing.
fn find_matching_source(index: usize, source_count: usize) -> Option<usize> {
    (1..=source_count).contains(&index).then_some(index)
}

/// Validate every `[n]` / `[n, m, ...]` group in the text.
///
/// In-range indices are recorded as citations (first occurrence wins) and
/// kept in the text. A group whose indices are all out of range loses its
/// brackets, leaving the bare numbers; a mixed group keeps only its valid
/// indices.
pub fn validate_citations(text: &str, sources: &[RankedDoc]) -> (String, Vec<Citation>) {
    let Ok(pattern) = Regex::new(r"\[(\d+(?:\s*,\s*\d+)*)\]") else {
        return (text.to_string(), Vec::new());
    };

    let mut citations: Vec<Citation> = Vec::new();
    let mut seen: HashSet<usize> = HashSet::new();

    let processed = pattern.replace_all(text, |caps: &regex::Captures<'_>| {
        let group = &caps[1];
        let indices: Vec<usize> = group
            .split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect();

        let mut valid: Vec<usize> = Vec::new();
        let mut invalid: Vec<usize> = Vec::new();
        for index in indices {
            match find_matching_source(index, sources.len()) {
                Some(resolved) => valid.push(resolved),
                None => invalid.push(index),
            }
        }

        for &index in &valid {
            if seen.insert(index) {
                citations.push(Citation {
                    index,
                    source_id: sources[index - 1].id.clone(),
                    passage: passage_of(&sources[index - 1]),
                });
            }
        }

        if !invalid.is_empty() {
            warn!(
                "citation indices {:?} out of range for {} sources, stripping",
                invalid,
                sources.len()
            );
        }

        if valid.is_empty() {
            // All invalid: strip the brackets, keep the bare numbers.
            group.to_string()
        } else if invalid.is_empty() {
            caps[0].to_string()
        } else {
            format!(
                "[{}]",
                valid
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        }
    });

    (processed.into_owned(), citations)
}

fn passage_of(doc: &RankedDoc) -> String {
    let excerpt = &doc.excerpt;
    if excerpt.len() <= PASSAGE_MAX {
        return excerpt.clone();
    }
    let cut = (0..=PASSAGE_MAX)
        .rev()
        .find(|&i| excerpt.is_char_boundary(i))
        .unwrap_or(0);
    excerpt[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmResult, StructuredRequest};
    use crate::models::RankingSignals;
    use async_trait::async_trait;

    fn source(id: &str, excerpt: &str) -> RankedDoc {
        RankedDoc {
            id: id.to_string(),
            url: format!("https://example.com/{}", id),
            title: format!("Title {}", id),
            excerpt: excerpt.to_string(),
            domain: "example.com".to_string(),
            published_date: None,
            features: None,
            signals: RankingSignals {
                relevance: 0.5,
                recency: 0.5,
                source_quality: 0.5,
                coverage: 0.5,
            },
            score: 0.5,
            ranking_reason: "matched query".to_string(),
        }
    }

    fn sources(n: usize) -> Vec<RankedDoc> {
        (0..n)
            .map(|i| source(&format!("s{}", i + 1), &format!("excerpt {}", i + 1)))
            .collect()
    }

    #[test]
    fn test_in_range_citations_round_trip() {
        let sources = sources(3);
        let text = "Plants use light [1]. The Calvin cycle fixes carbon [2]. \
                    Both happen in chloroplasts [1, 3].";
        let (processed, citations) = validate_citations(text, &sources);

        assert_eq!(processed, text);
        assert_eq!(citations.len(), 3);
        assert_eq!(citations[0], Citation {
            index: 1,
            source_id: "s1".to_string(),
            passage: "excerpt 1".to_string(),
        });
        assert_eq!(citations[1].index, 2);
        assert_eq!(citations[2].index, 3);
        assert_eq!(citations[2].source_id, "s3");
    }

    #[test]
    fn test_out_of_range_citation_is_stripped() {
        let sources = sources(5);
        let (processed, citations) = validate_citations("A bold claim [99].", &sources);
        assert_eq!(processed, "A bold claim 99.");
        assert!(citations.iter().all(|c| c.index != 99));
        assert!(citations.is_empty());
    }

    #[test]
    fn test_mixed_group_keeps_only_valid_indices() {
        let sources = sources(5);
        let (processed, citations) = validate_citations("Claim [2, 99].", &sources);
        assert_eq!(processed, "Claim [2].");
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].index, 2);
    }

    #[test]
    fn test_zero_index_is_invalid() {
        let sources = sources(3);
        let (processed, citations) = validate_citations("Claim [0].", &sources);
        assert_eq!(processed, "Claim 0.");
        assert!(citations.is_empty());
    }

    #[test]
    fn test_repeated_citation_recorded_once() {
        let sources = sources(2);
        let (_, citations) = validate_citations("One [1]. Again [1]. Other [2].", &sources);
        assert_eq!(citations.len(), 2);
        assert_eq!(citations[0].index, 1);
        assert_eq!(citations[1].index, 2);
    }

    #[test]
    fn test_text_without_citations_passes_through() {
        let sources = sources(2);
        let text = "No citations here, just prose with [brackets] that are not numeric.";
        let (processed, citations) = validate_citations(text, &sources);
        assert_eq!(processed, text);
        assert!(citations.is_empty());
    }

    #[test]
    fn test_passage_is_capped() {
        let long = "x".repeat(500);
        let doc = source("s1", &long);
        let (_, citations) = validate_citations("Claim [1].", &[doc]);
        assert_eq!(citations[0].passage.len(), PASSAGE_MAX);
    }

    /// LLM stub that streams a canned answer chunk by chunk.
    struct StreamingStub {
        answer: String,
    }

    #[async_trait]
    impl LlmClient for StreamingStub {
        async fn call_structured(
            &self,
            _request: &StructuredRequest,
        ) -> LlmResult<serde_json::Value> {
            Ok(serde_json::Value::Null)
        }

        async fn stream_completion(
            &self,
            _request: &CompletionRequest,
            chunks: Option<ChunkSender>,
        ) -> LlmResult<String> {
            if let Some(sender) = chunks {
                for word in self.answer.split_inclusive(' ') {
                    if sender.send(word.to_string()).is_err() {
                        return Err(LlmError::Cancelled);
                    }
                }
            }
            Ok(self.answer.clone())
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn test_synthesize_streams_and_validates() {
        let synthesizer = Synthesizer::new(Arc::new(StreamingStub {
            answer: "Photosynthesis converts light [1]. Out of range [9].".to_string(),
        }));
        let sources = sources(2);
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let packet = synthesizer
            .synthesize("how does photosynthesis work", "qid-1", &sources, Some(tx))
            .await
            .unwrap();

        assert_eq!(packet.query_id, "qid-1");
        assert_eq!(packet.text, "Photosynthesis converts light [1]. Out of range 9.");
        assert_eq!(packet.citations.len(), 1);
        assert_eq!(packet.citations[0].source_id, "s1");
        assert_eq!(packet.sources.len(), 2);

        // Every streamed chunk arrived, in order.
        let mut streamed = String::new();
        while let Ok(chunk) = rx.try_recv() {
            streamed.push_str(&chunk);
        }
        assert_eq!(streamed, "Photosynthesis converts light [1]. Out of range [9].");
    }

    #[tokio::test]
    async fn test_synthesize_caps_source_count() {
        let synthesizer = Synthesizer::new(Arc::new(StreamingStub {
            answer: "Answer [1].".to_string(),
        }));
        let many = sources(12);
        let packet = synthesizer
            .synthesize("q", "qid", &many, None)
            .await
            .unwrap();
        assert_eq!(packet.sources.len(), MAX_SOURCES);
    }

    #[tokio::test]
    async fn test_synthesize_without_sources_fails() {
        let synthesizer = Synthesizer::new(Arc::new(StreamingStub {
            answer: String::new(),
        }));
        let result = synthesizer.synthesize("q", "qid", &[], None).await;
        assert!(matches!(result, Err(SynthesisError::NoSources)));
    }

    #[test]
    fn test_source_list_rendering() {
        let rendered = source_list(&sources(2));
        assert!(rendered.contains("[1] Title s1 (example.com)"));
        assert!(rendered.contains("[2] Title s2 (example.com)"));
        assert!(rendered.contains("excerpt 2"));
    }
}
