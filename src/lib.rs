//! cited-search - a citation-backed answer engine.
//!
//! Given a natural-language question (and optionally a stable opaque user
//! id), this library plans sub-queries, fans out web searches, extracts and
//! tags the resulting pages, ranks them on multiple signals, applies
//! per-user bandit personalization, and synthesizes a streamed answer in
//! which every factual claim carries an inline numeric citation resolving to
//! a real source.
//!
//! # Architecture
//!
//! The system is organized into per-concern modules:
//!
//! - **models**: shared data structures (plans, hits, features, answers, events)
//! - **llm**: LLM client trait, retry/backoff, OpenAI-compatible implementation
//! - **search**: search provider trait, URL identity, Brave client, parallel fan-out
//! - **planner**: LLM query decomposition with guaranteed degradation
//! - **extract**: page fetching and readability extraction
//! - **tagger**: LLM content classification into five feature dimensions
//! - **ranking**: corpus-local BM25 plus recency/authority/coverage signals
//! - **bandit**: deterministic Beta-mean Thompson sampling over feature arms
//! - **store**: append-only event log and per-user bandit registry
//! - **personalize**: capped multiplicative boost from bandit scores
//! - **synthesis**: citation-enforced streaming answer generation
//! - **pipeline**: per-request orchestration and event stream
//! - **server**: axum HTTP/SSE surface
//! - **config**: environment configuration
//!
//! # Request flow
//!
//! 1. Resolve the user's stale pending impressions and snapshot arm scores.
//! 2. Plan 2-5 sub-queries (or fall back to the raw query).
//! 3. Fan out searches, dedup by normalized URL, interleave, diversify.
//! 4. Extract and tag every hit concurrently; failures drop out.
//! 5. Rank by BM25 relevance, recency, source authority, and coverage.
//! 6. Boost by the user's learned feature preferences (capped at 1.3x).
//! 7. Record pending impressions for the shown documents.
//! 8. Stream a synthesized answer; validate and auto-correct citations.
//!
//! Interaction events posted afterwards close the loop: clicks credit the
//! clicked document's feature arms, and unclicked impressions decay into
//! failures at the next request.

pub mod bandit;
pub mod config;
pub mod extract;
pub mod llm;
pub mod models;
pub mod personalize;
pub mod pipeline;
pub mod planner;
pub mod ranking;
pub mod search;
pub mod server;
pub mod store;
pub mod synthesis;
pub mod tagger;

// Re-export the types most callers need at the crate root.
pub use bandit::FeatureBandit;
pub use models::{AnswerPacket, ContentFeatures, QueryPlan, RankedDoc, SearchHit, UserEvent};
pub use pipeline::{Pipeline, PipelineEvent, Stage};
pub use store::EventStore;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
