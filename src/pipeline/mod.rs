//! Pipeline orchestration for one answer request.
//!
//! Sequences planning, fan-out search, concurrent extraction and tagging,
//! ranking, personalization, impression recording, and streaming synthesis,
//! emitting progress/chunk events along the way. Exactly one terminal event
//! (`complete` or `error`) goes out per request - unless the consumer goes
//! away first, in which case the pipeline stops issuing work and emits
//! nothing further.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::extract::Extractor;
use crate::llm::LlmError;
use crate::models::{AnswerPacket, PageExtract, QueryPlan, RankedDoc, SearchHit};
use crate::personalize::personalize;
use crate::planner::QueryPlanner;
use crate::search::parallel::ParallelSearcher;
use crate::store::{EventStore, ImpressionRecord};
use crate::synthesis::{SynthesisError, Synthesizer, MAX_SOURCES};
use crate::tagger::FeatureTagger;

/// Named pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Planning,
    Searching,
    Analyzing,
    Synthesizing,
}

/// One frame on the answer stream, serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum PipelineEvent {
    /// A stage began.
    Progress {
        stage: Stage,
        #[serde(skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A fragment of the streamed answer text.
    Chunk(String),

    /// Terminal: the finished answer.
    Complete(AnswerPacket),

    /// Terminal: the request failed.
    Error { error: String, message: String },
}

/// The assembled answer pipeline.
pub struct Pipeline {
    planner: QueryPlanner,
    searcher: ParallelSearcher,
    extractor: Arc<dyn Extractor>,
    tagger: FeatureTagger,
    synthesizer: Synthesizer,
    store: Arc<EventStore>,
}

impl Pipeline {
    /// Assemble a pipeline from its components.
    pub fn new(
        planner: QueryPlanner,
        searcher: ParallelSearcher,
        extractor: Arc<dyn Extractor>,
        tagger: FeatureTagger,
        synthesizer: Synthesizer,
        store: Arc<EventStore>,
    ) -> Self {
        Self {
            planner,
            searcher,
            extractor,
            tagger,
            synthesizer,
            store,
        }
    }

    /// Shared access to the event store.
    pub fn store(&self) -> Arc<EventStore> {
        self.store.clone()
    }

    /// Plan a query (degrading internally on failure) - the first half of
    /// the pipeline, exposed for the plan-and-hits endpoint.
    pub async fn plan(&self, query: &str) -> QueryPlan {
        self.planner.plan(query).await
    }

    /// Run the plan's fan-out search - exposed for the plan-and-hits
    /// endpoint.
    pub async fn search(&self, plan: &QueryPlan) -> crate::search::SearchResult<Vec<SearchHit>> {
        self.searcher.run(plan).await
    }

    /// Run one full request, emitting events into `events`. A closed
    /// receiver cancels the request: no further external calls, no terminal
    /// frame.
    pub async fn run(
        &self,
        query: &str,
        user_id: Option<&str>,
        plan: Option<QueryPlan>,
        events: mpsc::UnboundedSender<PipelineEvent>,
    ) {
        let query_id = make_query_id(query);
        info!("pipeline start: {:?} (query_id {})", query, query_id);

        // Attribute failures for unclicked impressions from the previous
        // request, and snapshot this user's arm scores in the same critical
        // section.
        let arm_scores = match user_id {
            Some(user) => Some(self.store.begin_request(user).await),
            None => None,
        };

        if !emit(&events, PipelineEvent::Progress {
            stage: Stage::Planning,
            message: None,
        }) {
            return;
        }
        let plan = match plan {
            Some(plan) => plan,
            None => self.planner.plan(query).await,
        };

        if !emit(&events, PipelineEvent::Progress {
            stage: Stage::Searching,
            message: Some(format!("{} sub-queries", plan.sub_queries.len())),
        }) {
            return;
        }
        let hits = match self.searcher.run(&plan).await {
            Ok(hits) => hits,
            Err(err) => {
                warn!("search failed fatally: {}", err);
                emit(&events, PipelineEvent::Error {
                    error: "search_failed".to_string(),
                    message: err.to_string(),
                });
                return;
            }
        };

        let pairs = self.extract_and_tag(hits).await;
        if events.is_closed() {
            return;
        }

        if !emit(&events, PipelineEvent::Progress {
            stage: Stage::Analyzing,
            message: Some(format!("{} pages extracted", pairs.len())),
        }) {
            return;
        }
        let ranked = crate::ranking::rank(query, &pairs, Utc::now());

        let ranked = match (&arm_scores, user_id) {
            (Some(scores), Some(user)) => {
                let personalized = personalize(ranked, scores);
                self.record_impressions(user, &query_id, &personalized).await;
                personalized
            }
            _ => ranked,
        };

        if !emit(&events, PipelineEvent::Progress {
            stage: Stage::Synthesizing,
            message: Some(format!("{} sources", ranked.len().min(MAX_SOURCES))),
        }) {
            return;
        }

        // Chunks flow through an intermediate channel; the forwarding task
        // dropping its receiver is how cancellation reaches the LLM stream.
        let (chunk_tx, mut chunk_rx) = mpsc::unbounded_channel::<String>();
        let chunk_events = events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if chunk_events.send(PipelineEvent::Chunk(chunk)).is_err() {
                    break;
                }
            }
        });

        let result = self
            .synthesizer
            .synthesize(query, &query_id, &ranked, Some(chunk_tx))
            .await;
        let _ = forwarder.await;

        match result {
            Ok(packet) => {
                info!(
                    "pipeline complete: {} citations, {} sources",
                    packet.citations.len(),
                    packet.sources.len()
                );
                emit(&events, PipelineEvent::Complete(packet));
            }
            Err(SynthesisError::Llm(LlmError::Cancelled)) => {
                debug!("request cancelled during synthesis");
            }
            Err(err) => {
                warn!("synthesis failed fatally: {}", err);
                emit(&events, PipelineEvent::Error {
                    error: "synthesis_failed".to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    /// Fetch, extract, and tag every hit concurrently. Failed extractions
    /// drop out; failed tagging leaves the page untagged or neutral per the
    /// tagger's policy.
    async fn extract_and_tag(&self, hits: Vec<SearchHit>) -> Vec<(SearchHit, PageExtract)> {
        let tasks = hits.into_iter().map(|hit| async move {
            let extracted = self
                .extractor
                .extract(&hit.url, hit.published_hint.as_deref())
                .await;
            match extracted {
                Ok(mut extract) => {
                    extract.features = self.tagger.tag(&extract.title, &extract.body).await;
                    Some((hit, extract))
                }
                Err(err) => {
                    debug!("dropping {}: {}", hit.url, err);
                    None
                }
            }
        });
        futures::future::join_all(tasks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Record pending impressions for the top documents that carry
    /// features.
    async fn record_impressions(&self, user: &str, query_id: &str, ranked: &[RankedDoc]) {
        let records: Vec<ImpressionRecord> = ranked
            .iter()
            .take(MAX_SOURCES)
            .filter_map(|doc| {
                doc.features.as_ref().map(|features| ImpressionRecord {
                    arms: features.arms(),
                    query_id: query_id.to_string(),
                    source_id: doc.id.clone(),
                })
            })
            .collect();
        debug!("recording {} pending impressions for {}", records.len(), user);
        self.store.record_impressions(user, records).await;
    }
}

/// Send an event; `false` means the consumer is gone and the request is
/// cancelled.
fn emit(events: &mpsc::UnboundedSender<PipelineEvent>, event: PipelineEvent) -> bool {
    events.send(event).is_ok()
}

/// Short hex request id tying the stream, impressions, and follow-up events
/// together.
fn make_query_id(query: &str) -> String {
    let digest = Sha256::digest(format!("{}:{}", query, EventStore::now_ms()).as_bytes());
    let mut id = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}
