//! Query planning: LLM-powered decomposition into sub-queries.
//!
//! The planner asks the model to break a question into 2-5 focused search
//! queries under a strict JSON schema. Planning never fails the request:
//! any transport, parse, or validation problem degrades to a single-sub-query
//! plan equal to the original question.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::llm::{LlmClient, StructuredRequest};
use crate::models::{PlanStrategy, QueryPlan};

/// Sampling temperature for planning: low, for consistent decomposition.
const TEMPERATURE: f64 = 0.15;

/// Token ceiling: sub-queries are short.
const MAX_TOKENS: u32 = 300;

/// Upper bound on sub-queries in a plan.
const MAX_SUB_QUERIES: usize = 5;

/// Lower bound the LLM is asked for (the fallback plan has exactly one).
const MIN_SUB_QUERIES: usize = 2;

const SYSTEM_PROMPT: &str = "You are a search query planner. Decompose the \
user's question into between 2 and 5 focused web-search queries that \
together cover the question. Each query must be a short, self-contained \
search string. Do not number the queries, do not include empty strings, and \
never return more than 5.";

/// Expected shape of the model's structured answer.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlannerOutput {
    sub_queries: Vec<String>,
}

/// LLM-backed query planner with guaranteed degradation.
pub struct QueryPlanner {
    llm: Arc<dyn LlmClient>,
}

impl QueryPlanner {
    /// Create a planner over the given LLM client.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Plan the query. Never errors: failure yields the fallback plan.
    pub async fn plan(&self, query: &str) -> QueryPlan {
        let request = StructuredRequest {
            prompt: format!("Question: {}", query),
            system_prompt: Some(SYSTEM_PROMPT.to_string()),
            schema: json!({
                "type": "object",
                "properties": {
                    "subQueries": {
                        "type": "array",
                        "items": {"type": "string"},
                        "minItems": MIN_SUB_QUERIES,
                        "maxItems": MAX_SUB_QUERIES,
                    }
                },
                "required": ["subQueries"],
                "additionalProperties": false,
            }),
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        let value = match self.llm.call_structured(&request).await {
            Ok(value) => value,
            Err(err) => {
                warn!("planner LLM call failed, using fallback plan: {}", err);
                return QueryPlan::fallback(query);
            }
        };

        match Self::validate(value) {
            Some(sub_queries) => {
                debug!("planned {} sub-queries for {:?}", sub_queries.len(), query);
                QueryPlan {
                    original_query: query.to_string(),
                    sub_queries,
                    strategy: PlanStrategy::Llm,
                }
            }
            None => {
                warn!("planner output failed validation, using fallback plan");
                QueryPlan::fallback(query)
            }
        }
    }

    /// Validate the model output against the plan contract: 2-5 sub-queries,
    /// none empty after trimming.
    fn validate(value: serde_json::Value) -> Option<Vec<String>> {
        let output: PlannerOutput = serde_json::from_value(value).ok()?;
        let sub_queries: Vec<String> = output
            .sub_queries
            .into_iter()
            .map(|q| q.trim().to_string())
            .collect();
        if sub_queries.len() < MIN_SUB_QUERIES
            || sub_queries.len() > MAX_SUB_QUERIES
            || sub_queries.iter().any(|q| q.is_empty())
        {
            return None;
        }
        Some(sub_queries)
    }
}
