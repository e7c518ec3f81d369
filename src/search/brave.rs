//! Brave Search API client.
//!
//! Implements [`SearchProvider`](super::SearchProvider) against Brave's web
//! search endpoint. Brave supplies a content-age string per result (e.g.
//! "3 days ago"), which is carried through as the hit's publication hint.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::{domain_of, hit_id, SearchError, SearchProvider, SearchResult};
use crate::models::{Provenance, SearchHit};

/// Brave web-search endpoint.
const ENDPOINT: &str = "https://api.search.brave.com/res/v1/web/search";

/// Brave Search API client.
#[derive(Debug, Clone)]
pub struct BraveSearch {
    api_key: String,
    client: reqwest::Client,
}

impl BraveSearch {
    /// Create a new client for the given subscription token.
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(20))
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl SearchProvider for BraveSearch {
    async fn search(&self, query: &str, max_results: usize) -> SearchResult<Vec<SearchHit>> {
        if self.api_key.is_empty() {
            return Err(SearchError::Config("Brave API key is required".to_string()));
        }

        let url = format!(
            "{}?q={}&count={}",
            ENDPOINT,
            urlencoding::encode(query),
            max_results.min(20)
        );

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .header("X-Subscription-Token", &self.api_key)
            .send()
            .await
            .map_err(|e| SearchError::Api(format!("Brave request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(SearchError::Api(format!(
                "Brave API error ({}): {}",
                status, error_text
            )));
        }

        let parsed: BraveResponse = response
            .json()
            .await
            .map_err(|e| SearchError::Parse(format!("Failed to parse Brave response: {}", e)))?;

        let results = parsed
            .web
            .map(|w| w.results)
            .unwrap_or_default();
        debug!("Brave returned {} results for {:?}", results.len(), query);

        Ok(results
            .into_iter()
            .take(max_results)
            .enumerate()
            .map(|(rank, result)| SearchHit {
                id: hit_id(&result.url),
                domain: domain_of(&result.url),
                url: result.url,
                title: result.title,
                snippet: result.description,
                published_hint: result.age,
                provenance: Provenance {
                    source_query: query.to_string(),
                    original_rank: rank,
                },
            })
            .collect())
    }

    fn name(&self) -> &str {
        "brave"
    }
}

/// Relevant slice of Brave's search response.
#[derive(Debug, Clone, Deserialize)]
struct BraveResponse {
    #[serde(default)]
    web: Option<WebResults>,
}

#[derive(Debug, Clone, Deserialize)]
struct WebResults {
    #[serde(default)]
    results: Vec<BraveWebResult>,
}

#[derive(Debug, Clone, Deserialize)]
struct BraveWebResult {
    title: String,
    url: String,
    #[serde(default)]
    description: String,
    /// Content age as Brave reports it (e.g. "2 days ago").
    #[serde(default)]
    age: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_parsing() {
        let raw = r#"{
            "query": {"original": "rust"},
            "web": {"results": [
                {"title": "The Rust Language", "url": "https://www.rust-lang.org/",
                 "description": "A language empowering everyone", "age": "3 days ago"},
                {"title": "Rust (fungus)", "url": "https://example.org/rust-fungus"}
            ]}
        }"#;
        let parsed: BraveResponse = serde_json::from_str(raw).unwrap();
        let results = parsed.web.unwrap().results;
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].age.as_deref(), Some("3 days ago"));
        assert!(results[1].age.is_none());
        assert_eq!(results[1].description, "");
    }

    #[test]
    fn test_empty_web_section() {
        let parsed: BraveResponse =
            serde_json::from_str(r#"{"query": {"original": "x"}}"#).unwrap();
        assert!(parsed.web.is_none());
    }

    #[tokio::test]
    async fn test_missing_api_key_is_config_error() {
        let brave = BraveSearch::new(String::new());
        let result = brave.search("anything", 10).await;
        assert!(matches!(result, Err(SearchError::Config(_))));
    }
}
