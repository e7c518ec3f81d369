//! Search provider abstraction and URL identity rules.
//!
//! This module defines the interface for web-search back-ends and the URL
//! normalization that gives every hit a stable identity. The pipeline never
//! talks to a provider directly; it goes through the
//! [`parallel::ParallelSearcher`] which handles fan-out, dedup, and ordering.

pub mod brave;
pub mod parallel;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

use crate::models::SearchHit;

/// Errors that can occur during search operations.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Network or API communication error.
    #[error("API request failed: {0}")]
    Api(String),

    /// The backend's response could not be parsed.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Configuration error (e.g. missing API key).
    #[error("Configuration error: {0}")]
    Config(String),

    /// A search task exceeded its deadline.
    #[error("Search timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Every sub-query and the fallback search failed.
    #[error("All searches failed: {0}")]
    Exhausted(String),
}

/// Result type for search operations.
pub type SearchResult<T> = Result<T, SearchError>;

/// Trait for web-search back-ends.
///
/// Implementations normalize backend results into [`SearchHit`]s: stable ids
/// via [`hit_id`], lowercased hosts via [`domain_of`], and whatever
/// publication-age hint the backend supplies carried through un-parsed.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Run one search and return up to `max_results` normalized hits.
    ///
    /// # Errors
    /// Returns `SearchError` if the backend cannot be reached or its
    /// response cannot be parsed.
    async fn search(&self, query: &str, max_results: usize) -> SearchResult<Vec<SearchHit>>;

    /// Human-readable backend name, for logging.
    fn name(&self) -> &str;
}

/// Normalize a URL for identity comparison.
///
/// Rules: the scheme is ignored, the host is lowercased, a leading `www.` is
/// stripped, a trailing `/` is stripped unless the path is the root, the
/// query string is kept, and the fragment is dropped.
pub fn normalize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(url) => {
            let host = url.host_str().unwrap_or_default().to_lowercase();
            let host = host.strip_prefix("www.").unwrap_or(&host);
            let path = url.path();
            let path = if path != "/" {
                path.trim_end_matches('/')
            } else {
                path
            };
            match url.query() {
                Some(query) => format!("{}{}?{}", host, path, query),
                None => format!("{}{}", host, path),
            }
        }
        Err(_) => {
            // Not an absolute URL; apply the same rules textually.
            let s = raw.trim().to_lowercase();
            let s = s
                .strip_prefix("https://")
                .or_else(|| s.strip_prefix("http://"))
                .unwrap_or(&s);
            let s = s.strip_prefix("www.").unwrap_or(s);
            let s = if s.ends_with('/') && s.matches('/').count() > 1 {
                s.trim_end_matches('/')
            } else {
                s
            };
            s.to_string()
        }
    }
}

/// Stable short id for a URL: the first 8 hex characters of the SHA-256 of
/// its normalized form. Two URLs that normalize equally share an id.
pub fn hit_id(url: &str) -> String {
    let digest = Sha256::digest(normalize_url(url).as_bytes());
    let mut id = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        id.push_str(&format!("{:02x}", byte));
    }
    id
}

/// Lowercased host of a URL with any leading `www.` removed.
pub fn domain_of(url: &str) -> String {
    match Url::parse(url) {
        Ok(parsed) => {
            let host = parsed.host_str().unwrap_or_default().to_lowercase();
            host.strip_prefix("www.").unwrap_or(&host).to_string()
        }
        Err(_) => {
            let normalized = normalize_url(url);
            normalized
                .split(['/', '?'])
                .next()
                .unwrap_or_default()
                .to_string()
        }
    }
}
