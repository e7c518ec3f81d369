//! Parallel fan-out search with merge, interleave, and diversification.
//!
//! Runs a plan's sub-queries against the search provider with bounded
//! concurrency and per-task timeouts, collapses duplicate URLs, interleaves
//! results round-robin across sub-queries, filters low-diversity authority
//! domains, and supplements thin result sets with one extra search of the
//! original query.
//!
//! Failure semantics: a single sub-query's failure is never fatal. Only when
//! every sub-query fails does the searcher fall back to the original query,
//! and only when that also fails does the request see an error.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::{SearchError, SearchProvider, SearchResult};
use crate::models::{QueryPlan, SearchHit};

/// Cap on a merged snippet after duplicate collapse.
const MERGED_SNIPPET_MAX: usize = 500;

/// Tuning knobs for the fan-out search.
#[derive(Debug, Clone)]
pub struct SearcherConfig {
    /// How many sub-query searches run at once.
    pub concurrency: usize,

    /// Deadline for one sub-query search.
    pub search_timeout: Duration,

    /// Result cap requested from the backend per sub-query.
    pub max_per_query: usize,

    /// Hard cap on the final merged hit list.
    pub max_hits: usize,

    /// Below this many hits the authority filter is skipped and the
    /// supplemental search kicks in.
    pub min_hits: usize,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            search_timeout: Duration::from_secs(15),
            max_per_query: 10,
            max_hits: 20,
            min_hits: 5,
        }
    }
}

/// Fan-out searcher over a pluggable provider.
pub struct ParallelSearcher {
    provider: Arc<dyn SearchProvider>,
    config: SearcherConfig,
}

impl ParallelSearcher {
    /// Create a searcher with the given provider and configuration.
    pub fn new(provider: Arc<dyn SearchProvider>, config: SearcherConfig) -> Self {
        Self { provider, config }
    }

    /// Execute the plan and return an ordered, deduplicated hit list.
    ///
    /// # Errors
    /// Returns `SearchError::Exhausted` only when every sub-query and the
    /// fallback search of the original query failed.
    pub async fn run(&self, plan: &QueryPlan) -> SearchResult<Vec<SearchHit>> {
        // No decomposition at all: one plain search of the original query.
        if plan.sub_queries.is_empty() {
            let mut hits = self.bounded_search(&plan.original_query).await?;
            hits.truncate(self.config.max_hits);
            return Ok(hits);
        }

        let mut per_query: Vec<Vec<SearchHit>> = Vec::new();
        let mut any_succeeded = false;

        for batch in plan.sub_queries.chunks(self.config.concurrency.max(1)) {
            let tasks = batch.iter().map(|q| self.bounded_search(q));
            let results = futures::future::join_all(tasks).await;
            for (sub_query, result) in batch.iter().zip(results) {
                match result {
                    Ok(hits) => {
                        debug!("sub-query {:?} returned {} hits", sub_query, hits.len());
                        per_query.push(hits);
                        any_succeeded = true;
                    }
                    Err(err) => {
                        warn!("sub-query {:?} failed, skipping: {}", sub_query, err);
                    }
                }
            }
        }

        if !any_succeeded {
            warn!("all sub-queries failed, falling back to the original query");
            let hits = self
                .bounded_search(&plan.original_query)
                .await
                .map_err(|err| {
                    SearchError::Exhausted(format!(
                        "fallback search of original query failed: {}",
                        err
                    ))
                })?;
            per_query = vec![hits];
        }

        let deduped = dedup_lists(per_query);
        let interleaved = interleave(deduped);

        // Authority filter, skipped when it would leave too few hits.
        let filtered: Vec<SearchHit> = interleaved
            .iter()
            .filter(|hit| !is_filtered_domain(&hit.domain))
            .cloned()
            .collect();
        let mut hits = if filtered.len() >= self.config.min_hits {
            filtered
        } else {
            if filtered.len() < interleaved.len() {
                debug!(
                    "authority filter would leave {} hits, keeping filtered domains",
                    filtered.len()
                );
            }
            interleaved
        };

        // Thin result set: one supplemental search of the original query.
        if hits.len() < self.config.min_hits {
            match self.bounded_search(&plan.original_query).await {
                Ok(extra) => merge_into(&mut hits, extra),
                Err(err) => warn!("supplemental search failed: {}", err),
            }
        }

        hits.truncate(self.config.max_hits);
        Ok(hits)
    }

    async fn bounded_search(&self, query: &str) -> SearchResult<Vec<SearchHit>> {
        match tokio::time::timeout(
            self.config.search_timeout,
            self.provider.search(query, self.config.max_per_query),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SearchError::Timeout(self.config.search_timeout)),
        }
    }
}

/// Domains excluded for diversity unless results are already scarce.
fn is_filtered_domain(domain: &str) -> bool {
    domain == "wikipedia.org"
        || domain.ends_with(".wikipedia.org")
        || domain == "wikimedia.org"
        || domain.ends_with(".wikimedia.org")
}

/// Collapse duplicate ids across per-query lists, keeping the earliest
/// occurrence (sub-query order, then rank) and merging snippets into it.
fn dedup_lists(lists: Vec<Vec<SearchHit>>) -> Vec<Vec<SearchHit>> {
    let mut seen: HashMap<String, (usize, usize)> = HashMap::new();
    let mut out: Vec<Vec<SearchHit>> = Vec::with_capacity(lists.len());

    for list in lists {
        let list_idx = out.len();
        let mut kept: Vec<SearchHit> = Vec::with_capacity(list.len());
        for hit in list {
            match seen.get(&hit.id) {
                Some(&(li, pos)) => {
                    let existing = &mut out[li][pos];
                    existing.snippet = merge_snippets(&existing.snippet, &hit.snippet);
                }
                None => {
                    seen.insert(hit.id.clone(), (list_idx, kept.len()));
                    kept.push(hit);
                }
            }
        }
        out.push(kept);
    }
    out
}

/// Merge two snippets of the same page: keep the longer when one contains
/// the other, otherwise join with ` | ` capped at [`MERGED_SNIPPET_MAX`].
fn merge_snippets(a: &str, b: &str) -> String {
    if b.is_empty() || a.contains(b) {
        return a.to_string();
    }
    if a.is_empty() || b.contains(a) {
        return b.to_string();
    }
    let mut merged = format!("{} | {}", a, b);
    if merged.len() > MERGED_SNIPPET_MAX {
        let cut = (0..=MERGED_SNIPPET_MAX)
            .rev()
            .find(|&i| merged.is_char_boundary(i))
            .unwrap_or(0);
        merged.truncate(cut);
    }
    merged
}

/// Round-robin interleave across sub-query lists. The first pass takes the
/// top 3 from each of the first two sub-queries and the top 2 from each
/// remaining one; subsequent passes take 1 per sub-query until exhaustion.
fn interleave(lists: Vec<Vec<SearchHit>>) -> Vec<SearchHit> {
    let mut queues: Vec<std::collections::VecDeque<SearchHit>> =
        lists.into_iter().map(Into::into).collect();
    let mut out = Vec::new();

    for (i, queue) in queues.iter_mut().enumerate() {
        let take = if i < 2 { 3 } else { 2 };
        for _ in 0..take {
            if let Some(hit) = queue.pop_front() {
                out.push(hit);
            }
        }
    }

    loop {
        let mut advanced = false;
        for queue in queues.iter_mut() {
            if let Some(hit) = queue.pop_front() {
                out.push(hit);
                advanced = true;
            }
        }
        if !advanced {
            break;
        }
    }
    out
}

/// Append supplemental hits, merging snippets for ids already present.
fn merge_into(hits: &mut Vec<SearchHit>, extra: Vec<SearchHit>) {
    let mut index: HashMap<String, usize> = hits
        .iter()
        .enumerate()
        .map(|(i, hit)| (hit.id.clone(), i))
        .collect();
    for hit in extra {
        match index.get(&hit.id) {
            Some(&i) => {
                hits[i].snippet = merge_snippets(&hits[i].snippet, &hit.snippet);
            }
            None => {
                index.insert(hit.id.clone(), hits.len());
                hits.push(hit);
            }
        }
    }
}
