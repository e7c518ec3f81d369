//! Multi-signal document ranking.
//!
//! Combines BM25 relevance, recency decay, a source-authority prior, and
//! body coverage into one composite score per document, with a
//! human-readable reason string. The resulting order is a pure function of
//! the inputs: for a fixed set of (hit, extract) pairs the ranking is
//! deterministic.

pub mod bm25;

use chrono::{DateTime, Utc};

use crate::extract::parse_published;
use crate::models::{PageExtract, RankedDoc, RankingSignals, SearchHit};
use bm25::Bm25Index;

/// Signal weights: relevance, recency, source quality, coverage.
const W_RELEVANCE: f64 = 0.5;
const W_RECENCY: f64 = 0.2;
const W_SOURCE_QUALITY: f64 = 0.2;
const W_COVERAGE: f64 = 0.1;

/// Recency decays linearly to zero over this many days.
const RECENCY_HORIZON_DAYS: f64 = 365.0;

/// Coverage saturates at this many words.
const COVERAGE_HORIZON_WORDS: f64 = 1000.0;

/// Rank the extracted documents against the original query.
///
/// `pairs` holds each search hit together with its successful extraction;
/// `now` anchors recency so tests can pin it.
pub fn rank(query: &str, pairs: &[(SearchHit, PageExtract)], now: DateTime<Utc>) -> Vec<RankedDoc> {
    let corpus: Vec<String> = pairs
        .iter()
        .map(|(_, extract)| format!("{} {}", extract.title, extract.excerpt))
        .collect();
    let index = Bm25Index::new(&corpus);

    let mut docs: Vec<RankedDoc> = pairs
        .iter()
        .enumerate()
        .map(|(i, (hit, extract))| {
            let signals = RankingSignals {
                relevance: index.relevance(query, i),
                recency: recency_signal(hit, extract, now),
                source_quality: source_quality(&hit.domain),
                coverage: coverage_signal(&extract.body),
            };
            let score = W_RELEVANCE * signals.relevance
                + W_RECENCY * signals.recency
                + W_SOURCE_QUALITY * signals.source_quality
                + W_COVERAGE * signals.coverage;
            RankedDoc {
                id: hit.id.clone(),
                url: hit.url.clone(),
                title: extract.title.clone(),
                excerpt: extract.excerpt.clone(),
                domain: hit.domain.clone(),
                published_date: extract.published_date,
                features: extract.features.clone(),
                signals,
                score,
                ranking_reason: ranking_reason(&signals),
            }
        })
        .collect();

    // Stable sort: equal scores keep input order, so the total order depends
    // only on the input set.
    docs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    docs
}

/// Recency in [0, 1]: the extractor's date wins, then the backend hint;
/// unknown is neutral, future dates saturate, and the signal decays
/// linearly to zero at one year.
fn recency_signal(hit: &SearchHit, extract: &PageExtract, now: DateTime<Utc>) -> f64 {
    let published = extract
        .published_date
        .or_else(|| hit.published_hint.as_deref().and_then(|h| parse_published(h, now)));
    let Some(published) = published else {
        return 0.5;
    };
    if published > now {
        return 1.0;
    }
    let age_days = (now - published).num_seconds() as f64 / 86_400.0;
    (1.0 - age_days / RECENCY_HORIZON_DAYS).clamp(0.0, 1.0)
}

/// Domain-tail authority prior.
fn source_quality(domain: &str) -> f64 {
    if domain.ends_with(".edu") || domain.ends_with(".gov") {
        0.9
    } else if domain.ends_with(".org") {
        0.7
    } else {
        0.5
    }
}

/// Coverage in [0, 1]: word count over 1000, saturating.
fn coverage_signal(body: &str) -> f64 {
    let words = body.split_whitespace().count() as f64;
    (words / COVERAGE_HORIZON_WORDS).min(1.0)
}

/// Human-readable explanation from the signal thresholds.
fn ranking_reason(signals: &RankingSignals) -> String {
    let mut tags: Vec<&str> = Vec::new();
    if signals.source_quality > 0.7 {
        tags.push(".edu/.gov domain");
    }
    if signals.recency > 0.7 {
        tags.push("recent");
    }
    if signals.relevance > 0.8 {
        tags.push("highly relevant");
    }
    if tags.is_empty() {
        "matched query".to_string()
    } else {
        tags.join(", ")
    }
}
