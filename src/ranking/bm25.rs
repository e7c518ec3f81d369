//! Corpus-local Okapi BM25.
//!
//! Built once per request over the extracted documents (title + excerpt).
//! Uses the non-negative IDF variant `ln((N - n + 0.5)/(n + 0.5) + 1)` with
//! `k1 = 1.5`, `b = 0.75`. Tokens are lowercased, whitespace-split, and
//! tokens of length <= 2 are dropped.

use std::collections::{HashMap, HashSet};

/// Term-frequency saturation parameter.
const K1: f64 = 1.5;

/// Length-normalization parameter.
const B: f64 = 0.75;

/// Raw scores divide by this before clamping into [0, 1].
const SCORE_SCALE: f64 = 10.0;

/// Tokenize for BM25: lowercase, split on whitespace, drop short tokens.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(str::to_lowercase)
        .filter(|t| t.len() > 2)
        .collect()
}

/// A BM25 index over one request's extracted corpus.
#[derive(Debug, Clone)]
pub struct Bm25Index {
    doc_tokens: Vec<Vec<String>>,
    doc_lengths: Vec<usize>,
    avg_doc_length: f64,
    idf: HashMap<String, f64>,
}

impl Bm25Index {
    /// Build an index over the given document texts. An empty corpus is
    /// valid and scores everything at zero.
    pub fn new(texts: &[String]) -> Self {
        let doc_tokens: Vec<Vec<String>> = texts.iter().map(|t| tokenize(t)).collect();
        let doc_lengths: Vec<usize> = doc_tokens.iter().map(Vec::len).collect();
        let total: usize = doc_lengths.iter().sum();
        let avg_doc_length = if doc_tokens.is_empty() {
            0.0
        } else {
            total as f64 / doc_tokens.len() as f64
        };
        let idf = Self::calculate_idf(&doc_tokens);
        Self {
            doc_tokens,
            doc_lengths,
            avg_doc_length,
            idf,
        }
    }

    /// IDF = ln((N - df + 0.5) / (df + 0.5) + 1), non-negative for any df.
    fn calculate_idf(doc_tokens: &[Vec<String>]) -> HashMap<String, f64> {
        let n = doc_tokens.len() as f64;
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for tokens in doc_tokens {
            let mut seen = HashSet::new();
            for token in tokens {
                if seen.insert(token.as_str()) {
                    *doc_freq.entry(token.clone()).or_insert(0) += 1;
                }
            }
        }
        doc_freq
            .into_iter()
            .map(|(term, df)| {
                let df = df as f64;
                (term, ((n - df + 0.5) / (df + 0.5) + 1.0).ln())
            })
            .collect()
    }

    /// Raw BM25 score of one document against the query.
    pub fn raw_score(&self, query: &str, doc_idx: usize) -> f64 {
        let Some(doc) = self.doc_tokens.get(doc_idx) else {
            return 0.0;
        };
        let doc_length = self.doc_lengths[doc_idx] as f64;

        let mut term_freq: HashMap<&str, usize> = HashMap::new();
        for token in doc {
            *term_freq.entry(token.as_str()).or_insert(0) += 1;
        }

        let mut score = 0.0;
        for query_token in tokenize(query) {
            if let (Some(&tf), Some(&idf)) = (
                term_freq.get(query_token.as_str()),
                self.idf.get(&query_token),
            ) {
                let tf = tf as f64;
                let norm = if self.avg_doc_length > 0.0 {
                    1.0 - B + B * (doc_length / self.avg_doc_length)
                } else {
                    1.0
                };
                score += idf * (tf * (K1 + 1.0)) / (tf + K1 * norm);
            }
        }
        score
    }

    /// Normalized relevance in [0, 1]: raw score / 10, clamped.
    pub fn relevance(&self, query: &str, doc_idx: usize) -> f64 {
        (self.raw_score(query, doc_idx) / SCORE_SCALE).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corpus(texts: &[&str]) -> Vec<String> {
        texts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_tokenize_drops_short_tokens() {
        assert_eq!(tokenize("An ox is on THE hill"), vec!["hill"]);
        assert_eq!(tokenize("Rust BM25 scoring"), vec!["rust", "bm25", "scoring"]);
        assert!(tokenize("a b c").is_empty());
    }

    #[test]
    fn test_matching_document_scores_higher() {
        let index = Bm25Index::new(&corpus(&[
            "photosynthesis converts light energy into chemical energy",
            "the stock market closed higher today after earnings",
            "rust ownership and borrowing explained for beginners",
        ]));
        let query = "photosynthesis light energy";
        let scores: Vec<f64> = (0..3).map(|i| index.raw_score(query, i)).collect();
        assert!(scores[0] > scores[1]);
        assert!(scores[0] > scores[2]);
    }

    #[test]
    fn test_idf_is_non_negative() {
        // A term present in every document still gets IDF >= 0.
        let index = Bm25Index::new(&corpus(&[
            "shared term alpha",
            "shared term beta",
            "shared term gamma",
        ]));
        for idf in index.idf.values() {
            assert!(*idf >= 0.0);
        }
        assert!(index.raw_score("shared", 0) >= 0.0);
    }

    #[test]
    fn test_shorter_document_preferred_at_equal_tf() {
        let index = Bm25Index::new(&corpus(&[
            "quantum computing",
            "quantum computing with many additional words diluting the focus of this document considerably",
        ]));
        assert!(index.raw_score("quantum", 0) > index.raw_score("quantum", 1));
    }

    #[test]
    fn test_relevance_is_clamped() {
        let index = Bm25Index::new(&corpus(&["rust rust rust rust rust", "unrelated text here"]));
        let relevance = index.relevance("rust", 0);
        assert!((0.0..=1.0).contains(&relevance));
        assert_eq!(index.relevance("rust", 1), 0.0);
    }

    #[test]
    fn test_empty_corpus_and_out_of_range() {
        let index = Bm25Index::new(&[]);
        assert_eq!(index.raw_score("anything", 0), 0.0);
        let index = Bm25Index::new(&corpus(&["one doc"]));
        assert_eq!(index.raw_score("doc", 5), 0.0);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let index = Bm25Index::new(&corpus(&["some document text"]));
        assert_eq!(index.raw_score("", 0), 0.0);
    }
}
