//! Personalization: capped multiplicative boost from bandit scores.
//!
//! Joins ranked documents with a user's per-arm bandit scores. A document
//! with features earns the mean score of its matching arms as a boost,
//! applied as a multiplier capped at 1.3x, and the list is stably re-sorted.
//! With no bandit evidence the function is the identity.

use std::collections::HashMap;

use crate::models::RankedDoc;

/// Multiplier cap: no document's score is ever boosted beyond this.
pub const MAX_MULTIPLIER: f64 = 1.3;

/// Weight of the boost inside the multiplier: `1 + 0.3 * boost`.
const BOOST_WEIGHT: f64 = 0.3;

/// Below this boost the reason string is left alone.
const REASON_THRESHOLD: f64 = 0.05;

/// Apply per-user personalization to an already-ranked list.
pub fn personalize(mut docs: Vec<RankedDoc>, arm_scores: &HashMap<String, f64>) -> Vec<RankedDoc> {
    if arm_scores.is_empty() {
        return docs;
    }

    for doc in docs.iter_mut() {
        let Some(features) = &doc.features else {
            continue;
        };

        // Scores for the arms this document actually has; absent arms are
        // simply not part of the mean.
        let mut matched: Vec<(String, f64)> = features
            .arms()
            .into_iter()
            .filter_map(|arm| arm_scores.get(&arm).map(|score| (arm, *score)))
            .collect();
        if matched.is_empty() {
            continue;
        }

        let boost: f64 =
            matched.iter().map(|(_, score)| score).sum::<f64>() / matched.len() as f64;
        let multiplier = (1.0 + BOOST_WEIGHT * boost).min(MAX_MULTIPLIER);
        doc.score *= multiplier;

        if boost > REASON_THRESHOLD {
            matched.sort_by(|a, b| {
                b.1.partial_cmp(&a.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(&b.0))
            });
            let values: Vec<&str> = matched
                .iter()
                .take(2)
                .map(|(arm, _)| arm.split(':').nth(1).unwrap_or(arm.as_str()))
                .collect();
            doc.ranking_reason
                .push_str(&format!(" + personalized ({})", values.join(", ")));
        }
    }

    // Stable: equal scores keep their pre-personalization order.
    docs.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    docs
}
