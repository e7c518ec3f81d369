//! Per-user Thompson-sampling bandit over content-feature arms.
//!
//! Each arm is one `dimension:value` pair from the content-feature
//! vocabulary (a bounded space of 17 arms, so nothing is ever evicted).
//! Clicks spread fractional credit across a document's arms; impressions
//! that go unclicked past a timeout resolve as fractional failures.
//!
//! Scoring is the Beta-distribution mean `(s + 1) / (s + f + 2)` rather
//! than a random draw. Exploration comes from the uniform prior pulling
//! low-evidence arms toward 0.5; no per-call randomness is ever injected,
//! so two back-to-back score reads are identical.

use std::collections::HashMap;

use tracing::debug;

use crate::models::{ArmStats, PendingImpression};

/// How long an impression may stay pending before it resolves as a failure.
pub const DEFAULT_IMPRESSION_TIMEOUT_MS: u64 = 25_000;

/// One user's bandit state: arm evidence plus the ordered pending list.
#[derive(Debug, Clone)]
pub struct FeatureBandit {
    arms: HashMap<String, ArmStats>,
    pending: Vec<PendingImpression>,
    timeout_ms: u64,
}

impl FeatureBandit {
    /// Create a bandit with the default impression timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_IMPRESSION_TIMEOUT_MS)
    }

    /// Create a bandit with a custom impression timeout.
    pub fn with_timeout(timeout_ms: u64) -> Self {
        Self {
            arms: HashMap::new(),
            pending: Vec::new(),
            timeout_ms,
        }
    }

    /// Record that a document with these arms was shown. Does not touch arm
    /// stats; the impression stays pending until a click or a timeout
    /// resolves it.
    pub fn record_pending_impression(
        &mut self,
        arms: Vec<String>,
        query_id: &str,
        source_id: &str,
        now_ms: u64,
    ) {
        if arms.is_empty() {
            return;
        }
        self.pending.push(PendingImpression {
            arms,
            query_id: query_id.to_string(),
            source_id: source_id.to_string(),
            timestamp_ms: now_ms,
        });
    }

    /// Record a click on a document with these arms. Each arm receives
    /// `1 / |arms|` success credit, and the matching pending impression (by
    /// source id when given, else by arm-set equality) is removed so the
    /// timeout sweep cannot also count it as a failure.
    pub fn record_click(&mut self, arms: &[String], source_id: Option<&str>) {
        if arms.is_empty() {
            return;
        }
        let credit = 1.0 / arms.len() as f64;
        for arm in arms {
            self.arms.entry(arm.clone()).or_default().successes += credit;
        }

        let position = match source_id {
            Some(id) => self.pending.iter().position(|p| p.source_id == id),
            None => self
                .pending
                .iter()
                .position(|p| same_arm_set(&p.arms, arms)),
        };
        if let Some(i) = position {
            self.pending.remove(i);
        }
    }

    /// Resolve pending impressions older than the timeout as failures:
    /// each such impression's arms receive `1 / |arms|` failure credit and
    /// the entry is removed. Younger entries are untouched.
    pub fn resolve_pending_impressions(&mut self, now_ms: u64) {
        let timeout = self.timeout_ms;
        let (expired, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| now_ms.saturating_sub(p.timestamp_ms) > timeout);
        self.pending = remaining;

        for impression in expired {
            let credit = 1.0 / impression.arms.len() as f64;
            for arm in &impression.arms {
                self.arms.entry(arm.clone()).or_default().failures += credit;
            }
            debug!(
                "impression for {} timed out, {} arms debited",
                impression.source_id,
                impression.arms.len()
            );
        }
    }

    /// Deterministic per-arm scores: the mean of
    /// `Beta(successes + 1, failures + 1)`. Untracked arms are absent.
    pub fn scores(&self) -> HashMap<String, f64> {
        self.arms
            .iter()
            .map(|(arm, stats)| {
                let score = (stats.successes + 1.0) / (stats.successes + stats.failures + 2.0);
                (arm.clone(), score)
            })
            .collect()
    }

    /// The `k` best arms by score, descending. Ties break on arm name so
    /// the order is stable.
    pub fn top_k(&self, k: usize) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self.scores().into_iter().collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        ranked.truncate(k);
        ranked
    }

    /// Evidence counters for one arm, if it has any.
    pub fn arm_stats(&self, arm: &str) -> Option<ArmStats> {
        self.arms.get(arm).copied()
    }

    /// Whether this bandit has accumulated any evidence at all.
    pub fn is_empty(&self) -> bool {
        self.arms.is_empty()
    }

    /// Number of unresolved impressions.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for FeatureBandit {
    fn default() -> Self {
        Self::new()
    }
}

/// Order-insensitive arm-set comparison.
fn same_arm_set(a: &[String], b: &[String]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut a_sorted: Vec<&str> = a.iter().map(String::as_str).collect();
    let mut b_sorted: Vec<&str> = b.iter().map(String::as_str).collect();
    a_sorted.sort_unstable();
    b_sorted.sort_unstable();
    a_sorted == b_sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    fn five_arms() -> Vec<String> {
        vec![
            "depth:expert".to_string(),
            "style:technical".to_string(),
            "format:research".to_string(),
            "approach:data-driven".to_string(),
            "density:comprehensive".to_string(),
        ]
    }

    #[test]
    fn test_fractional_click_credit() {
        let mut bandit = FeatureBandit::new();
        bandit.record_click(&five_arms(), None);
        for arm in five_arms() {
            let stats = bandit.arm_stats(&arm).unwrap();
            assert!((stats.successes - 0.2).abs() < 1e-12);
            assert_eq!(stats.failures, 0.0);
        }
    }

    #[test]
    fn test_timeout_resolution_debits_arms() {
        let mut bandit = FeatureBandit::new();
        bandit.record_pending_impression(five_arms(), "q1", "src1", 0);
        assert_eq!(bandit.pending_count(), 1);

        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS + 1);
        assert_eq!(bandit.pending_count(), 0);
        for arm in five_arms() {
            let stats = bandit.arm_stats(&arm).unwrap();
            assert_eq!(stats.successes, 0.0);
            assert!((stats.failures - 0.2).abs() < 1e-12);
        }
    }

    #[test]
    fn test_click_cancels_pending_failure() {
        let mut bandit = FeatureBandit::new();
        bandit.record_pending_impression(five_arms(), "q1", "src1", 0);
        bandit.record_click(&five_arms(), Some("src1"));
        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS * 2);

        for arm in five_arms() {
            let stats = bandit.arm_stats(&arm).unwrap();
            assert!((stats.successes - 0.2).abs() < 1e-12);
            assert_eq!(stats.failures, 0.0);
        }
    }

    #[test]
    fn test_click_without_source_id_matches_arm_set() {
        let mut bandit = FeatureBandit::new();
        let other = vec!["depth:introductory".to_string()];
        bandit.record_pending_impression(other.clone(), "q1", "srcA", 0);
        bandit.record_pending_impression(five_arms(), "q1", "srcB", 0);

        // Arm order differs from the recorded impression; set equality must
        // still match, and the unrelated impression must survive.
        let mut shuffled = five_arms();
        shuffled.reverse();
        bandit.record_click(&shuffled, None);

        assert_eq!(bandit.pending_count(), 1);
        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS * 2);
        let stats = bandit.arm_stats("depth:introductory").unwrap();
        assert!((stats.failures - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_young_impressions_survive_resolution() {
        let mut bandit = FeatureBandit::new();
        bandit.record_pending_impression(five_arms(), "q1", "old", 0);
        bandit.record_pending_impression(five_arms(), "q2", "young", 20_000);

        bandit.resolve_pending_impressions(30_000);
        assert_eq!(bandit.pending_count(), 1);
        // Only the old impression resolved as a failure.
        let stats = bandit.arm_stats("depth:expert").unwrap();
        assert!((stats.failures - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_scoring_monotonicity() {
        let mut bandit = FeatureBandit::new();
        let arm_a = vec!["depth:expert".to_string()];
        let arm_b = vec!["depth:introductory".to_string()];

        // Equal impression history: five shown each.
        for i in 0..5 {
            bandit.record_pending_impression(arm_a.clone(), "q", &format!("a{}", i), 0);
            bandit.record_pending_impression(arm_b.clone(), "q", &format!("b{}", i), 0);
        }
        // Five clicks on A, none on B.
        for i in 0..5 {
            bandit.record_click(&arm_a, Some(&format!("a{}", i)));
        }
        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS * 2);

        let scores = bandit.scores();
        assert!(scores["depth:expert"] > scores["depth:introductory"]);
        // Beta means: A = (5+1)/(5+0+2), B = (0+1)/(0+5+2).
        assert!((scores["depth:expert"] - 6.0 / 7.0).abs() < 1e-12);
        assert!((scores["depth:introductory"] - 1.0 / 7.0).abs() < 1e-12);
    }

    #[test]
    fn test_scoring_is_deterministic() {
        let mut bandit = FeatureBandit::new();
        bandit.record_click(&five_arms(), None);
        bandit.record_pending_impression(five_arms(), "q", "s", 0);
        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS * 2);

        let first = bandit.scores();
        let second = bandit.scores();
        assert_eq!(first, second);
    }

    #[test]
    fn test_untracked_arms_are_absent() {
        let bandit = FeatureBandit::new();
        assert!(bandit.scores().is_empty());
        assert!(bandit.is_empty());
    }

    #[test]
    fn test_top_k_ordering_and_truncation() {
        let mut bandit = FeatureBandit::new();
        bandit.record_click(&["depth:expert".to_string()], None);
        bandit.record_click(&["depth:expert".to_string()], None);
        bandit.record_click(&["style:technical".to_string()], None);
        bandit.record_pending_impression(
            vec!["format:opinion".to_string()],
            "q",
            "s",
            0,
        );
        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS * 2);

        let top = bandit.top_k(2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].0, "depth:expert");
        assert_eq!(top[1].0, "style:technical");
        assert!(top[0].1 >= top[1].1);
    }

    #[test]
    fn test_empty_arm_lists_are_ignored() {
        let mut bandit = FeatureBandit::new();
        bandit.record_click(&[], None);
        bandit.record_pending_impression(Vec::new(), "q", "s", 0);
        assert!(bandit.is_empty());
        assert_eq!(bandit.pending_count(), 0);
    }

    #[test]
    fn test_evidence_never_decreases() {
        let mut bandit = FeatureBandit::new();
        bandit.record_click(&five_arms(), None);
        let before: f64 = five_arms()
            .iter()
            .map(|a| {
                let s = bandit.arm_stats(a).unwrap();
                s.successes + s.failures
            })
            .sum();

        bandit.record_pending_impression(five_arms(), "q", "s", 0);
        bandit.resolve_pending_impressions(DEFAULT_IMPRESSION_TIMEOUT_MS * 2);
        bandit.record_click(&five_arms(), None);

        let after: f64 = five_arms()
            .iter()
            .map(|a| {
                let s = bandit.arm_stats(a).unwrap();
                s.successes + s.failures
            })
            .sum();
        assert!(after >= before);
    }
}
