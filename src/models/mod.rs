//! Core data models for the cited-search answer engine.
//!
//! This module contains the data structures shared across the pipeline:
//! query plans, search hits, extracted pages, content features, ranked
//! documents, answer packets, and the user-event / bandit records that feed
//! personalization. All wire-facing types serialize as camelCase JSON.

use serde::{Deserialize, Serialize};

/// How a query plan was produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PlanStrategy {
    /// Sub-queries were produced by the LLM planner.
    Llm,

    /// Planning failed and the plan degraded to the original query.
    Fallback,
}

/// A decomposition of the user's query into 1..=5 search strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    /// The literal query the user asked.
    pub original_query: String,

    /// Non-empty sub-query strings, between 1 and 5 of them.
    pub sub_queries: Vec<String>,

    /// Whether the plan came from the LLM or the degradation path.
    pub strategy: PlanStrategy,
}

impl QueryPlan {
    /// Build the degraded single-sub-query plan for a query.
    pub fn fallback(query: &str) -> Self {
        Self {
            original_query: query.to_string(),
            sub_queries: vec![query.to_string()],
            strategy: PlanStrategy::Fallback,
        }
    }
}

/// Which sub-query found a hit, and at what rank the backend returned it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    /// The sub-query string that produced this hit.
    pub source_query: String,

    /// 0-based position in that sub-query's backend result list.
    pub original_rank: usize,
}

/// One normalized result from a search backend.
///
/// `id` is a stable short hex hash of the normalized URL, so the same page
/// surfaced by different sub-queries (or with scheme/`www.`/trailing-slash
/// variations) collapses to one id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    /// Stable id derived from the normalized URL.
    pub id: String,

    /// The URL as the backend returned it.
    pub url: String,

    /// Result title.
    pub title: String,

    /// Result snippet. Merged (` | `-joined) when duplicates collapse.
    pub snippet: String,

    /// Host portion of the URL, lowercased.
    pub domain: String,

    /// Unparsed publication-age hint from the backend (e.g. "3 days ago").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_hint: Option<String>,

    /// Where this hit came from.
    pub provenance: Provenance,
}

/// Ordinal depth of treatment of a page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Depth {
    Introductory,
    Intermediate,
    Expert,
}

/// Writing register of a page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Style {
    Academic,
    Technical,
    Journalistic,
    Conversational,
}

/// Document genre of a page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum DocFormat {
    Tutorial,
    Research,
    Opinion,
    Reference,
}

/// How the page approaches its subject.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Approach {
    Conceptual,
    Practical,
    DataDriven,
}

/// Information density of a page.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Density {
    Concise,
    Moderate,
    Comprehensive,
}

macro_rules! feature_value {
    ($ty:ident, $dim:literal, $($variant:ident => $name:literal),+ $(,)?) => {
        impl $ty {
            /// Dimension name used in arm identifiers.
            pub const DIMENSION: &'static str = $dim;

            /// Closed-vocabulary value string.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name,)+
                }
            }

            /// Arm identifier of the form `dimension:value`.
            pub fn arm(&self) -> String {
                format!("{}:{}", Self::DIMENSION, self.as_str())
            }
        }
    };
}

feature_value!(Depth, "depth",
    Introductory => "introductory",
    Intermediate => "intermediate",
    Expert => "expert",
);
feature_value!(Style, "style",
    Academic => "academic",
    Technical => "technical",
    Journalistic => "journalistic",
    Conversational => "conversational",
);
feature_value!(DocFormat, "format",
    Tutorial => "tutorial",
    Research => "research",
    Opinion => "opinion",
    Reference => "reference",
);
feature_value!(Approach, "approach",
    Conceptual => "conceptual",
    Practical => "practical",
    DataDriven => "data-driven",
);
feature_value!(Density, "density",
    Concise => "concise",
    Moderate => "moderate",
    Comprehensive => "comprehensive",
);

/// Semantic classification of a page along five closed-vocabulary dimensions.
///
/// The tagger always fills all five dimensions; interaction events may carry
/// a partial set, so every dimension is optional here. Arms derive from the
/// dimensions that are actually present.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ContentFeatures {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub depth: Option<Depth>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<Style>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<DocFormat>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub approach: Option<Approach>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub density: Option<Density>,
}

impl ContentFeatures {
    /// The neutral tuple substituted when tagging fails.
    pub fn neutral() -> Self {
        Self {
            depth: Some(Depth::Intermediate),
            style: Some(Style::Journalistic),
            format: Some(DocFormat::Reference),
            approach: Some(Approach::Practical),
            density: Some(Density::Moderate),
        }
    }

    /// Arm identifiers for the dimensions that are present, in dimension
    /// order.
    pub fn arms(&self) -> Vec<String> {
        let mut arms = Vec::with_capacity(5);
        if let Some(v) = self.depth {
            arms.push(v.arm());
        }
        if let Some(v) = self.style {
            arms.push(v.arm());
        }
        if let Some(v) = self.format {
            arms.push(v.arm());
        }
        if let Some(v) = self.approach {
            arms.push(v.arm());
        }
        if let Some(v) = self.density {
            arms.push(v.arm());
        }
        arms
    }

    /// Whether all five dimensions are present.
    pub fn is_complete(&self) -> bool {
        self.depth.is_some()
            && self.style.is_some()
            && self.format.is_some()
            && self.approach.is_some()
            && self.density.is_some()
    }

    /// Value strings (without the dimension prefix), in dimension order.
    pub fn value_names(&self) -> Vec<&'static str> {
        let mut names = Vec::with_capacity(5);
        if let Some(v) = self.depth {
            names.push(v.as_str());
        }
        if let Some(v) = self.style {
            names.push(v.as_str());
        }
        if let Some(v) = self.format {
            names.push(v.as_str());
        }
        if let Some(v) = self.approach {
            names.push(v.as_str());
        }
        if let Some(v) = self.density {
            names.push(v.as_str());
        }
        names
    }
}

/// Clean content extracted from one fetched page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageExtract {
    /// URL the page was fetched from.
    pub url: String,

    /// Page title after chrome stripping.
    pub title: String,

    /// Main body text.
    pub body: String,

    /// Short excerpt used for prompts and ranking.
    pub excerpt: String,

    /// Publication timestamp, when one could be recovered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<chrono::DateTime<chrono::Utc>>,

    /// Semantic features, absent when tagging was skipped or the body was
    /// too short to classify.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<ContentFeatures>,
}

/// The individual signals feeding a document's composite score, each in
/// [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankingSignals {
    /// BM25 relevance against the user's query.
    pub relevance: f64,

    /// Linear recency decay over one year.
    pub recency: f64,

    /// Domain-tail authority prior.
    pub source_quality: f64,

    /// Body-length coverage, saturating at 1000 words.
    pub coverage: f64,
}

/// A scored, explainable document ready for synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedDoc {
    pub id: String,
    pub url: String,
    pub title: String,
    pub excerpt: String,
    pub domain: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_date: Option<chrono::DateTime<chrono::Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<ContentFeatures>,

    pub signals: RankingSignals,

    /// Composite score; may exceed the base [0,1] range after a
    /// personalization boost.
    pub score: f64,

    /// Human-readable explanation of why this document ranks where it does.
    pub ranking_reason: String,
}

/// One resolved inline citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    /// 1-based index as it appears in the answer text.
    pub index: usize,

    /// Id of the source document the index resolves to.
    pub source_id: String,

    /// Up to 200 characters of the source's excerpt.
    pub passage: String,
}

/// The final synthesized answer with its citation map and source list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPacket {
    pub query_id: String,
    pub text: String,
    pub citations: Vec<Citation>,
    pub sources: Vec<RankedDoc>,
}

/// Kinds of client-side interaction the event intake accepts.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SourceClicked,
    CitationClicked,
    CitationHovered,
    SourceExpanded,
    AnswerSaved,
}

impl EventType {
    /// Stable string form, used for the durable event log.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::SourceClicked => "SOURCE_CLICKED",
            EventType::CitationClicked => "CITATION_CLICKED",
            EventType::CitationHovered => "CITATION_HOVERED",
            EventType::SourceExpanded => "SOURCE_EXPANDED",
            EventType::AnswerSaved => "ANSWER_SAVED",
        }
    }

    /// Parse the stable string form back into the enum.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SOURCE_CLICKED" => Some(EventType::SourceClicked),
            "CITATION_CLICKED" => Some(EventType::CitationClicked),
            "CITATION_HOVERED" => Some(EventType::CitationHovered),
            "SOURCE_EXPANDED" => Some(EventType::SourceExpanded),
            "ANSWER_SAVED" => Some(EventType::AnswerSaved),
            _ => None,
        }
    }
}

/// Closed union of event metadata. Unknown keys in the incoming JSON are
/// ignored by deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct EventMeta {
    /// Features of the interacted-with source, possibly partial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<ContentFeatures>,

    /// Which inline citation number was interacted with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation_number: Option<u32>,

    /// Feature sets of every source in the answer, for answer-level events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_source_features: Option<Vec<ContentFeatures>>,
}

/// One user-interaction event. The event log is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEvent {
    /// Opaque, untrusted user identifier.
    pub user_id: String,

    /// Client-reported epoch milliseconds.
    pub timestamp: i64,

    pub event_type: EventType,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<EventMeta>,
}

/// Evidence counters for one bandit arm. Real-valued: click credit is
/// fractional (1/|arms| per arm).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct ArmStats {
    pub successes: f64,
    pub failures: f64,
}

/// A shown-but-unresolved impression awaiting click-or-timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PendingImpression {
    /// Arms of the shown document.
    pub arms: Vec<String>,

    /// The request that showed it.
    pub query_id: String,

    /// The shown document.
    pub source_id: String,

    /// Milliseconds on the bandit's clock when the impression was recorded.
    pub timestamp_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_identifiers() {
        assert_eq!(Depth::Expert.arm(), "depth:expert");
        assert_eq!(Approach::DataDriven.arm(), "approach:data-driven");
        assert_eq!(Density::Comprehensive.arm(), "density:comprehensive");

        let re = regex::Regex::new("^[a-z]+:[a-z-]+$").unwrap();
        for arm in ContentFeatures::neutral().arms() {
            assert!(re.is_match(&arm), "bad arm id: {}", arm);
        }
    }

    #[test]
    fn test_neutral_features_are_complete() {
        let neutral = ContentFeatures::neutral();
        assert!(neutral.is_complete());
        assert_eq!(neutral.arms().len(), 5);
        assert_eq!(
            neutral.arms(),
            vec![
                "depth:intermediate",
                "style:journalistic",
                "format:reference",
                "approach:practical",
                "density:moderate",
            ]
        );
    }

    #[test]
    fn test_partial_features_yield_partial_arms() {
        let features = ContentFeatures {
            depth: Some(Depth::Expert),
            style: Some(Style::Technical),
            ..Default::default()
        };
        assert!(!features.is_complete());
        assert_eq!(features.arms(), vec!["depth:expert", "style:technical"]);
        assert_eq!(features.value_names(), vec!["expert", "technical"]);
    }

    #[test]
    fn test_event_meta_ignores_unknown_keys() {
        let meta: EventMeta =
            serde_json::from_str(r#"{"features":{"depth":"expert"},"somethingElse":42}"#).unwrap();
        assert_eq!(meta.features.unwrap().depth, Some(Depth::Expert));
        assert!(meta.citation_number.is_none());
    }

    #[test]
    fn test_event_type_wire_format() {
        let json = serde_json::to_string(&EventType::SourceClicked).unwrap();
        assert_eq!(json, "\"SOURCE_CLICKED\"");
        let parsed: EventType = serde_json::from_str("\"ANSWER_SAVED\"").unwrap();
        assert_eq!(parsed, EventType::AnswerSaved);
        assert_eq!(EventType::parse("CITATION_HOVERED"), Some(EventType::CitationHovered));
        assert_eq!(EventType::parse("bogus"), None);
    }

    #[test]
    fn test_user_event_camel_case_wire() {
        let event: UserEvent = serde_json::from_str(
            r#"{
                "userId": "u1",
                "timestamp": 1700000000000,
                "eventType": "SOURCE_CLICKED",
                "sourceId": "abc123",
                "meta": {"features": {"depth": "expert", "style": "technical"}}
            }"#,
        )
        .unwrap();
        assert_eq!(event.user_id, "u1");
        assert_eq!(event.event_type, EventType::SourceClicked);
        assert_eq!(event.source_id.as_deref(), Some("abc123"));
        let arms = event.meta.unwrap().features.unwrap().arms();
        assert_eq!(arms, vec!["depth:expert", "style:technical"]);
    }

    #[test]
    fn test_fallback_plan_shape() {
        let plan = QueryPlan::fallback("why is the sky blue");
        assert_eq!(plan.sub_queries, vec!["why is the sky blue"]);
        assert_eq!(plan.strategy, PlanStrategy::Fallback);
        assert_eq!(plan.original_query, "why is the sky blue");
    }
}
