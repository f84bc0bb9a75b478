use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::outcome::TestOutcome;
use crate::scoring::{clamp_unit, mean_by};

pub const VECTOR_SIZE: usize = 1536;
pub const MAX_QUERY_LENGTH: usize = 1000;

pub const MIN_K: u32 = 1;
pub const MAX_K: u32 = 100;
pub const DEFAULT_K: u32 = 10;
pub const MIN_RESULT_SIZE: u32 = 1;
pub const MAX_RESULT_SIZE: u32 = 50;
pub const DEFAULT_RESULT_SIZE: u32 = 10;

pub const SEARCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Per-case gates.
pub const CASE_RELEVANCE_THRESHOLD: f64 = 0.7;
pub const CASE_RESPONSE_TIME_MS: f64 = 3000.0;

/// Comprehensive-run gates.
pub const OVERALL_RESPONSE_TIME_MS: f64 = 2000.0;
pub const OVERALL_RELEVANCE_THRESHOLD: f64 = 0.8;
pub const SEMANTIC_ACCURACY_THRESHOLD: f64 = 0.85;

/// Bounds of the read-only mock generator.
pub const MOCK_RESPONSE_TIME_MIN_MS: f64 = 500.0;
pub const MOCK_RESPONSE_TIME_MAX_MS: f64 = 1500.0;
pub const MOCK_RELEVANCE_BASE: f64 = 0.85;
pub const MOCK_RELEVANCE_VARIANCE: f64 = 0.1;
pub const MOCK_PRECISION_BASE: f64 = 0.8;
pub const MOCK_PRECISION_VARIANCE: f64 = 0.15;

/// Clamps the k-NN neighbour count into the supported range.
pub fn clamp_k(k: u32) -> u32 {
    k.clamp(MIN_K, MAX_K)
}

/// Clamps the requested result size into the supported range.
pub fn clamp_result_size(size: u32) -> u32 {
    size.clamp(MIN_RESULT_SIZE, MAX_RESULT_SIZE)
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum QueryType {
    Factual,
    Conceptual,
    Technical,
    Conversational,
}

impl QueryType {
    pub const COUNT: usize = 4;

    /// Relevance weighting applied to the raw backend score.
    pub fn relevance_weight(self) -> f64 {
        match self {
            Self::Factual => 1.0,
            Self::Technical => 0.9,
            Self::Conceptual => 0.8,
            Self::Conversational => 0.85,
        }
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Language {
    Ja,
    En,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Difficulty {
    Basic,
    Intermediate,
    Advanced,
}

/// One fixed search scenario. Loaded once at module construction, never
/// mutated.
#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct SearchTestCase {
    pub id: String,
    pub query: String,
    pub query_type: QueryType,
    pub expected_documents: Vec<String>,
    pub language: Language,
    pub difficulty: Difficulty,
}

/// Metadata carried by an indexed document.
#[derive(Debug, Clone, Default, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into, strip_option)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Setters, Serialize, Deserialize)]
#[setters(into)]
pub struct DocumentSource {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

/// A single hit as returned by the search backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    #[serde(rename = "_source")]
    pub source: DocumentSource,
    #[serde(rename = "_score")]
    pub score: f64,
}

impl SearchHit {
    fn matches_any(&self, expected_documents: &[String]) -> bool {
        let Some(name) = self.source.metadata.document.as_deref() else {
            return false;
        };
        expected_documents
            .iter()
            .any(|expected| name.contains(expected.trim_end_matches(".md")))
    }
}

/// Wire shape of an OpenSearch `_search` response.
#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    pub hits: SearchHits,
}

#[derive(Debug, Deserialize)]
pub struct SearchHits {
    #[serde(default)]
    pub hits: Vec<SearchHit>,
}

/// Mean backend score weighted by query type, clamped into `[0, 1]`.
pub fn relevance_score(hits: &[SearchHit], query_type: QueryType) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let avg = mean_by(hits, |hit| hit.score);
    clamp_unit(avg * query_type.relevance_weight())
}

/// Fraction of the top five hits that resolve to an expected document.
pub fn precision_at_5(hits: &[SearchHit], expected_documents: &[String]) -> f64 {
    let top5 = &hits[..hits.len().min(5)];
    if top5.is_empty() {
        return 0.0;
    }
    let relevant = top5
        .iter()
        .filter(|hit| hit.matches_any(expected_documents))
        .count();
    clamp_unit(relevant as f64 / 5.min(expected_documents.len()).max(1) as f64)
}

/// Fraction of expected documents found anywhere in the result set.
pub fn recall_score(hits: &[SearchHit], expected_documents: &[String]) -> f64 {
    if expected_documents.is_empty() {
        return 1.0;
    }
    let found = hits
        .iter()
        .filter(|hit| hit.matches_any(expected_documents))
        .count();
    clamp_unit(found as f64 / expected_documents.len() as f64)
}

/// Scores for one executed case.
#[derive(Debug, Clone, Default, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct SearchCaseMetrics {
    pub response_time_ms: f64,
    pub relevance_score: f64,
    pub precision_at5: f64,
    pub recall_score: f64,
    pub documents_found: usize,
}

/// Outcome of one case; a failed execution still yields a zero-score entry so
/// the batch never shrinks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCaseResult {
    pub case: SearchTestCase,
    pub hits: Vec<SearchHit>,
    pub metrics: SearchCaseMetrics,
    pub success: bool,
}

impl SearchCaseResult {
    pub fn failure(case: SearchTestCase, response_time_ms: f64) -> Self {
        Self {
            case,
            hits: Vec::new(),
            metrics: SearchCaseMetrics::default().response_time_ms(response_time_ms),
            success: false,
        }
    }
}

/// Batch-level search metrics; means over the successful cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetrics {
    pub response_time_ms: f64,
    pub relevance_score: f64,
    pub precision_at5: f64,
    pub recall_score: f64,
    pub documents_found: f64,
}

impl SearchMetrics {
    pub fn aggregate(results: &[SearchCaseResult]) -> Self {
        let successful: Vec<&SearchCaseResult> = results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }
        Self {
            response_time_ms: mean_by(&successful, |r| r.metrics.response_time_ms),
            relevance_score: mean_by(&successful, |r| r.metrics.relevance_score),
            precision_at5: mean_by(&successful, |r| r.metrics.precision_at5),
            recall_score: mean_by(&successful, |r| r.metrics.recall_score),
            documents_found: mean_by(&successful, |r| r.metrics.documents_found as f64),
        }
    }

    /// The three fixed gates of the comprehensive run.
    pub fn passes_overall(&self, quality: &QualityMetrics) -> bool {
        self.response_time_ms < OVERALL_RESPONSE_TIME_MS
            && self.relevance_score > OVERALL_RELEVANCE_THRESHOLD
            && quality.semantic_accuracy > SEMANTIC_ACCURACY_THRESHOLD
    }
}

/// Batch-level quality metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityMetrics {
    pub semantic_accuracy: f64,
    pub contextual_relevance: f64,
    pub diversity_score: f64,
}

impl QualityMetrics {
    pub fn aggregate(results: &[SearchCaseResult]) -> Self {
        let successful: Vec<&SearchCaseResult> = results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }

        // Per-language mean relevance, averaged across language groups.
        let mut by_language: BTreeMap<Language, Vec<f64>> = BTreeMap::new();
        for result in &successful {
            by_language
                .entry(result.case.language)
                .or_default()
                .push(result.metrics.relevance_score);
        }
        let group_means: Vec<f64> = by_language
            .values()
            .map(|scores| crate::scoring::mean(scores))
            .collect();
        let contextual_relevance = crate::scoring::mean(&group_means);

        let distinct_types: BTreeSet<QueryType> =
            successful.iter().map(|r| r.case.query_type).collect();

        Self {
            semantic_accuracy: successful.len() as f64 / results.len() as f64,
            contextual_relevance,
            diversity_score: distinct_types.len() as f64 / QueryType::COUNT as f64,
        }
    }
}

/// Result of a comprehensive vector-search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorSearchReport {
    pub outcome: TestOutcome,
    pub search_metrics: Option<SearchMetrics>,
    pub quality_metrics: Option<QualityMetrics>,
    pub case_results: Vec<SearchCaseResult>,
    pub collection_endpoint: String,
}

impl VectorSearchReport {
    pub fn failed(outcome: TestOutcome, error: impl ToString) -> Self {
        Self {
            outcome: outcome.fail(error),
            search_metrics: None,
            quality_metrics: None,
            case_results: Vec::new(),
            collection_endpoint: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn hit(document: &str, score: f64) -> SearchHit {
        SearchHit {
            source: DocumentSource::default()
                .title(document.trim_end_matches(".md"))
                .metadata(DocumentMetadata::default().document(document.to_string())),
            score,
        }
    }

    fn case_fixture() -> SearchTestCase {
        SearchTestCase {
            id: "search-factual-001".to_string(),
            query: "RAGシステムとは何ですか？".to_string(),
            query_type: QueryType::Factual,
            expected_documents: vec![
                "rag-overview.md".to_string(),
                "rag-architecture.md".to_string(),
            ],
            language: Language::Ja,
            difficulty: Difficulty::Basic,
        }
    }

    fn case_result(case: SearchTestCase, relevance: f64, response_ms: f64) -> SearchCaseResult {
        SearchCaseResult {
            case,
            hits: Vec::new(),
            metrics: SearchCaseMetrics::default()
                .relevance_score(relevance)
                .response_time_ms(response_ms)
                .documents_found(2usize),
            success: true,
        }
    }

    #[test]
    fn test_clamp_k_and_size() {
        assert_eq!(clamp_k(0), MIN_K);
        assert_eq!(clamp_k(DEFAULT_K), DEFAULT_K);
        assert_eq!(clamp_k(500), MAX_K);
        assert_eq!(clamp_result_size(0), MIN_RESULT_SIZE);
        assert_eq!(clamp_result_size(200), MAX_RESULT_SIZE);
    }

    #[test]
    fn test_relevance_weight_by_query_type() {
        assert_eq!(QueryType::Factual.relevance_weight(), 1.0);
        assert_eq!(QueryType::Technical.relevance_weight(), 0.9);
        assert_eq!(QueryType::Conceptual.relevance_weight(), 0.8);
        assert_eq!(QueryType::Conversational.relevance_weight(), 0.85);
    }

    #[test]
    fn test_relevance_score_empty_hits() {
        let actual = relevance_score(&[], QueryType::Factual);
        assert_eq!(actual, 0.0);
    }

    #[test]
    fn test_relevance_score_weighted_mean() {
        let hits = vec![hit("rag-overview.md", 0.9), hit("rag-architecture.md", 0.7)];
        let actual = relevance_score(&hits, QueryType::Technical);
        assert_eq!(actual, 0.8 * 0.9);
    }

    #[test]
    fn test_relevance_score_is_clamped() {
        let hits = vec![hit("rag-overview.md", 3.0)];
        let actual = relevance_score(&hits, QueryType::Factual);
        assert_eq!(actual, 1.0);
    }

    #[test]
    fn test_precision_at_5_counts_expected_matches() {
        let expected = case_fixture().expected_documents;
        let hits = vec![
            hit("rag-overview.md", 0.9),
            hit("unrelated.md", 0.8),
            hit("rag-architecture.md", 0.7),
        ];
        let actual = precision_at_5(&hits, &expected);
        assert_eq!(actual, 1.0);
    }

    #[test]
    fn test_precision_at_5_stays_in_unit_interval() {
        // Three hits resolve to the same expected stem; without clamping the
        // two-document denominator would push this over 1.0.
        let expected = vec!["rag-overview.md".to_string(), "rag-architecture.md".to_string()];
        let hits = vec![
            hit("rag-overview.md", 0.9),
            hit("rag-overview-v2.md", 0.8),
            hit("rag-overview-v3.md", 0.7),
        ];
        let actual = precision_at_5(&hits, &expected);
        assert_eq!(actual, 1.0);
    }

    #[test]
    fn test_recall_score_fraction_of_expected_found() {
        let expected = case_fixture().expected_documents;
        let hits = vec![hit("rag-overview.md", 0.9), hit("unrelated.md", 0.8)];
        let actual = recall_score(&hits, &expected);
        assert_eq!(actual, 0.5);
    }

    #[test]
    fn test_recall_score_without_expectations_is_perfect() {
        let actual = recall_score(&[], &[]);
        assert_eq!(actual, 1.0);
    }

    #[test]
    fn test_search_metrics_aggregate_empty_is_zero() {
        let actual = SearchMetrics::aggregate(&[]);
        assert_eq!(actual, SearchMetrics::default());
    }

    #[test]
    fn test_search_metrics_aggregate_means_successful_cases() {
        let results = vec![
            case_result(case_fixture(), 0.9, 1000.0),
            case_result(case_fixture(), 0.7, 2000.0),
            SearchCaseResult::failure(case_fixture(), 9000.0),
        ];
        let actual = SearchMetrics::aggregate(&results);
        assert_eq!(actual.relevance_score, 0.8);
        assert_eq!(actual.response_time_ms, 1500.0);
        assert_eq!(actual.documents_found, 2.0);
    }

    #[test]
    fn test_quality_metrics_semantic_accuracy_counts_failures() {
        let results = vec![
            case_result(case_fixture(), 0.9, 1000.0),
            SearchCaseResult::failure(case_fixture(), 0.0),
        ];
        let actual = QualityMetrics::aggregate(&results);
        assert_eq!(actual.semantic_accuracy, 0.5);
    }

    #[test]
    fn test_quality_metrics_contextual_relevance_averages_language_groups() {
        let mut en_case = case_fixture();
        en_case.language = Language::En;

        let results = vec![
            case_result(case_fixture(), 0.9, 1000.0),
            case_result(case_fixture(), 0.7, 1000.0),
            case_result(en_case, 0.6, 1000.0),
        ];
        let actual = QualityMetrics::aggregate(&results);
        // ja group mean 0.8, en group 0.6 -> 0.7 across groups.
        assert!((actual.contextual_relevance - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_quality_metrics_diversity_counts_distinct_query_types() {
        let mut technical = case_fixture();
        technical.query_type = QueryType::Technical;

        let results = vec![
            case_result(case_fixture(), 0.9, 1000.0),
            case_result(technical, 0.9, 1000.0),
        ];
        let actual = QualityMetrics::aggregate(&results);
        assert_eq!(actual.diversity_score, 0.5);
    }

    #[test]
    fn test_overall_gate_requires_all_three_thresholds() {
        let quality = QualityMetrics {
            semantic_accuracy: 1.0,
            contextual_relevance: 0.9,
            diversity_score: 1.0,
        };
        let passing = SearchMetrics {
            response_time_ms: 1000.0,
            relevance_score: 0.9,
            ..Default::default()
        };
        assert_eq!(passing.passes_overall(&quality), true);

        let slow = SearchMetrics {
            response_time_ms: 2500.0,
            relevance_score: 0.9,
            ..Default::default()
        };
        assert_eq!(slow.passes_overall(&quality), false);
    }

    #[test]
    fn test_search_hit_wire_format() {
        let json = r#"{
            "_source": {
                "title": "RAGシステム概要",
                "content": "RAG is...",
                "metadata": {"category": "overview", "language": "ja", "document": "rag-overview.md"}
            },
            "_score": 0.95
        }"#;
        let actual: SearchHit = serde_json::from_str(json).unwrap();
        assert_eq!(actual.score, 0.95);
        assert_eq!(
            actual.source.metadata.document,
            Some("rag-overview.md".to_string())
        );
    }
}
