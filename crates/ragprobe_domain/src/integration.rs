use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::outcome::TestOutcome;
use crate::scoring::{clamp_unit, mean, mean_by};
use crate::search::SearchHit;
use crate::session::ComplexityLevel;

/// Per-case gate.
pub const CASE_INTEGRATION_THRESHOLD: f64 = 0.7;

/// Comprehensive-run gates.
pub const RESPONSE_RELEVANCE_THRESHOLD: f64 = 0.85;
pub const OVERALL_RAG_THRESHOLD: f64 = 0.8;

/// Connective phrases that indicate logical flow in a generated answer.
const CONNECTORS: [&str; 5] = ["また", "さらに", "しかし", "そのため", "つまり"];

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DomainArea {
    Technical,
    Business,
    General,
}

/// One fixed end-to-end RAG scenario.
#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct RagIntegrationTestCase {
    pub id: String,
    pub query: String,
    pub context: String,
    pub expected_sources: Vec<String>,
    pub expected_factoids: Vec<String>,
    pub complexity_level: ComplexityLevel,
    pub domain_area: DomainArea,
}

/// The four criteria a generated answer is judged on.
#[derive(Debug, Clone, Default, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct CriterionScores {
    pub source_attribution: f64,
    pub factual_accuracy: f64,
    pub coherence: f64,
    pub relevance: f64,
}

impl CriterionScores {
    pub fn evaluate(case: &RagIntegrationTestCase, hits: &[SearchHit], response: &str) -> Self {
        Self {
            source_attribution: source_attribution(hits, response),
            factual_accuracy: factual_accuracy(case, response),
            coherence: response_coherence(response),
            relevance: response_relevance(case, response),
        }
    }

    pub fn integration_score(&self) -> f64 {
        mean(&[
            self.source_attribution,
            self.factual_accuracy,
            self.coherence,
            self.relevance,
        ])
    }
}

/// How much of the retrieved material is reflected in the answer.
pub fn source_attribution(hits: &[SearchHit], response: &str) -> f64 {
    if hits.is_empty() {
        return 0.0;
    }
    let source_terms: Vec<&str> = hits
        .iter()
        .flat_map(|hit| hit.source.content.split_whitespace())
        .filter(|term| term.chars().count() > 3)
        .collect();
    if source_terms.is_empty() {
        return 0.0;
    }
    let mentioned = source_terms
        .iter()
        .filter(|term| response.contains(**term))
        .count();
    clamp_unit(mentioned as f64 / (source_terms.len() as f64 * 0.3).max(1.0))
}

/// Fraction of expected factoids present in the answer.
pub fn factual_accuracy(case: &RagIntegrationTestCase, response: &str) -> f64 {
    if case.expected_factoids.is_empty() {
        return 1.0;
    }
    let mentioned = case
        .expected_factoids
        .iter()
        .filter(|factoid| response.contains(factoid.as_str()))
        .count();
    mentioned as f64 / case.expected_factoids.len() as f64
}

/// Sentence-length consistency plus connective usage.
pub fn response_coherence(response: &str) -> f64 {
    let sentences: Vec<&str> = response
        .split(['。', '！', '？'])
        .filter(|s| !s.trim().is_empty())
        .collect();
    if sentences.is_empty() {
        return 0.0;
    }

    let lengths: Vec<f64> = sentences.iter().map(|s| s.chars().count() as f64).collect();
    let avg = mean(&lengths);
    let variance = mean_by(&lengths, |len| (len - avg).powi(2));
    let length_score = (1.0 - variance.sqrt() / avg).max(0.0);

    let connector_count = CONNECTORS
        .iter()
        .filter(|connector| response.contains(**connector))
        .count();
    let connector_score = (connector_count as f64 / 2.0).min(1.0);

    (length_score + connector_score) / 2.0
}

/// Fraction of query keywords echoed in the answer.
pub fn response_relevance(case: &RagIntegrationTestCase, response: &str) -> f64 {
    let keywords: Vec<&str> = case
        .query
        .split_whitespace()
        .filter(|word| word.chars().count() > 2)
        .collect();
    if keywords.is_empty() {
        return 0.0;
    }
    let mentioned = keywords
        .iter()
        .filter(|keyword| response.contains(**keyword))
        .count();
    mentioned as f64 / keywords.len() as f64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationCaseResult {
    pub case: RagIntegrationTestCase,
    pub hits: Vec<SearchHit>,
    pub response: String,
    pub criteria: CriterionScores,
    pub integration_score: f64,
    pub success: bool,
}

impl IntegrationCaseResult {
    pub fn completed(
        case: RagIntegrationTestCase,
        hits: Vec<SearchHit>,
        response: String,
    ) -> Self {
        let criteria = CriterionScores::evaluate(&case, &hits, &response);
        let integration_score = criteria.integration_score();
        Self {
            case,
            hits,
            response,
            criteria,
            integration_score,
            success: integration_score > CASE_INTEGRATION_THRESHOLD,
        }
    }

    pub fn failure(case: RagIntegrationTestCase) -> Self {
        Self {
            case,
            hits: Vec::new(),
            response: String::new(),
            criteria: CriterionScores::default(),
            integration_score: 0.0,
            success: false,
        }
    }
}

/// Batch-level integration metrics; means over the successful cases.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationMetrics {
    pub search_accuracy: f64,
    pub response_relevance: f64,
    pub source_attribution: f64,
    pub coherence_score: f64,
    pub factual_accuracy: f64,
}

impl IntegrationMetrics {
    pub fn aggregate(results: &[IntegrationCaseResult]) -> Self {
        let successful: Vec<&IntegrationCaseResult> =
            results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }
        Self {
            search_accuracy: mean_by(&successful, |r| if r.hits.is_empty() { 0.0 } else { 1.0 }),
            response_relevance: mean_by(&successful, |r| r.integration_score),
            source_attribution: mean_by(&successful, |r| r.criteria.source_attribution),
            coherence_score: mean_by(&successful, |r| r.criteria.coherence),
            factual_accuracy: mean_by(&successful, |r| r.criteria.factual_accuracy),
        }
    }
}

/// Batch-level RAG quality breakdown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagQuality {
    pub retrieval_quality: f64,
    pub generation_quality: f64,
    pub augmentation_effectiveness: f64,
    pub overall_rag_score: f64,
}

impl RagQuality {
    pub fn aggregate(results: &[IntegrationCaseResult]) -> Self {
        let successful: Vec<&IntegrationCaseResult> =
            results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }

        let retrieval_quality = mean_by(&successful, |r| {
            if r.hits.is_empty() {
                0.0
            } else {
                mean_by(&r.hits, |hit| hit.score)
            }
        });
        let generation_quality = mean_by(&successful, |r| r.integration_score);
        let augmentation_effectiveness = (retrieval_quality + generation_quality) / 2.0;

        Self {
            retrieval_quality,
            generation_quality,
            augmentation_effectiveness,
            overall_rag_score: retrieval_quality * 0.4
                + generation_quality * 0.4
                + augmentation_effectiveness * 0.2,
        }
    }

    pub fn passes_overall(&self, metrics: &IntegrationMetrics) -> bool {
        metrics.response_relevance > RESPONSE_RELEVANCE_THRESHOLD
            && self.overall_rag_score > OVERALL_RAG_THRESHOLD
    }
}

/// Result of a comprehensive search-integration run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchIntegrationReport {
    pub outcome: TestOutcome,
    pub integration_metrics: Option<IntegrationMetrics>,
    pub rag_quality: Option<RagQuality>,
    pub case_results: Vec<IntegrationCaseResult>,
}

impl SearchIntegrationReport {
    pub fn failed(outcome: TestOutcome, error: impl ToString) -> Self {
        Self {
            outcome: outcome.fail(error),
            integration_metrics: None,
            rag_quality: None,
            case_results: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::search::{DocumentMetadata, DocumentSource};

    fn case_fixture() -> RagIntegrationTestCase {
        RagIntegrationTestCase {
            id: "rag-simple-001".to_string(),
            query: "RAGシステムの主要な構成要素は何ですか？".to_string(),
            context: "ユーザーはRAGシステムの基本的な理解を求めています".to_string(),
            expected_sources: vec!["rag-architecture.md".to_string()],
            expected_factoids: vec![
                "検索エンジン".to_string(),
                "ベクトルデータベース".to_string(),
                "生成AI".to_string(),
            ],
            complexity_level: ComplexityLevel::Simple,
            domain_area: DomainArea::Technical,
        }
    }

    fn hit_with_content(content: &str, score: f64) -> SearchHit {
        SearchHit {
            source: DocumentSource::default()
                .content(content)
                .metadata(DocumentMetadata::default()),
            score,
        }
    }

    #[test]
    fn test_factual_accuracy_counts_mentioned_factoids() {
        let fixture = case_fixture();
        let response = "主要な要素は検索エンジンとベクトルデータベースです。";
        let actual = factual_accuracy(&fixture, response);
        assert!((actual - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_factual_accuracy_without_factoids_is_perfect() {
        let mut fixture = case_fixture();
        fixture.expected_factoids.clear();
        assert_eq!(factual_accuracy(&fixture, "anything"), 1.0);
    }

    #[test]
    fn test_response_relevance_requires_keyword_echo() {
        let mut fixture = case_fixture();
        fixture.query = "vector search with OpenSearch Serverless".to_string();

        let echoing = "We implement vector search with OpenSearch Serverless today.";
        assert_eq!(response_relevance(&fixture, echoing), 1.0);

        let unrelated = "Something else entirely.";
        assert_eq!(response_relevance(&fixture, unrelated), 0.0);
    }

    #[test]
    fn test_source_attribution_zero_without_hits() {
        assert_eq!(source_attribution(&[], "any response"), 0.0);
    }

    #[test]
    fn test_source_attribution_rewards_reuse_of_source_terms() {
        let hits = vec![hit_with_content(
            "vector database stores embeddings for retrieval",
            0.9,
        )];
        let response = "The vector database stores embeddings for retrieval workloads.";
        let actual = source_attribution(&hits, response);
        assert_eq!(actual, 1.0);
    }

    #[test]
    fn test_response_coherence_rewards_connectors() {
        let flat = "短い文です。短い文です。短い文です。";
        let connected = "短い文です。また短い文です。さらに短い文です。";
        assert!(response_coherence(connected) > response_coherence(flat));
    }

    #[test]
    fn test_response_coherence_empty_is_zero() {
        assert_eq!(response_coherence(""), 0.0);
    }

    #[test]
    fn test_all_criteria_stay_in_unit_interval() {
        let fixture = case_fixture();
        let hits = vec![hit_with_content("検索エンジンとベクトルデータベースと生成AI", 0.9)];
        let response = "検索エンジン、ベクトルデータベース、生成AIが主要な構成要素です。";

        let actual = CriterionScores::evaluate(&fixture, &hits, response);
        for score in [
            actual.source_attribution,
            actual.factual_accuracy,
            actual.coherence,
            actual.relevance,
        ] {
            assert!((0.0..=1.0).contains(&score), "score out of range: {score}");
        }
        assert!((0.0..=1.0).contains(&actual.integration_score()));
    }

    #[test]
    fn test_failed_case_has_defined_zero_score() {
        let actual = IntegrationCaseResult::failure(case_fixture());
        assert_eq!(actual.integration_score, 0.0);
        assert_eq!(actual.success, false);
    }

    #[test]
    fn test_rag_quality_weighted_overall() {
        let case = case_fixture();
        let hits = vec![hit_with_content("検索エンジン ベクトルデータベース 生成AI", 0.9)];
        let response =
            "検索エンジン、ベクトルデータベース、生成AIがRAGシステムの主要な構成要素は何ですか？への答えです。";
        let result = IntegrationCaseResult::completed(case, hits, response.to_string());
        assert!(result.success);

        let actual = RagQuality::aggregate(std::slice::from_ref(&result));
        let expected = actual.retrieval_quality * 0.4
            + actual.generation_quality * 0.4
            + actual.augmentation_effectiveness * 0.2;
        assert!((actual.overall_rag_score - expected).abs() < 1e-9);
        assert_eq!(actual.retrieval_quality, 0.9);
    }

    #[test]
    fn test_aggregates_empty_when_all_cases_fail() {
        let results = vec![IntegrationCaseResult::failure(case_fixture())];
        assert_eq!(IntegrationMetrics::aggregate(&results), IntegrationMetrics::default());
        assert_eq!(RagQuality::aggregate(&results), RagQuality::default());
    }
}
