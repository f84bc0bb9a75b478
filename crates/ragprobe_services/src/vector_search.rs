use std::time::Instant;

use anyhow::{Context as _, Result};
use aws_sdk_opensearchserverless::Client as OpenSearchClient;
use futures::future::join_all;
use rand::Rng;
use serde_json::json;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use ragprobe_domain::{
    CASE_RELEVANCE_THRESHOLD, CASE_RESPONSE_TIME_MS, DEFAULT_K, DEFAULT_RESULT_SIZE, Difficulty,
    DocumentMetadata, DocumentSource, Error, Language, MAX_QUERY_LENGTH, MOCK_PRECISION_BASE,
    MOCK_PRECISION_VARIANCE, MOCK_RELEVANCE_BASE, MOCK_RELEVANCE_VARIANCE,
    MOCK_RESPONSE_TIME_MAX_MS, MOCK_RESPONSE_TIME_MIN_MS, ProductionConfig, QualityMetrics,
    QueryType, SEARCH_TIMEOUT, SearchCaseMetrics, SearchCaseResult, SearchHit, SearchMetrics,
    SearchResponse, SearchTestCase, TestOutcome, VECTOR_SIZE, VectorSearchReport, clamp_k,
    clamp_result_size, precision_at_5, recall_score, relevance_score,
};

const TEST_ID: &str = "vector-search-comprehensive-001";
const TEST_NAME: &str = "comprehensive vector search";
const CATEGORY: &str = "vector-search";

/// Runs a fixed battery of k-NN queries against an OpenSearch Serverless
/// collection and scores retrieval quality.
///
/// In read-only mode no backend is touched; every case is answered by the
/// mock generator so the harness can run as a smoke test against production
/// credentials without side effects.
pub struct VectorSearchTestModule {
    config: ProductionConfig,
    http: reqwest::Client,
    opensearch: OnceCell<OpenSearchClient>,
    test_cases: Vec<SearchTestCase>,
    collection_endpoint: String,
}

impl VectorSearchTestModule {
    /// Fails fast when `region` or `awsProfile` is missing. The collection
    /// endpoint is resolved here but deliberately not validated; live-mode
    /// cases fail individually when it is absent.
    pub fn new(config: ProductionConfig) -> ragprobe_domain::Result<Self> {
        config.validate()?;

        let collection_endpoint = if config.resources.open_search_collection_endpoint.is_empty() {
            std::env::var("OPENSEARCH_COLLECTION_ENDPOINT").unwrap_or_default()
        } else {
            config.resources.open_search_collection_endpoint.clone()
        };

        Ok(Self {
            config,
            http: reqwest::Client::new(),
            opensearch: OnceCell::new(),
            test_cases: search_test_cases(),
            collection_endpoint,
        })
    }

    async fn client(&self) -> &OpenSearchClient {
        self.opensearch
            .get_or_init(|| async {
                let sdk = crate::aws::load_sdk_config(&self.config).await;
                OpenSearchClient::new(&sdk)
            })
            .await
    }

    /// Executes every test case concurrently and aggregates the verdict.
    ///
    /// Never returns an error: connectivity failures and anything unexpected
    /// are folded into a `Failed` report.
    pub async fn test_comprehensive_vector_search(&self) -> VectorSearchReport {
        let outcome = TestOutcome::started(TEST_ID, TEST_NAME, CATEGORY);
        info!(cases = self.test_cases.len(), "starting comprehensive vector search test");

        if let Err(err) = self.verify_connection().await {
            error!(error = %err, "vector search connectivity check failed");
            return VectorSearchReport::failed(outcome, err);
        }

        let case_results = join_all(
            self.test_cases
                .iter()
                .map(|case| self.execute_search_test(case)),
        )
        .await;

        let search_metrics = SearchMetrics::aggregate(&case_results);
        let quality_metrics = QualityMetrics::aggregate(&case_results);
        let success = search_metrics.passes_overall(&quality_metrics);

        if success {
            info!("comprehensive vector search test passed");
        } else {
            warn!(
                relevance = search_metrics.relevance_score,
                response_time_ms = search_metrics.response_time_ms,
                semantic_accuracy = quality_metrics.semantic_accuracy,
                "comprehensive vector search test failed"
            );
        }

        VectorSearchReport {
            outcome: outcome.finish(success),
            search_metrics: Some(search_metrics),
            quality_metrics: Some(quality_metrics),
            case_results,
            collection_endpoint: self.collection_endpoint.clone(),
        }
    }

    async fn verify_connection(&self) -> Result<()> {
        if self.config.read_only_mode {
            info!("read-only mode: skipping OpenSearch connectivity check");
            return Ok(());
        }

        let response = self
            .client()
            .await
            .list_collections()
            .send()
            .await
            .map_err(|err| Error::ConnectionFailed(err.to_string()))?;
        info!(
            collections = response.collection_summaries().len(),
            "OpenSearch Serverless reachable"
        );
        Ok(())
    }

    /// Runs one case; failures of any kind become a zero-score result so a
    /// bad case never sinks the batch.
    async fn execute_search_test(&self, case: &SearchTestCase) -> SearchCaseResult {
        debug!(case_id = %case.id, "executing search test");
        let started = Instant::now();

        if self.config.read_only_mode {
            return self.mock_search_result(case);
        }

        let hits = match tokio::time::timeout(SEARCH_TIMEOUT, self.perform_vector_search(case))
            .await
        {
            Err(_) => {
                let err = Error::SearchTimeout(SEARCH_TIMEOUT.as_millis() as u64);
                warn!(case_id = %case.id, error = %err, "search test failed");
                return SearchCaseResult::failure(
                    case.clone(),
                    started.elapsed().as_millis() as f64,
                );
            }
            Ok(Err(err)) => {
                warn!(case_id = %case.id, error = %err, "search test failed");
                return SearchCaseResult::failure(
                    case.clone(),
                    started.elapsed().as_millis() as f64,
                );
            }
            Ok(Ok(hits)) => hits,
        };

        let response_time_ms = started.elapsed().as_millis() as f64;
        let metrics = SearchCaseMetrics {
            response_time_ms,
            relevance_score: relevance_score(&hits, case.query_type),
            precision_at5: precision_at_5(&hits, &case.expected_documents),
            recall_score: recall_score(&hits, &case.expected_documents),
            documents_found: hits.len(),
        };
        let success = metrics.relevance_score > CASE_RELEVANCE_THRESHOLD
            && response_time_ms < CASE_RESPONSE_TIME_MS;

        SearchCaseResult {
            case: case.clone(),
            hits,
            metrics,
            success,
        }
    }

    async fn perform_vector_search(&self, case: &SearchTestCase) -> Result<Vec<SearchHit>> {
        if case.query.trim().is_empty() {
            return Err(Error::EmptyQuery.into());
        }
        let len = case.query.chars().count();
        if len > MAX_QUERY_LENGTH {
            return Err(Error::QueryTooLong {
                len,
                max: MAX_QUERY_LENGTH,
            }
            .into());
        }
        if self.collection_endpoint.is_empty() {
            return Err(Error::MissingCollectionEndpoint.into());
        }

        let body = json!({
            "query": {
                "knn": {
                    "vector_field": {
                        "vector": query_vector(),
                        "k": clamp_k(DEFAULT_K),
                    }
                }
            },
            "_source": ["title", "content", "metadata"],
            "size": clamp_result_size(DEFAULT_RESULT_SIZE),
        });
        let url = format!(
            "{}/{}/_search",
            self.collection_endpoint.trim_end_matches('/'),
            self.config.resources.open_search_index
        );

        let response: SearchResponse = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("search request failed")?
            .error_for_status()
            .context("search request rejected")?
            .json()
            .await
            .map_err(|err| Error::InvalidResponse(err.to_string()))?;

        Ok(response.hits.hits)
    }

    /// Synthesises a plausible result from the case's own expectations.
    /// Bounds keep mocked cases above the per-case thresholds, so read-only
    /// runs exercise the aggregation path end to end.
    fn mock_search_result(&self, case: &SearchTestCase) -> SearchCaseResult {
        let mut rng = rand::rng();
        let response_time_ms =
            rng.random_range(MOCK_RESPONSE_TIME_MIN_MS..MOCK_RESPONSE_TIME_MAX_MS);

        let hits: Vec<SearchHit> = case
            .expected_documents
            .iter()
            .enumerate()
            .map(|(index, doc)| SearchHit {
                source: DocumentSource {
                    title: doc.trim_end_matches(".md").replace('-', " "),
                    content: format!("{}に関連する内容です。", case.query),
                    metadata: DocumentMetadata {
                        category: case.query_type.to_string(),
                        language: case.language.to_string(),
                        document: Some(doc.clone()),
                    },
                },
                score: 0.9 - index as f64 * 0.1,
            })
            .collect();

        let metrics = SearchCaseMetrics {
            response_time_ms,
            relevance_score: MOCK_RELEVANCE_BASE + rng.random_range(0.0..MOCK_RELEVANCE_VARIANCE),
            precision_at5: MOCK_PRECISION_BASE + rng.random_range(0.0..MOCK_PRECISION_VARIANCE),
            recall_score: recall_score(&hits, &case.expected_documents),
            documents_found: hits.len(),
        };
        let success = metrics.relevance_score > CASE_RELEVANCE_THRESHOLD
            && response_time_ms < CASE_RESPONSE_TIME_MS;

        SearchCaseResult {
            case: case.clone(),
            hits,
            metrics,
            success,
        }
    }

    /// Stateless module; nothing to release.
    pub async fn cleanup(&self) {
        info!("vector search test module cleaned up");
    }
}

// TODO: generate real query embeddings through the Bedrock embedding model
// once the indexing pipeline exposes its endpoint to the harness.
fn query_vector() -> Vec<f64> {
    let mut rng = rand::rng();
    (0..VECTOR_SIZE).map(|_| rng.random_range(-0.5..0.5)).collect()
}

fn search_test_cases() -> Vec<SearchTestCase> {
    vec![
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
        },
        SearchTestCase {
            id: "search-technical-001".to_string(),
            query: "Amazon FSx for NetApp ONTAPの性能特性について".to_string(),
            query_type: QueryType::Technical,
            expected_documents: vec![
                "fsx-performance.md".to_string(),
                "ontap-features.md".to_string(),
            ],
            language: Language::Ja,
            difficulty: Difficulty::Intermediate,
        },
        SearchTestCase {
            id: "search-conceptual-001".to_string(),
            query: "権限認識型RAGシステムにおけるセキュリティ設計の考慮事項".to_string(),
            query_type: QueryType::Conceptual,
            expected_documents: vec![
                "security-design.md".to_string(),
                "permission-model.md".to_string(),
            ],
            language: Language::Ja,
            difficulty: Difficulty::Advanced,
        },
        SearchTestCase {
            id: "search-conversational-001".to_string(),
            query: "チャットボットの応答が遅い場合の対処法を教えてください".to_string(),
            query_type: QueryType::Conversational,
            expected_documents: vec![
                "troubleshooting.md".to_string(),
                "performance-tuning.md".to_string(),
            ],
            language: Language::Ja,
            difficulty: Difficulty::Intermediate,
        },
        SearchTestCase {
            id: "search-english-001".to_string(),
            query: "How to implement vector search with OpenSearch Serverless?".to_string(),
            query_type: QueryType::Technical,
            expected_documents: vec![
                "opensearch-implementation.md".to_string(),
                "vector-search-guide.md".to_string(),
            ],
            language: Language::En,
            difficulty: Difficulty::Advanced,
        },
        SearchTestCase {
            id: "search-mixed-001".to_string(),
            query: "Amazon Bedrockを使用したRAG implementation in Japanese enterprise environment"
                .to_string(),
            query_type: QueryType::Technical,
            expected_documents: vec![
                "bedrock-integration.md".to_string(),
                "enterprise-deployment.md".to_string(),
            ],
            language: Language::Mixed,
            difficulty: Difficulty::Advanced,
        },
    ]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use ragprobe_domain::TestExecutionStatus;

    use super::*;

    fn read_only_config() -> ProductionConfig {
        ProductionConfig::new("ap-northeast-1", "prod-readonly")
    }

    #[test]
    fn test_new_rejects_incomplete_config() {
        let actual = VectorSearchTestModule::new(ProductionConfig::new("", ""));
        assert!(actual.is_err());
    }

    #[test]
    fn test_battery_spans_all_query_types() {
        let cases = search_test_cases();
        assert_eq!(cases.len(), 6);

        let types: std::collections::BTreeSet<QueryType> =
            cases.iter().map(|c| c.query_type).collect();
        assert_eq!(types.len(), QueryType::COUNT);
    }

    #[test]
    fn test_query_vector_dimension() {
        let actual = query_vector();
        assert_eq!(actual.len(), VECTOR_SIZE);
        assert!(actual.iter().all(|v| (-0.5..0.5).contains(v)));
    }

    #[tokio::test]
    async fn test_mock_result_for_factual_case() {
        let module = VectorSearchTestModule::new(read_only_config()).unwrap();
        let case = search_test_cases().into_iter().next().unwrap();

        let actual = module.execute_search_test(&case).await;

        assert_eq!(actual.hits.len(), 2);
        assert!(actual.metrics.relevance_score >= MOCK_RELEVANCE_BASE);
        assert!(actual.metrics.relevance_score <= MOCK_RELEVANCE_BASE + MOCK_RELEVANCE_VARIANCE);
        assert!(actual.metrics.response_time_ms < CASE_RESPONSE_TIME_MS);
        assert_eq!(actual.success, true);
        // The mock echoes every expected document back.
        assert_eq!(actual.metrics.recall_score, 1.0);
    }

    #[tokio::test]
    async fn test_comprehensive_read_only_run_passes() {
        let module = VectorSearchTestModule::new(read_only_config()).unwrap();

        let actual = module.test_comprehensive_vector_search().await;

        assert_eq!(actual.outcome.status, TestExecutionStatus::Completed);
        assert_eq!(actual.outcome.success, true);
        assert_eq!(actual.case_results.len(), 6);

        let metrics = actual.search_metrics.unwrap();
        assert!(metrics.response_time_ms >= MOCK_RESPONSE_TIME_MIN_MS);
        assert!(metrics.response_time_ms <= MOCK_RESPONSE_TIME_MAX_MS);
        assert!(metrics.relevance_score > 0.8);

        let quality = actual.quality_metrics.unwrap();
        assert_eq!(quality.semantic_accuracy, 1.0);
        assert_eq!(quality.diversity_score, 1.0);
    }

    #[tokio::test]
    async fn test_read_only_mode_never_builds_a_client() {
        let module = VectorSearchTestModule::new(read_only_config()).unwrap();
        module.test_comprehensive_vector_search().await;

        assert!(module.opensearch.get().is_none());
    }

    #[tokio::test]
    async fn test_live_validation_rejects_empty_query() {
        let config = read_only_config().read_only_mode(false);
        let module = VectorSearchTestModule::new(config).unwrap();
        let case = SearchTestCase {
            query: "   ".to_string(),
            ..search_test_cases().into_iter().next().unwrap()
        };

        let actual = module.perform_vector_search(&case).await;
        assert!(actual.unwrap_err().to_string().contains("empty"));
    }

    #[tokio::test]
    async fn test_live_validation_rejects_oversized_query() {
        let config = read_only_config().read_only_mode(false);
        let module = VectorSearchTestModule::new(config).unwrap();
        let case = SearchTestCase {
            query: "あ".repeat(MAX_QUERY_LENGTH + 1),
            ..search_test_cases().into_iter().next().unwrap()
        };

        let actual = module.perform_vector_search(&case).await;
        assert!(actual.unwrap_err().to_string().contains("exceeds"));
    }

    #[tokio::test]
    async fn test_failed_live_case_still_produces_result() {
        // Live mode with no endpoint configured: the case fails but the batch
        // entry survives with defined scores.
        let config = read_only_config().read_only_mode(false);
        let module = VectorSearchTestModule::new(config).unwrap();
        let case = search_test_cases().into_iter().next().unwrap();

        let actual = module.execute_search_test(&case).await;
        assert_eq!(actual.success, false);
        assert_eq!(actual.metrics.relevance_score, 0.0);
        assert!(actual.metrics.relevance_score.is_finite());
    }
}
