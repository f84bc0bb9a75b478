use serde::{Deserialize, Serialize};
use tracing::info;

use ragprobe_domain::{
    ContextPersistenceReport, PermissionFilteringReport, ProductionConfig, SearchIntegrationReport,
    TestOutcome, VectorSearchReport,
};

use crate::context_persistence::ContextPersistenceTestModule;
use crate::permission_filtering::PermissionFilteringTestModule;
use crate::search_integration::SearchIntegrationTestModule;
use crate::vector_search::VectorSearchTestModule;

const TEST_ID: &str = "rag-integration-comprehensive-001";
const TEST_NAME: &str = "comprehensive RAG integration";
const CATEGORY: &str = "rag-integration";

/// Suite weighting: integration quality carries the most, retrieval next,
/// persistence and access control the remainder.
pub const VECTOR_SEARCH_WEIGHT: f64 = 0.25;
pub const SEARCH_INTEGRATION_WEIGHT: f64 = 0.35;
pub const CONTEXT_PERSISTENCE_WEIGHT: f64 = 0.20;
pub const PERMISSION_FILTERING_WEIGHT: f64 = 0.20;

/// Weighted overall score required for the suite to pass.
pub const OVERALL_TARGET_SCORE: f64 = 0.85;

/// Weighted roll-up of the four module scores.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagTestSummary {
    pub vector_search_score: f64,
    pub search_integration_score: f64,
    pub context_persistence_score: f64,
    pub permission_filtering_score: f64,
    pub overall_rag_score: f64,
}

impl RagTestSummary {
    pub fn from_reports(
        vector_search: &VectorSearchReport,
        search_integration: &SearchIntegrationReport,
        context_persistence: &ContextPersistenceReport,
        permission_filtering: &PermissionFilteringReport,
    ) -> Self {
        let vector_search_score = vector_search
            .search_metrics
            .as_ref()
            .map_or(0.0, |m| m.relevance_score);
        let search_integration_score = search_integration
            .rag_quality
            .as_ref()
            .map_or(0.0, |q| q.overall_rag_score);
        let context_persistence_score = context_persistence
            .context_metrics
            .as_ref()
            .map_or(0.0, |m| m.session_continuity);
        let permission_filtering_score = permission_filtering
            .permission_metrics
            .as_ref()
            .map_or(0.0, |m| m.access_control_accuracy);

        Self {
            vector_search_score,
            search_integration_score,
            context_persistence_score,
            permission_filtering_score,
            overall_rag_score: vector_search_score * VECTOR_SEARCH_WEIGHT
                + search_integration_score * SEARCH_INTEGRATION_WEIGHT
                + context_persistence_score * CONTEXT_PERSISTENCE_WEIGHT
                + permission_filtering_score * PERMISSION_FILTERING_WEIGHT,
        }
    }
}

/// Suite-level result: the weighted summary plus every module report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RagIntegrationReport {
    pub outcome: TestOutcome,
    pub summary: RagTestSummary,
    pub vector_search: VectorSearchReport,
    pub search_integration: SearchIntegrationReport,
    pub context_persistence: ContextPersistenceReport,
    pub permission_filtering: PermissionFilteringReport,
}

/// Runs the four RAG modules in sequence and rolls their verdicts into one
/// weighted suite result.
///
/// Each module's comprehensive method already recovers its own failures, so a
/// broken module surfaces as a zero contribution rather than aborting the
/// suite.
pub struct RagIntegrationTestRunner {
    vector_search: VectorSearchTestModule,
    search_integration: SearchIntegrationTestModule,
    context_persistence: ContextPersistenceTestModule,
    permission_filtering: PermissionFilteringTestModule,
}

impl RagIntegrationTestRunner {
    pub fn new(config: ProductionConfig) -> ragprobe_domain::Result<Self> {
        Ok(Self {
            vector_search: VectorSearchTestModule::new(config.clone())?,
            search_integration: SearchIntegrationTestModule::new(config.clone()),
            context_persistence: ContextPersistenceTestModule::new(config.clone()),
            permission_filtering: PermissionFilteringTestModule::new(config)?,
        })
    }

    /// Never returns an error; the suite result is always complete.
    pub async fn run_comprehensive_rag_tests(&self) -> RagIntegrationReport {
        let outcome = TestOutcome::started(TEST_ID, TEST_NAME, CATEGORY);
        info!("starting comprehensive RAG integration suite");

        info!("1/4: vector search");
        let vector_search = self.vector_search.test_comprehensive_vector_search().await;
        info!(success = vector_search.outcome.success, "vector search finished");

        info!("2/4: search integration");
        let search_integration = self
            .search_integration
            .test_comprehensive_search_integration()
            .await;
        info!(
            success = search_integration.outcome.success,
            "search integration finished"
        );

        info!("3/4: context persistence");
        let context_persistence = self
            .context_persistence
            .test_comprehensive_context_persistence()
            .await;
        info!(
            success = context_persistence.outcome.success,
            "context persistence finished"
        );

        info!("4/4: permission filtering");
        let permission_filtering = self
            .permission_filtering
            .test_comprehensive_permission_filtering()
            .await;
        info!(
            success = permission_filtering.outcome.success,
            "permission filtering finished"
        );

        let summary = RagTestSummary::from_reports(
            &vector_search,
            &search_integration,
            &context_persistence,
            &permission_filtering,
        );
        let success = summary.overall_rag_score >= OVERALL_TARGET_SCORE;
        info!(
            overall_score = summary.overall_rag_score,
            success, "comprehensive RAG integration suite finished"
        );

        RagIntegrationReport {
            outcome: outcome.finish(success),
            summary,
            vector_search,
            search_integration,
            context_persistence,
            permission_filtering,
        }
    }

    pub async fn cleanup(&self) {
        futures::join!(
            self.vector_search.cleanup(),
            self.search_integration.cleanup(),
            self.context_persistence.cleanup(),
            self.permission_filtering.cleanup(),
        );
        info!("RAG integration test runner cleaned up");
    }
}

/// Renders a human-readable Markdown digest of a suite run.
pub fn detailed_report(report: &RagIntegrationReport) -> String {
    let pct = |value: f64| format!("{:.1}%", value * 100.0);
    let verdict = |success: bool| if success { "passed" } else { "failed" };

    let mut out = String::new();
    out.push_str("# RAG integration test report\n\n");
    out.push_str(&format!(
        "- **Run**: {} ({})\n",
        report.outcome.test_id, report.outcome.started_at
    ));
    out.push_str(&format!(
        "- **Overall score**: {} (target {})\n",
        pct(report.summary.overall_rag_score),
        pct(OVERALL_TARGET_SCORE)
    ));
    out.push_str(&format!(
        "- **Verdict**: {}\n\n",
        verdict(report.outcome.success)
    ));

    out.push_str("## Vector search\n\n");
    out.push_str(&format!(
        "- Status: {} ({} ms)\n",
        verdict(report.vector_search.outcome.success),
        report.vector_search.outcome.duration_ms
    ));
    if let Some(metrics) = &report.vector_search.search_metrics {
        out.push_str(&format!(
            "- Response time: {:.0} ms\n- Relevance: {}\n- Precision@5: {}\n- Recall: {}\n",
            metrics.response_time_ms,
            pct(metrics.relevance_score),
            pct(metrics.precision_at5),
            pct(metrics.recall_score)
        ));
    }
    if let Some(quality) = &report.vector_search.quality_metrics {
        out.push_str(&format!(
            "- Semantic accuracy: {}\n- Contextual relevance: {}\n",
            pct(quality.semantic_accuracy),
            pct(quality.contextual_relevance)
        ));
    }

    out.push_str("\n## Search integration\n\n");
    out.push_str(&format!(
        "- Status: {} ({} ms)\n",
        verdict(report.search_integration.outcome.success),
        report.search_integration.outcome.duration_ms
    ));
    if let Some(metrics) = &report.search_integration.integration_metrics {
        out.push_str(&format!(
            "- Search accuracy: {}\n- Response relevance: {}\n- Source attribution: {}\n- Coherence: {}\n",
            pct(metrics.search_accuracy),
            pct(metrics.response_relevance),
            pct(metrics.source_attribution),
            pct(metrics.coherence_score)
        ));
    }
    if let Some(quality) = &report.search_integration.rag_quality {
        out.push_str(&format!(
            "- Retrieval quality: {}\n- Generation quality: {}\n- Augmentation effectiveness: {}\n",
            pct(quality.retrieval_quality),
            pct(quality.generation_quality),
            pct(quality.augmentation_effectiveness)
        ));
    }

    out.push_str("\n## Context persistence\n\n");
    out.push_str(&format!(
        "- Status: {} ({} ms)\n",
        verdict(report.context_persistence.outcome.success),
        report.context_persistence.outcome.duration_ms
    ));
    if let Some(metrics) = &report.context_persistence.context_metrics {
        out.push_str(&format!(
            "- Session continuity: {}\n- Context retention: {}\n- Conversation coherence: {}\n- Memory efficiency: {}\n",
            pct(metrics.session_continuity),
            pct(metrics.context_retention),
            pct(metrics.conversation_coherence),
            pct(metrics.memory_efficiency)
        ));
    }
    if let Some(analysis) = &report.context_persistence.session_analysis {
        out.push_str(&format!(
            "- Average session length: {:.1} messages\n- Context switch accuracy: {}\n",
            analysis.average_session_length,
            pct(analysis.context_switch_accuracy)
        ));
    }

    out.push_str("\n## Permission filtering\n\n");
    out.push_str(&format!(
        "- Status: {} ({} ms)\n",
        verdict(report.permission_filtering.outcome.success),
        report.permission_filtering.outcome.duration_ms
    ));
    if let Some(metrics) = &report.permission_filtering.permission_metrics {
        out.push_str(&format!(
            "- Access control accuracy: {}\n- Unauthorized blocking: {}\n- Authorized access: {}\n",
            pct(metrics.access_control_accuracy),
            pct(metrics.unauthorized_blocking),
            pct(metrics.authorized_access)
        ));
    }
    if let Some(security) = &report.permission_filtering.security_analysis {
        out.push_str(&format!(
            "- Data leakage prevention: {}\n- Privilege escalation prevention: {}\n- Audit trail completeness: {}\n",
            pct(security.data_leakage_prevention),
            pct(security.privilege_escalation_prevention),
            pct(security.audit_trail_completeness)
        ));
    }

    out
}
