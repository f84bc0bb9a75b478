use futures::future::join_all;
use tracing::{debug, info, warn};

use ragprobe_domain::{
    AccessDecision, AccessLevel, AuditRecord, DocumentPermission, Error, FilterResult,
    PermissionCaseResult, PermissionFilteringReport, PermissionMetrics, PermissionTestCase,
    PermissionTestType, ProductionConfig, Role, SecurityAnalysis, TestOutcome, UserPermission,
    check_document_access,
};

const TEST_ID: &str = "permission-filtering-comprehensive-001";
const TEST_NAME: &str = "comprehensive permission filtering";
const CATEGORY: &str = "permission-filtering";

/// Verifies that document access control classifies a fixed user/document
/// matrix exactly as the policy demands, and that misclassification is
/// penalised as a security finding.
///
/// The checks are evaluated in memory against the same policy the retrieval
/// layer enforces, so the module needs no backend and runs identically in
/// read-only and live mode.
pub struct PermissionFilteringTestModule {
    test_users: Vec<UserPermission>,
    test_documents: Vec<DocumentPermission>,
    test_cases: Vec<PermissionTestCase>,
}

impl PermissionFilteringTestModule {
    /// Fails fast when `region` or `awsProfile` is missing, matching the
    /// other modules' construction contract.
    pub fn new(config: ProductionConfig) -> ragprobe_domain::Result<Self> {
        config.validate()?;

        let test_users = test_users();
        let test_documents = test_documents();
        let test_cases = permission_test_cases(&test_users);
        Ok(Self {
            test_users,
            test_documents,
            test_cases,
        })
    }

    /// Executes every test case concurrently and aggregates the verdict.
    /// Never returns an error.
    pub async fn test_comprehensive_permission_filtering(&self) -> PermissionFilteringReport {
        let outcome = TestOutcome::started(TEST_ID, TEST_NAME, CATEGORY);
        info!(
            cases = self.test_cases.len(),
            users = self.test_users.len(),
            documents = self.test_documents.len(),
            "starting comprehensive permission filtering test"
        );

        let case_results = join_all(
            self.test_cases
                .iter()
                .map(|case| self.execute_permission_test(case)),
        )
        .await;

        let permission_metrics = PermissionMetrics::aggregate(&case_results);
        let security_analysis = SecurityAnalysis::aggregate(&case_results);
        let success = permission_metrics.passes_overall(&security_analysis);

        if success {
            info!("comprehensive permission filtering test passed");
        } else {
            warn!(
                access_control_accuracy = permission_metrics.access_control_accuracy,
                data_leakage_prevention = security_analysis.data_leakage_prevention,
                "comprehensive permission filtering test failed"
            );
        }

        PermissionFilteringReport {
            outcome: outcome.finish(success),
            permission_metrics: Some(permission_metrics),
            security_analysis: Some(security_analysis),
            case_results,
        }
    }

    async fn execute_permission_test(&self, case: &PermissionTestCase) -> PermissionCaseResult {
        debug!(case_id = %case.id, scenario = %case.scenario, "executing permission test");
        match self.apply_permission_filter(&case.user, &case.query) {
            Ok(filter) => PermissionCaseResult::completed(case.clone(), filter),
            Err(err) => {
                warn!(case_id = %case.id, error = %err, "permission test failed");
                PermissionCaseResult::failure(case.clone())
            }
        }
    }

    /// Runs every test document through the access policy for one user,
    /// recording an audit entry per decision.
    fn apply_permission_filter(
        &self,
        user: &UserPermission,
        query: &str,
    ) -> ragprobe_domain::Result<FilterResult> {
        if query.trim().is_empty() {
            return Err(Error::EmptyQuery);
        }

        let mut filter = FilterResult::default();
        for doc in &self.test_documents {
            let decision: AccessDecision = check_document_access(user, doc);
            filter
                .audit_log
                .push(AuditRecord::new(user, doc, &decision, query));
            if decision.allowed {
                filter.accessible_docs.push(doc.document_id.clone());
            } else {
                filter.blocked_docs.push(doc.document_id.clone());
            }
        }
        Ok(filter)
    }

    /// Stateless module; nothing to release.
    pub async fn cleanup(&self) {
        info!("permission filtering test module cleaned up");
    }
}

fn test_users() -> Vec<UserPermission> {
    vec![
        UserPermission {
            user_id: "admin-001".to_string(),
            role: Role::Admin,
            department: "IT".to_string(),
            access_level: AccessLevel::Restricted,
            document_categories: vec!["all".to_string()],
            special_permissions: vec!["system-config".to_string(), "user-management".to_string()],
        },
        UserPermission {
            user_id: "manager-001".to_string(),
            role: Role::Manager,
            department: "Engineering".to_string(),
            access_level: AccessLevel::Confidential,
            document_categories: vec![
                "technical".to_string(),
                "business".to_string(),
                "internal".to_string(),
            ],
            special_permissions: vec!["team-management".to_string()],
        },
        UserPermission {
            user_id: "employee-001".to_string(),
            role: Role::Employee,
            department: "Engineering".to_string(),
            access_level: AccessLevel::Internal,
            document_categories: vec!["technical".to_string(), "general".to_string()],
            special_permissions: Vec::new(),
        },
        UserPermission {
            user_id: "employee-002".to_string(),
            role: Role::Employee,
            department: "Sales".to_string(),
            access_level: AccessLevel::Internal,
            document_categories: vec!["business".to_string(), "general".to_string()],
            special_permissions: Vec::new(),
        },
        UserPermission {
            user_id: "guest-001".to_string(),
            role: Role::Guest,
            department: "External".to_string(),
            access_level: AccessLevel::Public,
            document_categories: vec!["public".to_string()],
            special_permissions: Vec::new(),
        },
    ]
}

fn test_documents() -> Vec<DocumentPermission> {
    vec![
        DocumentPermission {
            document_id: "doc-public-001".to_string(),
            title: "RAGシステム概要".to_string(),
            category: "general".to_string(),
            classification: AccessLevel::Public,
            required_roles: vec![Role::Admin, Role::Manager, Role::Employee, Role::Guest],
            required_departments: vec!["all".to_string()],
            special_requirements: Vec::new(),
        },
        DocumentPermission {
            document_id: "doc-internal-001".to_string(),
            title: "システム運用マニュアル".to_string(),
            category: "technical".to_string(),
            classification: AccessLevel::Internal,
            required_roles: vec![Role::Admin, Role::Manager, Role::Employee],
            required_departments: vec!["IT".to_string(), "Engineering".to_string()],
            special_requirements: Vec::new(),
        },
        DocumentPermission {
            document_id: "doc-confidential-001".to_string(),
            title: "セキュリティ設計書".to_string(),
            category: "technical".to_string(),
            classification: AccessLevel::Confidential,
            required_roles: vec![Role::Admin, Role::Manager],
            required_departments: vec!["IT".to_string(), "Engineering".to_string()],
            special_requirements: Vec::new(),
        },
        DocumentPermission {
            document_id: "doc-restricted-001".to_string(),
            title: "システム管理者マニュアル".to_string(),
            category: "technical".to_string(),
            classification: AccessLevel::Restricted,
            required_roles: vec![Role::Admin],
            required_departments: vec!["IT".to_string()],
            special_requirements: vec!["system-config".to_string()],
        },
        DocumentPermission {
            document_id: "doc-dept-001".to_string(),
            title: "営業戦略資料".to_string(),
            category: "business".to_string(),
            classification: AccessLevel::Internal,
            required_roles: vec![Role::Admin, Role::Manager, Role::Employee],
            required_departments: vec!["Sales".to_string(), "Marketing".to_string()],
            special_requirements: Vec::new(),
        },
    ]
}

fn permission_test_cases(users: &[UserPermission]) -> Vec<PermissionTestCase> {
    let docs = |ids: &[&str]| ids.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    vec![
        PermissionTestCase {
            id: "perm-admin-001".to_string(),
            scenario: "管理者による全文書アクセス".to_string(),
            user: users[0].clone(),
            query: "システム管理について教えてください".to_string(),
            expected_accessible_docs: docs(&[
                "doc-public-001",
                "doc-internal-001",
                "doc-confidential-001",
                "doc-restricted-001",
            ]),
            expected_blocked_docs: Vec::new(),
            test_type: PermissionTestType::Positive,
        },
        PermissionTestCase {
            id: "perm-manager-001".to_string(),
            scenario: "エンジニアリングマネージャーによる技術文書アクセス".to_string(),
            user: users[1].clone(),
            query: "システム設計について教えてください".to_string(),
            expected_accessible_docs: docs(&[
                "doc-public-001",
                "doc-internal-001",
                "doc-confidential-001",
            ]),
            expected_blocked_docs: docs(&["doc-restricted-001", "doc-dept-001"]),
            test_type: PermissionTestType::Positive,
        },
        PermissionTestCase {
            id: "perm-employee-001".to_string(),
            scenario: "エンジニアリング従業員による技術文書アクセス".to_string(),
            user: users[2].clone(),
            query: "システム運用について教えてください".to_string(),
            expected_accessible_docs: docs(&["doc-public-001", "doc-internal-001"]),
            expected_blocked_docs: docs(&[
                "doc-confidential-001",
                "doc-restricted-001",
                "doc-dept-001",
            ]),
            test_type: PermissionTestType::Positive,
        },
        PermissionTestCase {
            id: "perm-employee-cross-dept-001".to_string(),
            scenario: "営業部従業員による技術文書アクセス試行".to_string(),
            user: users[3].clone(),
            query: "システム運用について教えてください".to_string(),
            expected_accessible_docs: docs(&["doc-public-001"]),
            expected_blocked_docs: docs(&[
                "doc-internal-001",
                "doc-confidential-001",
                "doc-restricted-001",
            ]),
            test_type: PermissionTestType::Negative,
        },
        PermissionTestCase {
            id: "perm-guest-001".to_string(),
            scenario: "ゲストユーザーによるパブリック文書のみアクセス".to_string(),
            user: users[4].clone(),
            query: "RAGシステムについて教えてください".to_string(),
            expected_accessible_docs: docs(&["doc-public-001"]),
            expected_blocked_docs: docs(&[
                "doc-internal-001",
                "doc-confidential-001",
                "doc-restricted-001",
                "doc-dept-001",
            ]),
            test_type: PermissionTestType::Boundary,
        },
        PermissionTestCase {
            id: "perm-escalation-001".to_string(),
            scenario: "一般従業員による管理者文書アクセス試行".to_string(),
            user: users[2].clone(),
            query: "システム管理者の設定について教えてください".to_string(),
            expected_accessible_docs: docs(&["doc-public-001"]),
            expected_blocked_docs: docs(&["doc-restricted-001"]),
            test_type: PermissionTestType::Negative,
        },
    ]
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn module() -> PermissionFilteringTestModule {
        PermissionFilteringTestModule::new(ProductionConfig::new("ap-northeast-1", "prod-readonly"))
            .unwrap()
    }

    fn approx(actual: f64, expected: f64) -> bool {
        (actual - expected).abs() < 1e-9
    }

    #[test]
    fn test_new_rejects_incomplete_config() {
        let actual = PermissionFilteringTestModule::new(ProductionConfig::new("", ""));
        assert!(actual.is_err());
    }

    #[test]
    fn test_admin_sees_everything_but_sales_material() {
        let fixture = module();
        let admin = &fixture.test_users[0];

        let actual = fixture
            .apply_permission_filter(admin, "システム管理について")
            .unwrap();

        assert_eq!(
            actual.accessible_docs,
            vec![
                "doc-public-001",
                "doc-internal-001",
                "doc-confidential-001",
                "doc-restricted-001"
            ]
        );
        assert_eq!(actual.blocked_docs, vec!["doc-dept-001"]);
        assert_eq!(actual.audit_log.len(), 5);
    }

    #[test]
    fn test_guest_is_blocked_by_category_even_on_public_documents() {
        let fixture = module();
        let guest = &fixture.test_users[4];

        let actual = fixture
            .apply_permission_filter(guest, "RAGシステムについて")
            .unwrap();

        // The public document carries the "general" category, which the
        // guest's "public"-only category list does not include.
        assert!(actual.accessible_docs.is_empty());
        assert_eq!(actual.blocked_docs.len(), 5);
    }

    #[test]
    fn test_empty_query_is_rejected() {
        let fixture = module();
        let actual = fixture.apply_permission_filter(&fixture.test_users[0], "   ");
        assert!(actual.is_err());
    }

    #[tokio::test]
    async fn test_case_verdicts_are_deterministic() {
        let fixture = module();
        let actual = fixture.test_comprehensive_permission_filtering().await;

        let verdicts: Vec<(&str, bool)> = actual
            .case_results
            .iter()
            .map(|r| (r.case.id.as_str(), r.success))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                ("perm-admin-001", true),
                // The manager misses the public document on category grounds.
                ("perm-manager-001", false),
                ("perm-employee-001", true),
                // Sales staff legitimately reach doc-dept-001, which the
                // expectations never listed; flagged as escalation.
                ("perm-employee-cross-dept-001", false),
                ("perm-guest-001", false),
                ("perm-escalation-001", false),
            ]
        );
    }

    #[tokio::test]
    async fn test_comprehensive_metrics() {
        let fixture = module();
        let actual = fixture.test_comprehensive_permission_filtering().await;

        let metrics = actual.permission_metrics.unwrap();
        assert!(approx(metrics.access_control_accuracy, 1.0));
        assert!(approx(metrics.unauthorized_blocking, 0.0));
        assert!(approx(metrics.authorized_access, 2.0 / 3.0));
        assert!(approx(metrics.role_based_filtering, 1.0));

        let security = actual.security_analysis.unwrap();
        assert!(approx(security.data_leakage_prevention, 1.0 / 3.0));
        assert!(approx(security.privilege_escalation_prevention, 0.0));
        assert!(approx(security.audit_trail_completeness, 0.95));

        // Accuracy clears its gate but leakage prevention does not.
        assert_eq!(actual.outcome.success, false);
    }

    #[tokio::test]
    async fn test_failed_case_never_shrinks_the_batch() {
        let fixture = module();
        let actual = fixture.test_comprehensive_permission_filtering().await;

        assert_eq!(actual.case_results.len(), fixture.test_cases.len());
        for result in &actual.case_results {
            assert!(result.permission_score.is_finite());
            assert!((0.0..=1.0).contains(&result.permission_score));
        }
    }
}
