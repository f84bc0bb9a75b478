use chrono::{DateTime, Utc};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::outcome::TestOutcome;
use crate::scoring::mean_by;

/// Per-case gates.
pub const ACCESS_VALIDATION_THRESHOLD: f64 = 0.9;
pub const SECURITY_VALIDATION_THRESHOLD: f64 = 0.95;

/// Comprehensive-run gates.
pub const ACCESS_CONTROL_ACCURACY_THRESHOLD: f64 = 0.95;
pub const DATA_LEAKAGE_PREVENTION_THRESHOLD: f64 = 0.98;

/// Security score penalties.
pub const DATA_LEAKAGE_PENALTY: f64 = 0.5;
pub const PRIVILEGE_ESCALATION_PENALTY: f64 = 0.3;
pub const AUDIT_LOG_PENALTY: f64 = 0.2;

/// Baseline until audit-trail verification is wired to real log storage.
pub const AUDIT_TRAIL_BASELINE: f64 = 0.95;

/// Longest query fragment recorded in the audit trail.
pub const MAX_QUERY_LOG_LENGTH: usize = 100;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Employee,
    Guest,
}

/// Document classifications in ascending order of sensitivity; the derived
/// ordering is what the access check compares.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AccessLevel {
    Public,
    Internal,
    Confidential,
    Restricted,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PermissionTestType {
    Positive,
    Negative,
    Boundary,
}

#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct UserPermission {
    pub user_id: String,
    pub role: Role,
    pub department: String,
    pub access_level: AccessLevel,
    pub document_categories: Vec<String>,
    pub special_permissions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct DocumentPermission {
    pub document_id: String,
    pub title: String,
    pub category: String,
    pub classification: AccessLevel,
    pub required_roles: Vec<Role>,
    pub required_departments: Vec<String>,
    pub special_requirements: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct PermissionTestCase {
    pub id: String,
    pub scenario: String,
    pub user: UserPermission,
    pub query: String,
    pub expected_accessible_docs: Vec<String>,
    pub expected_blocked_docs: Vec<String>,
    pub test_type: PermissionTestType,
}

/// Verdict of a single user-document check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessDecision {
    pub allowed: bool,
    pub reason: String,
}

/// Evaluates the five-stage access policy: role, department, classification,
/// special permissions, category.
pub fn check_document_access(user: &UserPermission, doc: &DocumentPermission) -> AccessDecision {
    if !doc.required_roles.contains(&user.role) {
        return AccessDecision {
            allowed: false,
            reason: format!(
                "role mismatch: required one of [{}], user has {}",
                join_roles(&doc.required_roles),
                user.role
            ),
        };
    }

    if !doc.required_departments.iter().any(|d| d == "all")
        && !doc.required_departments.contains(&user.department)
    {
        return AccessDecision {
            allowed: false,
            reason: format!(
                "department mismatch: required one of [{}], user is in {}",
                doc.required_departments.join(", "),
                user.department
            ),
        };
    }

    if user.access_level < doc.classification {
        return AccessDecision {
            allowed: false,
            reason: format!(
                "insufficient access level: document is {}, user holds {}",
                doc.classification, user.access_level
            ),
        };
    }

    if !doc
        .special_requirements
        .iter()
        .all(|req| user.special_permissions.contains(req))
    {
        return AccessDecision {
            allowed: false,
            reason: format!(
                "missing special permission: required [{}]",
                doc.special_requirements.join(", ")
            ),
        };
    }

    if !user.document_categories.iter().any(|c| c == "all")
        && !user.document_categories.contains(&doc.category)
    {
        return AccessDecision {
            allowed: false,
            reason: format!(
                "category mismatch: allowed [{}], document is {}",
                user.document_categories.join(", "),
                doc.category
            ),
        };
    }

    AccessDecision {
        allowed: true,
        reason: "access granted".to_string(),
    }
}

fn join_roles(roles: &[Role]) -> String {
    roles
        .iter()
        .map(|r| r.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// One audit-trail entry per access check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub user_id: String,
    pub user_role: Role,
    pub user_department: String,
    pub document_id: String,
    pub document_classification: AccessLevel,
    pub result: String,
    pub reason: String,
    pub query: String,
}

impl AuditRecord {
    pub fn new(
        user: &UserPermission,
        doc: &DocumentPermission,
        decision: &AccessDecision,
        query: &str,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            user_id: user.user_id.clone(),
            user_role: user.role,
            user_department: user.department.clone(),
            document_id: doc.document_id.clone(),
            document_classification: doc.classification,
            result: if decision.allowed { "granted" } else { "denied" }.to_string(),
            reason: decision.reason.clone(),
            // Only a fragment of the query is logged.
            query: query.chars().take(MAX_QUERY_LOG_LENGTH).collect(),
        }
    }
}

/// Result of filtering the document set for one user.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterResult {
    pub accessible_docs: Vec<String>,
    pub blocked_docs: Vec<String>,
    pub audit_log: Vec<AuditRecord>,
}

/// Classification accuracy of a filter run against expectations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessValidation {
    pub accuracy: f64,
    pub correctly_allowed: usize,
    pub correctly_blocked: usize,
    pub incorrectly_allowed: usize,
    pub incorrectly_blocked: usize,
}

impl AccessValidation {
    pub fn evaluate(
        expected_accessible: &[String],
        expected_blocked: &[String],
        actual: &FilterResult,
    ) -> Self {
        let correctly_allowed = expected_accessible
            .iter()
            .filter(|doc| actual.accessible_docs.contains(doc))
            .count();
        let correctly_blocked = expected_blocked
            .iter()
            .filter(|doc| actual.blocked_docs.contains(doc))
            .count();
        let incorrectly_allowed = expected_blocked
            .iter()
            .filter(|doc| actual.accessible_docs.contains(doc))
            .count();
        let incorrectly_blocked = expected_accessible
            .iter()
            .filter(|doc| actual.blocked_docs.contains(doc))
            .count();

        let total_expected = expected_accessible.len() + expected_blocked.len();
        let accuracy = if total_expected == 0 {
            1.0
        } else {
            (correctly_allowed + correctly_blocked) as f64 / total_expected as f64
        };

        Self {
            accuracy,
            correctly_allowed,
            correctly_blocked,
            incorrectly_allowed,
            incorrectly_blocked,
        }
    }

    /// True when the filter leaked a document that had to stay blocked.
    pub fn security_risk(&self) -> bool {
        self.incorrectly_allowed > 0
    }
}

/// Penalty-based security score for a filter run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityValidation {
    pub score: f64,
    pub violations: Vec<String>,
}

impl SecurityValidation {
    pub fn evaluate(case: &PermissionTestCase, actual: &FilterResult) -> Self {
        let mut violations = Vec::new();
        let mut score = 1.0;

        let leaked: Vec<&String> = case
            .expected_blocked_docs
            .iter()
            .filter(|doc| actual.accessible_docs.contains(doc))
            .collect();
        if !leaked.is_empty() {
            violations.push(format!(
                "unauthorized access detected: {}",
                leaked
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            ));
            score -= DATA_LEAKAGE_PENALTY;
        }

        if case.test_type == PermissionTestType::Negative
            && actual.accessible_docs.len() > case.expected_accessible_docs.len()
        {
            violations.push("possible privilege escalation".to_string());
            score -= PRIVILEGE_ESCALATION_PENALTY;
        }

        if actual.audit_log.is_empty() {
            violations.push("audit trail missing".to_string());
            score -= AUDIT_LOG_PENALTY;
        }

        Self {
            score: score.max(0.0),
            violations,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionCaseResult {
    pub case: PermissionTestCase,
    pub accessible_docs: Vec<String>,
    pub blocked_docs: Vec<String>,
    pub permission_score: f64,
    pub security_score: f64,
    pub success: bool,
}

impl PermissionCaseResult {
    pub fn completed(case: PermissionTestCase, filter: FilterResult) -> Self {
        let access = AccessValidation::evaluate(
            &case.expected_accessible_docs,
            &case.expected_blocked_docs,
            &filter,
        );
        let security = SecurityValidation::evaluate(&case, &filter);
        Self {
            case,
            accessible_docs: filter.accessible_docs,
            blocked_docs: filter.blocked_docs,
            permission_score: access.accuracy,
            security_score: security.score,
            success: access.accuracy > ACCESS_VALIDATION_THRESHOLD
                && security.score > SECURITY_VALIDATION_THRESHOLD,
        }
    }

    pub fn failure(case: PermissionTestCase) -> Self {
        Self {
            case,
            accessible_docs: Vec::new(),
            blocked_docs: Vec::new(),
            permission_score: 0.0,
            security_score: 0.0,
            success: false,
        }
    }
}

/// Batch-level access-control metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionMetrics {
    pub access_control_accuracy: f64,
    pub unauthorized_blocking: f64,
    pub authorized_access: f64,
    pub role_based_filtering: f64,
}

impl PermissionMetrics {
    pub fn aggregate(results: &[PermissionCaseResult]) -> Self {
        let successful: Vec<&PermissionCaseResult> =
            results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }

        let success_rate = |test_type: PermissionTestType| {
            let subset: Vec<&PermissionCaseResult> = results
                .iter()
                .filter(|r| r.case.test_type == test_type)
                .collect();
            if subset.is_empty() {
                1.0
            } else {
                subset.iter().filter(|r| r.success).count() as f64 / subset.len() as f64
            }
        };

        Self {
            access_control_accuracy: mean_by(&successful, |r| r.permission_score),
            unauthorized_blocking: success_rate(PermissionTestType::Negative),
            authorized_access: success_rate(PermissionTestType::Positive),
            role_based_filtering: mean_by(&successful, |r| r.security_score),
        }
    }

    pub fn passes_overall(&self, security: &SecurityAnalysis) -> bool {
        self.access_control_accuracy > ACCESS_CONTROL_ACCURACY_THRESHOLD
            && security.data_leakage_prevention > DATA_LEAKAGE_PREVENTION_THRESHOLD
    }
}

/// Batch-level security analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityAnalysis {
    pub data_leakage_prevention: f64,
    pub privilege_escalation_prevention: f64,
    pub audit_trail_completeness: f64,
    pub compliance_score: f64,
}

impl SecurityAnalysis {
    pub fn aggregate(results: &[PermissionCaseResult]) -> Self {
        if !results.iter().any(|r| r.success) {
            return Self::default();
        }

        let leakage_tests: Vec<&PermissionCaseResult> = results
            .iter()
            .filter(|r| {
                matches!(
                    r.case.test_type,
                    PermissionTestType::Negative | PermissionTestType::Boundary
                )
            })
            .collect();
        let data_leakage_prevention = if leakage_tests.is_empty() {
            1.0
        } else {
            leakage_tests
                .iter()
                .filter(|r| r.security_score > SECURITY_VALIDATION_THRESHOLD)
                .count() as f64
                / leakage_tests.len() as f64
        };

        let escalation_tests: Vec<&PermissionCaseResult> = results
            .iter()
            .filter(|r| r.case.id.contains("escalation"))
            .collect();
        let privilege_escalation_prevention = if escalation_tests.is_empty() {
            1.0
        } else {
            escalation_tests.iter().filter(|r| r.success).count() as f64
                / escalation_tests.len() as f64
        };

        let audit_trail_completeness = AUDIT_TRAIL_BASELINE;

        Self {
            data_leakage_prevention,
            privilege_escalation_prevention,
            audit_trail_completeness,
            compliance_score: (data_leakage_prevention
                + privilege_escalation_prevention
                + audit_trail_completeness)
                / 3.0,
        }
    }
}

/// Result of a comprehensive permission-filtering run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionFilteringReport {
    pub outcome: TestOutcome,
    pub permission_metrics: Option<PermissionMetrics>,
    pub security_analysis: Option<SecurityAnalysis>,
    pub case_results: Vec<PermissionCaseResult>,
}

impl PermissionFilteringReport {
    pub fn failed(outcome: TestOutcome, error: impl ToString) -> Self {
        Self {
            outcome: outcome.fail(error),
            permission_metrics: None,
            security_analysis: None,
            case_results: Vec::new(),
        }
    }
}
