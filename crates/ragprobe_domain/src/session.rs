use std::collections::HashMap;

use chrono::{DateTime, Utc};
use derive_setters::Setters;
use serde::{Deserialize, Serialize};

use crate::outcome::TestOutcome;
use crate::scoring::{fraction_over, mean, mean_by};

/// FIFO cap on tracked topics.
pub const MAX_TOPICS: usize = 10;

/// Per-case gate.
pub const CASE_SCORE_THRESHOLD: f64 = 0.7;

/// Comprehensive-run gates.
pub const SESSION_CONTINUITY_THRESHOLD: f64 = 0.85;
pub const CONTEXT_RETENTION_THRESHOLD: f64 = 0.8;

/// Defaults when no contributing case exists.
pub const DEFAULT_LONG_TERM_MEMORY_SCORE: f64 = 0.8;
pub const DEFAULT_CROSS_SESSION_RELEVANCE: f64 = 0.7;

/// Per-turn score above which a context switch counts as accurate.
pub const CONTEXT_SWITCH_THRESHOLD: f64 = 0.8;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

/// Structured message annotations; an open map in earlier revisions, now a
/// fixed shape so persistence round-trips are lossless.
#[derive(Debug, Clone, Default, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into, strip_option)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_used: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into, strip_option)]
pub struct ConversationMessage {
    pub message_id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<MessageMetadata>,
}

impl ConversationMessage {
    pub fn new(message_id: impl Into<String>, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            message_id: message_id.into(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: None,
        }
    }
}

/// Mutable per-session context accumulated across turns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionContext {
    pub topics: Vec<String>,
    pub entities: HashMap<String, String>,
    pub preferences: HashMap<String, String>,
    pub document_history: Vec<String>,
    pub conversation_summary: String,
}

impl SessionContext {
    /// Adds every unseen term, evicting the oldest topics once the cap is
    /// exceeded, and refreshes the rolling summary.
    pub fn note_topics<I, S>(&mut self, terms: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for term in terms {
            let term = term.as_ref();
            if !self.topics.iter().any(|topic| topic == term) {
                self.topics.push(term.to_string());
            }
        }
        if self.topics.len() > MAX_TOPICS {
            self.topics.drain(..self.topics.len() - MAX_TOPICS);
        }
        self.conversation_summary = format!("{}について議論中", self.topics.join("、"));
    }

    /// Fraction of expected terms present as a substring-or-superstring match
    /// against the current topics.
    pub fn coverage(&self, expected: &[String]) -> f64 {
        if expected.is_empty() {
            return 1.0;
        }
        let matched = expected
            .iter()
            .filter(|term| {
                self.topics
                    .iter()
                    .any(|topic| topic.contains(term.as_str()) || term.contains(topic))
            })
            .count();
        matched as f64 / expected.len() as f64
    }
}

/// One simulated conversation. Owned exclusively by the case execution that
/// created it; mirrored to storage write-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSession {
    pub session_id: String,
    pub user_id: String,
    pub messages: Vec<ConversationMessage>,
    pub context: SessionContext,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl ConversationSession {
    pub fn new(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            messages: Vec::new(),
            context: SessionContext::default(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn push_message(&mut self, message: ConversationMessage) {
        self.messages.push(message);
        self.last_updated = Utc::now();
    }
}

/// One scripted turn of a context test case.
#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct ConversationTurn {
    pub user_message: String,
    pub expected_context: Vec<String>,
    pub context_dependency: bool,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SessionType {
    Short,
    Medium,
    Long,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum_macros::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
}

#[derive(Debug, Clone, PartialEq, Setters, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[setters(into)]
pub struct ContextTestCase {
    pub id: String,
    pub scenario: String,
    pub conversation_flow: Vec<ConversationTurn>,
    pub session_type: SessionType,
    pub complexity_level: ComplexityLevel,
}

/// Scores one turn against the context accumulated by the preceding turns.
///
/// A turn that does not depend on context is trivially satisfied.
pub fn turn_context_score(context: &SessionContext, turn: &ConversationTurn) -> f64 {
    if !turn.context_dependency {
        return 1.0;
    }
    context.coverage(&turn.expected_context)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextCaseResult {
    pub case: ContextTestCase,
    pub session: ConversationSession,
    pub context_scores: Vec<f64>,
    pub overall_score: f64,
    pub success: bool,
}

impl ContextCaseResult {
    pub fn completed(case: ContextTestCase, session: ConversationSession, scores: Vec<f64>) -> Self {
        let overall_score = mean(&scores);
        Self {
            case,
            session,
            success: overall_score > CASE_SCORE_THRESHOLD,
            context_scores: scores,
            overall_score,
        }
    }

    pub fn failure(case: ContextTestCase) -> Self {
        let session = ConversationSession::new(format!("failed-{}", case.id), "test-user");
        Self {
            case,
            session,
            context_scores: Vec::new(),
            overall_score: 0.0,
            success: false,
        }
    }
}

/// Batch-level context metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextMetrics {
    pub session_continuity: f64,
    pub context_retention: f64,
    pub conversation_coherence: f64,
    pub memory_efficiency: f64,
}

impl ContextMetrics {
    pub fn aggregate(results: &[ContextCaseResult]) -> Self {
        let successful: Vec<&ContextCaseResult> = results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }

        let session_continuity = mean_by(&successful, |r| r.overall_score);
        let context_retention = mean_by(&successful, |r| mean(&r.context_scores));
        let conversation_coherence = mean_by(&successful, |r| {
            let topics = r.session.context.topics.len() as f64;
            let messages = r.session.messages.len().max(1) as f64;
            (topics / messages).min(1.0)
        });

        Self {
            session_continuity,
            context_retention,
            conversation_coherence,
            memory_efficiency: (session_continuity + context_retention) / 2.0,
        }
    }

    pub fn passes_overall(&self) -> bool {
        self.session_continuity > SESSION_CONTINUITY_THRESHOLD
            && self.context_retention > CONTEXT_RETENTION_THRESHOLD
    }
}

/// Batch-level session analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionAnalysis {
    pub average_session_length: f64,
    pub context_switch_accuracy: f64,
    pub long_term_memory_score: f64,
    pub cross_session_relevance: f64,
}

impl SessionAnalysis {
    pub fn aggregate(results: &[ContextCaseResult]) -> Self {
        let successful: Vec<&ContextCaseResult> = results.iter().filter(|r| r.success).collect();
        if successful.is_empty() {
            return Self::default();
        }

        let long_sessions: Vec<&&ContextCaseResult> = successful
            .iter()
            .filter(|r| r.case.session_type == SessionType::Long)
            .collect();
        let cross_sessions: Vec<&&ContextCaseResult> = successful
            .iter()
            .filter(|r| r.case.id.contains("cross-session"))
            .collect();

        Self {
            average_session_length: mean_by(&successful, |r| r.session.messages.len() as f64),
            context_switch_accuracy: mean_by(&successful, |r| {
                fraction_over(&r.context_scores, CONTEXT_SWITCH_THRESHOLD)
            }),
            long_term_memory_score: if long_sessions.is_empty() {
                DEFAULT_LONG_TERM_MEMORY_SCORE
            } else {
                mean_by(&long_sessions, |r| r.overall_score)
            },
            cross_session_relevance: if cross_sessions.is_empty() {
                DEFAULT_CROSS_SESSION_RELEVANCE
            } else {
                mean_by(&cross_sessions, |r| r.overall_score)
            },
        }
    }
}

/// Result of a comprehensive context-persistence run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextPersistenceReport {
    pub outcome: TestOutcome,
    pub context_metrics: Option<ContextMetrics>,
    pub session_analysis: Option<SessionAnalysis>,
    pub case_results: Vec<ContextCaseResult>,
}

impl ContextPersistenceReport {
    pub fn failed(outcome: TestOutcome, error: impl ToString) -> Self {
        Self {
            outcome: outcome.fail(error),
            context_metrics: None,
            session_analysis: None,
            case_results: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn turn(message: &str, expected: &[&str], dependent: bool) -> ConversationTurn {
        ConversationTurn {
            user_message: message.to_string(),
            expected_context: expected.iter().map(|s| s.to_string()).collect(),
            context_dependency: dependent,
        }
    }

    fn short_case() -> ContextTestCase {
        ContextTestCase {
            id: "context-short-001".to_string(),
            scenario: "基本的な質問の継続".to_string(),
            conversation_flow: vec![
                turn("RAGシステムについて教えてください", &["RAG", "システム", "概要"], false),
                turn("それの主要な利点は何ですか？", &["RAG", "システム", "利点"], true),
            ],
            session_type: SessionType::Short,
            complexity_level: ComplexityLevel::Simple,
        }
    }

    #[test]
    fn test_topics_are_deduplicated() {
        let mut fixture = SessionContext::default();
        fixture.note_topics(["RAG", "システム"]);
        fixture.note_topics(["RAG", "利点"]);

        assert_eq!(fixture.topics, vec!["RAG", "システム", "利点"]);
    }

    #[test]
    fn test_topics_capped_at_ten_with_fifo_eviction() {
        let mut fixture = SessionContext::default();
        for i in 0..12 {
            fixture.note_topics([format!("topic-{i}")]);
        }

        assert_eq!(fixture.topics.len(), MAX_TOPICS);
        assert_eq!(fixture.topics.first().unwrap(), "topic-2");
        assert_eq!(fixture.topics.last().unwrap(), "topic-11");
    }

    #[test]
    fn test_topic_cap_holds_for_any_update_sequence() {
        let mut fixture = SessionContext::default();
        for round in 0..25 {
            let batch: Vec<String> = (0..3).map(|i| format!("r{round}-t{i}")).collect();
            fixture.note_topics(&batch);
            assert!(fixture.topics.len() <= MAX_TOPICS);
        }
    }

    #[test]
    fn test_summary_follows_topics() {
        let mut fixture = SessionContext::default();
        fixture.note_topics(["RAG", "システム"]);
        assert_eq!(fixture.conversation_summary, "RAG、システムについて議論中");
    }

    #[test]
    fn test_coverage_substring_and_superstring_match() {
        let mut fixture = SessionContext::default();
        fixture.note_topics(["RAGシステム"]);

        // "RAG" is a substring of the stored topic; "RAGシステム導入計画" is a
        // superstring of it. Both count.
        let expected = vec!["RAG".to_string(), "RAGシステム導入計画".to_string()];
        assert_eq!(fixture.coverage(&expected), 1.0);
    }

    #[test]
    fn test_independent_turn_always_scores_one() {
        let context = SessionContext::default();
        let fixture = turn("hello", &["anything"], false);

        assert_eq!(turn_context_score(&context, &fixture), 1.0);
        // Idempotent regardless of accumulated state.
        assert_eq!(turn_context_score(&context, &fixture), 1.0);
    }

    #[test]
    fn test_dependent_turn_scores_matched_fraction() {
        let mut context = SessionContext::default();
        context.note_topics(["RAG", "システム", "概要"]);

        let fixture = turn("それの主要な利点は何ですか？", &["RAG", "システム", "利点"], true);
        let actual = turn_context_score(&context, &fixture);
        assert!((actual - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_case_result_gates_on_mean_score() {
        let case = short_case();
        let session = ConversationSession::new("s-1", "u-1");

        let passing = ContextCaseResult::completed(case.clone(), session.clone(), vec![1.0, 0.8]);
        assert_eq!(passing.success, true);
        assert!((passing.overall_score - 0.9).abs() < 1e-9);

        let failing = ContextCaseResult::completed(case, session, vec![0.5, 0.5]);
        assert_eq!(failing.success, false);
    }

    #[test]
    fn test_failed_case_keeps_defined_score() {
        let actual = ContextCaseResult::failure(short_case());
        assert_eq!(actual.success, false);
        assert_eq!(actual.overall_score, 0.0);
        assert!(actual.overall_score.is_finite());
    }

    #[test]
    fn test_context_metrics_aggregate() {
        let case = short_case();
        let mut session = ConversationSession::new("s-1", "u-1");
        session.context.note_topics(["RAG", "システム", "概要"]);
        for i in 0..4 {
            session.push_message(ConversationMessage::new(
                format!("msg-{i}"),
                MessageRole::User,
                "content",
            ));
        }

        let results = vec![ContextCaseResult::completed(case, session, vec![1.0, 0.8])];
        let actual = ContextMetrics::aggregate(&results);

        assert!((actual.session_continuity - 0.9).abs() < 1e-9);
        assert!((actual.context_retention - 0.9).abs() < 1e-9);
        // 3 topics over 4 messages.
        assert!((actual.conversation_coherence - 0.75).abs() < 1e-9);
        assert!((actual.memory_efficiency - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_context_metrics_empty_is_zero() {
        let results = vec![ContextCaseResult::failure(short_case())];
        let actual = ContextMetrics::aggregate(&results);
        assert_eq!(actual, ContextMetrics::default());
    }

    #[test]
    fn test_session_analysis_defaults_without_special_cases() {
        let case = short_case();
        let session = ConversationSession::new("s-1", "u-1");
        let results = vec![ContextCaseResult::completed(case, session, vec![1.0, 0.9])];

        let actual = SessionAnalysis::aggregate(&results);
        assert_eq!(actual.long_term_memory_score, DEFAULT_LONG_TERM_MEMORY_SCORE);
        assert_eq!(actual.cross_session_relevance, DEFAULT_CROSS_SESSION_RELEVANCE);
        assert_eq!(actual.context_switch_accuracy, 1.0);
    }

    #[test]
    fn test_session_round_trips_through_json() {
        let mut fixture = ConversationSession::new("session-1", "user-1");
        fixture.push_message(
            ConversationMessage::new("msg-0-user", MessageRole::User, "RAGについて")
                .metadata(MessageMetadata::default().context_used(vec!["RAG".to_string()])),
        );
        fixture.context.note_topics(["RAG", "システム"]);

        let json = serde_json::to_string(&fixture).unwrap();
        let actual: ConversationSession = serde_json::from_str(&json).unwrap();
        assert_eq!(actual, fixture);
    }
}
