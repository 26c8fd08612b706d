use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

row_id!(
    /// Storage identifier of a test.
    TestId
);
row_id!(ScaleId);
row_id!(QuestionId);
row_id!(OptionId);
row_id!(
    /// Storage identifier of one user's attempt at one test.
    SessionId
);

/// Identifier of an already-authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a test's narrative is meant to be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    Direct,
    Profile,
    RuleBased,
}

impl AnalysisMode {
    pub const fn label(self) -> &'static str {
        match self {
            AnalysisMode::Direct => "direct",
            AnalysisMode::Profile => "profile",
            AnalysisMode::RuleBased => "rule_based",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "direct" => Some(Self::Direct),
            "profile" => Some(Self::Profile),
            "rule_based" => Some(Self::RuleBased),
            _ => None,
        }
    }
}

/// Severity attached to a triggered risk rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskSeverity {
    Warning,
    Critical,
    Emergency,
}

impl RiskSeverity {
    pub const fn label(self) -> &'static str {
        match self {
            RiskSeverity::Warning => "warning",
            RiskSeverity::Critical => "critical",
            RiskSeverity::Emergency => "emergency",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "warning" => Some(Self::Warning),
            "critical" => Some(Self::Critical),
            "emergency" => Some(Self::Emergency),
            _ => None,
        }
    }
}

/// Test metadata as stored by content sync; read-only to the session engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRecord {
    pub id: TestId,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub analysis_mode: AnalysisMode,
    pub warning: Option<String>,
}

/// Inclusive score range mapped to an interpretive level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cutoff {
    pub min_score: i32,
    pub max_score: i32,
    pub label: String,
    pub description: String,
}

impl Cutoff {
    pub fn contains(&self, score: i32) -> bool {
        self.min_score <= score && score <= self.max_score
    }
}

/// A scale with everything scoring needs: mapped questions and cutoffs in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleDefinition {
    pub id: ScaleId,
    pub test_id: TestId,
    pub name: String,
    pub question_ids: Vec<QuestionId>,
    pub cutoffs: Vec<Cutoff>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: OptionId,
    pub question_id: QuestionId,
    pub text: String,
    pub score: i32,
    pub order_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub test_id: TestId,
    pub text: String,
    /// 1-based display position within the test; risk rules address questions by it.
    pub order_index: u32,
    pub options: Vec<AnswerOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisTemplate {
    pub test_id: TestId,
    /// `None` applies to the whole test.
    pub scale_id: Option<ScaleId>,
    pub level_label: String,
    pub title: String,
    pub summary: String,
    pub details: String,
    pub recommendations: String,
    pub disclaimer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRule {
    pub test_id: TestId,
    pub condition_expr: String,
    pub message: String,
    pub severity: RiskSeverity,
}

/// Lifecycle position of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Finished,
}

impl SessionStatus {
    pub const fn label(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Finished => "finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub test_id: TestId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn status(&self) -> SessionStatus {
        if self.finished_at.is_some() {
            SessionStatus::Finished
        } else {
            SessionStatus::Active
        }
    }

    pub fn is_owned_by(&self, user: &UserId) -> bool {
        &self.user_id == user
    }
}

/// Answer write request after validation; the score is the option's score at recording time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAnswer {
    pub session_id: SessionId,
    pub question_id: QuestionId,
    pub option_id: OptionId,
    pub score: i32,
    pub answered_at: DateTime<Utc>,
}

/// Stored answer joined with the display order of its question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedAnswer {
    pub question_id: QuestionId,
    pub option_id: OptionId,
    pub order_index: u32,
    pub score: i32,
    pub answered_at: DateTime<Utc>,
}

/// Per-scale result row written once at finish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    pub scale_id: ScaleId,
    pub scale_name: String,
    pub score: i32,
    pub interpretation: String,
}

/// Optional free-text narrative produced after a report exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NarrativeRecord {
    pub session_id: SessionId,
    pub text: String,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Row of a user's session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: SessionId,
    pub test_id: TestId,
    pub test_name: String,
    pub category: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub total_score: i32,
}

/// Answered question with the texts shown to the user, for session detail views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerDetail {
    pub question_id: QuestionId,
    pub order_index: u32,
    pub question_text: String,
    pub answer_text: String,
    pub score: i32,
}
