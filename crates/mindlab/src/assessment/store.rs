use chrono::{DateTime, Utc};

use super::catalog::TestDefinition;
use super::domain::{
    AnalysisTemplate, AnswerDetail, AnswerOption, NarrativeRecord, NewAnswer, OptionId, Question,
    QuestionId, RecordedAnswer, ResultRecord, RiskRule, ScaleDefinition, Session, SessionId,
    SessionSummary, TestId, TestRecord, UserId,
};
use super::report::ResultReport;

/// Outcome of the create-or-resume step of starting a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSession {
    pub session: Session,
    pub resumed: bool,
}

/// An option together with the test owning its question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionChoice {
    pub test_id: TestId,
    pub option: AnswerOption,
}

/// Storage abstraction for test content and session state.
///
/// Every write is a single atomic upsert or transaction so concurrent requests for the same
/// session converge instead of duplicating rows.
pub trait AssessmentStore: Send + Sync {
    /// All tests ordered by name.
    fn tests(&self) -> Result<Vec<TestRecord>, StoreError>;
    fn test(&self, id: TestId) -> Result<Option<TestRecord>, StoreError>;
    /// Questions ordered by display order, each with its options in display order.
    fn questions(&self, test_id: TestId) -> Result<Vec<Question>, StoreError>;
    /// `None` when the option does not exist or belongs to another question.
    fn option_choice(
        &self,
        question_id: QuestionId,
        option_id: OptionId,
    ) -> Result<Option<OptionChoice>, StoreError>;
    /// Scales in declaration order with cutoffs in declaration order.
    fn scales(&self, test_id: TestId) -> Result<Vec<ScaleDefinition>, StoreError>;
    fn templates(&self, test_id: TestId) -> Result<Vec<AnalysisTemplate>, StoreError>;
    /// Risk rules in declaration order.
    fn risk_rules(&self, test_id: TestId) -> Result<Vec<RiskRule>, StoreError>;
    /// Replaces a test's content keyed by slug.
    ///
    /// Ids stay stable across a resync: questions are keyed by display order, options and
    /// scales by position. Only entries missing from the definition are removed, and identical
    /// content is left untouched.
    fn replace_test_content(&self, definition: &TestDefinition) -> Result<TestId, StoreError>;

    /// Resumes the active session for (user, test) or creates one, atomically.
    fn open_session(
        &self,
        user: &UserId,
        test_id: TestId,
        now: DateTime<Utc>,
    ) -> Result<OpenedSession, StoreError>;
    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError>;
    /// Newest first.
    fn sessions_for_user(&self, user: &UserId) -> Result<Vec<SessionSummary>, StoreError>;
    /// Answers ordered by question display order.
    fn answers(&self, session_id: SessionId) -> Result<Vec<RecordedAnswer>, StoreError>;
    fn answer_details(&self, session_id: SessionId) -> Result<Vec<AnswerDetail>, StoreError>;
    /// Insert-or-replace keyed by (session, question); fails with
    /// [`StoreError::SessionFinished`] once the session is finished.
    fn upsert_answer(&self, answer: NewAnswer) -> Result<(), StoreError>;
    /// Reads the session's answers, builds the report with `assemble`, upserts the result rows
    /// and the report, and marks the session finished at `report.completed_at`, all under one
    /// lock or transaction so no answer can land in between.
    ///
    /// Nothing is written if the session already finished.
    fn commit_finish(
        &self,
        session_id: SessionId,
        assemble: &mut dyn FnMut(&[RecordedAnswer]) -> ResultReport,
    ) -> Result<ResultReport, StoreError>;
    fn results(&self, session_id: SessionId) -> Result<Vec<ResultRecord>, StoreError>;
    fn report(&self, session_id: SessionId) -> Result<Option<ResultReport>, StoreError>;
    fn upsert_narrative(&self, narrative: &NarrativeRecord) -> Result<(), StoreError>;
    fn narrative(&self, session_id: SessionId) -> Result<Option<NarrativeRecord>, StoreError>;
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("session {0} is already finished")]
    SessionFinished(SessionId),
    #[error("invalid test content: {0}")]
    InvalidContent(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("migration {version} failed: {reason}")]
    Migration { version: i64, reason: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("report encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}
