use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use super::domain::{
    AnswerDetail, NarrativeRecord, NewAnswer, OptionId, Question, QuestionId, RecordedAnswer,
    ResultRecord, Session, SessionId, SessionSummary, TestId, TestRecord, UserId,
};
use super::report::{assemble_report, ReportInputs, ResultReport};
use super::store::{AssessmentStore, StoreError};

/// Option as shown to a respondent; scores stay server-side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptionView {
    pub id: OptionId,
    pub text: String,
    pub order_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: QuestionId,
    pub order_index: u32,
    pub text: String,
    pub options: Vec<OptionView>,
}

impl From<&Question> for QuestionView {
    fn from(question: &Question) -> Self {
        Self {
            id: question.id,
            order_index: question.order_index,
            text: question.text.clone(),
            options: question
                .options
                .iter()
                .map(|option| OptionView {
                    id: option.id,
                    text: option.text.clone(),
                    order_index: option.order_index,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestDetail {
    pub test: TestRecord,
    pub questions: Vec<QuestionView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStart {
    pub session_id: SessionId,
    pub test_id: TestId,
    pub resumed: bool,
    pub questions: Vec<QuestionView>,
    /// Question to chosen option; empty for a fresh session.
    pub existing_answers: BTreeMap<QuestionId, OptionId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishOutcome {
    pub total_score: i32,
    pub results: Vec<ResultRecord>,
    pub report: ResultReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub session: SessionSummary,
    pub results: Vec<ResultRecord>,
    pub answers: Vec<AnswerDetail>,
    /// Absent while the session is active.
    pub report: Option<ResultReport>,
    pub narrative: Option<NarrativeRecord>,
}

/// Session lifecycle manager: create-or-resume, answer upsert, and the finish transition.
pub struct SessionService<S> {
    store: Arc<S>,
}

impl<S> SessionService<S>
where
    S: AssessmentStore + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn list_tests(&self) -> Result<Vec<TestRecord>, SessionServiceError> {
        Ok(self.store.tests()?)
    }

    pub fn test_detail(&self, test_id: TestId) -> Result<TestDetail, SessionServiceError> {
        let test = self
            .store
            .test(test_id)?
            .ok_or(SessionServiceError::NotFound("test"))?;
        let questions = self.store.questions(test_id)?;

        Ok(TestDetail {
            test,
            questions: questions.iter().map(QuestionView::from).collect(),
        })
    }

    /// Resumes the caller's active session for the test, or creates one.
    pub fn start(
        &self,
        user: &UserId,
        test_id: TestId,
    ) -> Result<SessionStart, SessionServiceError> {
        if self.store.test(test_id)?.is_none() {
            return Err(SessionServiceError::NotFound("test"));
        }

        let opened = self.store.open_session(user, test_id, Utc::now())?;
        let session_id = opened.session.id;

        let existing_answers = if opened.resumed {
            self.store
                .answers(session_id)?
                .into_iter()
                .map(|answer| (answer.question_id, answer.option_id))
                .collect()
        } else {
            BTreeMap::new()
        };

        if opened.resumed {
            tracing::info!(
                %session_id,
                %test_id,
                answered = existing_answers.len(),
                "session resumed"
            );
        } else {
            tracing::info!(%session_id, %test_id, "session created");
        }

        let questions = self.store.questions(test_id)?;
        Ok(SessionStart {
            session_id,
            test_id,
            resumed: opened.resumed,
            questions: questions.iter().map(QuestionView::from).collect(),
            existing_answers,
        })
    }

    /// Records or replaces the answer to one question, caching the option's current score.
    pub fn record_answer(
        &self,
        user: &UserId,
        session_id: SessionId,
        question_id: QuestionId,
        option_id: OptionId,
    ) -> Result<(), SessionServiceError> {
        let session = self.active_session(user, session_id)?;

        let choice = self
            .store
            .option_choice(question_id, option_id)?
            .ok_or_else(|| {
                SessionServiceError::InvalidInput(format!(
                    "option {option_id} does not belong to question {question_id}"
                ))
            })?;
        if choice.test_id != session.test_id {
            return Err(SessionServiceError::InvalidInput(format!(
                "question {question_id} is not part of test {}",
                session.test_id
            )));
        }

        self.store.upsert_answer(NewAnswer {
            session_id,
            question_id,
            option_id,
            score: choice.option.score,
            answered_at: Utc::now(),
        })?;

        tracing::debug!(%session_id, %question_id, %option_id, "answer recorded");
        Ok(())
    }

    /// Scores the session, persists results and report, and marks it finished.
    pub fn finish(
        &self,
        user: &UserId,
        session_id: SessionId,
    ) -> Result<FinishOutcome, SessionServiceError> {
        let session = self.active_session(user, session_id)?;
        let test_id = session.test_id;

        let test = self
            .store
            .test(test_id)?
            .ok_or(SessionServiceError::NotFound("test"))?;
        let mut inputs = ReportInputs {
            test,
            scales: self.store.scales(test_id)?,
            templates: self.store.templates(test_id)?,
            risk_rules: self.store.risk_rules(test_id)?,
            answers: Vec::new(),
        };

        let mut assemble = |answers: &[RecordedAnswer]| {
            inputs.answers = answers.to_vec();
            assemble_report(&inputs, Utc::now())
        };
        let report = self.store.commit_finish(session_id, &mut assemble)?;

        tracing::info!(
            %session_id,
            %test_id,
            total = report.scores.total,
            risk_flags = report.risk_flags.len(),
            "session finished"
        );

        Ok(FinishOutcome {
            total_score: report.scores.total,
            results: report.result_records(),
            report,
        })
    }

    /// The caller's sessions, newest first.
    pub fn history(&self, user: &UserId) -> Result<Vec<SessionSummary>, SessionServiceError> {
        Ok(self.store.sessions_for_user(user)?)
    }

    pub fn detail(
        &self,
        user: &UserId,
        session_id: SessionId,
    ) -> Result<SessionDetail, SessionServiceError> {
        let session = self.owned_session(user, session_id)?;
        let test = self.store.test(session.test_id)?;
        let answers = self.store.answer_details(session_id)?;

        let summary = SessionSummary {
            id: session.id,
            test_id: session.test_id,
            test_name: test.as_ref().map(|test| test.name.clone()).unwrap_or_default(),
            category: test.map(|test| test.category).unwrap_or_default(),
            status: session.status(),
            created_at: session.created_at,
            finished_at: session.finished_at,
            total_score: answers.iter().map(|answer| answer.score).sum(),
        };

        Ok(SessionDetail {
            session: summary,
            results: self.store.results(session_id)?,
            answers,
            report: self.store.report(session_id)?,
            narrative: self.store.narrative(session_id)?,
        })
    }

    /// Foreign and missing sessions are indistinguishable to the caller.
    pub(crate) fn owned_session(
        &self,
        user: &UserId,
        session_id: SessionId,
    ) -> Result<Session, SessionServiceError> {
        self.store
            .session(session_id)?
            .filter(|session| session.is_owned_by(user))
            .ok_or(SessionServiceError::NotFound("session"))
    }

    fn active_session(
        &self,
        user: &UserId,
        session_id: SessionId,
    ) -> Result<Session, SessionServiceError> {
        let session = self.owned_session(user, session_id)?;
        if session.finished_at.is_some() {
            return Err(SessionServiceError::AlreadyFinished(session_id));
        }
        Ok(session)
    }
}

/// Error raised by the session service.
#[derive(Debug, thiserror::Error)]
pub enum SessionServiceError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    InvalidInput(String),
    #[error("session {0} is already finished")]
    AlreadyFinished(SessionId),
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for SessionServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => SessionServiceError::NotFound("session"),
            StoreError::SessionFinished(id) => SessionServiceError::AlreadyFinished(id),
            other => SessionServiceError::Store(other),
        }
    }
}
