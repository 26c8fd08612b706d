use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use super::catalog::TestDefinition;
use super::domain::{
    AnalysisTemplate, AnswerDetail, AnswerOption, Cutoff, NarrativeRecord, NewAnswer, OptionId,
    Question, QuestionId, RecordedAnswer, ResultRecord, RiskRule, ScaleDefinition, ScaleId,
    Session, SessionId, SessionSummary, TestId, TestRecord, UserId,
};
use super::report::ResultReport;
use super::scoring::total_score;
use super::store::{AssessmentStore, OpenedSession, OptionChoice, StoreError};

/// Mutex-guarded store for tests, demos, and database-less deployments.
///
/// Each trait method runs under one lock, so every operation is atomic.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    next_id: i64,
    tests: BTreeMap<TestId, TestRecord>,
    definitions: HashMap<TestId, TestDefinition>,
    scales: Vec<ScaleDefinition>,
    questions: Vec<Question>,
    templates: Vec<AnalysisTemplate>,
    risk_rules: Vec<RiskRule>,
    sessions: BTreeMap<SessionId, Session>,
    answers: BTreeMap<(SessionId, QuestionId), StoredAnswer>,
    results: BTreeMap<SessionId, Vec<ResultRecord>>,
    reports: HashMap<SessionId, ResultReport>,
    narratives: HashMap<SessionId, NarrativeRecord>,
}

#[derive(Clone)]
struct StoredAnswer {
    option_id: OptionId,
    score: i32,
    answered_at: DateTime<Utc>,
}

impl MemoryState {
    fn allocate(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn question(&self, id: QuestionId) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == id)
    }

    fn session_answers(&self, session_id: SessionId) -> Vec<RecordedAnswer> {
        let mut answers: Vec<RecordedAnswer> = self
            .answers
            .range((session_id, QuestionId(i64::MIN))..=(session_id, QuestionId(i64::MAX)))
            .map(|((_, question_id), stored)| RecordedAnswer {
                question_id: *question_id,
                option_id: stored.option_id,
                order_index: self
                    .question(*question_id)
                    .map(|question| question.order_index)
                    .unwrap_or(0),
                score: stored.score,
                answered_at: stored.answered_at,
            })
            .collect();
        answers.sort_by_key(|answer| (answer.order_index, answer.question_id));
        answers
    }
}

impl MemoryStore {
    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl AssessmentStore for MemoryStore {
    fn tests(&self) -> Result<Vec<TestRecord>, StoreError> {
        let guard = self.lock()?;
        let mut tests: Vec<TestRecord> = guard.tests.values().cloned().collect();
        tests.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        Ok(tests)
    }

    fn test(&self, id: TestId) -> Result<Option<TestRecord>, StoreError> {
        Ok(self.lock()?.tests.get(&id).cloned())
    }

    fn questions(&self, test_id: TestId) -> Result<Vec<Question>, StoreError> {
        let guard = self.lock()?;
        let mut questions: Vec<Question> = guard
            .questions
            .iter()
            .filter(|question| question.test_id == test_id)
            .cloned()
            .collect();
        questions.sort_by_key(|question| (question.order_index, question.id));
        Ok(questions)
    }

    fn option_choice(
        &self,
        question_id: QuestionId,
        option_id: OptionId,
    ) -> Result<Option<OptionChoice>, StoreError> {
        let guard = self.lock()?;
        Ok(guard.question(question_id).and_then(|question| {
            question
                .options
                .iter()
                .find(|option| option.id == option_id)
                .map(|option| OptionChoice {
                    test_id: question.test_id,
                    option: option.clone(),
                })
        }))
    }

    fn scales(&self, test_id: TestId) -> Result<Vec<ScaleDefinition>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .scales
            .iter()
            .filter(|scale| scale.test_id == test_id)
            .cloned()
            .collect())
    }

    fn templates(&self, test_id: TestId) -> Result<Vec<AnalysisTemplate>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .templates
            .iter()
            .filter(|template| template.test_id == test_id)
            .cloned()
            .collect())
    }

    fn risk_rules(&self, test_id: TestId) -> Result<Vec<RiskRule>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .risk_rules
            .iter()
            .filter(|rule| rule.test_id == test_id)
            .cloned()
            .collect())
    }

    fn replace_test_content(&self, definition: &TestDefinition) -> Result<TestId, StoreError> {
        let mut guard = self.lock()?;
        let state = &mut *guard;

        let existing = state
            .tests
            .values()
            .find(|test| test.slug == definition.slug)
            .map(|test| test.id);
        let test_id = match existing {
            Some(id) => id,
            None => TestId(state.allocate()),
        };

        if existing.is_some() && state.definitions.get(&test_id) == Some(definition) {
            return Ok(test_id);
        }

        let previous_scales: Vec<ScaleId> = state
            .scales
            .iter()
            .filter(|scale| scale.test_id == test_id)
            .map(|scale| scale.id)
            .collect();
        let previous_questions: HashMap<u32, (QuestionId, Vec<OptionId>)> = state
            .questions
            .iter()
            .filter(|question| question.test_id == test_id)
            .map(|question| {
                let options = question.options.iter().map(|option| option.id).collect();
                (question.order_index, (question.id, options))
            })
            .collect();

        let mut scales: Vec<ScaleDefinition> = Vec::with_capacity(definition.scales.len());
        let mut positions: HashMap<&str, usize> = HashMap::new();
        for (position, entry) in definition.scales.iter().enumerate() {
            let id = match previous_scales.get(position) {
                Some(id) => *id,
                None => ScaleId(state.allocate()),
            };
            positions.insert(entry.key.as_str(), scales.len());
            scales.push(ScaleDefinition {
                id,
                test_id,
                name: entry.name.clone(),
                question_ids: Vec::new(),
                cutoffs: Vec::new(),
            });
        }
        let scale_index = |key: &str| -> Result<usize, StoreError> {
            positions
                .get(key)
                .copied()
                .ok_or_else(|| StoreError::InvalidContent(format!("unknown scale key '{key}'")))
        };

        let mut questions = Vec::with_capacity(definition.questions.len());
        let mut memberships = Vec::new();
        for entry in &definition.questions {
            let previous = previous_questions.get(&entry.order);
            let question_id = match previous {
                Some((id, _)) => *id,
                None => QuestionId(state.allocate()),
            };
            let mut options = Vec::with_capacity(entry.options.len());
            for (position, option) in entry.options.iter().enumerate() {
                let id = match previous.and_then(|(_, ids)| ids.get(position)) {
                    Some(id) => *id,
                    None => OptionId(state.allocate()),
                };
                options.push(AnswerOption {
                    id,
                    question_id,
                    text: option.text.clone(),
                    score: option.score,
                    order_index: position as u32,
                });
            }
            for key in &entry.scale_keys {
                memberships.push((scale_index(key)?, question_id));
            }
            questions.push(Question {
                id: question_id,
                test_id,
                text: entry.text.clone(),
                order_index: entry.order,
                options,
            });
        }

        let mut cutoffs = Vec::with_capacity(definition.cutoffs.len());
        for entry in &definition.cutoffs {
            cutoffs.push((
                scale_index(&entry.scale_key)?,
                Cutoff {
                    min_score: entry.min,
                    max_score: entry.max,
                    label: entry.label.clone(),
                    description: entry.description.clone(),
                },
            ));
        }

        let mut templates = Vec::with_capacity(definition.analysis_templates.len());
        for entry in &definition.analysis_templates {
            let scale_id = match &entry.scale_key {
                Some(key) => Some(scales[scale_index(key)?].id),
                None => None,
            };
            templates.push(AnalysisTemplate {
                test_id,
                scale_id,
                level_label: entry.level_label.clone(),
                title: entry.title.clone(),
                summary: entry.summary.clone(),
                details: entry.details.clone(),
                recommendations: entry.recommendations.clone(),
                disclaimer: entry.disclaimer.clone(),
            });
        }

        for (index, question_id) in memberships {
            scales[index].question_ids.push(question_id);
        }
        for (index, cutoff) in cutoffs {
            scales[index].cutoffs.push(cutoff);
        }

        state.tests.insert(
            test_id,
            TestRecord {
                id: test_id,
                slug: definition.slug.clone(),
                name: definition.name.clone(),
                description: definition.description.clone(),
                category: definition.category.clone(),
                analysis_mode: definition.analysis_type,
                warning: definition.warning.clone(),
            },
        );
        state.scales.retain(|scale| scale.test_id != test_id);
        state.scales.extend(scales);
        state.questions.retain(|question| question.test_id != test_id);
        state.questions.extend(questions);
        state.templates.retain(|template| template.test_id != test_id);
        state.templates.extend(templates);
        state.risk_rules.retain(|rule| rule.test_id != test_id);
        state
            .risk_rules
            .extend(definition.risk_rules.iter().map(|entry| RiskRule {
                test_id,
                condition_expr: entry.condition.clone(),
                message: entry.message.clone(),
                severity: entry.severity,
            }));
        state.definitions.insert(test_id, definition.clone());

        Ok(test_id)
    }

    fn open_session(
        &self,
        user: &UserId,
        test_id: TestId,
        now: DateTime<Utc>,
    ) -> Result<OpenedSession, StoreError> {
        let mut guard = self.lock()?;

        let active = guard
            .sessions
            .values()
            .filter(|session| {
                session.test_id == test_id
                    && &session.user_id == user
                    && session.finished_at.is_none()
            })
            .max_by_key(|session| (session.created_at, session.id))
            .cloned();
        if let Some(session) = active {
            return Ok(OpenedSession {
                session,
                resumed: true,
            });
        }

        let session = Session {
            id: SessionId(guard.allocate()),
            test_id,
            user_id: user.clone(),
            created_at: now,
            finished_at: None,
        };
        guard.sessions.insert(session.id, session.clone());
        Ok(OpenedSession {
            session,
            resumed: false,
        })
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        Ok(self.lock()?.sessions.get(&id).cloned())
    }

    fn sessions_for_user(&self, user: &UserId) -> Result<Vec<SessionSummary>, StoreError> {
        let guard = self.lock()?;
        let mut summaries: Vec<SessionSummary> = guard
            .sessions
            .values()
            .filter(|session| &session.user_id == user)
            .map(|session| {
                let test = guard.tests.get(&session.test_id);
                SessionSummary {
                    id: session.id,
                    test_id: session.test_id,
                    test_name: test.map(|test| test.name.clone()).unwrap_or_default(),
                    category: test.map(|test| test.category.clone()).unwrap_or_default(),
                    status: session.status(),
                    created_at: session.created_at,
                    finished_at: session.finished_at,
                    total_score: total_score(&guard.session_answers(session.id)),
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(summaries)
    }

    fn answers(&self, session_id: SessionId) -> Result<Vec<RecordedAnswer>, StoreError> {
        Ok(self.lock()?.session_answers(session_id))
    }

    fn answer_details(&self, session_id: SessionId) -> Result<Vec<AnswerDetail>, StoreError> {
        let guard = self.lock()?;
        Ok(guard
            .session_answers(session_id)
            .into_iter()
            .map(|answer| {
                let question = guard.question(answer.question_id);
                let answer_text = question
                    .and_then(|question| {
                        question
                            .options
                            .iter()
                            .find(|option| option.id == answer.option_id)
                    })
                    .map(|option| option.text.clone())
                    .unwrap_or_default();
                AnswerDetail {
                    question_id: answer.question_id,
                    order_index: answer.order_index,
                    question_text: question
                        .map(|question| question.text.clone())
                        .unwrap_or_default(),
                    answer_text,
                    score: answer.score,
                }
            })
            .collect())
    }

    fn upsert_answer(&self, answer: NewAnswer) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        match guard.sessions.get(&answer.session_id) {
            None => return Err(StoreError::NotFound),
            Some(session) if session.finished_at.is_some() => {
                return Err(StoreError::SessionFinished(answer.session_id))
            }
            Some(_) => {}
        }

        guard.answers.insert(
            (answer.session_id, answer.question_id),
            StoredAnswer {
                option_id: answer.option_id,
                score: answer.score,
                answered_at: answer.answered_at,
            },
        );
        Ok(())
    }

    fn commit_finish(
        &self,
        session_id: SessionId,
        assemble: &mut dyn FnMut(&[RecordedAnswer]) -> ResultReport,
    ) -> Result<ResultReport, StoreError> {
        let mut guard = self.lock()?;
        match guard.sessions.get(&session_id) {
            None => return Err(StoreError::NotFound),
            Some(session) if session.finished_at.is_some() => {
                return Err(StoreError::SessionFinished(session_id))
            }
            Some(_) => {}
        }

        let report = assemble(&guard.session_answers(session_id));
        guard.results.insert(session_id, report.result_records());
        guard.reports.insert(session_id, report.clone());
        if let Some(session) = guard.sessions.get_mut(&session_id) {
            session.finished_at = Some(report.completed_at);
        }
        Ok(report)
    }

    fn results(&self, session_id: SessionId) -> Result<Vec<ResultRecord>, StoreError> {
        Ok(self
            .lock()?
            .results
            .get(&session_id)
            .cloned()
            .unwrap_or_default())
    }

    fn report(&self, session_id: SessionId) -> Result<Option<ResultReport>, StoreError> {
        Ok(self.lock()?.reports.get(&session_id).cloned())
    }

    fn upsert_narrative(&self, narrative: &NarrativeRecord) -> Result<(), StoreError> {
        let mut guard = self.lock()?;
        if !guard.sessions.contains_key(&narrative.session_id) {
            return Err(StoreError::NotFound);
        }
        guard
            .narratives
            .insert(narrative.session_id, narrative.clone());
        Ok(())
    }

    fn narrative(&self, session_id: SessionId) -> Result<Option<NarrativeRecord>, StoreError> {
        Ok(self.lock()?.narratives.get(&session_id).cloned())
    }
}
