use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::catalog::TestDefinition;
use super::domain::{
    AnalysisMode, AnalysisTemplate, AnswerDetail, AnswerOption, Cutoff, NarrativeRecord,
    NewAnswer, OptionId, Question, QuestionId, RecordedAnswer, ResultRecord, RiskRule,
    RiskSeverity, ScaleDefinition, ScaleId, Session, SessionId, SessionStatus, SessionSummary,
    TestId, TestRecord, UserId,
};
use super::report::ResultReport;
use super::store::{AssessmentStore, OpenedSession, OptionChoice, StoreError};

const MIGRATIONS: &[(i64, &str)] = &[
    (1, include_str!("../../migrations/001_initial.sql")),
    (2, include_str!("../../migrations/002_stable_content.sql")),
];

/// SQLite-backed store. One connection behind a mutex; multi-statement writes run in
/// immediate transactions.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Opens (or creates) the database file and applies pending migrations.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "PRAGMA foreign_keys=ON;
             PRAGMA busy_timeout=5000;",
        )?;
        run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("sqlite connection lock poisoned".to_string()))
    }

    /// Highest applied migration version.
    pub fn schema_version(&self) -> Result<i64, StoreError> {
        let conn = self.conn()?;
        Ok(current_version(&*conn))
    }
}

fn run_migrations(conn: &Connection) -> Result<(), StoreError> {
    let current = current_version(conn);

    for &(version, sql) in MIGRATIONS {
        if version > current {
            tracing::info!(version, "applying store migration");
            conn.execute_batch(sql)
                .map_err(|err| StoreError::Migration {
                    version,
                    reason: err.to_string(),
                })?;
        }
    }

    Ok(())
}

/// 0 before the first migration created `schema_version`.
fn current_version(conn: &Connection) -> i64 {
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

fn conversion_error(column: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, message.into())
}

fn test_from_row(row: &Row<'_>) -> rusqlite::Result<TestRecord> {
    let raw_mode: String = row.get(5)?;
    let analysis_mode = AnalysisMode::parse(&raw_mode)
        .ok_or_else(|| conversion_error(5, format!("unknown analysis type '{raw_mode}'")))?;

    Ok(TestRecord {
        id: TestId(row.get(0)?),
        slug: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        category: row.get(4)?,
        analysis_mode,
        warning: row.get(6)?,
    })
}

fn session_from_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: SessionId(row.get(0)?),
        test_id: TestId(row.get(1)?),
        user_id: UserId(row.get(2)?),
        created_at: row.get(3)?,
        finished_at: row.get(4)?,
    })
}

fn session_answers(
    conn: &Connection,
    session_id: SessionId,
) -> Result<Vec<RecordedAnswer>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT a.question_id, a.option_id, COALESCE(q.order_index, 0) AS position, a.score,
                a.answered_at
         FROM answers a LEFT JOIN questions q ON q.id = a.question_id
         WHERE a.session_id = ?1
         ORDER BY position, a.question_id",
    )?;
    let answers = stmt
        .query_map(params![session_id.0], |row| {
            Ok(RecordedAnswer {
                question_id: QuestionId(row.get(0)?),
                option_id: OptionId(row.get(1)?),
                order_index: row.get(2)?,
                score: row.get(3)?,
                answered_at: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(answers)
}

const TEST_COLUMNS: &str =
    "id, slug, name, description, category, analysis_type, warning";
const SESSION_COLUMNS: &str = "id, test_id, user_id, created_at, finished_at";

impl AssessmentStore for SqliteStore {
    fn tests(&self) -> Result<Vec<TestRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEST_COLUMNS} FROM tests ORDER BY name, id"
        ))?;
        let tests = stmt
            .query_map([], test_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tests)
    }

    fn test(&self, id: TestId) -> Result<Option<TestRecord>, StoreError> {
        let conn = self.conn()?;
        let test = conn
            .query_row(
                &format!("SELECT {TEST_COLUMNS} FROM tests WHERE id = ?1"),
                params![id.0],
                test_from_row,
            )
            .optional()?;
        Ok(test)
    }

    fn questions(&self, test_id: TestId) -> Result<Vec<Question>, StoreError> {
        let conn = self.conn()?;

        let mut options: HashMap<QuestionId, Vec<AnswerOption>> = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT o.id, o.question_id, o.text, o.score, o.order_index
             FROM options o JOIN questions q ON q.id = o.question_id
             WHERE q.test_id = ?1
             ORDER BY o.question_id, o.order_index, o.id",
        )?;
        let rows = stmt.query_map(params![test_id.0], |row| {
            Ok(AnswerOption {
                id: OptionId(row.get(0)?),
                question_id: QuestionId(row.get(1)?),
                text: row.get(2)?,
                score: row.get(3)?,
                order_index: row.get(4)?,
            })
        })?;
        for option in rows {
            let option = option?;
            options.entry(option.question_id).or_default().push(option);
        }

        let mut stmt = conn.prepare(
            "SELECT id, test_id, text, order_index FROM questions
             WHERE test_id = ?1 ORDER BY order_index, id",
        )?;
        let questions = stmt
            .query_map(params![test_id.0], |row| {
                Ok(Question {
                    id: QuestionId(row.get(0)?),
                    test_id: TestId(row.get(1)?),
                    text: row.get(2)?,
                    order_index: row.get(3)?,
                    options: Vec::new(),
                })
            })?
            .map(|question| {
                question.map(|mut question| {
                    question.options = options.remove(&question.id).unwrap_or_default();
                    question
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(questions)
    }

    fn option_choice(
        &self,
        question_id: QuestionId,
        option_id: OptionId,
    ) -> Result<Option<OptionChoice>, StoreError> {
        let conn = self.conn()?;
        let choice = conn
            .query_row(
                "SELECT o.id, o.question_id, o.text, o.score, o.order_index, q.test_id
                 FROM options o JOIN questions q ON q.id = o.question_id
                 WHERE o.id = ?1 AND o.question_id = ?2",
                params![option_id.0, question_id.0],
                |row| {
                    Ok(OptionChoice {
                        option: AnswerOption {
                            id: OptionId(row.get(0)?),
                            question_id: QuestionId(row.get(1)?),
                            text: row.get(2)?,
                            score: row.get(3)?,
                            order_index: row.get(4)?,
                        },
                        test_id: TestId(row.get(5)?),
                    })
                },
            )
            .optional()?;
        Ok(choice)
    }

    fn scales(&self, test_id: TestId) -> Result<Vec<ScaleDefinition>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT id, name FROM scales WHERE test_id = ?1 ORDER BY position, id")?;
        let heads = stmt
            .query_map(params![test_id.0], |row| {
                Ok((ScaleId(row.get(0)?), row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut member_stmt = conn.prepare(
            "SELECT qs.question_id FROM question_scales qs
             JOIN questions q ON q.id = qs.question_id
             WHERE qs.scale_id = ?1 ORDER BY q.order_index",
        )?;
        let mut cutoff_stmt = conn.prepare(
            "SELECT min_score, max_score, label, description FROM cutoffs
             WHERE scale_id = ?1 ORDER BY id",
        )?;

        let mut scales = Vec::with_capacity(heads.len());
        for (id, name) in heads {
            let question_ids = member_stmt
                .query_map(params![id.0], |row| Ok(QuestionId(row.get(0)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            let cutoffs = cutoff_stmt
                .query_map(params![id.0], |row| {
                    Ok(Cutoff {
                        min_score: row.get(0)?,
                        max_score: row.get(1)?,
                        label: row.get(2)?,
                        description: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            scales.push(ScaleDefinition {
                id,
                test_id,
                name,
                question_ids,
                cutoffs,
            });
        }
        Ok(scales)
    }

    fn templates(&self, test_id: TestId) -> Result<Vec<AnalysisTemplate>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT test_id, scale_id, level_label, title, summary, details, recommendations,
                    disclaimer
             FROM analysis_templates WHERE test_id = ?1 ORDER BY id",
        )?;
        let templates = stmt
            .query_map(params![test_id.0], |row| {
                Ok(AnalysisTemplate {
                    test_id: TestId(row.get(0)?),
                    scale_id: row.get::<_, Option<i64>>(1)?.map(ScaleId),
                    level_label: row.get(2)?,
                    title: row.get(3)?,
                    summary: row.get(4)?,
                    details: row.get(5)?,
                    recommendations: row.get(6)?,
                    disclaimer: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    fn risk_rules(&self, test_id: TestId) -> Result<Vec<RiskRule>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT test_id, condition_expr, message, severity FROM risk_rules
             WHERE test_id = ?1 ORDER BY id",
        )?;
        let rules = stmt
            .query_map(params![test_id.0], |row| {
                let raw: String = row.get(3)?;
                let severity = RiskSeverity::parse(&raw)
                    .ok_or_else(|| conversion_error(3, format!("unknown severity '{raw}'")))?;
                Ok(RiskRule {
                    test_id: TestId(row.get(0)?),
                    condition_expr: row.get(1)?,
                    message: row.get(2)?,
                    severity,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rules)
    }

    fn replace_test_content(&self, definition: &TestDefinition) -> Result<TestId, StoreError> {
        let definition_json = serde_json::to_string(definition)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let stored: Option<(i64, Option<String>)> = tx
            .query_row(
                "SELECT id, definition_json FROM tests WHERE slug = ?1",
                params![definition.slug],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let Some((test_id, Some(previous))) = &stored {
            if *previous == definition_json {
                return Ok(TestId(*test_id));
            }
        }

        tx.execute(
            "INSERT INTO tests
                (slug, name, description, category, analysis_type, warning, definition_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(slug) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                category = excluded.category,
                analysis_type = excluded.analysis_type,
                warning = excluded.warning,
                definition_json = excluded.definition_json",
            params![
                definition.slug,
                definition.name,
                definition.description,
                definition.category,
                definition.analysis_type.label(),
                definition.warning,
                definition_json,
            ],
        )?;
        let test_id: i64 = tx.query_row(
            "SELECT id FROM tests WHERE slug = ?1",
            params![definition.slug],
            |row| row.get(0),
        )?;

        // Memberships, cutoffs, templates, and rules carry no ids anyone keeps; rebuild them.
        tx.execute(
            "DELETE FROM question_scales
             WHERE question_id IN (SELECT id FROM questions WHERE test_id = ?1)",
            params![test_id],
        )?;
        tx.execute(
            "DELETE FROM cutoffs WHERE scale_id IN (SELECT id FROM scales WHERE test_id = ?1)",
            params![test_id],
        )?;
        for table in ["analysis_templates", "risk_rules"] {
            tx.execute(
                &format!("DELETE FROM {table} WHERE test_id = ?1"),
                params![test_id],
            )?;
        }

        let mut scale_ids: HashMap<&str, i64> = HashMap::new();
        for (position, scale) in definition.scales.iter().enumerate() {
            let scale_id: i64 = tx.query_row(
                "INSERT INTO scales (test_id, name, position) VALUES (?1, ?2, ?3)
                 ON CONFLICT(test_id, position) DO UPDATE SET name = excluded.name
                 RETURNING id",
                params![test_id, scale.name, position as i64],
                |row| row.get(0),
            )?;
            scale_ids.insert(scale.key.as_str(), scale_id);
        }
        tx.execute(
            "DELETE FROM scales WHERE test_id = ?1 AND position >= ?2",
            params![test_id, definition.scales.len() as i64],
        )?;
        let scale_id = |key: &str| -> Result<i64, StoreError> {
            scale_ids
                .get(key)
                .copied()
                .ok_or_else(|| StoreError::InvalidContent(format!("unknown scale key '{key}'")))
        };

        let mut kept_questions = Vec::with_capacity(definition.questions.len());
        for question in &definition.questions {
            let question_id: i64 = tx.query_row(
                "INSERT INTO questions (test_id, text, order_index) VALUES (?1, ?2, ?3)
                 ON CONFLICT(test_id, order_index) DO UPDATE SET text = excluded.text
                 RETURNING id",
                params![test_id, question.text, question.order],
                |row| row.get(0),
            )?;
            kept_questions.push(question_id);

            for (position, option) in question.options.iter().enumerate() {
                tx.execute(
                    "INSERT INTO options (question_id, text, score, order_index)
                     VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(question_id, order_index) DO UPDATE SET
                        text = excluded.text,
                        score = excluded.score",
                    params![question_id, option.text, option.score, position as i64],
                )?;
            }
            tx.execute(
                "DELETE FROM options WHERE question_id = ?1 AND order_index >= ?2",
                params![question_id, question.options.len() as i64],
            )?;

            for key in &question.scale_keys {
                tx.execute(
                    "INSERT OR IGNORE INTO question_scales (question_id, scale_id)
                     VALUES (?1, ?2)",
                    params![question_id, scale_id(key)?],
                )?;
            }
        }

        let mut stale_stmt = tx.prepare("SELECT id FROM questions WHERE test_id = ?1")?;
        let stale: Vec<i64> = stale_stmt
            .query_map(params![test_id], |row| row.get(0))?
            .collect::<Result<Vec<i64>, _>>()?
            .into_iter()
            .filter(|id| !kept_questions.contains(id))
            .collect();
        drop(stale_stmt);
        for question_id in stale {
            tx.execute("DELETE FROM questions WHERE id = ?1", params![question_id])?;
        }

        for cutoff in &definition.cutoffs {
            tx.execute(
                "INSERT INTO cutoffs (scale_id, min_score, max_score, label, description)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    scale_id(&cutoff.scale_key)?,
                    cutoff.min,
                    cutoff.max,
                    cutoff.label,
                    cutoff.description,
                ],
            )?;
        }

        for template in &definition.analysis_templates {
            let template_scale = match &template.scale_key {
                Some(key) => Some(scale_id(key)?),
                None => None,
            };
            tx.execute(
                "INSERT INTO analysis_templates
                    (test_id, scale_id, level_label, title, summary, details, recommendations,
                     disclaimer)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    test_id,
                    template_scale,
                    template.level_label,
                    template.title,
                    template.summary,
                    template.details,
                    template.recommendations,
                    template.disclaimer,
                ],
            )?;
        }

        for rule in &definition.risk_rules {
            tx.execute(
                "INSERT INTO risk_rules (test_id, condition_expr, message, severity)
                 VALUES (?1, ?2, ?3, ?4)",
                params![test_id, rule.condition, rule.message, rule.severity.label()],
            )?;
        }

        tx.commit()?;
        Ok(TestId(test_id))
    }

    fn open_session(
        &self,
        user: &UserId,
        test_id: TestId,
        now: DateTime<Utc>,
    ) -> Result<OpenedSession, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let inserted = tx.execute(
            "INSERT INTO sessions (test_id, user_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT (user_id, test_id) WHERE finished_at IS NULL DO NOTHING",
            params![test_id.0, user.0, now],
        )?;
        let session = tx.query_row(
            &format!(
                "SELECT {SESSION_COLUMNS} FROM sessions
                 WHERE user_id = ?1 AND test_id = ?2 AND finished_at IS NULL
                 ORDER BY created_at DESC, id DESC LIMIT 1"
            ),
            params![user.0, test_id.0],
            session_from_row,
        )?;
        tx.commit()?;

        Ok(OpenedSession {
            session,
            resumed: inserted == 0,
        })
    }

    fn session(&self, id: SessionId) -> Result<Option<Session>, StoreError> {
        let conn = self.conn()?;
        let session = conn
            .query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id.0],
                session_from_row,
            )
            .optional()?;
        Ok(session)
    }

    fn sessions_for_user(&self, user: &UserId) -> Result<Vec<SessionSummary>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT s.id, s.test_id, COALESCE(t.name, ''), COALESCE(t.category, ''),
                    s.created_at, s.finished_at,
                    COALESCE((SELECT SUM(a.score) FROM answers a WHERE a.session_id = s.id), 0)
             FROM sessions s LEFT JOIN tests t ON t.id = s.test_id
             WHERE s.user_id = ?1
             ORDER BY s.created_at DESC, s.id DESC",
        )?;
        let summaries = stmt
            .query_map(params![user.0], |row| {
                let finished_at: Option<DateTime<Utc>> = row.get(5)?;
                Ok(SessionSummary {
                    id: SessionId(row.get(0)?),
                    test_id: TestId(row.get(1)?),
                    test_name: row.get(2)?,
                    category: row.get(3)?,
                    status: if finished_at.is_some() {
                        SessionStatus::Finished
                    } else {
                        SessionStatus::Active
                    },
                    created_at: row.get(4)?,
                    finished_at,
                    total_score: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn answers(&self, session_id: SessionId) -> Result<Vec<RecordedAnswer>, StoreError> {
        session_answers(&*self.conn()?, session_id)
    }

    fn answer_details(&self, session_id: SessionId) -> Result<Vec<AnswerDetail>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT a.question_id, COALESCE(q.order_index, 0) AS position, COALESCE(q.text, ''),
                    COALESCE(o.text, ''), a.score
             FROM answers a
             LEFT JOIN questions q ON q.id = a.question_id
             LEFT JOIN options o ON o.id = a.option_id
             WHERE a.session_id = ?1
             ORDER BY position, a.question_id",
        )?;
        let details = stmt
            .query_map(params![session_id.0], |row| {
                Ok(AnswerDetail {
                    question_id: QuestionId(row.get(0)?),
                    order_index: row.get(1)?,
                    question_text: row.get(2)?,
                    answer_text: row.get(3)?,
                    score: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(details)
    }

    fn upsert_answer(&self, answer: NewAnswer) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let finished_at: Option<Option<DateTime<Utc>>> = tx
            .query_row(
                "SELECT finished_at FROM sessions WHERE id = ?1",
                params![answer.session_id.0],
                |row| row.get(0),
            )
            .optional()?;
        match finished_at {
            None => return Err(StoreError::NotFound),
            Some(Some(_)) => return Err(StoreError::SessionFinished(answer.session_id)),
            Some(None) => {}
        }

        tx.execute(
            "INSERT INTO answers (session_id, question_id, option_id, score, answered_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(session_id, question_id) DO UPDATE SET
                option_id = excluded.option_id,
                score = excluded.score,
                answered_at = excluded.answered_at",
            params![
                answer.session_id.0,
                answer.question_id.0,
                answer.option_id.0,
                answer.score,
                answer.answered_at,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn commit_finish(
        &self,
        session_id: SessionId,
        assemble: &mut dyn FnMut(&[RecordedAnswer]) -> ResultReport,
    ) -> Result<ResultReport, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let finished_at: Option<Option<DateTime<Utc>>> = tx
            .query_row(
                "SELECT finished_at FROM sessions WHERE id = ?1",
                params![session_id.0],
                |row| row.get(0),
            )
            .optional()?;
        match finished_at {
            None => return Err(StoreError::NotFound),
            Some(Some(_)) => return Err(StoreError::SessionFinished(session_id)),
            Some(None) => {}
        }

        let report = assemble(&session_answers(&tx, session_id)?);
        let report_json = serde_json::to_string(&report)?;

        for record in report.result_records() {
            tx.execute(
                "INSERT INTO results (session_id, scale_id, scale_name, score, interpretation)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(session_id, scale_id) DO UPDATE SET
                    scale_name = excluded.scale_name,
                    score = excluded.score,
                    interpretation = excluded.interpretation",
                params![
                    session_id.0,
                    record.scale_id.0,
                    record.scale_name,
                    record.score,
                    record.interpretation,
                ],
            )?;
        }

        tx.execute(
            "INSERT INTO result_reports (session_id, report_json, created_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(session_id) DO UPDATE SET
                report_json = excluded.report_json,
                created_at = excluded.created_at",
            params![session_id.0, report_json, report.completed_at],
        )?;

        let finished = tx.execute(
            "UPDATE sessions SET finished_at = ?2 WHERE id = ?1 AND finished_at IS NULL",
            params![session_id.0, report.completed_at],
        )?;
        if finished == 0 {
            return Err(StoreError::SessionFinished(session_id));
        }

        tx.commit()?;
        Ok(report)
    }

    fn results(&self, session_id: SessionId) -> Result<Vec<ResultRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT scale_id, scale_name, score, interpretation FROM results
             WHERE session_id = ?1 ORDER BY id",
        )?;
        let results = stmt
            .query_map(params![session_id.0], |row| {
                Ok(ResultRecord {
                    scale_id: ScaleId(row.get(0)?),
                    scale_name: row.get(1)?,
                    score: row.get(2)?,
                    interpretation: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(results)
    }

    fn report(&self, session_id: SessionId) -> Result<Option<ResultReport>, StoreError> {
        let raw: Option<String> = {
            let conn = self.conn()?;
            conn.query_row(
                "SELECT report_json FROM result_reports WHERE session_id = ?1",
                params![session_id.0],
                |row| row.get(0),
            )
            .optional()?
        };
        raw.map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    fn upsert_narrative(&self, narrative: &NarrativeRecord) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let exists: Option<i64> = conn
            .query_row(
                "SELECT id FROM sessions WHERE id = ?1",
                params![narrative.session_id.0],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::NotFound);
        }

        conn.execute(
            "INSERT INTO narratives (session_id, text, model, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                text = excluded.text,
                model = excluded.model,
                created_at = excluded.created_at",
            params![
                narrative.session_id.0,
                narrative.text,
                narrative.model,
                narrative.created_at,
            ],
        )?;
        Ok(())
    }

    fn narrative(&self, session_id: SessionId) -> Result<Option<NarrativeRecord>, StoreError> {
        let conn = self.conn()?;
        let narrative = conn
            .query_row(
                "SELECT session_id, text, model, created_at FROM narratives
                 WHERE session_id = ?1",
                params![session_id.0],
                |row| {
                    Ok(NarrativeRecord {
                        session_id: SessionId(row.get(0)?),
                        text: row.get(1)?,
                        model: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(narrative)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_apply_once() {
        let store = SqliteStore::open_in_memory().expect("store opens");
        assert_eq!(store.schema_version().expect("version"), 2);

        let conn = store.conn().expect("lock");
        run_migrations(&conn).expect("rerun is a no-op");
        let fk: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .expect("pragma");
        assert_eq!(fk, 1);
    }

    #[test]
    fn file_backed_store_persists_between_opens() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mindlab.db");

        {
            let store = SqliteStore::open(&path).expect("store opens");
            let now = Utc::now();
            store
                .open_session(&UserId("u-1".into()), TestId(7), now)
                .expect("session opens");
        }

        let reopened = SqliteStore::open(&path).expect("store reopens");
        let sessions = reopened
            .sessions_for_user(&UserId("u-1".into()))
            .expect("history");
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].test_id, TestId(7));
        assert_eq!(reopened.schema_version().expect("version"), 2);
    }
}
