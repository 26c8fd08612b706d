use std::sync::{mpsc, Arc};
use std::thread;

use axum::http::StatusCode;
use axum::response::Response;
use chrono::{TimeZone, Utc};
use serde_json::Value;

use crate::assessment::catalog::{
    CutoffEntry, OptionEntry, QuestionEntry, RiskRuleEntry, ScaleEntry, TemplateEntry,
    TestDefinition,
};
use crate::assessment::domain::{
    AnalysisMode, NewAnswer, OptionId, QuestionId, RecordedAnswer, RiskSeverity, SessionId,
    TestId, UserId,
};
use crate::assessment::memory::MemoryStore;
use crate::assessment::report::{assemble_report, ReportInputs, ResultReport};
use crate::assessment::service::{FinishOutcome, SessionService, SessionStart};
use crate::assessment::store::{AssessmentStore, StoreError};
use crate::assessment::{assessment_router, AdminAllowlist, AssessmentApi, NarrativeGenerator};

pub(super) const FREQUENCY: [&str; 4] = [
    "Not at all",
    "Several days",
    "More than half the days",
    "Nearly every day",
];

fn frequency_options() -> Vec<OptionEntry> {
    FREQUENCY
        .iter()
        .enumerate()
        .map(|(score, text)| OptionEntry {
            text: text.to_string(),
            score: score as i32,
        })
        .collect()
}

fn template(scale_key: Option<&str>, level: &str, title: &str) -> TemplateEntry {
    TemplateEntry {
        scale_key: scale_key.map(str::to_string),
        level_label: level.to_string(),
        title: title.to_string(),
        summary: format!("{title} summary"),
        details: format!("{title} details"),
        recommendations: format!("{title} recommendations"),
        disclaimer: None,
    }
}

fn cutoff(scale_key: &str, min: i32, max: i32, label: &str) -> CutoffEntry {
    CutoffEntry {
        scale_key: scale_key.to_string(),
        min,
        max,
        label: label.to_string(),
        description: format!("{label} range"),
    }
}

/// Nine 0-3 questions feeding one "Depression" scale, with a q9 risk rule.
pub(super) fn depression_definition() -> TestDefinition {
    TestDefinition {
        slug: "phq-9".to_string(),
        name: "PHQ-9".to_string(),
        description: "Depression screening".to_string(),
        category: "depression".to_string(),
        analysis_type: AnalysisMode::Direct,
        warning: None,
        scales: vec![ScaleEntry {
            key: "depression".to_string(),
            name: "Depression".to_string(),
        }],
        questions: (1..=9)
            .map(|order| QuestionEntry {
                order,
                text: format!("Item {order}"),
                scale_keys: vec!["depression".to_string()],
                options: frequency_options(),
            })
            .collect(),
        cutoffs: vec![
            cutoff("depression", 0, 4, "Minimal"),
            cutoff("depression", 5, 9, "Mild"),
            cutoff("depression", 10, 27, "Moderate+"),
        ],
        analysis_templates: vec![
            template(Some("depression"), "Minimal", "Few symptoms"),
            template(Some("depression"), "Mild", "Mild symptoms"),
        ],
        risk_rules: vec![RiskRuleEntry {
            condition: "q9_score >= 1".to_string(),
            message: "Thoughts of self-harm reported".to_string(),
            severity: RiskSeverity::Critical,
        }],
    }
}

/// Six questions, two per scale, three scales; templates exist for stress and anxiety only.
pub(super) fn three_scale_definition() -> TestDefinition {
    let scales = ["stress", "anxiety", "mood"];
    TestDefinition {
        slug: "triad".to_string(),
        name: "Triad".to_string(),
        description: "Three-scale profile".to_string(),
        category: "general".to_string(),
        analysis_type: AnalysisMode::Profile,
        warning: Some("Screening only.".to_string()),
        scales: scales
            .iter()
            .map(|key| ScaleEntry {
                key: key.to_string(),
                name: capitalize(key),
            })
            .collect(),
        questions: (1..=6)
            .map(|order| QuestionEntry {
                order,
                text: format!("Triad item {order}"),
                scale_keys: vec![scales[((order - 1) / 2) as usize].to_string()],
                options: frequency_options(),
            })
            .collect(),
        cutoffs: scales
            .iter()
            .flat_map(|key| [cutoff(key, 0, 2, "Normal"), cutoff(key, 3, 6, "Elevated")])
            .collect(),
        analysis_templates: vec![
            template(Some("stress"), "Normal", "Calm"),
            template(Some("anxiety"), "Normal", "Settled"),
            template(Some("stress"), "Elevated", "Strained"),
        ],
        risk_rules: Vec::new(),
    }
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub(super) fn user(name: &str) -> UserId {
    UserId(name.to_string())
}

pub(super) fn seeded_store(definitions: &[TestDefinition]) -> (Arc<MemoryStore>, Vec<TestId>) {
    let store = Arc::new(MemoryStore::default());
    let ids = definitions
        .iter()
        .map(|definition| {
            store
                .replace_test_content(definition)
                .expect("definition stores")
        })
        .collect();
    (store, ids)
}

pub(super) fn build_service(
    definitions: &[TestDefinition],
) -> (SessionService<MemoryStore>, Arc<MemoryStore>, Vec<TestId>) {
    let (store, ids) = seeded_store(definitions);
    (SessionService::new(Arc::clone(&store)), store, ids)
}

/// Question and option ids for the answer at display position `order` scoring `score`.
pub(super) fn pick<S: AssessmentStore>(
    store: &S,
    test_id: TestId,
    order: u32,
    score: i32,
) -> (QuestionId, OptionId) {
    let questions = store.questions(test_id).expect("questions load");
    let question = questions
        .iter()
        .find(|question| question.order_index == order)
        .unwrap_or_else(|| panic!("question {order} exists"));
    let option = question
        .options
        .iter()
        .find(|option| option.score == score)
        .unwrap_or_else(|| panic!("option scoring {score} exists"));
    (question.id, option.id)
}

pub(super) fn answer(order: u32, score: i32) -> RecordedAnswer {
    RecordedAnswer {
        question_id: QuestionId(100 + i64::from(order)),
        option_id: OptionId(1_000 + i64::from(order)),
        order_index: order,
        score,
        answered_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
    }
}

pub(super) fn api_with(
    definitions: &[TestDefinition],
    generator: Option<Arc<dyn NarrativeGenerator>>,
    definitions_dir: &std::path::Path,
) -> (Arc<AssessmentApi<MemoryStore>>, Arc<MemoryStore>, Vec<TestId>) {
    let (store, ids) = seeded_store(definitions);
    let api = Arc::new(AssessmentApi::new(
        Arc::clone(&store),
        generator,
        AdminAllowlist::parse("admin-1"),
        definitions_dir,
    ));
    (api, store, ids)
}

pub(super) fn router_for(api: Arc<AssessmentApi<MemoryStore>>) -> axum::Router {
    assessment_router(api)
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("body is json")
}

pub(super) async fn expect_status(response: Response, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    read_json_body(response).await
}

/// Answers every PHQ-9 item with score 1, resyncs the unchanged definition mid-session, then
/// resumes, re-answers item 1, and finishes.
pub(super) fn finish_after_identical_resync<S>(
    store: Arc<S>,
    test_id: TestId,
) -> (SessionStart, FinishOutcome)
where
    S: AssessmentStore + 'static,
{
    let service = SessionService::new(Arc::clone(&store));
    let caller = user("u-1");
    let start = service.start(&caller, test_id).expect("session starts");
    for order in 1..=9 {
        let (question_id, option_id) = pick(store.as_ref(), test_id, order, 1);
        service
            .record_answer(&caller, start.session_id, question_id, option_id)
            .expect("answer records");
    }

    let resynced = store
        .replace_test_content(&depression_definition())
        .expect("resync");
    assert_eq!(resynced, test_id);

    let resumed = service.start(&caller, test_id).expect("session resumes");
    let (question_id, option_id) = pick(store.as_ref(), test_id, 1, 1);
    service
        .record_answer(&caller, resumed.session_id, question_id, option_id)
        .expect("answer re-records");
    let outcome = service
        .finish(&caller, resumed.session_id)
        .expect("session finishes");
    (resumed, outcome)
}

/// Commits a PHQ-9 finish whose assembler starts a competing answer on another thread.
///
/// Returns the committed report and the outcome of the competing answer.
pub(super) fn answer_racing_finish<S>(
    store: Arc<S>,
    test_id: TestId,
) -> (SessionId, ResultReport, Result<(), StoreError>)
where
    S: AssessmentStore + 'static,
{
    let session = store
        .open_session(&user("u-1"), test_id, Utc::now())
        .expect("session opens")
        .session;
    let (question_id, option_id) = pick(store.as_ref(), test_id, 1, 2);
    store
        .upsert_answer(NewAnswer {
            session_id: session.id,
            question_id,
            option_id,
            score: 2,
            answered_at: Utc::now(),
        })
        .expect("answer stored");

    let mut inputs = ReportInputs {
        test: store
            .test(test_id)
            .expect("test loads")
            .expect("test exists"),
        scales: store.scales(test_id).expect("scales load"),
        templates: store.templates(test_id).expect("templates load"),
        risk_rules: store.risk_rules(test_id).expect("rules load"),
        answers: Vec::new(),
    };
    let (late_question, late_option) = pick(store.as_ref(), test_id, 9, 3);
    let (sender, receiver) = mpsc::channel();

    let report = store
        .commit_finish(session.id, &mut |answers: &[RecordedAnswer]| {
            let competing = Arc::clone(&store);
            let sender = sender.clone();
            let session_id = session.id;
            thread::spawn(move || {
                let outcome = competing.upsert_answer(NewAnswer {
                    session_id,
                    question_id: late_question,
                    option_id: late_option,
                    score: 3,
                    answered_at: Utc::now(),
                });
                let _ = sender.send(outcome);
            });

            inputs.answers = answers.to_vec();
            assemble_report(&inputs, Utc::now())
        })
        .expect("finish commits");

    let late = receiver.recv().expect("competing answer reports back");
    (session.id, report, late)
}
