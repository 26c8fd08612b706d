use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::domain::{
    AnalysisTemplate, RecordedAnswer, ResultRecord, RiskRule, ScaleDefinition, TestId, TestRecord,
};
use super::scoring::{
    evaluate_rules, select_analysis, total_score, ReportAnalysis, RiskFlag, ScaleScore,
};

pub const DEFAULT_DISCLAIMER: &str = "This result is not a substitute for a professional \
evaluation by a psychologist or psychiatrist.";

/// Identity of the test as it was when the report was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSnapshot {
    pub id: TestId,
    pub slug: String,
    pub name: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportScores {
    pub total: i32,
    pub scales: Vec<ScaleScore>,
}

/// Immutable report stored once per session at the finish transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultReport {
    pub test: TestSnapshot,
    pub scores: ReportScores,
    pub analysis: ReportAnalysis,
    pub risk_flags: Vec<RiskFlag>,
    pub disclaimer: String,
    pub completed_at: DateTime<Utc>,
}

impl ResultReport {
    /// Per-scale rows persisted alongside the report.
    pub fn result_records(&self) -> Vec<ResultRecord> {
        self.scores
            .scales
            .iter()
            .map(|scale| ResultRecord {
                scale_id: scale.scale_id,
                scale_name: scale.scale_name.clone(),
                score: scale.score,
                interpretation: scale.interpretation(),
            })
            .collect()
    }
}

/// Everything the assembler reads for one session, fetched up front from the store.
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub test: TestRecord,
    pub scales: Vec<ScaleDefinition>,
    pub templates: Vec<AnalysisTemplate>,
    pub risk_rules: Vec<RiskRule>,
    /// Ordered by question display order.
    pub answers: Vec<RecordedAnswer>,
}

/// Scores, interprets, and flags the answer set. Never fails.
pub fn assemble_report(inputs: &ReportInputs, completed_at: DateTime<Utc>) -> ResultReport {
    let ReportInputs {
        test,
        scales,
        templates,
        risk_rules,
        answers,
    } = inputs;

    let scale_scores: Vec<ScaleScore> = scales
        .iter()
        .map(|scale| ScaleScore::compute(scale, answers))
        .collect();

    let analysis = select_analysis(test.id, &scale_scores, templates);
    let risk_flags = evaluate_rules(risk_rules, answers);

    let disclaimer = test
        .warning
        .as_deref()
        .map(str::trim)
        .filter(|warning| !warning.is_empty())
        .unwrap_or(DEFAULT_DISCLAIMER)
        .to_string();

    ResultReport {
        test: TestSnapshot {
            id: test.id,
            slug: test.slug.clone(),
            name: test.name.clone(),
            category: test.category.clone(),
        },
        scores: ReportScores {
            total: total_score(answers),
            scales: scale_scores,
        },
        analysis,
        risk_flags,
        disclaimer,
        completed_at,
    }
}
