//! Pure scoring and interpretation steps run at the finish transition.
//!
//! Nothing in here touches the store or fails: uncovered scores resolve to
//! [`Level::unknown`], missing templates leave report sections absent, and
//! malformed risk conditions never trigger.

mod cutoffs;
mod risk;
mod templates;

pub use cutoffs::{resolve_level, Level};
pub use risk::{evaluate_rules, Comparison, RiskCondition, RiskFlag};
pub use templates::{select_analysis, AnalysisSection, ReportAnalysis};

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::domain::{QuestionId, RecordedAnswer, ScaleDefinition, ScaleId};

/// Computed score and resolved level of one scale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleScore {
    pub scale_id: ScaleId,
    pub scale_name: String,
    pub score: i32,
    pub level: String,
    pub level_description: String,
}

impl ScaleScore {
    /// Scores the scale against the answer set and resolves its level.
    pub fn compute(scale: &ScaleDefinition, answers: &[RecordedAnswer]) -> Self {
        let score = scale_score(answers, &scale.question_ids);
        let level = resolve_level(score, &scale.cutoffs);
        if level.is_unknown() {
            tracing::warn!(
                scale_id = %scale.id,
                scale = %scale.name,
                score,
                "no cutoff covers scale score"
            );
        }

        Self {
            scale_id: scale.id,
            scale_name: scale.name.clone(),
            score,
            level: level.label,
            level_description: level.description,
        }
    }

    /// `"<level>: <description>"`, the form persisted on result rows.
    pub fn interpretation(&self) -> String {
        format!("{}: {}", self.level, self.level_description)
    }
}

/// Sum of every cached answer score, regardless of scale membership.
pub fn total_score(answers: &[RecordedAnswer]) -> i32 {
    answers.iter().map(|answer| answer.score).sum()
}

/// Sum of the answers whose question is mapped to the scale. Unanswered questions add nothing.
pub fn scale_score(answers: &[RecordedAnswer], question_ids: &[QuestionId]) -> i32 {
    let mapped: HashSet<QuestionId> = question_ids.iter().copied().collect();
    answers
        .iter()
        .filter(|answer| mapped.contains(&answer.question_id))
        .map(|answer| answer.score)
        .sum()
}
