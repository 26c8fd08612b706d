use serde::{Deserialize, Serialize};

use super::super::domain::{AnalysisTemplate, ScaleId, TestId};
use super::ScaleScore;

/// Narrative block copied out of a template into the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSection {
    pub title: String,
    pub summary: String,
    pub details: String,
    pub recommendations: String,
}

impl AnalysisSection {
    fn from_template(template: &AnalysisTemplate) -> Self {
        Self {
            title: template.title.clone(),
            summary: template.summary.clone(),
            details: template.details.clone(),
            recommendations: template.recommendations.clone(),
        }
    }

    fn highlight(scale_name: &str, template: &AnalysisTemplate) -> Self {
        Self {
            title: format!("{}: {}", scale_name, template.title),
            ..Self::from_template(template)
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportAnalysis {
    pub overall: Option<AnalysisSection>,
    pub highlights: Vec<AnalysisSection>,
}

/// Template scoped to exactly this scale and level, else the whole-test template for the level.
fn template_for_scale<'a>(
    templates: &[&'a AnalysisTemplate],
    scale_id: ScaleId,
    level: &str,
) -> Option<&'a AnalysisTemplate> {
    let exact = templates
        .iter()
        .find(|template| template.scale_id == Some(scale_id) && template.level_label == level);
    let whole_test = || {
        templates
            .iter()
            .find(|template| template.scale_id.is_none() && template.level_label == level)
    };

    exact.or_else(whole_test).copied()
}

/// Any template of the test carrying the level label, whole-test ones first.
fn template_for_level<'a>(
    templates: &[&'a AnalysisTemplate],
    level: &str,
) -> Option<&'a AnalysisTemplate> {
    let whole_test = templates
        .iter()
        .find(|template| template.scale_id.is_none() && template.level_label == level);
    let any_scale = || {
        templates
            .iter()
            .find(|template| template.level_label == level)
    };

    whole_test.or_else(any_scale).copied()
}

/// Chooses the report's narrative sections for the scored scales.
///
/// A single-scale test puts its matched template in `overall`. Multi-scale tests collect one
/// highlight per matched scale and leave `overall` empty, unless nothing matched at all: then the
/// first scale's level is looked up across every template of the test.
pub fn select_analysis(
    test_id: TestId,
    scales: &[ScaleScore],
    templates: &[AnalysisTemplate],
) -> ReportAnalysis {
    let templates: Vec<&AnalysisTemplate> = templates
        .iter()
        .filter(|template| template.test_id == test_id)
        .collect();

    let mut analysis = ReportAnalysis::default();
    let single_scale = scales.len() == 1;

    for scale in scales {
        let Some(template) = template_for_scale(&templates, scale.scale_id, &scale.level) else {
            continue;
        };

        if single_scale {
            analysis.overall = Some(AnalysisSection::from_template(template));
        } else {
            analysis
                .highlights
                .push(AnalysisSection::highlight(&scale.scale_name, template));
        }
    }

    if analysis.overall.is_none() && analysis.highlights.is_empty() {
        if let Some(first) = scales.first() {
            analysis.overall =
                template_for_level(&templates, &first.level).map(AnalysisSection::from_template);
        }
    }

    analysis
}
