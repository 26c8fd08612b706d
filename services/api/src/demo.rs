use clap::Args;
use mindlab::assessment::{
    load_definitions, AssessmentStore, CatalogError, MemoryStore, ResultReport, SessionService,
    UserId,
};
use mindlab::config::AppConfig;
use mindlab::error::AppError;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DEMO_USER: &str = "demo-user";

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Slug of the test to run
    #[arg(long, default_value = "phq-9")]
    pub(crate) slug: String,
    /// Directory holding test definition JSON files (defaults to MINDLAB_DEFINITIONS_DIR)
    #[arg(long)]
    pub(crate) definitions: Option<PathBuf>,
    /// Option position (0-based) chosen for every question, clamped to the last option
    #[arg(long, default_value_t = 1)]
    pub(crate) choice: usize,
    /// Comma-separated option positions per question; overrides --choice where present
    #[arg(long, value_delimiter = ',')]
    pub(crate) answers: Vec<usize>,
    /// Print the report as JSON instead of a text summary
    #[arg(long)]
    pub(crate) json: bool,
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let dir = match args.definitions.clone() {
        Some(dir) => dir,
        None => AppConfig::load()?.store.definitions_dir,
    };
    let report = scripted_report(&args, &dir)?;

    if args.json {
        let rendered = serde_json::to_string_pretty(&report).map_err(std::io::Error::other)?;
        println!("{rendered}");
    } else {
        println!("{}", render_report(&report));
    }
    Ok(())
}

/// Answers every question of one test in a throwaway store and returns the finished report.
fn scripted_report(args: &DemoArgs, dir: &Path) -> Result<ResultReport, AppError> {
    let definition = load_definitions(dir)?
        .definitions
        .into_iter()
        .find(|definition| definition.slug == args.slug)
        .ok_or_else(|| CatalogError::Invalid {
            slug: args.slug.clone(),
            reason: format!("no definition with this slug in {}", dir.display()),
        })?;
    definition.validate()?;

    let store = Arc::new(MemoryStore::default());
    let test_id = store.replace_test_content(&definition)?;
    let sessions = SessionService::new(store);
    let user = UserId(DEMO_USER.to_string());

    let start = sessions.start(&user, test_id)?;
    for (position, question) in start.questions.iter().enumerate() {
        let wanted = args.answers.get(position).copied().unwrap_or(args.choice);
        let index = wanted.min(question.options.len().saturating_sub(1));
        if let Some(option) = question.options.get(index) {
            sessions.record_answer(&user, start.session_id, question.id, option.id)?;
        }
    }

    Ok(sessions.finish(&user, start.session_id)?.report)
}

fn render_report(report: &ResultReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{} ({})", report.test.name, report.test.category);
    let _ = writeln!(out, "Total score: {}", report.scores.total);

    if !report.scores.scales.is_empty() {
        let _ = writeln!(out, "\nScales");
        for scale in &report.scores.scales {
            let _ = writeln!(
                out,
                "  {:<24} {:>3}  {}",
                scale.scale_name,
                scale.score,
                scale.interpretation()
            );
        }
    }

    let sections = report
        .analysis
        .overall
        .iter()
        .chain(report.analysis.highlights.iter());
    let mut wrote_heading = false;
    for section in sections {
        if !wrote_heading {
            let _ = writeln!(out, "\nAnalysis");
            wrote_heading = true;
        }
        let _ = writeln!(out, "  {}", section.title);
        if !section.summary.is_empty() {
            let _ = writeln!(out, "    {}", section.summary);
        }
        if !section.recommendations.is_empty() {
            let _ = writeln!(out, "    Recommendations: {}", section.recommendations);
        }
    }

    if !report.risk_flags.is_empty() {
        let _ = writeln!(out, "\nRisk flags");
        for flag in &report.risk_flags {
            let _ = writeln!(out, "  [{}] {}", flag.severity.label(), flag.message);
        }
    }

    let _ = write!(out, "\n{}", report.disclaimer);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(slug: &str, choice: usize, answers: Vec<usize>) -> DemoArgs {
        DemoArgs {
            slug: slug.to_string(),
            definitions: None,
            choice,
            answers,
            json: false,
        }
    }

    fn bundled_definitions() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../definitions")
    }

    #[test]
    fn phq9_demo_scores_every_question() {
        let report = scripted_report(&args("phq-9", 1, Vec::new()), &bundled_definitions())
            .expect("demo runs");

        assert_eq!(report.scores.total, 9);
        assert_eq!(report.scores.scales[0].level, "Mild");
        assert_eq!(report.risk_flags.len(), 1);

        let rendered = render_report(&report);
        assert!(rendered.starts_with("PHQ-9 Depression Questionnaire (depression)\n"));
        assert!(rendered.contains("Total score: 9"));
        assert!(rendered.contains("[critical]"));
    }

    #[test]
    fn explicit_answers_override_the_default_choice() {
        let report = scripted_report(&args("gad-7", 0, vec![3, 3, 9]), &bundled_definitions())
            .expect("demo runs");

        assert_eq!(report.scores.total, 9);
        assert!(report.risk_flags.is_empty());
    }

    #[test]
    fn unknown_slug_is_reported() {
        match scripted_report(&args("nope", 0, Vec::new()), &bundled_definitions()) {
            Err(AppError::Catalog(CatalogError::Invalid { slug, .. })) => assert_eq!(slug, "nope"),
            other => panic!("expected missing definition, got {other:?}"),
        }
    }
}
