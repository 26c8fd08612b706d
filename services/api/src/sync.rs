use crate::infra::{open_store, StoreChoice};
use clap::Args;
use mindlab::assessment::{sync_directory, AssessmentStore, SyncSummary};
use mindlab::config::AppConfig;
use mindlab::error::AppError;
use mindlab::telemetry;
use std::path::{Path, PathBuf};

#[derive(Args, Debug, Default)]
pub(crate) struct SyncArgs {
    /// Directory holding test definition JSON files (defaults to MINDLAB_DEFINITIONS_DIR)
    #[arg(long)]
    pub(crate) dir: Option<PathBuf>,
    /// Only sync the definition with this slug
    #[arg(long)]
    pub(crate) slug: Option<String>,
    /// SQLite database to write into; without one the definitions are only validated
    #[arg(long)]
    pub(crate) database: Option<PathBuf>,
}

pub(crate) fn run_sync(args: SyncArgs) -> Result<(), AppError> {
    let config = AppConfig::load()?;
    telemetry::init(&config.telemetry)?;

    let dir = args.dir.unwrap_or(config.store.definitions_dir);
    let database = args.database.or(config.store.database_path);

    let summary = match open_store(database.as_deref())? {
        StoreChoice::Sqlite(store) => sync_from(store.as_ref(), &dir, args.slug.as_deref())?,
        StoreChoice::Memory(store) => sync_from(store.as_ref(), &dir, args.slug.as_deref())?,
    };

    println!("{}", render_summary(&summary, args.slug.as_deref()));
    Ok(())
}

fn sync_from<S>(store: &S, dir: &Path, slug: Option<&str>) -> Result<SyncSummary, AppError>
where
    S: AssessmentStore,
{
    Ok(sync_directory(store, dir, slug)?)
}

fn render_summary(summary: &SyncSummary, slug: Option<&str>) -> String {
    let mut lines = Vec::new();
    if let (Some(slug), 0) = (slug, summary.tests_selected) {
        lines.push(format!("No definition with slug '{slug}' was found."));
    }
    lines.push(format!(
        "Synced {} of {} test definition(s).",
        summary.tests_processed, summary.tests_selected
    ));
    for error in &summary.errors {
        lines.push(format!("  error: {error}"));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use mindlab::assessment::MemoryStore;

    fn bundled_definitions() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../definitions")
    }

    #[test]
    fn syncs_bundled_definitions_into_a_store() {
        let store = MemoryStore::default();
        let summary = sync_from(&store, &bundled_definitions(), None).expect("sync runs");
        assert_eq!(summary.tests_processed, 3);
        assert_eq!(store.tests().expect("tests load").len(), 3);

        let rendered = render_summary(&summary, None);
        assert_eq!(rendered, "Synced 3 of 3 test definition(s).");
    }

    #[test]
    fn summary_mentions_unknown_slug_and_errors() {
        let summary = SyncSummary {
            tests_processed: 0,
            tests_selected: 0,
            errors: vec!["broken: invalid".to_string()],
        };
        let rendered = render_summary(&summary, Some("missing"));
        assert!(rendered.starts_with("No definition with slug 'missing' was found."));
        assert!(rendered.ends_with("  error: broken: invalid"));
    }
}
