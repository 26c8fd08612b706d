//! Canonical test definitions bundled as JSON files and their sync into a store.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::domain::{AnalysisMode, RiskSeverity};
use super::scoring::RiskCondition;
use super::store::{AssessmentStore, StoreError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDefinition {
    pub slug: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default = "default_analysis_type")]
    pub analysis_type: AnalysisMode,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub scales: Vec<ScaleEntry>,
    pub questions: Vec<QuestionEntry>,
    #[serde(default)]
    pub cutoffs: Vec<CutoffEntry>,
    #[serde(default)]
    pub analysis_templates: Vec<TemplateEntry>,
    #[serde(default)]
    pub risk_rules: Vec<RiskRuleEntry>,
}

fn default_analysis_type() -> AnalysisMode {
    AnalysisMode::Direct
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScaleEntry {
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionEntry {
    pub order: u32,
    pub text: String,
    /// A question may feed several scales, or none.
    #[serde(default)]
    pub scale_keys: Vec<String>,
    pub options: Vec<OptionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionEntry {
    pub text: String,
    pub score: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CutoffEntry {
    pub scale_key: String,
    pub min: i32,
    pub max: i32,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateEntry {
    /// Absent for whole-test templates.
    #[serde(default)]
    pub scale_key: Option<String>,
    pub level_label: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub recommendations: String,
    #[serde(default)]
    pub disclaimer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskRuleEntry {
    pub condition: String,
    pub message: String,
    pub severity: RiskSeverity,
}

impl TestDefinition {
    pub fn from_json(raw: &str) -> Result<Self, CatalogError> {
        serde_json::from_str(raw).map_err(|source| CatalogError::Parse {
            origin: "inline definition".to_string(),
            source,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
            origin: path.display().to_string(),
            source,
        })
    }

    /// Checks the structural invariants the scoring engine relies on.
    pub fn validate(&self) -> Result<(), CatalogError> {
        let invalid = |reason: String| CatalogError::Invalid {
            slug: self.slug.clone(),
            reason,
        };

        if self.slug.trim().is_empty() {
            return Err(invalid("slug must not be empty".to_string()));
        }

        let scale_keys: HashSet<&str> =
            self.scales.iter().map(|scale| scale.key.as_str()).collect();
        if scale_keys.len() != self.scales.len() {
            return Err(invalid("scale keys must be unique".to_string()));
        }
        let known_scale = |key: &str| -> Result<(), CatalogError> {
            if scale_keys.contains(key) {
                Ok(())
            } else {
                Err(invalid(format!("unknown scale key '{key}'")))
            }
        };

        let mut orders = HashSet::new();
        for question in &self.questions {
            if question.order == 0 {
                return Err(invalid(format!(
                    "question '{}' must have a 1-based order",
                    question.text
                )));
            }
            if !orders.insert(question.order) {
                return Err(invalid(format!("duplicate question order {}", question.order)));
            }
            if question.options.is_empty() {
                return Err(invalid(format!("question {} has no options", question.order)));
            }
            for key in &question.scale_keys {
                known_scale(key)?;
            }
        }

        for cutoff in &self.cutoffs {
            known_scale(&cutoff.scale_key)?;
            if cutoff.min > cutoff.max {
                return Err(invalid(format!(
                    "cutoff '{}' has min {} above max {}",
                    cutoff.label, cutoff.min, cutoff.max
                )));
            }
        }

        for template in &self.analysis_templates {
            if let Some(key) = &template.scale_key {
                known_scale(key)?;
            }
        }

        Ok(())
    }
}

/// Definitions read from a directory together with the files that could not be used.
#[derive(Debug, Default)]
pub struct LoadedDefinitions {
    pub definitions: Vec<TestDefinition>,
    pub failures: Vec<CatalogError>,
}

/// Reads every `*.json` definition in `dir`, sorted by file name.
///
/// Only an unreadable directory is an error; a file that cannot be read or parsed lands in
/// `failures` and the remaining files still load.
pub fn load_definitions(dir: impl AsRef<Path>) -> Result<LoadedDefinitions, CatalogError> {
    let dir = dir.as_ref();
    let entries = fs::read_dir(dir).map_err(|source| CatalogError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| CatalogError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut loaded = LoadedDefinitions::default();
    for path in &paths {
        match TestDefinition::from_path(path) {
            Ok(definition) => loaded.definitions.push(definition),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping test definition");
                loaded.failures.push(err);
            }
        }
    }
    Ok(loaded)
}

/// Tally returned by a sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub tests_processed: usize,
    pub tests_selected: usize,
    pub errors: Vec<String>,
}

/// Writes definitions into the store, optionally only the one matching `slug`.
///
/// A failing definition is recorded in the summary and does not stop the others.
pub fn sync_definitions<S>(
    store: &S,
    definitions: &[TestDefinition],
    slug: Option<&str>,
) -> SyncSummary
where
    S: AssessmentStore + ?Sized,
{
    let mut summary = SyncSummary::default();

    for definition in definitions
        .iter()
        .filter(|definition| slug.map_or(true, |slug| definition.slug == slug))
    {
        summary.tests_selected += 1;
        match sync_one(store, definition) {
            Ok(()) => summary.tests_processed += 1,
            Err(err) => {
                tracing::warn!(
                    slug = %definition.slug,
                    error = %err,
                    "test definition sync failed"
                );
                summary.errors.push(format!("{}: {}", definition.slug, err));
            }
        }
    }

    tracing::info!(
        processed = summary.tests_processed,
        selected = summary.tests_selected,
        "test definitions synced"
    );
    summary
}

/// Loads `dir` and syncs what parsed; unusable files are reported in `errors` ahead of the
/// per-definition failures.
pub fn sync_directory<S>(
    store: &S,
    dir: impl AsRef<Path>,
    slug: Option<&str>,
) -> Result<SyncSummary, CatalogError>
where
    S: AssessmentStore + ?Sized,
{
    let loaded = load_definitions(dir)?;
    let mut summary = sync_definitions(store, &loaded.definitions, slug);
    let mut errors: Vec<String> = loaded.failures.iter().map(ToString::to_string).collect();
    errors.append(&mut summary.errors);
    summary.errors = errors;
    Ok(summary)
}

fn sync_one<S>(store: &S, definition: &TestDefinition) -> Result<(), CatalogError>
where
    S: AssessmentStore + ?Sized,
{
    definition.validate()?;

    for rule in &definition.risk_rules {
        if RiskCondition::parse(&rule.condition).is_none() {
            tracing::warn!(
                slug = %definition.slug,
                condition = %rule.condition,
                "risk rule condition will never trigger"
            );
        }
    }

    let test_id = store.replace_test_content(definition)?;
    tracing::debug!(slug = %definition.slug, %test_id, "test content replaced");
    Ok(())
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid definition json in {origin}: {source}")]
    Parse {
        origin: String,
        source: serde_json::Error,
    },
    #[error("definition '{slug}' is invalid: {reason}")]
    Invalid { slug: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
