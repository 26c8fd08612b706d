use super::common::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::assessment::catalog::{
    load_definitions, sync_definitions, sync_directory, CatalogError, CutoffEntry, TestDefinition,
};
use crate::assessment::domain::{AnalysisMode, RiskSeverity};
use crate::assessment::memory::MemoryStore;
use crate::assessment::store::AssessmentStore;

fn bundled_definitions_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../definitions")
}

fn write_definition(dir: &Path, file_name: &str, definition: &TestDefinition) {
    let raw = serde_json::to_string_pretty(definition).expect("definition encodes");
    fs::write(dir.join(file_name), raw).expect("definition written");
}

fn expect_invalid(definition: &TestDefinition, fragment: &str) {
    match definition.validate() {
        Err(CatalogError::Invalid { reason, .. }) => {
            assert!(reason.contains(fragment), "unexpected reason: {reason}");
        }
        other => panic!("expected invalid definition, got {other:?}"),
    }
}

#[test]
fn fixtures_pass_validation() {
    depression_definition().validate().expect("depression fixture valid");
    three_scale_definition().validate().expect("triad fixture valid");
}

#[test]
fn validation_rejects_structural_mistakes() {
    let mut blank_slug = depression_definition();
    blank_slug.slug = "  ".to_string();
    expect_invalid(&blank_slug, "slug");

    let mut duplicate_order = depression_definition();
    duplicate_order.questions[1].order = 1;
    expect_invalid(&duplicate_order, "duplicate question order 1");

    let mut zero_order = depression_definition();
    zero_order.questions[0].order = 0;
    expect_invalid(&zero_order, "1-based");

    let mut no_options = depression_definition();
    no_options.questions[4].options.clear();
    expect_invalid(&no_options, "question 5 has no options");

    let mut unknown_scale = depression_definition();
    unknown_scale.questions[0].scale_keys = vec!["anxiety".to_string()];
    expect_invalid(&unknown_scale, "unknown scale key 'anxiety'");

    let mut inverted = depression_definition();
    inverted.cutoffs.push(CutoffEntry {
        scale_key: "depression".to_string(),
        min: 30,
        max: 20,
        label: "Backwards".to_string(),
        description: String::new(),
    });
    expect_invalid(&inverted, "min 30 above max 20");

    let mut repeated_scale = three_scale_definition();
    repeated_scale.scales[2].key = "stress".to_string();
    expect_invalid(&repeated_scale, "scale keys must be unique");
}

#[test]
fn definition_json_uses_defaults_for_optional_fields() {
    let definition = TestDefinition::from_json(
        r#"{
            "slug": "mini",
            "name": "Mini",
            "questions": [
                { "order": 1, "text": "Only item", "options": [{ "text": "Yes", "score": 1 }] }
            ]
        }"#,
    )
    .expect("definition parses");

    assert_eq!(definition.analysis_type, AnalysisMode::Direct);
    assert!(definition.scales.is_empty());
    assert!(definition.questions[0].scale_keys.is_empty());
    assert!(definition.warning.is_none());
    definition.validate().expect("minimal definition valid");

    assert!(matches!(
        TestDefinition::from_json("{ \"slug\": 1 }"),
        Err(CatalogError::Parse { .. })
    ));
}

#[test]
fn load_reads_json_files_in_name_order() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_definition(dir.path(), "b-triad.json", &three_scale_definition());
    write_definition(dir.path(), "a-phq.json", &depression_definition());
    fs::write(dir.path().join("notes.txt"), "not a definition").expect("notes written");

    let loaded = load_definitions(dir.path()).expect("definitions load");
    assert!(loaded.failures.is_empty());
    let slugs: Vec<&str> = loaded
        .definitions
        .iter()
        .map(|definition| definition.slug.as_str())
        .collect();
    assert_eq!(slugs, vec!["phq-9", "triad"]);
}

#[test]
fn load_reports_the_offending_file_and_keeps_the_rest() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_definition(dir.path(), "a-phq.json", &depression_definition());
    fs::write(dir.path().join("broken.json"), "{").expect("file written");
    write_definition(dir.path(), "c-triad.json", &three_scale_definition());

    let loaded = load_definitions(dir.path()).expect("directory readable");
    let slugs: Vec<&str> = loaded
        .definitions
        .iter()
        .map(|definition| definition.slug.as_str())
        .collect();
    assert_eq!(slugs, vec!["phq-9", "triad"]);
    match loaded.failures.as_slice() {
        [CatalogError::Parse { origin, .. }] => assert!(origin.ends_with("broken.json")),
        other => panic!("expected one parse failure, got {other:?}"),
    }
    assert!(matches!(
        load_definitions(dir.path().join("missing")),
        Err(CatalogError::Io { .. })
    ));
}

#[test]
fn sync_collects_errors_and_continues() {
    let store = MemoryStore::default();
    let mut broken = three_scale_definition();
    broken.slug = "broken".to_string();
    broken.questions[0].options.clear();

    let definitions = [broken, depression_definition()];
    let summary = sync_definitions(&store, &definitions, None);

    assert_eq!(summary.tests_selected, 2);
    assert_eq!(summary.tests_processed, 1);
    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].starts_with("broken: "));

    let tests = store.tests().expect("tests load");
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].slug, "phq-9");
}

#[test]
fn directory_sync_skips_unparseable_file_and_reports_it() {
    let dir = tempfile::tempdir().expect("tempdir");
    write_definition(dir.path(), "a-phq.json", &depression_definition());
    fs::write(dir.path().join("b-broken.json"), "{ \"slug\": ").expect("file written");
    write_definition(dir.path(), "c-triad.json", &three_scale_definition());

    let store = MemoryStore::default();
    let summary = sync_directory(&store, dir.path(), None).expect("directory readable");

    assert_eq!(summary.tests_selected, 2);
    assert_eq!(summary.tests_processed, 2);
    assert_eq!(summary.errors.len(), 1);
    assert!(
        summary.errors[0].contains("b-broken.json"),
        "unexpected error: {}",
        summary.errors[0]
    );
    let slugs: Vec<String> = store
        .tests()
        .expect("tests load")
        .into_iter()
        .map(|test| test.slug)
        .collect();
    assert_eq!(slugs.len(), 2);
    assert!(slugs.contains(&"phq-9".to_string()));
    assert!(slugs.contains(&"triad".to_string()));

    assert!(matches!(
        sync_directory(&store, dir.path().join("missing"), None),
        Err(CatalogError::Io { .. })
    ));
}

#[test]
fn sync_honors_slug_filter() {
    let store = MemoryStore::default();
    let definitions = [depression_definition(), three_scale_definition()];

    let summary = sync_definitions(&store, &definitions, Some("triad"));
    assert_eq!(summary.tests_selected, 1);
    assert_eq!(summary.tests_processed, 1);
    let tests = store.tests().expect("tests load");
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].slug, "triad");

    let summary = sync_definitions(&store, &definitions, Some("unknown"));
    assert_eq!(summary.tests_selected, 0);
    assert_eq!(store.tests().expect("tests load").len(), 1);
}

#[test]
fn resync_keeps_test_id_and_replaces_content() {
    let store = MemoryStore::default();
    let original = depression_definition();
    sync_definitions(&store, std::slice::from_ref(&original), None);
    let first_id = store.tests().expect("tests load")[0].id;

    let mut revised = original;
    revised.name = "PHQ-9 (revised)".to_string();
    revised.questions.truncate(2);
    revised.risk_rules.clear();
    let summary = sync_definitions(&store, &[revised], None);
    assert!(summary.errors.is_empty());

    let tests = store.tests().expect("tests load");
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].id, first_id);
    assert_eq!(tests[0].name, "PHQ-9 (revised)");
    assert_eq!(store.questions(first_id).expect("questions load").len(), 2);
    assert!(store.risk_rules(first_id).expect("rules load").is_empty());
}

#[test]
fn bundled_definitions_load_and_sync() {
    let loaded = load_definitions(bundled_definitions_dir()).expect("bundled definitions");
    assert!(loaded.failures.is_empty(), "unusable files: {:?}", loaded.failures);
    let definitions = loaded.definitions;
    let slugs: Vec<&str> = definitions
        .iter()
        .map(|definition| definition.slug.as_str())
        .collect();
    assert_eq!(slugs, vec!["dass-21", "gad-7", "phq-9"]);

    for definition in &definitions {
        definition
            .validate()
            .unwrap_or_else(|err| panic!("{} invalid: {err}", definition.slug));
    }

    let phq = &definitions[2];
    assert_eq!(phq.questions.len(), 9);
    assert!(phq.risk_rules.iter().any(|rule| {
        rule.condition.starts_with("q9_score") && rule.severity == RiskSeverity::Critical
    }));

    let dass = &definitions[0];
    assert_eq!(dass.questions.len(), 21);
    assert_eq!(dass.scales.len(), 3);
    assert_eq!(dass.analysis_type, AnalysisMode::Profile);

    let store = MemoryStore::default();
    let summary = sync_definitions(&store, &definitions, None);
    assert_eq!(summary.tests_processed, 3);
    assert!(summary.errors.is_empty());
}
