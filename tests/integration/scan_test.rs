//! Scan Integration Tests

use std::collections::BTreeSet;
use std::sync::Arc;

use cascade_resolver::{Change, ErrorCategory, FixConfidence, Severity};

use crate::support::{engine, project, read, UnusedImportLinter};

const SOURCE: &str = "import os\nprint(os.getcwd())\nimport json\n\nvalue = 1\n";

#[tokio::test]
async fn test_unused_import_scenario() {
    let dir = project(&[("a.py", SOURCE)]);
    let engine = engine(dir.path(), vec![Arc::new(UnusedImportLinter { name: "ruff" })]).await;

    let errors = engine.errors().await;
    assert_eq!(errors.len(), 1);
    let error = &errors[0];
    assert_eq!(error.category, ErrorCategory::Unused);
    assert_eq!(error.severity, Severity::Warning);
    assert_eq!(error.location.file_path, "a.py");
    assert_eq!(error.location.line, 3);
    assert_eq!(error.location.column, 0);
    assert_eq!(error.fixes.len(), 1);
    assert_eq!(error.fixes[0].confidence, FixConfidence::High);
    assert_eq!(
        error.fixes[0].changes,
        vec![Change::DeleteLine { file: "a.py".into(), line: 3 }]
    );

    let result = engine.resolve_error(&error.id).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.files_modified, vec!["a.py"]);
    assert!(!read(dir.path(), "a.py").lines().any(|l| l == "import json"));

    assert!(engine.errors().await.is_empty());
}

#[tokio::test]
async fn test_repeated_scans_yield_identical_ids() {
    let dir = project(&[
        ("a.py", SOURCE),
        ("pkg/b.py", "import sys\nimport re\n"),
    ]);
    let linter = Arc::new(UnusedImportLinter { name: "ruff" });
    let first_engine = engine(dir.path(), vec![linter.clone()]).await;

    let ids = |errors: Vec<cascade_resolver::UnifiedError>| -> BTreeSet<String> {
        errors.into_iter().map(|e| e.id).collect()
    };
    let first = ids(first_engine.errors().await);
    let second = ids(first_engine.errors().await);
    assert_eq!(first.len(), 3);
    assert_eq!(first, second);

    // Ids are stable across engine instances
    let other_engine = engine(dir.path(), vec![linter]).await;
    assert_eq!(ids(other_engine.errors().await), first);
}

#[tokio::test]
async fn test_identical_reports_from_two_backends_merge() {
    let dir = project(&[("a.py", SOURCE)]);
    let engine = engine(
        dir.path(),
        vec![
            Arc::new(UnusedImportLinter { name: "ruff" }),
            Arc::new(UnusedImportLinter { name: "flake8" }),
        ],
    )
    .await;

    let errors = engine.errors().await;
    assert_eq!(errors.len(), 1);
    let sources: Vec<&str> = errors[0].sources().collect();
    assert_eq!(sources, vec!["flake8", "ruff"]);
    // Both backends synthesized the same quick fix
    assert_eq!(errors[0].fixes.len(), 1);
}

#[tokio::test]
async fn test_context_for_scanned_error() {
    let dir = project(&[
        ("app/main.py", "import json\nfrom app import util\n\ndef run():\n    return util.helper()\n"),
        ("app/util.py", "def helper():\n    return 1\n"),
    ]);
    let engine = engine(dir.path(), vec![Arc::new(UnusedImportLinter { name: "ruff" })]).await;

    let errors = engine.errors().await;
    assert_eq!(errors.len(), 1);
    let context = engine.full_error_context(&errors[0].id).await.unwrap();
    assert!(context.surrounding_code.contains("import json"));
    assert_eq!(context.code_start_line, 1);
    assert!(context.has_fix);
    assert!(!context.fix_suggestions.is_empty());
    assert!(context.failed_steps.is_empty());

    assert!(engine.full_error_context("does-not-exist").await.is_none());
}
