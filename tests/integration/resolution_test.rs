//! Resolution Integration Tests

use std::sync::Arc;

use cascade_resolver::services::diagnostics::RawDiagnostic;
use cascade_resolver::{Change, ErrorFix, FixConfidence, UnifiedError};

use crate::support::{engine, project, read, ScriptedBackend, UnusedImportLinter};

fn delete(file: &str, line: u32) -> Change {
    Change::DeleteLine { file: file.into(), line }
}

fn diagnostic(file: &str, line: u32, message: &str, fixes: Vec<ErrorFix>) -> RawDiagnostic {
    RawDiagnostic::one_based("scripted", file, line, 1, message).with_fixes(fixes)
}

fn by_file(mut errors: Vec<UnifiedError>) -> Vec<UnifiedError> {
    errors.sort_by(|a, b| a.location.cmp(&b.location));
    errors
}

#[tokio::test]
async fn test_highest_confidence_fix_is_selected() {
    let dir = project(&[("a.py", "one\ntwo\nthree\n")]);
    let fixes = vec![
        ErrorFix::new("low", "Delete one", FixConfidence::Low, vec![delete("a.py", 1)]),
        ErrorFix::new("high", "Delete two", FixConfidence::High, vec![delete("a.py", 2)]),
        ErrorFix::new("medium", "Delete three", FixConfidence::Medium, vec![delete("a.py", 3)]),
    ];
    let backend = ScriptedBackend {
        name: "scripted",
        diagnostics: vec![diagnostic("a.py", 2, "problem on two", fixes)],
    };
    let engine = engine(dir.path(), vec![Arc::new(backend)]).await;

    let errors = engine.errors().await;
    let preview = engine.preview_resolution(&errors[0].id).await.unwrap();
    assert_eq!(preview.fix_id.as_deref(), Some("high"));
    assert_eq!(preview.changes, vec![delete("a.py", 2)]);
    assert_eq!(read(dir.path(), "a.py"), "one\ntwo\nthree\n");

    let result = engine.resolve_error(&errors[0].id).await;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.applied_fixes, vec!["high"]);
    assert_eq!(read(dir.path(), "a.py"), "one\nthree\n");
}

#[tokio::test]
async fn test_failed_change_restores_file_byte_for_byte() {
    let original = "first\r\nsecond  \r\nthird";
    let dir = project(&[("a.py", original)]);
    let fix = ErrorFix::new(
        "two-step",
        "Delete then patch",
        FixConfidence::High,
        vec![
            delete("a.py", 1),
            Change::ReplaceText {
                file: "a.py".into(),
                line: 1,
                old_text: "does not occur".into(),
                new_text: "x".into(),
            },
        ],
    );
    let backend = ScriptedBackend {
        name: "scripted",
        diagnostics: vec![diagnostic("a.py", 1, "problem", vec![fix])],
    };
    let engine = engine(dir.path(), vec![Arc::new(backend)]).await;

    let errors = engine.errors().await;
    let result = engine.resolve_error(&errors[0].id).await;
    assert!(!result.success);
    assert!(result.files_modified.is_empty());
    assert_eq!(std::fs::read(dir.path().join("a.py")).unwrap(), original.as_bytes());
    assert_eq!(engine.resolution_stats().failed_fixes, 1);
}

#[tokio::test]
async fn test_bulk_failure_does_not_block_other_fixes() {
    let dir = project(&[("a.py", "a\n"), ("b.py", "b\n"), ("c.py", "c\n")]);
    let broken = ErrorFix::new(
        "broken",
        "Patch missing text",
        FixConfidence::High,
        vec![Change::ReplaceText {
            file: "b.py".into(),
            line: 1,
            old_text: "zzz".into(),
            new_text: "y".into(),
        }],
    );
    let backend = ScriptedBackend {
        name: "scripted",
        diagnostics: vec![
            diagnostic("a.py", 1, "first", vec![ErrorFix::new("fa", "Delete a", FixConfidence::High, vec![delete("a.py", 1)])]),
            diagnostic("b.py", 1, "second", vec![broken]),
            diagnostic("c.py", 1, "third", vec![ErrorFix::new("fc", "Delete c", FixConfidence::High, vec![delete("c.py", 1)])]),
        ],
    };
    let engine = engine(dir.path(), vec![Arc::new(backend)]).await;

    let ids: Vec<String> = by_file(engine.errors().await).into_iter().map(|e| e.id).collect();
    assert_eq!(ids.len(), 3);

    let outcome = engine.resolve_errors(Some(ids.clone()), None, None).await;
    assert_eq!(outcome.total_errors, 3);
    assert_eq!(outcome.fixable_errors, 3);
    assert_eq!(outcome.fixed_errors, 2);
    assert_eq!(outcome.failed_fixes, 1);
    let returned: Vec<&str> = outcome.results.iter().map(|r| r.error_id.as_str()).collect();
    assert_eq!(returned, ids.iter().map(String::as_str).collect::<Vec<_>>());
    let success: Vec<bool> = outcome.results.iter().map(|r| r.success).collect();
    assert_eq!(success, vec![true, false, true]);

    assert_eq!(read(dir.path(), "a.py"), "");
    assert_eq!(read(dir.path(), "b.py"), "b\n");
    assert_eq!(read(dir.path(), "c.py"), "");
}

#[tokio::test]
async fn test_bulk_same_file_fixes_apply_bottom_up() {
    let dir = project(&[("a.py", "import json\nimport os\nimport re\nvalue = os.sep\n")]);
    let engine = engine(dir.path(), vec![Arc::new(UnusedImportLinter { name: "ruff" })]).await;
    assert_eq!(engine.errors().await.len(), 2);

    let outcome = engine.resolve_errors(None, None, None).await;
    assert_eq!(outcome.fixed_errors, 2, "{:?}", outcome.results);
    assert_eq!(read(dir.path(), "a.py"), "import os\nvalue = os.sep\n");
    assert!(engine.errors().await.is_empty());
}

#[tokio::test]
async fn test_unknown_id_is_reported_not_raised() {
    let dir = project(&[("a.py", "x = 1\n")]);
    let engine = engine(dir.path(), vec![]).await;

    let result = engine.resolve_error("does-not-exist").await;
    assert!(!result.success);
    assert!(result.message.contains("not found"));

    let outcome = engine
        .resolve_errors(Some(vec!["does-not-exist".into()]), None, None)
        .await;
    assert_eq!(outcome.results.len(), 1);
    assert!(!outcome.results[0].success);
    assert!(engine.full_error_context("does-not-exist").await.is_none());
}

#[tokio::test]
async fn test_max_fixes_caps_attempts() {
    let dir = project(&[("a.py", "import json\n"), ("b.py", "import re\n")]);
    let engine = engine(dir.path(), vec![Arc::new(UnusedImportLinter { name: "ruff" })]).await;

    let outcome = engine.resolve_errors(None, Some(1), None).await;
    assert_eq!(outcome.total_errors, 2);
    assert_eq!(outcome.results.len(), 1);
    assert_eq!(engine.errors().await.len(), 1);

    let history = engine.resolution_history();
    assert_eq!(history.len(), 1);
    assert!(history[0].result.success);
}
