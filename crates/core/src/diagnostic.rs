//! Unified Error Model
//!
//! Backend-agnostic representation of diagnostics after normalization:
//! locations, severities, categories, the `UnifiedError` itself, and the
//! per-scan `ComprehensiveErrorList` aggregate.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::fix::ErrorFix;

// ============================================================================
// Location
// ============================================================================

/// Position of an error inside a repository file.
///
/// `line` is always 1-based. `column` is 1-based when known; a column of 0
/// means the backend did not report one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ErrorLocation {
    /// Repo-relative path using forward slashes
    pub file_path: String,
    pub line: u32,
    pub column: u32,
}

impl ErrorLocation {
    pub fn new(file_path: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column,
        }
    }
}

impl std::fmt::Display for ErrorLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file_path, self.line, self.column)
    }
}

// ============================================================================
// Severity / Category
// ============================================================================

/// Four-level severity. Declaration order is most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
    Hint,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Error,
        Severity::Warning,
        Severity::Info,
        Severity::Hint,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
            Severity::Hint => "hint",
        }
    }

    /// The more severe of two severities.
    pub fn most_severe(self, other: Severity) -> Severity {
        self.min(other)
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of what kind of problem an error describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Syntax,
    Undefined,
    Unused,
    Style,
    Security,
    Logic,
    Performance,
    Other,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 8] = [
        ErrorCategory::Syntax,
        ErrorCategory::Undefined,
        ErrorCategory::Unused,
        ErrorCategory::Style,
        ErrorCategory::Security,
        ErrorCategory::Logic,
        ErrorCategory::Performance,
        ErrorCategory::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Undefined => "undefined",
            ErrorCategory::Unused => "unused",
            ErrorCategory::Style => "style",
            ErrorCategory::Security => "security",
            ErrorCategory::Logic => "logic",
            ErrorCategory::Performance => "performance",
            ErrorCategory::Other => "other",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// UnifiedError
// ============================================================================

/// A normalized diagnostic.
///
/// `id` is a deterministic hash of location, message and source, so rescanning
/// an unchanged file reproduces the same id. `fixes` may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedError {
    pub id: String,
    pub message: String,
    pub severity: Severity,
    pub category: ErrorCategory,
    pub location: ErrorLocation,
    /// Originating backend name; several names joined by `", "` when
    /// identical diagnostics came from different backends.
    pub source: String,
    /// Backend rule code (e.g. `F401`, `E0425`) when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default)]
    pub fixes: Vec<ErrorFix>,
}

impl UnifiedError {
    pub fn file_path(&self) -> &str {
        &self.location.file_path
    }

    pub fn has_fixes(&self) -> bool {
        !self.fixes.is_empty()
    }

    /// Backend names this error is attributed to.
    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.source.split(", ").filter(|s| !s.is_empty())
    }
}

// ============================================================================
// ComprehensiveErrorList
// ============================================================================

/// All currently-known errors for a scan, grouped by file.
///
/// Rescanning a file replaces its entry wholesale so errors for fixed code
/// disappear. Counts are computed on demand.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComprehensiveErrorList {
    by_file: BTreeMap<String, Vec<UnifiedError>>,
    analyzed: BTreeSet<String>,
}

impl ComprehensiveErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace everything known about `file_path` with `errors`.
    pub fn replace_file(&mut self, file_path: impl Into<String>, mut errors: Vec<UnifiedError>) {
        let file_path = file_path.into();
        errors.sort_by(|a, b| {
            (a.location.line, a.location.column, &a.id).cmp(&(
                b.location.line,
                b.location.column,
                &b.id,
            ))
        });
        self.analyzed.insert(file_path.clone());
        if errors.is_empty() {
            self.by_file.remove(&file_path);
        } else {
            self.by_file.insert(file_path, errors);
        }
    }

    /// Forget a file entirely (e.g. it was deleted).
    pub fn remove_file(&mut self, file_path: &str) {
        self.by_file.remove(file_path);
        self.analyzed.remove(file_path);
    }

    pub fn clear(&mut self) {
        self.by_file.clear();
        self.analyzed.clear();
    }

    /// Iterate errors in (file, line, column) order.
    pub fn errors(&self) -> impl Iterator<Item = &UnifiedError> {
        self.by_file.values().flatten()
    }

    pub fn to_vec(&self) -> Vec<UnifiedError> {
        self.errors().cloned().collect()
    }

    pub fn get(&self, error_id: &str) -> Option<&UnifiedError> {
        self.errors().find(|e| e.id == error_id)
    }

    pub fn errors_for_file(&self, file_path: &str) -> &[UnifiedError] {
        self.by_file
            .get(file_path)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    pub fn is_analyzed(&self, file_path: &str) -> bool {
        self.analyzed.contains(file_path)
    }

    pub fn analyzed_files(&self) -> impl Iterator<Item = &str> {
        self.analyzed.iter().map(String::as_str)
    }

    /// Number of files covered by the scan, with or without errors.
    pub fn files_analyzed(&self) -> usize {
        self.analyzed.len()
    }

    pub fn files_with_errors(&self) -> usize {
        self.by_file.len()
    }

    pub fn count_by_severity(&self) -> BTreeMap<Severity, usize> {
        let mut counts = BTreeMap::new();
        for error in self.errors() {
            *counts.entry(error.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn count_by_category(&self) -> BTreeMap<ErrorCategory, usize> {
        let mut counts = BTreeMap::new();
        for error in self.errors() {
            *counts.entry(error.category).or_insert(0) += 1;
        }
        counts
    }
}
