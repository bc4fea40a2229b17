//! Diagnostic Normalization
//!
//! Converts backend-native diagnostics into `UnifiedError`s: position
//! normalization, the severity and category tables, deduplication and
//! stable id assignment.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use cascade_resolver_core::{ErrorCategory, ErrorFix, ErrorLocation, Severity, UnifiedError};

use super::quick_fixes::synthesize_fixes;
use crate::utils::hashing::stable_id;
use crate::utils::paths::normalize_relative;

// ============================================================================
// Raw diagnostics
// ============================================================================

/// Coordinate convention used by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionBase {
    /// LSP style: line and column both start at 0
    ZeroBased,
    /// Linter style: line and column start at 1, column 0 means unknown
    OneBased,
}

/// Severity exactly as the backend reported it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawSeverity {
    Code(i64),
    Name(String),
}

/// A backend-native diagnostic before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDiagnostic {
    /// Repo-relative path
    pub file_path: String,
    pub line: u32,
    pub column: u32,
    pub message: String,
    #[serde(default)]
    pub severity: Option<RawSeverity>,
    #[serde(default)]
    pub code: Option<String>,
    /// Backend name
    pub source: String,
    pub position_base: PositionBase,
    #[serde(default)]
    pub fixes: Vec<ErrorFix>,
}

impl RawDiagnostic {
    pub fn zero_based(
        source: impl Into<String>,
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            line,
            column,
            message: message.into(),
            severity: None,
            code: None,
            source: source.into(),
            position_base: PositionBase::ZeroBased,
            fixes: Vec::new(),
        }
    }

    pub fn one_based(
        source: impl Into<String>,
        file_path: impl Into<String>,
        line: u32,
        column: u32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            position_base: PositionBase::OneBased,
            ..Self::zero_based(source, file_path, line, column, message)
        }
    }

    pub fn with_severity(mut self, severity: RawSeverity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_fixes(mut self, fixes: Vec<ErrorFix>) -> Self {
        self.fixes = fixes;
        self
    }

    /// 1-based (line, column). A one-based column of 0 stays 0.
    pub fn normalized_position(&self) -> (u32, u32) {
        match self.position_base {
            PositionBase::ZeroBased => (self.line.saturating_add(1), self.column.saturating_add(1)),
            PositionBase::OneBased => (self.line.max(1), self.column),
        }
    }
}

// ============================================================================
// Severity table
// ============================================================================

/// Map a backend severity onto the four-level scale. Unknown or absent
/// values map to `Info`.
pub fn map_severity(raw: Option<&RawSeverity>) -> Severity {
    match raw {
        Some(RawSeverity::Code(code)) => match code {
            1 => Severity::Error,
            2 => Severity::Warning,
            3 => Severity::Info,
            4 => Severity::Hint,
            _ => Severity::Info,
        },
        Some(RawSeverity::Name(name)) => match name.trim().to_ascii_lowercase().as_str() {
            "error" | "fatal" | "critical" | "e" | "f" => Severity::Error,
            "warning" | "warn" | "w" => Severity::Warning,
            "info" | "information" | "note" | "i" => Severity::Info,
            "hint" | "h" => Severity::Hint,
            _ => Severity::Info,
        },
        None => Severity::Info,
    }
}

// ============================================================================
// Category table
// ============================================================================

struct CategoryRule {
    pattern: Regex,
    category: ErrorCategory,
}

fn compile_rules(table: &[(&str, ErrorCategory)]) -> Vec<CategoryRule> {
    table
        .iter()
        .filter_map(|(pattern, category)| {
            Regex::new(pattern).ok().map(|pattern| CategoryRule {
                pattern,
                category: *category,
            })
        })
        .collect()
}

/// Rules on diagnostic codes, checked first.
fn code_rules() -> &'static [CategoryRule] {
    static RULES: OnceLock<Vec<CategoryRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile_rules(&[
            (r"^(E9\d\d|E999|syntax-error)$", ErrorCategory::Syntax),
            (r"^(F82[1-3]|E0425|E0433|E0412|undefined-variable|reportUndefinedVariable)$", ErrorCategory::Undefined),
            (r"^(F401|F841|F811|W0611|W0612|unused_imports|unused_variables|dead_code|reportUnused\w*)$", ErrorCategory::Unused),
            (r"^(S\d{3}|B\d{3}|G\d{3})$", ErrorCategory::Security),
            (r"^(PERF\d{3})$", ErrorCategory::Performance),
            (r"^([EW][1-5]\d\d|D\d{3}|N8\d\d)$", ErrorCategory::Style),
        ])
    })
}

/// Rules on message text, first match wins.
fn message_rules() -> &'static [CategoryRule] {
    static RULES: OnceLock<Vec<CategoryRule>> = OnceLock::new();
    RULES.get_or_init(|| {
        compile_rules(&[
            (
                r"(?i)syntax ?error|invalid syntax|unexpected (token|indent|eof|end of)|parse error|unterminated|expected .+ (found|but got)",
                ErrorCategory::Syntax,
            ),
            (
                r"(?i)undefined|not defined|undeclared|unresolved|cannot find|could not be resolved|has no attribute|no (member|module|attribute) named|unknown (name|variable|symbol|identifier)",
                ErrorCategory::Undefined,
            ),
            (
                r"(?i)unused|imported but|never used|is not accessed|never read|dead code",
                ErrorCategory::Unused,
            ),
            (
                r"(?i)security|injection|insecure|unsafe|vulnerab|hard-?coded (password|secret|credential|key)|\beval\b|\bexec\b|pickle",
                ErrorCategory::Security,
            ),
            (
                r"(?i)performance|inefficient|unnecessary (copy|clone|allocation|list|comprehension|collect)|quadratic|redundant clone",
                ErrorCategory::Performance,
            ),
            (
                r"(?i)whitespace|indentation|line too long|blank line|trailing|docstring|naming|should have (a )?(snake|camel|upper)|style|formatting",
                ErrorCategory::Style,
            ),
            (
                r"(?i)unreachable|always (true|false)|possibly (unbound|none|null)|mismatched types|type mismatch|incompatible|not assignable|redefin|shadow|mutable default|comparison",
                ErrorCategory::Logic,
            ),
        ])
    })
}

/// Classify a diagnostic by its code, then its message. Defaults to `Other`.
pub fn classify(message: &str, code: Option<&str>) -> ErrorCategory {
    if let Some(code) = code {
        if let Some(rule) = code_rules().iter().find(|r| r.pattern.is_match(code)) {
            return rule.category;
        }
    }
    message_rules()
        .iter()
        .find(|r| r.pattern.is_match(message))
        .map(|r| r.category)
        .unwrap_or(ErrorCategory::Other)
}

// ============================================================================
// Deduplication
// ============================================================================

#[derive(Debug, Clone)]
struct Normalized {
    file_path: String,
    line: u32,
    column: u32,
    message: String,
    severity: Severity,
    code: Option<String>,
    source: String,
    fixes: Vec<ErrorFix>,
}

type DedupKey = (String, u32, u32, String);

impl Normalized {
    fn from_raw(raw: RawDiagnostic) -> Self {
        let (line, column) = raw.normalized_position();
        Self {
            file_path: normalize_relative(Path::new(&raw.file_path)),
            line,
            column,
            message: raw.message.trim().to_string(),
            severity: map_severity(raw.severity.as_ref()),
            code: raw.code.filter(|c| !c.is_empty()),
            source: raw.source,
            fixes: raw.fixes,
        }
    }

    fn key(&self) -> DedupKey {
        (
            self.file_path.clone(),
            self.line,
            self.column,
            self.message.clone(),
        )
    }
}

/// Normalize and deduplicate raw diagnostics.
///
/// Diagnostics sharing `(file, line, column, message)` collapse into one
/// error. Reports from the same backend are last-write; reports from
/// different backends merge their source names, take the most severe
/// severity and concatenate their fixes. Grouping is keyed by source, so the
/// result only depends on the order in which each backend reported.
///
/// `line_text` returns the text of a 1-based line in a file, used when
/// synthesizing quick fixes for errors that arrived without any.
pub fn unify<F>(raw: Vec<RawDiagnostic>, line_text: F) -> Vec<UnifiedError>
where
    F: Fn(&str, u32) -> Option<String>,
{
    // key -> source -> last report from that source
    let mut groups: BTreeMap<DedupKey, BTreeMap<String, Normalized>> = BTreeMap::new();
    for diag in raw.into_iter().map(Normalized::from_raw) {
        groups
            .entry(diag.key())
            .or_default()
            .insert(diag.source.clone(), diag);
    }

    groups
        .into_iter()
        .map(|((file_path, line, column, message), by_source)| {
            let sources: BTreeSet<&str> = by_source.keys().map(|s| s.as_str()).collect();
            let source = sources.into_iter().collect::<Vec<_>>().join(", ");

            let mut severity = Severity::Hint;
            let mut code = None;
            let mut fixes: Vec<ErrorFix> = Vec::new();
            for diag in by_source.values() {
                severity = severity.most_severe(diag.severity);
                if code.is_none() {
                    code = diag.code.clone();
                }
                for fix in &diag.fixes {
                    if !fixes.iter().any(|f| f.id == fix.id) {
                        fixes.push(fix.clone());
                    }
                }
            }

            let category = classify(&message, code.as_deref());
            let line_str = line.to_string();
            let column_str = column.to_string();
            let id = stable_id(&[&file_path, &line_str, &column_str, &message, &source]);

            let location = ErrorLocation::new(file_path, line, column);
            if fixes.is_empty() {
                let text = line_text(&location.file_path, line);
                fixes = synthesize_fixes(&location, &message, code.as_deref(), text.as_deref());
            }

            UnifiedError {
                id,
                message,
                severity,
                category,
                location,
                source,
                code,
                fixes,
            }
        })
        .collect()
}
