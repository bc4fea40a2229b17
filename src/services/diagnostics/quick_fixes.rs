//! Quick-Fix Synthesis
//!
//! Deterministic fixes for well-known diagnostic shapes, attached to errors
//! whose backends reported no fix of their own.

use std::sync::OnceLock;

use regex::Regex;

use cascade_resolver_core::{Change, ErrorFix, ErrorLocation, EstimatedImpact, FixConfidence};

use crate::utils::hashing::stable_id;

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn unused_import_message() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(
        &RE,
        r"(?i)imported but unused|unused import|import .* is not accessed|is imported but never used",
    )
}

fn unused_import_code() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"^(F401|W0611|unused_imports|reportUnusedImport)$")
}

fn whitespace_message() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(
        &RE,
        r"(?i)missing whitespace (around|after)|multiple spaces (before|after)|trailing whitespace|whitespace on blank line",
    )
}

fn whitespace_code() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"^(E22[1-8]|E231|E27[1-4]|W291|W293)$")
}

fn undefined_name() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(
        &RE,
        r#"(?i)(?:undefined name|cannot find (?:value|type|function|macro|module|crate)) ['"`]([A-Za-z_][\w.:]*)['"`]|['"`]([A-Za-z_][\w.:]*)['"`] is not defined"#,
    )
}

fn import_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(
        &RE,
        r#"^\s*(import\s|from\s+\S+\s+import\s|use\s|pub\s+use\s|#include\s|"[^"]+"\s*$)"#,
    )
}

fn matches(re: Option<&'static Regex>, text: &str) -> bool {
    re.map_or(false, |re| re.is_match(text))
}

fn fix_id(kind: &str, location: &ErrorLocation, extra: &str) -> String {
    let line = location.line.to_string();
    stable_id(&["quick-fix", kind, &location.file_path, &line, extra])
}

/// A line that imports exactly one name.
fn is_single_import(line: &str) -> bool {
    matches(import_line(), line) && !line.contains(',')
}

/// Synthesize fixes for a diagnostic. `line_text` is the current text of
/// the error's line when known.
pub fn synthesize_fixes(
    location: &ErrorLocation,
    message: &str,
    code: Option<&str>,
    line_text: Option<&str>,
) -> Vec<ErrorFix> {
    let code = code.unwrap_or("");
    let mut fixes = Vec::new();
    if location.line == 0 {
        return fixes;
    }

    if matches(unused_import_message(), message) || matches(unused_import_code(), code) {
        let confidence = match line_text {
            Some(text) if is_single_import(text) => FixConfidence::High,
            _ => FixConfidence::Medium,
        };
        fixes.push(
            ErrorFix::new(
                fix_id("delete_line", location, ""),
                "Remove unused import",
                confidence,
                vec![Change::DeleteLine {
                    file: location.file_path.clone(),
                    line: location.line,
                }],
            )
            .with_description(format!("Delete line {} of {}", location.line, location.file_path)),
        );
    }

    if matches(whitespace_message(), message) || matches(whitespace_code(), code) {
        fixes.push(
            ErrorFix::new(
                fix_id("fix_whitespace", location, ""),
                "Normalize whitespace",
                FixConfidence::High,
                vec![Change::FixWhitespace {
                    file: location.file_path.clone(),
                    line: location.line,
                }],
            )
            .with_description(format!(
                "Normalize operator spacing on line {} of {}",
                location.line, location.file_path
            )),
        );
    }

    if let Some(symbol) = undefined_name()
        .and_then(|re| re.captures(message))
        .and_then(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
    {
        fixes.push(
            ErrorFix::new(
                fix_id("add_import", location, &symbol),
                format!("Import '{}'", symbol),
                FixConfidence::Low,
                vec![Change::AddImport {
                    file: location.file_path.clone(),
                    symbol: symbol.clone(),
                }],
            )
            .with_description(format!(
                "Add an import for '{}'; confirm the module it comes from",
                symbol
            ))
            .requiring_user_input(true)
            .with_impact(EstimatedImpact::Medium),
        );
    }

    fixes
}
