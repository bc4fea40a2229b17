//! Fix Applicator
//!
//! Applies one `ErrorFix` atomically: every change lands, or the touched
//! files are left exactly as they were. Changes are staged in memory over
//! a backup of each file, then written under per-file locks. If a write
//! fails, files already written are restored from the backup; a file that
//! cannot be restored keeps a `.bak` copy of its original content.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use regex::Regex;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use cascade_resolver_core::{Change, Codebase, ErrorFix, ResolutionResult};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{language_for_path, normalize_relative};

pub struct FixApplicator {
    codebase: Arc<dyn Codebase>,
    /// One lock per repo-relative path; write phases on a file never overlap
    file_locks: DashMap<String, Arc<Mutex<()>>>,
    write_backup_on_failure: bool,
}

impl FixApplicator {
    pub fn new(codebase: Arc<dyn Codebase>) -> Self {
        Self {
            codebase,
            file_locks: DashMap::new(),
            write_backup_on_failure: true,
        }
    }

    pub fn with_backup_on_failure(mut self, enabled: bool) -> Self {
        self.write_backup_on_failure = enabled;
        self
    }

    /// Apply `fix` on behalf of `error_id`. Never returns an error; failures
    /// are reported through `ResolutionResult::success`.
    pub async fn apply(&self, error_id: &str, fix: &ErrorFix, cancel: &CancellationToken) -> ResolutionResult {
        if fix.changes.is_empty() {
            return ResolutionResult::failed(error_id, format!("Fix '{}' has no changes", fix.id));
        }
        if let Some(change) = fix.changes.iter().find(|c| matches!(c, Change::Unsupported)) {
            return ResolutionResult::failed(
                error_id,
                format!("Fix '{}' contains an unsupported change ({})", fix.id, change.kind()),
            );
        }

        let mut files: Vec<String> = fix
            .changes
            .iter()
            .filter_map(|c| c.file())
            .map(|f| normalize_relative(std::path::Path::new(f)))
            .collect();
        files.sort();
        files.dedup();

        // Sorted acquisition keeps multi-file fixes deadlock free
        let mut guards: Vec<OwnedMutexGuard<()>> = Vec::with_capacity(files.len());
        for file in &files {
            let lock = self.file_locks.entry(file.clone()).or_default().clone();
            guards.push(lock.lock_owned().await);
        }

        if cancel.is_cancelled() {
            let reason = AppError::cancelled("no change was applied");
            return ResolutionResult::failed(error_id, reason.to_string());
        }

        // Backups
        let mut originals: BTreeMap<String, String> = BTreeMap::new();
        for file in &files {
            match self.codebase.get_file_content(file).await {
                Ok(content) => {
                    originals.insert(file.clone(), content);
                }
                Err(e) => {
                    return ResolutionResult::failed(error_id, format!("Cannot read '{}': {}", file, e));
                }
            }
        }

        // Stage every change in memory, in order
        let mut staged = originals.clone();
        for (index, change) in fix.changes.iter().enumerate() {
            let file = change
                .file()
                .map(|f| normalize_relative(std::path::Path::new(f)))
                .unwrap_or_default();
            let Some(content) = staged.get_mut(&file) else {
                return ResolutionResult::failed(error_id, format!("No content staged for '{}'", file));
            };
            if let Err(e) = apply_change(content, change) {
                warn!(
                    error_id = %error_id,
                    fix = %fix.id,
                    change = index + 1,
                    error = %e,
                    "Change failed, fix rolled back"
                );
                return ResolutionResult::failed(
                    error_id,
                    format!(
                        "Change {} of {} ({}): {}; no changes were applied",
                        index + 1,
                        fix.changes.len(),
                        change.kind(),
                        e
                    ),
                );
            }
        }

        // Write phase
        let mut written: Vec<&str> = Vec::new();
        for (file, content) in &staged {
            if originals.get(file) == Some(content) {
                continue;
            }
            if let Err(e) = self.codebase.write_file_content(file, content).await {
                warn!(error_id = %error_id, file = %file, error = %e, "Write failed, restoring backups");
                let restore_note = self.restore(&written, file, &originals).await;
                return ResolutionResult::failed(
                    error_id,
                    format!("Writing '{}' failed: {}{}", file, e, restore_note),
                );
            }
            written.push(file);
        }

        if written.is_empty() {
            debug!(error_id = %error_id, fix = %fix.id, "Fix produced no textual change");
        }
        info!(error_id = %error_id, fix = %fix.id, files = written.len(), "Fix applied");
        let files_modified: Vec<String> = written.iter().map(|f| f.to_string()).collect();
        let message = format!("Applied '{}'", fix.title);
        ResolutionResult::succeeded(error_id, fix.id.clone(), files_modified, message)
    }

    /// Restore written files plus the file whose write failed. Returns a
    /// note for the failure message.
    async fn restore(&self, written: &[&str], failed: &str, originals: &BTreeMap<String, String>) -> String {
        let mut unrecoverable = Vec::new();
        for file in written.iter().copied().chain(std::iter::once(failed)) {
            let Some(original) = originals.get(file) else {
                continue;
            };
            if file == failed {
                // A failed atomic write usually leaves the file as it was
                if let Ok(current) = self.codebase.get_file_content(file).await {
                    if &current == original {
                        continue;
                    }
                }
            }
            if let Err(e) = self.codebase.write_file_content(file, original).await {
                error!(file = %file, error = %e, "Restore failed");
                if self.write_backup_on_failure {
                    let backup = format!("{}.bak", file);
                    match self.codebase.write_file_content(&backup, original).await {
                        Ok(()) => warn!(file = %file, backup = %backup, "Original content kept in backup file"),
                        Err(e) => error!(file = %file, error = %e, "Backup file could not be written"),
                    }
                }
                unrecoverable.push(file.to_string());
            }
        }
        if unrecoverable.is_empty() {
            "; all changes were rolled back".to_string()
        } else if self.write_backup_on_failure {
            format!(
                "; could not restore {}, original content kept in .bak files",
                unrecoverable.join(", ")
            )
        } else {
            format!("; could not restore {}", unrecoverable.join(", "))
        }
    }
}

// =============================================================================
// Change semantics
// =============================================================================

/// Lines of a file plus the line ending and trailing-newline flag needed to
/// write it back unchanged.
struct Lines {
    lines: Vec<String>,
    ending: &'static str,
    trailing_newline: bool,
}

impl Lines {
    fn parse(content: &str) -> Self {
        let ending = if content.contains("\r\n") { "\r\n" } else { "\n" };
        let trailing_newline = content.ends_with('\n');
        let lines = content
            .lines()
            .map(|l| l.strip_suffix('\r').unwrap_or(l).to_string())
            .collect();
        Self {
            lines,
            ending,
            trailing_newline,
        }
    }

    fn render(&self) -> String {
        let mut out = self.lines.join(self.ending);
        if self.trailing_newline && !self.lines.is_empty() {
            out.push_str(self.ending);
        }
        out
    }

    fn index(&self, line: u32) -> Result<usize, String> {
        if line == 0 || line as usize > self.lines.len() {
            return Err(format!(
                "line {} is out of range (file has {} lines)",
                line,
                self.lines.len()
            ));
        }
        Ok(line as usize - 1)
    }
}

/// Apply one change to `content` in place. `content` is untouched when the
/// change fails.
pub fn apply_change(content: &mut String, change: &Change) -> AppResult<()> {
    stage_change(content, change).map_err(AppError::fix_application)
}

fn stage_change(content: &mut String, change: &Change) -> Result<(), String> {
    let mut lines = Lines::parse(content);
    match change {
        Change::DeleteLine { line, .. } => {
            let index = lines.index(*line)?;
            lines.lines.remove(index);
        }
        Change::ReplaceText {
            line,
            old_text,
            new_text,
            ..
        } => {
            let index = lines.index(*line)?;
            let current = &lines.lines[index];
            if old_text.is_empty() || !current.contains(old_text.as_str()) {
                return Err(format!("line {} does not contain {:?}", line, old_text));
            }
            lines.lines[index] = current.replacen(old_text.as_str(), new_text, 1);
        }
        Change::AddImport { file, symbol } => {
            let language = language_for_path(file).unwrap_or("");
            add_import(&mut lines.lines, language, symbol)?;
        }
        Change::FixWhitespace { file, line } => {
            let index = lines.index(*line)?;
            let language = language_for_path(file).unwrap_or("");
            lines.lines[index] = normalize_spacing(&lines.lines[index], language);
        }
        Change::Unsupported => return Err("unsupported change".to_string()),
    }
    *content = lines.render();
    Ok(())
}

// ── add_import ──────────────────────────────────────────────────────────

fn import_statement(language: &str, symbol: &str) -> Result<String, String> {
    let symbol = symbol.trim();
    if symbol.is_empty() {
        return Err("empty import symbol".to_string());
    }
    match language {
        "python" => Ok(match symbol.rsplit_once('.') {
            Some((module, name)) => format!("from {} import {}", module, name),
            None => format!("import {}", symbol),
        }),
        "rust" => Ok(format!("use {};", symbol)),
        "go" => Ok(format!("import \"{}\"", symbol)),
        "java" => Ok(format!("import {};", symbol)),
        "typescript" | "javascript" => match symbol.rsplit_once(':') {
            Some((module, name)) => Ok(format!("import {{ {} }} from '{}';", name, module)),
            None => Err(format!(
                "cannot infer the module for '{}'; expected 'module:Name'",
                symbol
            )),
        },
        other => Err(format!("imports are not supported for language '{}'", other)),
    }
}

fn is_import_line(line: &str, language: &str) -> bool {
    let trimmed = line.trim_start();
    match language {
        "python" => trimmed.starts_with("import ") || trimmed.starts_with("from "),
        "rust" => trimmed.starts_with("use ") || trimmed.starts_with("pub use "),
        "go" | "java" => trimmed.starts_with("import "),
        "typescript" | "javascript" => trimmed.starts_with("import "),
        _ => false,
    }
}

/// An existing import already brings `symbol` into scope.
fn already_imported(lines: &[String], language: &str, symbol: &str, statement: &str) -> bool {
    let name = symbol
        .rsplit(['.', ':', '/'])
        .next()
        .unwrap_or(symbol)
        .trim_matches('"');
    let word = match Regex::new(&format!(r"\b{}\b", regex::escape(name))) {
        Ok(word) => word,
        Err(_) => return false,
    };
    lines.iter().any(|line| {
        line.trim() == statement
            || (is_import_line(line, language) && word.is_match(line))
            || (language == "go" && line.trim() == format!("\"{}\"", symbol.trim()))
    })
}

fn add_import(lines: &mut Vec<String>, language: &str, symbol: &str) -> Result<(), String> {
    let statement = import_statement(language, symbol)?;
    if already_imported(lines, language, symbol, &statement) {
        return Ok(());
    }

    if language == "go" {
        if let Some(block) = lines.iter().position(|l| l.trim_start().starts_with("import (")) {
            lines.insert(block + 1, format!("\t\"{}\"", symbol.trim()));
            return Ok(());
        }
    }

    let first_import = lines.iter().position(|l| is_import_line(l, language));
    let position = match first_import {
        Some(index) if language == "python" => {
            // __future__ imports must stay first
            let mut position = index;
            while lines
                .get(position)
                .map_or(false, |l| l.trim_start().starts_with("from __future__"))
            {
                position += 1;
            }
            position
        }
        Some(index) => index,
        None => preamble_end(lines, language),
    };
    lines.insert(position, statement);
    Ok(())
}

/// Index after the lines that must precede any import.
fn preamble_end(lines: &[String], language: &str) -> usize {
    let mut position = 0;
    match language {
        "go" | "java" => {
            if let Some(package) = lines.iter().position(|l| l.trim_start().starts_with("package ")) {
                position = package + 1;
            }
        }
        "rust" => {
            while lines.get(position).map_or(false, |l| {
                let t = l.trim_start();
                t.starts_with("//!") || t.starts_with("#![") || t.is_empty()
            }) {
                position += 1;
            }
        }
        "python" => {
            while lines.get(position).map_or(false, |l| {
                let t = l.trim_start();
                t.starts_with("#!") || t.starts_with("# -*-") || t.starts_with("# coding")
            }) {
                position += 1;
            }
            position = skip_docstring(lines, position);
        }
        _ => {
            if lines.first().map_or(false, |l| l.starts_with("#!")) {
                position = 1;
            }
        }
    }
    position
}

fn skip_docstring(lines: &[String], start: usize) -> usize {
    let Some(first) = lines.get(start).map(|l| l.trim_start()) else {
        return start;
    };
    let quote = if first.starts_with("\"\"\"") {
        "\"\"\""
    } else if first.starts_with("'''") {
        "'''"
    } else {
        return start;
    };
    if first.len() >= 6 && first[3..].contains(quote) {
        return start + 1;
    }
    lines[start + 1..]
        .iter()
        .position(|l| l.contains(quote))
        .map_or(start, |offset| start + offset + 2)
}

// ── fix_whitespace ──────────────────────────────────────────────────────

fn operator_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(===|!==|\*\*=|//=|>>=|<<=|==|!=|<=|>=|\+=|-=|\*=|/=|%=|\|=|&=|\^=|:=|=>|=)").ok()
    })
    .as_ref()
}

/// Deterministic spacing for one line: leading indentation kept, trailing
/// whitespace removed, inner runs of blanks collapsed, one space around
/// assignment and comparison operators and after commas. String literals
/// and trailing comments are left untouched. In Python, `=` inside
/// brackets (keyword arguments, defaults) gets no spaces.
pub fn normalize_spacing(line: &str, language: &str) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, body) = line.split_at(indent_len);
    let chars: Vec<char> = body.trim_end().chars().collect();
    let mut out = String::with_capacity(body.len() + 8);
    let mut depth: i32 = 0;
    let mut i = 0;

    let skip_blanks = |i: &mut usize| {
        while *i < chars.len() && (chars[*i] == ' ' || chars[*i] == '\t') {
            *i += 1;
        }
    };

    while i < chars.len() {
        let c = chars[i];
        let rest: String = chars[i..].iter().collect();

        // Trailing comment
        let comment = if language == "python" {
            c == '#'
        } else {
            rest.starts_with("//")
        };
        if comment {
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            if !out.is_empty() {
                out.push_str(if language == "python" { "  " } else { " " });
            }
            out.push_str(&rest);
            break;
        }

        match c {
            '"' | '\'' | '`' => {
                out.push(c);
                i += 1;
                while i < chars.len() {
                    let s = chars[i];
                    out.push(s);
                    i += 1;
                    if s == '\\' && i < chars.len() {
                        out.push(chars[i]);
                        i += 1;
                    } else if s == c {
                        break;
                    }
                }
                continue;
            }
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            ' ' | '\t' => {
                if !out.ends_with(' ') {
                    out.push(' ');
                }
                i += 1;
                continue;
            }
            ',' => {
                let trimmed = out.trim_end().len();
                out.truncate(trimmed);
                out.push(',');
                i += 1;
                skip_blanks(&mut i);
                if i < chars.len() && !matches!(chars[i], ')' | ']' | '}') {
                    out.push(' ');
                }
                continue;
            }
            _ => {}
        }

        if let Some(op) = operator_pattern().and_then(|re| re.find(&rest)) {
            let op = op.as_str();
            let trimmed = out.trim_end().len();
            out.truncate(trimmed);
            i += op.chars().count();
            skip_blanks(&mut i);
            if language == "python" && op == "=" && depth > 0 {
                out.push('=');
            } else {
                if !out.is_empty() {
                    out.push(' ');
                }
                out.push_str(op);
                if i < chars.len() {
                    out.push(' ');
                }
            }
            continue;
        }

        out.push(c);
        i += 1;
    }

    format!("{}{}", indent, out.trim_end())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::codebase::FsCodebase;
    use cascade_resolver_core::{CoreError, CoreResult, FixConfidence, SymbolContext};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn apply(content: &str, change: Change) -> Result<String, String> {
        let mut content = content.to_string();
        apply_change(&mut content, &change)
            .map(|_| content)
            .map_err(|e| e.to_string())
    }

    fn fix(changes: Vec<Change>) -> ErrorFix {
        ErrorFix::new("fix-1", "Test fix", FixConfidence::High, changes)
    }

    #[test]
    fn test_delete_line() {
        let out = apply("a\nb\nc\n", Change::DeleteLine { file: "x.py".into(), line: 2 }).unwrap();
        assert_eq!(out, "a\nc\n");
        assert!(apply("a\n", Change::DeleteLine { file: "x.py".into(), line: 2 }).is_err());
        assert!(apply("a\n", Change::DeleteLine { file: "x.py".into(), line: 0 }).is_err());
    }

    #[test]
    fn test_delete_line_keeps_crlf() {
        let out = apply("a\r\nb\r\n", Change::DeleteLine { file: "x.py".into(), line: 1 }).unwrap();
        assert_eq!(out, "b\r\n");
    }

    #[test]
    fn test_replace_text_requires_literal_match() {
        let change = |old: &str| Change::ReplaceText {
            file: "x.py".into(),
            line: 1,
            old_text: old.into(),
            new_text: "y".into(),
        };
        assert_eq!(apply("x = x\n", change("x")).unwrap(), "y = x\n");
        assert!(apply("x = x\n", change("z")).is_err());
    }

    #[test]
    fn test_add_import_python() {
        let src = "\"\"\"Module doc.\"\"\"\nimport os\n\nprint(os)\n";
        let change = Change::AddImport {
            file: "m.py".into(),
            symbol: "collections.OrderedDict".into(),
        };
        let out = apply(src, change.clone()).unwrap();
        assert_eq!(
            out,
            "\"\"\"Module doc.\"\"\"\nfrom collections import OrderedDict\nimport os\n\nprint(os)\n"
        );
        assert_eq!(apply(&out, change).unwrap(), out);
    }

    #[test]
    fn test_add_import_without_existing_imports() {
        let src = "#!/usr/bin/env python\n\"\"\"Doc\nmore\n\"\"\"\nx = json.dumps(1)\n";
        let out = apply(src, Change::AddImport { file: "m.py".into(), symbol: "json".into() }).unwrap();
        assert_eq!(out, "#!/usr/bin/env python\n\"\"\"Doc\nmore\n\"\"\"\nimport json\nx = json.dumps(1)\n");
    }

    #[test]
    fn test_add_import_python_future_stays_first() {
        let src = "from __future__ import annotations\nimport os\n";
        let out = apply(src, Change::AddImport { file: "m.py".into(), symbol: "sys".into() }).unwrap();
        assert_eq!(out, "from __future__ import annotations\nimport sys\nimport os\n");
    }

    #[test]
    fn test_add_import_rust_and_go() {
        let rs = "//! Crate docs\n\nfn main() {}\n";
        let out = apply(rs, Change::AddImport { file: "src/main.rs".into(), symbol: "std::fmt".into() }).unwrap();
        assert_eq!(out, "//! Crate docs\n\nuse std::fmt;\nfn main() {}\n");

        let go = "package main\n\nimport (\n\t\"os\"\n)\n";
        let out = apply(go, Change::AddImport { file: "main.go".into(), symbol: "fmt".into() }).unwrap();
        assert_eq!(out, "package main\n\nimport (\n\t\"fmt\"\n\t\"os\"\n)\n");
    }

    #[test]
    fn test_add_import_typescript_needs_module() {
        assert!(apply("", Change::AddImport { file: "a.ts".into(), symbol: "useState".into() }).is_err());
        let out = apply(
            "const x = 1;\n",
            Change::AddImport { file: "a.ts".into(), symbol: "react:useState".into() },
        )
        .unwrap();
        assert_eq!(out, "import { useState } from 'react';\nconst x = 1;\n");
    }

    #[test]
    fn test_normalize_spacing() {
        assert_eq!(normalize_spacing("x=1", "python"), "x = 1");
        assert_eq!(normalize_spacing("    if a==b:", "python"), "    if a == b:");
        assert_eq!(normalize_spacing("f(a = 1,b=2)", "python"), "f(a=1, b=2)");
        assert_eq!(normalize_spacing("s = 'a=b'", "python"), "s = 'a=b'");
        assert_eq!(normalize_spacing("y  =  x   +1   ", "python"), "y = x +1");
        assert_eq!(normalize_spacing("x=-1 # note a=b", "python"), "x = -1  # note a=b");
        assert_eq!(normalize_spacing("let x=vec![1,2];", "rust"), "let x = vec![1, 2];");
        let once = normalize_spacing("total+=n*2", "python");
        assert_eq!(once, "total += n*2");
        assert_eq!(normalize_spacing(&once, "python"), once);
    }

    fn project(files: &[(&str, &str)]) -> (TempDir, Arc<FsCodebase>) {
        let dir = TempDir::new().unwrap();
        for (path, content) in files {
            std::fs::write(dir.path().join(path), content).unwrap();
        }
        let codebase = Arc::new(FsCodebase::new(dir.path()));
        (dir, codebase)
    }

    #[tokio::test]
    async fn test_failed_second_change_leaves_file_untouched() {
        let original = "import json\nx = 1\ny = 2\n";
        let (dir, codebase) = project(&[("a.py", original)]);
        let applicator = FixApplicator::new(codebase);

        let result = applicator
            .apply(
                "e1",
                &fix(vec![
                    Change::DeleteLine { file: "a.py".into(), line: 1 },
                    Change::ReplaceText {
                        file: "a.py".into(),
                        line: 1,
                        old_text: "not present".into(),
                        new_text: "z".into(),
                    },
                ]),
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert!(result.message.contains("Change 2 of 2"));
        assert!(result.message.contains("Fix application failed"), "{}", result.message);
        assert!(result.files_modified.is_empty());
        assert_eq!(std::fs::read(dir.path().join("a.py")).unwrap(), original.as_bytes());
    }

    #[tokio::test]
    async fn test_unsupported_change_fails_without_writes() {
        let (dir, codebase) = project(&[("a.py", "x\n")]);
        let applicator = FixApplicator::new(codebase);
        let result = applicator
            .apply(
                "e1",
                &fix(vec![Change::DeleteLine { file: "a.py".into(), line: 1 }, Change::Unsupported]),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.success);
        assert!(result.message.contains("unsupported"));
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "x\n");
    }

    #[tokio::test]
    async fn test_multi_file_fix_applies_all() {
        let (dir, codebase) = project(&[("a.py", "a\nb\n"), ("b.py", "c\nd\n")]);
        let applicator = FixApplicator::new(codebase);
        let result = applicator
            .apply(
                "e1",
                &fix(vec![
                    Change::DeleteLine { file: "b.py".into(), line: 2 },
                    Change::DeleteLine { file: "a.py".into(), line: 1 },
                ]),
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success, "{}", result.message);
        assert_eq!(result.files_modified, vec!["a.py", "b.py"]);
        assert_eq!(result.applied_fixes, vec!["fix-1"]);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "b\n");
        assert_eq!(std::fs::read_to_string(dir.path().join("b.py")).unwrap(), "c\n");
    }

    #[tokio::test]
    async fn test_cancelled_before_write_phase() {
        let (dir, codebase) = project(&[("a.py", "a\n")]);
        let applicator = FixApplicator::new(codebase);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = applicator
            .apply("e1", &fix(vec![Change::DeleteLine { file: "a.py".into(), line: 1 }]), &cancel)
            .await;
        assert!(!result.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("a.py")).unwrap(), "a\n");
    }

    /// In-memory codebase whose writes to one file fail after a number of
    /// successful writes.
    struct FlakyCodebase {
        files: std::sync::Mutex<BTreeMap<String, String>>,
        fail_file: String,
        fail_after: usize,
        writes: AtomicUsize,
    }

    #[async_trait]
    impl Codebase for FlakyCodebase {
        async fn get_symbol_context(&self, _s: &str) -> CoreResult<SymbolContext> {
            Ok(SymbolContext::default())
        }

        async fn get_file_content(&self, path: &str) -> CoreResult<String> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| CoreError::file_not_found(path))
        }

        async fn write_file_content(&self, path: &str, content: &str) -> CoreResult<()> {
            let n = self.writes.fetch_add(1, Ordering::SeqCst);
            if path == self.fail_file && n >= self.fail_after {
                return Err(CoreError::internal("disk full"));
            }
            self.files.lock().unwrap().insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn list_source_files(&self) -> CoreResult<Vec<String>> {
            Ok(self.files.lock().unwrap().keys().cloned().collect())
        }
    }

    #[tokio::test]
    async fn test_write_failure_restores_written_files() {
        let codebase = Arc::new(FlakyCodebase {
            files: std::sync::Mutex::new(BTreeMap::from([
                ("a.py".to_string(), "a1\na2\n".to_string()),
                ("b.py".to_string(), "b1\nb2\n".to_string()),
            ])),
            fail_file: "b.py".to_string(),
            fail_after: 0,
            writes: AtomicUsize::new(0),
        });
        let applicator = FixApplicator::new(codebase.clone());
        let result = applicator
            .apply(
                "e1",
                &fix(vec![
                    Change::DeleteLine { file: "a.py".into(), line: 1 },
                    Change::DeleteLine { file: "b.py".into(), line: 1 },
                ]),
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert!(result.message.contains("rolled back"), "{}", result.message);
        let files = codebase.files.lock().unwrap();
        assert_eq!(files["a.py"], "a1\na2\n");
        assert_eq!(files["b.py"], "b1\nb2\n");
        assert!(!files.contains_key("b.py.bak"));
    }

    #[tokio::test]
    async fn test_unrecoverable_restore_keeps_backup() {
        let codebase = Arc::new(FlakyCodebase {
            files: std::sync::Mutex::new(BTreeMap::from([
                ("a.py".to_string(), "a1\n".to_string()),
                ("b.py".to_string(), "b1\n".to_string()),
            ])),
            fail_file: "a.py".to_string(),
            // a.py write succeeds, b.py write fails, a.py restore fails
            fail_after: 1,
            writes: AtomicUsize::new(0),
        });
        let failing_b = Arc::new(FlakyB(codebase));
        let applicator = FixApplicator::new(failing_b.clone());
        let result = applicator
            .apply(
                "e1",
                &fix(vec![
                    Change::DeleteLine { file: "a.py".into(), line: 1 },
                    Change::DeleteLine { file: "b.py".into(), line: 1 },
                ]),
                &CancellationToken::new(),
            )
            .await;

        assert!(!result.success);
        assert!(result.message.contains(".bak"), "{}", result.message);
        let files = failing_b.0.files.lock().unwrap();
        assert_eq!(files["a.py.bak"], "a1\n");
    }

    /// Wraps `FlakyCodebase` so that every write to `b.py` also fails.
    struct FlakyB(Arc<FlakyCodebase>);

    #[async_trait]
    impl Codebase for FlakyB {
        async fn get_symbol_context(&self, s: &str) -> CoreResult<SymbolContext> {
            self.0.get_symbol_context(s).await
        }

        async fn get_file_content(&self, path: &str) -> CoreResult<String> {
            self.0.get_file_content(path).await
        }

        async fn write_file_content(&self, path: &str, content: &str) -> CoreResult<()> {
            if path == "b.py" {
                self.0.writes.fetch_add(1, Ordering::SeqCst);
                return Err(CoreError::internal("read-only"));
            }
            self.0.write_file_content(path, content).await
        }

        async fn list_source_files(&self) -> CoreResult<Vec<String>> {
            self.0.list_source_files().await
        }
    }
}
