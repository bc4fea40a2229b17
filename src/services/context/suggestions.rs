//! Fix Suggestion Rules
//!
//! Free-text fix suggestions for an error, produced by a pluggable table of
//! rules keyed by category and message pattern.

use std::sync::OnceLock;

use regex::Regex;

use cascade_resolver_core::{ErrorCategory, ErrorContext, UnifiedError};

use crate::utils::error::{AppError, AppResult};

/// A source of fix suggestions. Rules see the partially built context
/// (surrounding code, call graph and dependency chain are filled in).
pub trait SuggestionRule: Send + Sync {
    fn name(&self) -> &str;

    fn suggest(&self, error: &UnifiedError, context: &ErrorContext) -> AppResult<Vec<String>>;
}

/// First quoted identifier in a diagnostic message.
pub fn quoted_symbol(message: &str) -> Option<String> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"['"`]([A-Za-z_][\w.:]*)['"`]"#).ok())
        .as_ref()
        .and_then(|re| re.captures(message))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Table rule: fires when the error's category is listed, or when its
/// message matches `pattern`. `{symbol}` in a template is replaced by the
/// first quoted identifier of the message.
pub struct PatternRule {
    name: String,
    categories: Vec<ErrorCategory>,
    pattern: Option<Regex>,
    templates: Vec<String>,
}

impl PatternRule {
    pub fn new(name: impl Into<String>, categories: &[ErrorCategory], templates: &[&str]) -> Self {
        Self {
            name: name.into(),
            categories: categories.to_vec(),
            pattern: None,
            templates: templates.iter().map(|t| t.to_string()).collect(),
        }
    }

    pub fn with_pattern(mut self, pattern: &str) -> AppResult<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| AppError::config(format!("Invalid rule pattern: {}", e)))?;
        self.pattern = Some(pattern);
        Ok(self)
    }

    fn applies(&self, error: &UnifiedError) -> bool {
        self.categories.contains(&error.category)
            || self
                .pattern
                .as_ref()
                .map_or(false, |p| p.is_match(&error.message))
    }
}

impl SuggestionRule for PatternRule {
    fn name(&self) -> &str {
        &self.name
    }

    fn suggest(&self, error: &UnifiedError, _context: &ErrorContext) -> AppResult<Vec<String>> {
        if !self.applies(error) {
            return Ok(Vec::new());
        }
        let symbol = quoted_symbol(&error.message);
        Ok(self
            .templates
            .iter()
            .filter_map(|template| {
                if template.contains("{symbol}") {
                    symbol.as_ref().map(|s| template.replace("{symbol}", s))
                } else {
                    Some(template.clone())
                }
            })
            .collect())
    }
}

/// Points at the callers that a change to the enclosing function affects.
struct CallerImpactRule;

impl SuggestionRule for CallerImpactRule {
    fn name(&self) -> &str {
        "caller-impact"
    }

    fn suggest(&self, error: &UnifiedError, context: &ErrorContext) -> AppResult<Vec<String>> {
        if !matches!(error.category, ErrorCategory::Logic | ErrorCategory::Undefined) {
            return Ok(Vec::new());
        }
        match (&context.enclosing_function, context.calling_functions.as_slice()) {
            (Some(function), callers) if !callers.is_empty() => Ok(vec![format!(
                "Changes to '{}' affect its callers: {}",
                function,
                callers.join(", ")
            )]),
            _ => Ok(Vec::new()),
        }
    }
}

/// The built-in rule table.
pub fn default_rules() -> Vec<Box<dyn SuggestionRule>> {
    let mut rules: Vec<Box<dyn SuggestionRule>> = vec![
        Box::new(PatternRule::new(
            "undefined-name",
            &[ErrorCategory::Undefined],
            &[
                "Import '{symbol}' from the module that defines it",
                "Define '{symbol}' before it is used",
                "Check '{symbol}' for typos",
            ],
        )),
        Box::new(PatternRule::new(
            "unused-code",
            &[ErrorCategory::Unused],
            &[
                "Remove the unused '{symbol}'",
                "Remove the unused code or use it where intended",
            ],
        )),
        Box::new(PatternRule::new(
            "syntax",
            &[ErrorCategory::Syntax],
            &[
                "Check for unbalanced brackets, quotes or missing delimiters near this line",
                "Check indentation of the surrounding block",
            ],
        )),
        Box::new(PatternRule::new(
            "style",
            &[ErrorCategory::Style],
            &["Run the project's formatter on this file"],
        )),
        Box::new(PatternRule::new(
            "security",
            &[ErrorCategory::Security],
            &["Validate or escape untrusted input before it reaches this call"],
        )),
        Box::new(PatternRule::new(
            "performance",
            &[ErrorCategory::Performance],
            &["Move repeated work out of loops or cache its result"],
        )),
        Box::new(PatternRule::new(
            "logic",
            &[ErrorCategory::Logic],
            &["Check the types and values flowing into this expression"],
        )),
        Box::new(CallerImpactRule),
    ];
    if let Ok(rule) = PatternRule::new(
        "deprecated",
        &[],
        &["Replace the deprecated API with its documented successor"],
    )
    .with_pattern(r"(?i)\bdeprecated\b")
    {
        rules.push(Box::new(rule));
    }
    rules
}
