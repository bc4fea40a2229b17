//! Error Context Engine
//!
//! Builds an `ErrorContext` for a `UnifiedError` in best-effort steps:
//! surrounding code, call graph, dependency chain, then fix suggestions.
//! A failing step is recorded in `failed_steps` and leaves its fields
//! empty; the other steps still run.
//!
//! Contexts are cached by error id together with the content hash of the
//! error's file and rebuilt when the file changes.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use cascade_resolver_core::{Codebase, ContextStep, ErrorContext, UnifiedError};

use super::suggestions::{default_rules, quoted_symbol, SuggestionRule};
use crate::services::codebase::enclosing_function;
use crate::utils::hashing::content_hash;
use crate::utils::paths::language_for_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextOptions {
    /// Lines shown before and after the error line
    pub window_lines: u32,
    /// Maximum import hops followed from the error's file
    pub dependency_depth: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            window_lines: 5,
            dependency_depth: 3,
        }
    }
}

struct CachedContext {
    context: ErrorContext,
    /// Hash of the file content the context was built from
    content_hash: Option<String>,
}

pub struct ErrorContextEngine {
    codebase: Arc<dyn Codebase>,
    options: ContextOptions,
    rules: Vec<Box<dyn SuggestionRule>>,
    cache: RwLock<HashMap<String, CachedContext>>,
}

impl ErrorContextEngine {
    pub fn new(codebase: Arc<dyn Codebase>, options: ContextOptions) -> Self {
        Self {
            codebase,
            options,
            rules: default_rules(),
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Replace the suggestion rule table.
    pub fn with_rules(mut self, rules: Vec<Box<dyn SuggestionRule>>) -> Self {
        self.rules = rules;
        self
    }

    pub fn add_rule(&mut self, rule: Box<dyn SuggestionRule>) {
        self.rules.push(rule);
    }

    /// Context for `error`, served from cache while its file is unchanged.
    pub async fn get_context(&self, error: &UnifiedError) -> ErrorContext {
        let content = match self.codebase.get_file_content(error.file_path()).await {
            Ok(content) => Some(content),
            Err(e) => {
                warn!(file = %error.file_path(), error = %e, "Cannot read source for context");
                None
            }
        };
        let hash = content.as_deref().map(content_hash);

        if let Some(hash) = &hash {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(&error.id) {
                if cached.content_hash.as_ref() == Some(hash) && cached.context.error == *error {
                    return cached.context.clone();
                }
            }
        }

        let context = self.build(error, content.as_deref()).await;

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            error.id.clone(),
            CachedContext {
                context: context.clone(),
                content_hash: hash,
            },
        );
        context
    }

    async fn build(&self, error: &UnifiedError, content: Option<&str>) -> ErrorContext {
        let mut context = ErrorContext::empty(error.clone());
        let file = error.file_path();
        let language = language_for_path(file).unwrap_or("");

        // 1. Surrounding code
        match content {
            Some(content) => {
                let (start, code) = window(content, error.location.line, self.options.window_lines);
                context.code_start_line = start;
                context.surrounding_code = code;
            }
            None => context.failed_steps.push(ContextStep::SurroundingCode),
        }

        // 2. Call graph of the enclosing function
        context.enclosing_function =
            content.and_then(|c| enclosing_function(c, language, error.location.line));
        match (&context.enclosing_function, content) {
            (Some(function), _) => match self.codebase.get_symbol_context(function).await {
                Ok(symbols) => {
                    context.calling_functions = symbols.references;
                    context.called_functions = symbols.dependencies;
                }
                Err(e) => {
                    warn!(file = %file, function = %function, error = %e, "Call graph lookup failed");
                    context.failed_steps.push(ContextStep::CallGraph);
                }
            },
            (None, None) => context.failed_steps.push(ContextStep::CallGraph),
            (None, Some(_)) => {}
        }

        let mut related = Vec::new();
        if let Some(symbol) = quoted_symbol(&error.message) {
            related.push(symbol);
        }
        if let Some(function) = &context.enclosing_function {
            if !related.contains(function) {
                related.push(function.clone());
            }
        }
        context.related_symbols = related;

        // 3. Dependency chain
        match self.dependency_chain(file).await {
            Some(chain) => context.dependency_chain = chain,
            None => context.failed_steps.push(ContextStep::DependencyChain),
        }

        // 4. Suggestions
        let mut suggestions = Vec::new();
        let mut rule_failed = false;
        for rule in &self.rules {
            match rule.suggest(error, &context) {
                Ok(found) => {
                    for suggestion in found {
                        if !suggestions.contains(&suggestion) {
                            suggestions.push(suggestion);
                        }
                    }
                }
                Err(e) => {
                    warn!(rule = %rule.name(), error = %e, "Suggestion rule failed");
                    rule_failed = true;
                }
            }
        }
        context.fix_suggestions = suggestions;
        if rule_failed {
            context.failed_steps.push(ContextStep::Suggestions);
        }

        // 5. has_fix
        context.has_fix = error.has_fixes();

        if !context.failed_steps.is_empty() {
            debug!(error_id = %error.id, failed = ?context.failed_steps, "Context built partially");
        }
        context
    }

    /// Breadth-first walk over import edges, bounded by `dependency_depth`.
    /// `None` if the error's own file cannot be queried.
    async fn dependency_chain(&self, file: &str) -> Option<Vec<String>> {
        let mut chain = Vec::new();
        let mut seen: HashSet<String> = HashSet::from([file.to_string()]);
        let mut queue: VecDeque<(String, usize)> = VecDeque::from([(file.to_string(), 0)]);

        while let Some((current, depth)) = queue.pop_front() {
            if depth >= self.options.dependency_depth {
                continue;
            }
            let symbols = match self.codebase.get_symbol_context(&current).await {
                Ok(symbols) => symbols,
                Err(e) if current == file => {
                    warn!(file = %file, error = %e, "Dependency lookup failed");
                    return None;
                }
                Err(e) => {
                    debug!(file = %current, error = %e, "Skipping dependency");
                    continue;
                }
            };
            for dependency in symbols.dependencies {
                if !seen.insert(dependency.clone()) {
                    continue;
                }
                chain.push(dependency.clone());
                // Only project files have further edges
                if language_for_path(&dependency).is_some() && Path::new(&dependency).is_relative() {
                    queue.push_back((dependency, depth + 1));
                }
            }
        }
        Some(chain)
    }

    // ── Cache maintenance ───────────────────────────────────────────────

    pub fn invalidate(&self, error_id: &str) -> bool {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.remove(error_id).is_some()
    }

    /// Drop every cached context for errors in `file_path`. Returns how
    /// many were removed.
    pub fn invalidate_file(&self, file_path: &str) -> usize {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        let before = cache.len();
        cache.retain(|_, cached| cached.context.error.file_path() != file_path);
        before - cache.len()
    }

    pub fn clear(&self) {
        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        cache.clear();
    }

    pub fn cached_count(&self) -> usize {
        self.cache.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

/// 1-based start line and the text of the window around `line`.
fn window(content: &str, line: u32, radius: u32) -> (u32, String) {
    let lines: Vec<&str> = content.lines().collect();
    if lines.is_empty() {
        return (0, String::new());
    }
    let total = lines.len() as u32;
    let center = line.clamp(1, total);
    let start = center.saturating_sub(radius).max(1);
    let end = center.saturating_add(radius).min(total);
    let text = lines[(start - 1) as usize..end as usize].join("\n");
    (start, text)
}
