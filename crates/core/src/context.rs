//! Error Context
//!
//! The enriched view of one error: surrounding source, call relationships,
//! dependency chain, and suggestions. Built by the context engine in the main
//! crate; every field except `error` is best-effort.

use serde::{Deserialize, Serialize};

use crate::diagnostic::UnifiedError;

/// Independent steps of context building, reported when one of them fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextStep {
    SurroundingCode,
    CallGraph,
    DependencyChain,
    Suggestions,
}

impl std::fmt::Display for ContextStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextStep::SurroundingCode => write!(f, "surrounding_code"),
            ContextStep::CallGraph => write!(f, "call_graph"),
            ContextStep::DependencyChain => write!(f, "dependency_chain"),
            ContextStep::Suggestions => write!(f, "suggestions"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub error: UnifiedError,
    /// Window of source lines around the error, newline separated
    pub surrounding_code: String,
    /// 1-based line number of the first line in `surrounding_code`
    pub code_start_line: u32,
    /// Function enclosing the error location, when one was found
    pub enclosing_function: Option<String>,
    pub calling_functions: Vec<String>,
    pub called_functions: Vec<String>,
    /// Files/modules reachable from the error's file, nearest first
    pub dependency_chain: Vec<String>,
    pub related_symbols: Vec<String>,
    pub fix_suggestions: Vec<String>,
    pub has_fix: bool,
    /// Steps that failed; their fields are left empty
    #[serde(default)]
    pub failed_steps: Vec<ContextStep>,
}

impl ErrorContext {
    /// An empty context for `error`; the engine fills in what it can.
    pub fn empty(error: UnifiedError) -> Self {
        let has_fix = error.has_fixes();
        Self {
            error,
            surrounding_code: String::new(),
            code_start_line: 0,
            enclosing_function: None,
            calling_functions: Vec::new(),
            called_functions: Vec::new(),
            dependency_chain: Vec::new(),
            related_symbols: Vec::new(),
            fix_suggestions: Vec::new(),
            has_fix,
            failed_steps: Vec::new(),
        }
    }

    pub fn error_id(&self) -> &str {
        &self.error.id
    }

    pub fn is_complete(&self) -> bool {
        self.failed_steps.is_empty()
    }

    /// Files and symbols that influence, or are influenced by, this error.
    pub fn blast_radius(&self) -> Vec<String> {
        let mut radius: Vec<String> = Vec::new();
        let candidates = std::iter::once(self.error.location.file_path.clone())
            .chain(self.calling_functions.iter().cloned())
            .chain(self.called_functions.iter().cloned())
            .chain(self.dependency_chain.iter().cloned());
        for item in candidates {
            if !radius.contains(&item) {
                radius.push(item);
            }
        }
        radius
    }
}
