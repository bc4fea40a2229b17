//! Error Context Service
//!
//! Enriches a unified error with surrounding code, call graph, dependency
//! chain and fix suggestions.

mod engine;
mod suggestions;

pub use engine::{ContextOptions, ErrorContextEngine};
pub use suggestions::{default_rules, quoted_symbol, PatternRule, SuggestionRule};
