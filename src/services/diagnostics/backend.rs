//! Diagnostic Backend Trait
//!
//! The seam between the aggregator and anything that can report
//! diagnostics for a file: a live language server, or a static source in
//! tests.

use async_trait::async_trait;

use super::normalize::RawDiagnostic;
use crate::utils::error::AppResult;

/// A source of diagnostics for individual files.
#[async_trait]
pub trait DiagnosticBackend: Send + Sync {
    /// Backend name, recorded as the `source` of its diagnostics.
    fn name(&self) -> &str;

    /// Whether this backend analyzes files of `language`.
    fn supports(&self, language: &str) -> bool;

    /// Diagnostics for one file. `file_path` is repo-relative and `content`
    /// is the text the backend should analyze.
    async fn diagnostics(&self, file_path: &str, content: &str) -> AppResult<Vec<RawDiagnostic>>;
}
