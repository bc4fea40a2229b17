//! LSP Diagnostic Backend
//!
//! Adapts a live `LspClient` to the `DiagnosticBackend` seam and converts
//! LSP diagnostics into raw diagnostics.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use cascade_resolver_core::ServerConfig;

use super::client::{uri_to_path, LspClient};
use crate::services::diagnostics::backend::DiagnosticBackend;
use crate::services::diagnostics::normalize::{RawDiagnostic, RawSeverity};
use crate::utils::error::AppResult;
use crate::utils::paths::to_repo_relative;

pub struct LspBackend {
    config: ServerConfig,
    client: Arc<LspClient>,
}

impl LspBackend {
    pub fn new(config: ServerConfig, client: Arc<LspClient>) -> Self {
        Self { config, client }
    }

    pub fn client(&self) -> &Arc<LspClient> {
        &self.client
    }
}

#[async_trait]
impl DiagnosticBackend for LspBackend {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn supports(&self, language: &str) -> bool {
        self.config.supports_language(language)
    }

    async fn diagnostics(&self, file_path: &str, content: &str) -> AppResult<Vec<RawDiagnostic>> {
        let diagnostics = self.client.document_diagnostics(file_path, content).await?;
        Ok(diagnostics
            .iter()
            .map(|d| convert_diagnostic(&self.config.name, file_path, d))
            .collect())
    }
}

/// Convert one LSP diagnostic (0-based positions) to a raw diagnostic.
pub fn convert_diagnostic(server: &str, file_path: &str, diagnostic: &lsp_types::Diagnostic) -> RawDiagnostic {
    let mut raw = RawDiagnostic::zero_based(
        server,
        file_path,
        diagnostic.range.start.line,
        diagnostic.range.start.character,
        diagnostic.message.trim(),
    );
    if let Some(severity) = diagnostic
        .severity
        .and_then(|s| serde_json::to_value(s).ok())
        .and_then(|v| v.as_i64())
    {
        raw = raw.with_severity(RawSeverity::Code(severity));
    }
    match &diagnostic.code {
        Some(lsp_types::NumberOrString::Number(n)) => raw = raw.with_code(n.to_string()),
        Some(lsp_types::NumberOrString::String(s)) => raw = raw.with_code(s.clone()),
        None => {}
    }
    raw
}

/// Convert a pushed `publishDiagnostics` notification into the repo-relative
/// file path and its raw diagnostics. `None` for URIs that are not files.
pub fn published_to_raw(
    server: &str,
    root: &Path,
    params: &lsp_types::PublishDiagnosticsParams,
) -> Option<(String, Vec<RawDiagnostic>)> {
    let path = uri_to_path(params.uri.as_str())?;
    let file_path = to_repo_relative(&path, root);
    let raw = params
        .diagnostics
        .iter()
        .map(|d| convert_diagnostic(server, &file_path, d))
        .collect();
    Some((file_path, raw))
}
