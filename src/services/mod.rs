//! Services
//!
//! Diagnostics collection, context building and fix resolution, plus the
//! engine that ties them together.

pub mod codebase;
pub mod context;
pub mod diagnostics;
pub mod engine;
pub mod lsp;
pub mod resolution;

pub use codebase::FsCodebase;
pub use context::ErrorContextEngine;
pub use diagnostics::{DiagnosticAggregator, DiagnosticBackend, DiagnosticStream};
pub use engine::ResolutionEngine;
pub use lsp::{LspClient, ServerDiscovery, ServerManager};
pub use resolution::{ErrorResolver, FixApplicator};
