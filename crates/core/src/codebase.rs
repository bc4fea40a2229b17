//! Codebase Collaborator
//!
//! The symbol-graph and file-access surface this workspace consumes. Parsing
//! and call-graph construction live behind this trait and are not
//! reimplemented here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// Relationships of a symbol or file.
///
/// For a function symbol, `references` are the functions that call it and
/// `dependencies` are the functions it calls. For a file, `references` are
/// files importing it and `dependencies` are files/modules it imports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolContext {
    pub references: Vec<String>,
    pub dependencies: Vec<String>,
}

/// Source access and symbol queries. Paths are repo-relative.
#[async_trait]
pub trait Codebase: Send + Sync {
    async fn get_symbol_context(&self, symbol_or_file: &str) -> CoreResult<SymbolContext>;

    async fn get_file_content(&self, path: &str) -> CoreResult<String>;

    async fn write_file_content(&self, path: &str, content: &str) -> CoreResult<()>;

    async fn list_source_files(&self) -> CoreResult<Vec<String>>;
}
