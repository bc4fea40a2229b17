//! Resolution Result Model

use serde::{Deserialize, Serialize};

/// Outcome of one resolution attempt. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub error_id: String,
    pub success: bool,
    /// Ids of the fixes that were applied
    pub applied_fixes: Vec<String>,
    pub files_modified: Vec<String>,
    pub message: String,
}

impl ResolutionResult {
    pub fn succeeded(
        error_id: impl Into<String>,
        fix_id: impl Into<String>,
        files_modified: Vec<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error_id: error_id.into(),
            success: true,
            applied_fixes: vec![fix_id.into()],
            files_modified,
            message: message.into(),
        }
    }

    pub fn failed(error_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_id: error_id.into(),
            success: false,
            applied_fixes: Vec::new(),
            files_modified: Vec::new(),
            message: message.into(),
        }
    }

    pub fn not_found(error_id: impl Into<String>) -> Self {
        let error_id = error_id.into();
        let message = format!("Error '{}' not found", error_id);
        Self::failed(error_id, message)
    }
}
