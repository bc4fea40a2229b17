//! Fix Model
//!
//! Fixes attached to unified errors and the tagged `Change` variants they are
//! made of.

use serde::{Deserialize, Serialize};

/// Ordinal estimate of how safe a fix is to apply without review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixConfidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for FixConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FixConfidence::Low => write!(f, "low"),
            FixConfidence::Medium => write!(f, "medium"),
            FixConfidence::High => write!(f, "high"),
        }
    }
}

/// How much of the codebase a fix is expected to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EstimatedImpact {
    Low,
    Medium,
    High,
}

impl Default for EstimatedImpact {
    fn default() -> Self {
        EstimatedImpact::Low
    }
}

impl std::fmt::Display for EstimatedImpact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EstimatedImpact::Low => write!(f, "low"),
            EstimatedImpact::Medium => write!(f, "medium"),
            EstimatedImpact::High => write!(f, "high"),
        }
    }
}

/// A single atomic text mutation. Lines are 1-based.
///
/// Tags outside the known set deserialize to `Unsupported`, which the
/// applicator rejects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Change {
    DeleteLine {
        file: String,
        line: u32,
    },
    ReplaceText {
        file: String,
        line: u32,
        old_text: String,
        new_text: String,
    },
    AddImport {
        file: String,
        symbol: String,
    },
    FixWhitespace {
        file: String,
        line: u32,
    },
    #[serde(other)]
    Unsupported,
}

impl Change {
    /// Target file, if the change is a known variant.
    pub fn file(&self) -> Option<&str> {
        match self {
            Change::DeleteLine { file, .. }
            | Change::ReplaceText { file, .. }
            | Change::AddImport { file, .. }
            | Change::FixWhitespace { file, .. } => Some(file),
            Change::Unsupported => None,
        }
    }

    /// Target line; `AddImport` has none.
    pub fn line(&self) -> Option<u32> {
        match self {
            Change::DeleteLine { line, .. }
            | Change::ReplaceText { line, .. }
            | Change::FixWhitespace { line, .. } => Some(*line),
            Change::AddImport { .. } | Change::Unsupported => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Change::DeleteLine { .. } => "delete_line",
            Change::ReplaceText { .. } => "replace_text",
            Change::AddImport { .. } => "add_import",
            Change::FixWhitespace { .. } => "fix_whitespace",
            Change::Unsupported => "unsupported",
        }
    }
}

/// A fix proposal attached to an error. Immutable once attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFix {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub confidence: FixConfidence,
    #[serde(default)]
    pub requires_user_input: bool,
    #[serde(default)]
    pub estimated_impact: EstimatedImpact,
    pub changes: Vec<Change>,
}

impl ErrorFix {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        confidence: FixConfidence,
        changes: Vec<Change>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            confidence,
            requires_user_input: false,
            estimated_impact: EstimatedImpact::Low,
            changes,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn requiring_user_input(mut self, requires: bool) -> Self {
        self.requires_user_input = requires;
        self
    }

    pub fn with_impact(mut self, impact: EstimatedImpact) -> Self {
        self.estimated_impact = impact;
        self
    }

    /// Safe to apply without a human in the loop.
    pub fn is_auto_applicable(&self) -> bool {
        self.confidence == FixConfidence::High && !self.requires_user_input
    }

    /// Distinct files touched, in first-seen order.
    pub fn files(&self) -> Vec<&str> {
        let mut files: Vec<&str> = Vec::new();
        for file in self.changes.iter().filter_map(Change::file) {
            if !files.contains(&file) {
                files.push(file);
            }
        }
        files
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_ordinal() {
        assert!(FixConfidence::High > FixConfidence::Medium);
        assert!(FixConfidence::Medium > FixConfidence::Low);
    }

    #[test]
    fn test_change_tagged_serialization() {
        let change = Change::DeleteLine {
            file: "a.py".to_string(),
            line: 3,
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["type"], "delete_line");
        assert_eq!(json["line"], 3);
    }

    #[test]
    fn test_unknown_change_tag_is_unsupported() {
        let json = r#"{"type": "rename_symbol", "file": "a.py", "from": "x", "to": "y"}"#;
        let change: Change = serde_json::from_str(json).unwrap();
        assert_eq!(change, Change::Unsupported);
        assert!(change.file().is_none());
    }

    #[test]
    fn test_fix_defaults_from_backend_json() {
        let json = r#"{
            "id": "f1",
            "title": "Remove unused import",
            "confidence": "high",
            "changes": [{"type": "delete_line", "file": "a.py", "line": 3}]
        }"#;
        let fix: ErrorFix = serde_json::from_str(json).unwrap();
        assert!(!fix.requires_user_input);
        assert_eq!(fix.estimated_impact, EstimatedImpact::Low);
        assert!(fix.is_auto_applicable());
    }

    #[test]
    fn test_files_deduplicated_in_order() {
        let fix = ErrorFix::new(
            "f",
            "t",
            FixConfidence::Low,
            vec![
                Change::FixWhitespace { file: "b.py".into(), line: 1 },
                Change::AddImport { file: "a.py".into(), symbol: "os".into() },
                Change::DeleteLine { file: "b.py".into(), line: 2 },
            ],
        );
        assert_eq!(fix.files(), vec!["b.py", "a.py"]);
    }
}
