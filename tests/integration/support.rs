//! Test backends and project helpers.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tempfile::TempDir;

use cascade_resolver::services::diagnostics::{DiagnosticBackend, RawDiagnostic, RawSeverity};
use cascade_resolver::{AppResult, EngineConfig, ResolutionEngine};

/// Create a temporary project containing `files`.
pub fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = TempDir::new().unwrap();
    for (path, content) in files {
        let full = dir.path().join(path);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
    }
    dir
}

pub fn read(dir: &Path, path: &str) -> String {
    std::fs::read_to_string(dir.join(path)).unwrap()
}

/// Engine with default configuration and the given in-process backends.
pub async fn engine(dir: &Path, backends: Vec<Arc<dyn DiagnosticBackend>>) -> ResolutionEngine {
    let engine = ResolutionEngine::new(dir, EngineConfig::default()).await.unwrap();
    for backend in backends {
        engine.add_backend(backend);
    }
    engine
}

/// Flags `import X` lines whose module is never referenced as `X.`.
pub struct UnusedImportLinter {
    pub name: &'static str,
}

#[async_trait]
impl DiagnosticBackend for UnusedImportLinter {
    fn name(&self) -> &str {
        self.name
    }

    fn supports(&self, language: &str) -> bool {
        language == "python"
    }

    async fn diagnostics(&self, file_path: &str, content: &str) -> AppResult<Vec<RawDiagnostic>> {
        let lines: Vec<&str> = content.lines().collect();
        let mut out = Vec::new();
        for (index, line) in lines.iter().enumerate() {
            let Some(module) = line.strip_prefix("import ") else {
                continue;
            };
            let module = module.trim();
            let usage = format!("{}.", module);
            let used = lines
                .iter()
                .enumerate()
                .any(|(other, l)| other != index && l.contains(&usage));
            if !used {
                out.push(
                    RawDiagnostic::one_based(
                        self.name,
                        file_path,
                        index as u32 + 1,
                        0,
                        format!("'{}' imported but unused", module),
                    )
                    .with_code("F401")
                    .with_severity(RawSeverity::Name("warning".into())),
                );
            }
        }
        Ok(out)
    }
}

/// Reports a fixed list of diagnostics, regardless of content.
pub struct ScriptedBackend {
    pub name: &'static str,
    pub diagnostics: Vec<RawDiagnostic>,
}

#[async_trait]
impl DiagnosticBackend for ScriptedBackend {
    fn name(&self) -> &str {
        self.name
    }

    fn supports(&self, _language: &str) -> bool {
        true
    }

    async fn diagnostics(&self, file_path: &str, _content: &str) -> AppResult<Vec<RawDiagnostic>> {
        Ok(self
            .diagnostics
            .iter()
            .filter(|d| d.file_path == file_path)
            .cloned()
            .collect())
    }
}
