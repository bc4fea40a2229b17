//! Diagnostic Aggregator
//!
//! Drives scans across files and backends. Every (file, backend) request
//! runs under a shared concurrency limit and its own timeout; a backend that
//! fails or stalls for one file only loses that file's diagnostics. Results
//! are delivered per file as soon as each file completes.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use cascade_resolver_core::{Codebase, ComprehensiveErrorList, UnifiedError};

use super::backend::DiagnosticBackend;
use super::normalize::{unify, RawDiagnostic};
use crate::utils::hashing::content_hash;
use crate::utils::paths::{language_for_path, normalize_relative};

/// Result of scanning one file.
#[derive(Debug, Clone)]
pub struct FileScan {
    pub file_path: String,
    /// Hash of the content the backends analyzed
    pub content_hash: String,
    pub errors: Vec<UnifiedError>,
    /// Backends that failed or timed out for this file
    pub skipped_backends: Vec<String>,
}

/// Result of a complete (or cancelled) scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub files: Vec<FileScan>,
    pub cancelled: bool,
}

impl ScanReport {
    /// Replace the scanned files' entries in `list`.
    pub fn apply_to(&self, list: &mut ComprehensiveErrorList) {
        for scan in &self.files {
            list.replace_file(scan.file_path.clone(), scan.errors.clone());
        }
    }

    pub fn error_count(&self) -> usize {
        self.files.iter().map(|f| f.errors.len()).sum()
    }
}

#[derive(Clone)]
pub struct DiagnosticAggregator {
    codebase: Arc<dyn Codebase>,
    /// Permits for in-flight (file, backend) requests
    requests: Arc<Semaphore>,
    concurrency: usize,
    request_timeout: Duration,
}

impl DiagnosticAggregator {
    pub fn new(codebase: Arc<dyn Codebase>, concurrency: usize, request_timeout: Duration) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            codebase,
            requests: Arc::new(Semaphore::new(concurrency)),
            concurrency,
            request_timeout,
        }
    }

    /// Scan a single file. Returns `None` if the file cannot be read or the
    /// scan was cancelled before it finished.
    pub async fn scan_file(
        &self,
        file_path: &str,
        backends: &[Arc<dyn DiagnosticBackend>],
        cancel: &CancellationToken,
    ) -> Option<FileScan> {
        let content = match self.codebase.get_file_content(file_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %file_path, error = %e, "Failed to read file for scan");
                return None;
            }
        };

        let language = language_for_path(file_path).unwrap_or("");
        let eligible: Vec<&Arc<dyn DiagnosticBackend>> =
            backends.iter().filter(|b| b.supports(language)).collect();

        let requests = eligible
            .iter()
            .map(|backend| self.request_diagnostics(backend.as_ref(), file_path, &content));

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(file = %file_path, "Scan cancelled");
                return None;
            }
            results = join_all(requests) => results,
        };

        let mut raw: Vec<RawDiagnostic> = Vec::new();
        let mut skipped_backends = Vec::new();
        for (backend, result) in eligible.iter().zip(results) {
            match result {
                Some(diagnostics) => raw.extend(diagnostics),
                None => skipped_backends.push(backend.name().to_string()),
            }
        }
        raw.retain(|d| {
            let same_file = normalize_relative(Path::new(&d.file_path)) == file_path;
            if !same_file {
                debug!(file = %file_path, reported = %d.file_path, "Dropping diagnostic for another file");
            }
            same_file
        });

        let errors = unify(raw, |_, line| {
            content
                .lines()
                .nth(line.saturating_sub(1) as usize)
                .map(|l| l.to_string())
        });

        Some(FileScan {
            file_path: file_path.to_string(),
            content_hash: content_hash(&content),
            errors,
            skipped_backends,
        })
    }

    /// One (file, backend) request. `None` means "no diagnostics from this
    /// backend for this file".
    async fn request_diagnostics(
        &self,
        backend: &dyn DiagnosticBackend,
        file_path: &str,
        content: &str,
    ) -> Option<Vec<RawDiagnostic>> {
        let _permit = self.requests.acquire().await.ok()?;
        match timeout(self.request_timeout, backend.diagnostics(file_path, content)).await {
            Ok(Ok(diagnostics)) => Some(diagnostics),
            Ok(Err(e)) => {
                warn!(server = %backend.name(), file = %file_path, error = %e, "Backend failed, skipping file");
                None
            }
            Err(_) => {
                warn!(
                    server = %backend.name(),
                    file = %file_path,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "Diagnostic request timed out, skipping file"
                );
                None
            }
        }
    }

    /// Scan files in parallel, yielding each file's result as it completes.
    pub fn scan_stream(
        &self,
        files: Vec<String>,
        backends: Vec<Arc<dyn DiagnosticBackend>>,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<FileScan> {
        let (tx, rx) = mpsc::channel(self.concurrency * 2);
        let this = self.clone();
        let backends: Arc<[Arc<dyn DiagnosticBackend>]> = backends.into();

        tokio::spawn(async move {
            let file_slots = Arc::new(Semaphore::new(this.concurrency));
            let mut handles = Vec::new();

            for file in files {
                let permit = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    permit = file_slots.clone().acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => break,
                    },
                };

                let this = this.clone();
                let backends = backends.clone();
                let tx = tx.clone();
                let cancel = cancel.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    if let Some(scan) = this.scan_file(&file, &backends, &cancel).await {
                        let _ = tx.send(scan).await;
                    }
                }));
            }

            join_all(handles).await;
        });

        rx
    }

    /// Scan files and collect every per-file result.
    pub async fn scan(
        &self,
        files: Vec<String>,
        backends: Vec<Arc<dyn DiagnosticBackend>>,
        cancel: CancellationToken,
    ) -> ScanReport {
        let mut rx = self.scan_stream(files, backends, cancel.clone());
        let mut report = ScanReport::default();
        while let Some(scan) = rx.recv().await {
            report.files.push(scan);
        }
        report.files.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        report.cancelled = cancel.is_cancelled();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::codebase::FsCodebase;
    use crate::utils::error::{AppError, AppResult};
    use async_trait::async_trait;
    use tempfile::TempDir;

    struct FixedBackend {
        name: &'static str,
        message: &'static str,
    }

    #[async_trait]
    impl DiagnosticBackend for FixedBackend {
        fn name(&self) -> &str {
            self.name
        }

        fn supports(&self, language: &str) -> bool {
            language == "python"
        }

        async fn diagnostics(&self, file_path: &str, _content: &str) -> AppResult<Vec<RawDiagnostic>> {
            Ok(vec![RawDiagnostic::one_based(self.name, file_path, 1, 1, self.message)])
        }
    }

    struct StalledBackend;

    #[async_trait]
    impl DiagnosticBackend for StalledBackend {
        fn name(&self) -> &str {
            "stalled"
        }

        fn supports(&self, _language: &str) -> bool {
            true
        }

        async fn diagnostics(&self, _file_path: &str, _content: &str) -> AppResult<Vec<RawDiagnostic>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl DiagnosticBackend for BrokenBackend {
        fn name(&self) -> &str {
            "broken"
        }

        fn supports(&self, _language: &str) -> bool {
            true
        }

        async fn diagnostics(&self, _file_path: &str, _content: &str) -> AppResult<Vec<RawDiagnostic>> {
            Err(AppError::backend_unavailable("connection reset"))
        }
    }

    fn setup(files: &[(&str, &str)]) -> (TempDir, DiagnosticAggregator) {
        let dir = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).unwrap();
        }
        let codebase = Arc::new(FsCodebase::new(dir.path()));
        let aggregator = DiagnosticAggregator::new(codebase, 4, Duration::from_millis(100));
        (dir, aggregator)
    }

    #[tokio::test]
    async fn test_unresponsive_backend_does_not_block_others() {
        let (_dir, aggregator) = setup(&[("a.py", "x = 1\n"), ("b.py", "y = 2\n")]);
        let backends: Vec<Arc<dyn DiagnosticBackend>> = vec![
            Arc::new(StalledBackend),
            Arc::new(BrokenBackend),
            Arc::new(FixedBackend {
                name: "ruff",
                message: "line too long",
            }),
        ];

        let report = aggregator
            .scan(vec!["a.py".into(), "b.py".into()], backends, CancellationToken::new())
            .await;

        assert_eq!(report.files.len(), 2);
        assert_eq!(report.error_count(), 2);
        for scan in &report.files {
            assert_eq!(scan.errors[0].source, "ruff");
            assert_eq!(scan.skipped_backends, vec!["stalled", "broken"]);
        }
    }

    #[tokio::test]
    async fn test_backends_filtered_by_language() {
        let (_dir, aggregator) = setup(&[("main.go", "package main\n")]);
        let backends: Vec<Arc<dyn DiagnosticBackend>> = vec![Arc::new(FixedBackend {
            name: "ruff",
            message: "m",
        })];
        let report = aggregator
            .scan(vec!["main.go".into()], backends, CancellationToken::new())
            .await;
        assert_eq!(report.files.len(), 1);
        assert!(report.files[0].errors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_skipped() {
        let (_dir, aggregator) = setup(&[]);
        let report = aggregator
            .scan(vec!["gone.py".into()], Vec::new(), CancellationToken::new())
            .await;
        assert!(report.files.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_scan_reports_cancellation() {
        let (_dir, aggregator) = setup(&[("a.py", "x = 1\n")]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = aggregator
            .scan(
                vec!["a.py".into()],
                vec![Arc::new(StalledBackend) as Arc<dyn DiagnosticBackend>],
                cancel,
            )
            .await;
        assert!(report.cancelled);
        assert!(report.files.is_empty());
    }

    #[tokio::test]
    async fn test_scan_stream_yields_per_file() {
        let (_dir, aggregator) = setup(&[("a.py", "a\n"), ("b.py", "b\n"), ("c.py", "c\n")]);
        let backends: Vec<Arc<dyn DiagnosticBackend>> = vec![Arc::new(FixedBackend {
            name: "ruff",
            message: "m",
        })];
        let mut rx = aggregator.scan_stream(
            vec!["a.py".into(), "b.py".into(), "c.py".into()],
            backends,
            CancellationToken::new(),
        );

        let mut seen = Vec::new();
        while let Some(scan) = rx.recv().await {
            seen.push(scan.file_path);
        }
        seen.sort();
        assert_eq!(seen, vec!["a.py", "b.py", "c.py"]);
    }
}
