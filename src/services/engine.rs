//! Resolution Engine
//!
//! The four-operation surface callers use: `errors`, `full_error_context`,
//! `resolve_errors` and `resolve_error`. Owns every service and keeps the
//! most recent scan, rescanning only files whose content changed.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use cascade_resolver_core::{Codebase, ComprehensiveErrorList, ErrorContext, ResolutionResult, UnifiedError};

use crate::models::settings::EngineConfig;
use crate::services::codebase::FsCodebase;
use crate::services::context::{ContextOptions, ErrorContextEngine};
use crate::services::diagnostics::{DiagnosticAggregator, DiagnosticBackend, DiagnosticStream};
use crate::services::lsp::{ClientOptions, ServerManager};
use crate::services::resolution::{
    BulkResolution, ErrorResolver, FixApplicator, ResolutionPreview, ResolutionRecord,
    ResolutionStats, ResolutionTarget,
};
use crate::storage::config::ConfigService;
use crate::utils::error::{AppError, AppResult};
use crate::utils::hashing::content_hash;

/// The most recent scan.
#[derive(Default)]
struct ScanState {
    list: ComprehensiveErrorList,
    /// Content hash per file as of its last complete scan
    hashes: HashMap<String, String>,
    /// Backend names the last scan ran with
    backends: Vec<String>,
    scanned: bool,
}

pub struct ResolutionEngine {
    config: EngineConfig,
    codebase: Arc<dyn Codebase>,
    servers: Arc<ServerManager>,
    stream: Arc<DiagnosticStream>,
    aggregator: DiagnosticAggregator,
    context: ErrorContextEngine,
    resolver: ErrorResolver,
    /// In-process backends used next to the managed servers
    extra_backends: RwLock<Vec<Arc<dyn DiagnosticBackend>>>,
    /// Serializes scans
    state: tokio::sync::Mutex<ScanState>,
    cancel: Mutex<CancellationToken>,
}

impl ResolutionEngine {
    /// Engine over the files under `root`, configured from the project's
    /// config file.
    pub async fn for_project(root: impl Into<PathBuf>) -> AppResult<Self> {
        let root = root.into();
        let config = ConfigService::for_project(&root)?.get_config_clone();
        Self::new(root, config).await
    }

    pub async fn new(root: impl Into<PathBuf>, config: EngineConfig) -> AppResult<Self> {
        let root = root.into();
        let codebase = Arc::new(FsCodebase::new(&root).with_extensions(config.source_extensions.clone()));
        Self::with_codebase(codebase, root, config).await
    }

    /// Engine over a caller-supplied codebase. Servers listed in `config`
    /// are registered but not started.
    pub async fn with_codebase(
        codebase: Arc<dyn Codebase>,
        root: impl Into<PathBuf>,
        config: EngineConfig,
    ) -> AppResult<Self> {
        config.validate().map_err(AppError::config)?;

        let stream = Arc::new(DiagnosticStream::new(config.stream_queue_capacity));
        let options = ClientOptions {
            request_timeout: config.request_timeout(),
            startup_timeout: config.startup_timeout(),
        };
        let servers = Arc::new(ServerManager::new(root, options).with_stream(stream.clone()));
        for server in &config.servers {
            if !servers.register_server(server.clone()).await? {
                return Err(AppError::config(format!("Duplicate server '{}'", server.name)));
            }
        }

        let aggregator = DiagnosticAggregator::new(
            codebase.clone(),
            config.scan_concurrency,
            config.request_timeout(),
        );
        let context = ErrorContextEngine::new(
            codebase.clone(),
            ContextOptions {
                window_lines: config.context_window_lines,
                dependency_depth: config.dependency_depth,
            },
        );
        let applicator =
            FixApplicator::new(codebase.clone()).with_backup_on_failure(config.write_backup_on_failure);

        Ok(Self {
            config,
            codebase,
            servers,
            stream,
            aggregator,
            context,
            resolver: ErrorResolver::new(applicator),
            extra_backends: RwLock::new(Vec::new()),
            state: tokio::sync::Mutex::new(ScanState::default()),
            cancel: Mutex::new(CancellationToken::new()),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn servers(&self) -> &Arc<ServerManager> {
        &self.servers
    }

    pub fn stream(&self) -> &Arc<DiagnosticStream> {
        &self.stream
    }

    pub fn context_engine(&self) -> &ErrorContextEngine {
        &self.context
    }

    pub fn root(&self) -> &Path {
        self.servers.root()
    }

    /// Add an in-process diagnostic backend.
    pub fn add_backend(&self, backend: Arc<dyn DiagnosticBackend>) {
        let mut backends = self.extra_backends.write().unwrap_or_else(|e| e.into_inner());
        backends.push(backend);
    }

    /// Start every server configured to start automatically. Returns the
    /// names that are running.
    pub async fn start_servers(&self) -> Vec<String> {
        self.servers.start_auto_servers().await
    }

    /// Cancel in-flight scans and resolutions. Later operations run normally.
    pub fn cancel(&self) {
        let mut token = self.cancel.lock().unwrap_or_else(|e| e.into_inner());
        token.cancel();
        *token = CancellationToken::new();
    }

    fn token(&self) -> CancellationToken {
        self.cancel.lock().unwrap_or_else(|e| e.into_inner()).child_token()
    }

    async fn backends(&self) -> Vec<Arc<dyn DiagnosticBackend>> {
        let mut backends = self.servers.running_backends().await;
        let extra = self.extra_backends.read().unwrap_or_else(|e| e.into_inner());
        backends.extend(extra.iter().cloned());
        backends
    }

    // ── Scanning ────────────────────────────────────────────────────────

    /// Every current error. Reuses the last scan for files whose content is
    /// unchanged, rescans the rest and forgets files that disappeared.
    pub async fn errors(&self) -> Vec<UnifiedError> {
        let mut state = self.state.lock().await;
        self.refresh(&mut state).await;
        state.list.to_vec()
    }

    /// The current list without rescanning. Scans once if nothing has been
    /// scanned yet.
    async fn current(&self) -> ComprehensiveErrorList {
        let mut state = self.state.lock().await;
        if !state.scanned {
            self.refresh(&mut state).await;
        }
        state.list.clone()
    }

    async fn refresh(&self, state: &mut ScanState) {
        let files = match self.codebase.list_source_files().await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "Failed to list source files, keeping previous scan");
                return;
            }
        };
        let backends = self.backends().await;
        let backend_names: Vec<String> = backends.iter().map(|b| b.name().to_string()).collect();
        let backends_changed = backend_names != state.backends;

        let present: BTreeSet<&str> = files.iter().map(String::as_str).collect();
        let removed: Vec<String> = state
            .list
            .analyzed_files()
            .filter(|f| !present.contains(f))
            .map(String::from)
            .collect();
        for file in &removed {
            state.list.remove_file(file);
            state.hashes.remove(file);
            self.context.invalidate_file(file);
        }

        let mut changed = Vec::new();
        for file in &files {
            if backends_changed || !state.hashes.contains_key(file) {
                changed.push(file.clone());
                continue;
            }
            match self.codebase.get_file_content(file).await {
                Ok(content) if state.hashes.get(file) == Some(&content_hash(&content)) => {}
                _ => changed.push(file.clone()),
            }
        }

        debug!(
            files = files.len(),
            changed = changed.len(),
            removed = removed.len(),
            "Refreshing error list"
        );
        if changed.is_empty() {
            state.scanned = true;
            state.backends = backend_names;
            return;
        }

        let report = self.aggregator.scan(changed, backends, self.token()).await;
        report.apply_to(&mut state.list);
        for scan in &report.files {
            self.context.invalidate_file(&scan.file_path);
            // Files with skipped backends are retried on the next call
            if scan.skipped_backends.is_empty() {
                state.hashes.insert(scan.file_path.clone(), scan.content_hash.clone());
            } else {
                state.hashes.remove(&scan.file_path);
            }
        }
        if !report.cancelled {
            state.scanned = true;
            state.backends = backend_names;
        }
        info!(
            scanned = report.files.len(),
            errors = state.list.len(),
            cancelled = report.cancelled,
            "Scan finished"
        );
    }

    /// Forget the last scan; the next `errors()` rescans everything.
    pub async fn invalidate(&self) {
        let mut state = self.state.lock().await;
        *state = ScanState::default();
        self.context.clear();
    }

    /// Force a rescan of one file on the next `errors()`.
    pub async fn invalidate_file(&self, file_path: &str) {
        let mut state = self.state.lock().await;
        state.hashes.remove(file_path);
        self.context.invalidate_file(file_path);
    }

    // ── Context ─────────────────────────────────────────────────────────

    /// Context for an error of the current scan; `None` for unknown ids.
    pub async fn full_error_context(&self, error_id: &str) -> Option<ErrorContext> {
        let error = self.current().await.get(error_id).cloned()?;
        Some(self.context.get_context(&error).await)
    }

    // ── Resolution ──────────────────────────────────────────────────────

    pub async fn resolve_error(&self, error_id: &str) -> ResolutionResult {
        let list = self.current().await;
        let result = self
            .resolver
            .resolve_error(error_id, list.get(error_id), &self.token())
            .await;
        self.after_resolution(std::slice::from_ref(&result)).await;
        result
    }

    /// Resolve `error_ids` (every current error when `None`). `max_fixes`
    /// and `auto_fixable_only` default to the configured values.
    pub async fn resolve_errors(
        &self,
        error_ids: Option<Vec<String>>,
        max_fixes: Option<usize>,
        auto_fixable_only: Option<bool>,
    ) -> BulkResolution {
        let list = match error_ids {
            Some(_) => self.current().await,
            None => {
                let mut state = self.state.lock().await;
                self.refresh(&mut state).await;
                state.list.clone()
            }
        };
        let targets: Vec<ResolutionTarget> = match error_ids {
            Some(ids) => ids
                .into_iter()
                .map(|id| {
                    let error = list.get(&id).cloned();
                    ResolutionTarget::new(id, error)
                })
                .collect(),
            None => list
                .errors()
                .map(|e| ResolutionTarget::new(e.id.clone(), Some(e.clone())))
                .collect(),
        };

        let outcome = self
            .resolver
            .resolve_errors(
                targets,
                Some(max_fixes.unwrap_or(self.config.max_fixes_per_run)),
                auto_fixable_only.unwrap_or(self.config.auto_fixable_only),
                &self.token(),
            )
            .await;
        self.after_resolution(&outcome.results).await;
        outcome
    }

    /// What `resolve_error` would do; `None` for unknown ids.
    pub async fn preview_resolution(&self, error_id: &str) -> Option<ResolutionPreview> {
        let list = self.current().await;
        list.get(error_id).map(|e| self.resolver.preview_resolution(e))
    }

    pub fn resolution_stats(&self) -> ResolutionStats {
        self.resolver.stats()
    }

    pub fn resolution_history(&self) -> Vec<ResolutionRecord> {
        self.resolver.history()
    }

    /// Modified files are rescanned on the next `errors()`.
    async fn after_resolution(&self, results: &[ResolutionResult]) {
        let modified: BTreeSet<&String> = results.iter().flat_map(|r| r.files_modified.iter()).collect();
        if modified.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        for file in modified {
            state.hashes.remove(file);
            self.context.invalidate_file(file);
        }
    }

    /// Stop every server and the stream workers.
    pub async fn shutdown(&self) {
        self.cancel();
        self.servers.shutdown_all().await;
        self.stream.shutdown();
    }
}
