//! Settings Models
//!
//! Engine configuration and partial-update structures.

use cascade_resolver_core::ServerConfig;
use serde::{Deserialize, Serialize};

/// Engine configuration stored in `.cascade-resolver.json` or
/// `~/.cascade-resolver/config.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum (file, server) diagnostic requests in flight during a scan
    pub scan_concurrency: usize,
    /// Per (file, server) diagnostic request timeout
    pub request_timeout_ms: u64,
    /// Initialization handshake timeout when starting a server
    pub startup_timeout_ms: u64,
    /// Lines of source captured before and after an error
    pub context_window_lines: u32,
    /// Maximum depth of the dependency-chain walk
    pub dependency_depth: usize,
    /// Cap on resolution attempts per bulk run
    pub max_fixes_per_run: usize,
    /// Only auto-apply high-confidence fixes that need no user input
    pub auto_fixable_only: bool,
    /// Buffered notifications per stream listener before dropping the oldest
    pub stream_queue_capacity: usize,
    /// Leave a `.bak` next to a file whose restore failed
    pub write_backup_on_failure: bool,
    /// Extensions (without dot) considered source files
    pub source_extensions: Vec<String>,
    /// Servers registered when the engine starts
    pub servers: Vec<ServerConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            scan_concurrency: 8,
            request_timeout_ms: 10_000,
            startup_timeout_ms: 30_000,
            context_window_lines: 5,
            dependency_depth: 3,
            max_fixes_per_run: 50,
            auto_fixable_only: true,
            stream_queue_capacity: 256,
            write_backup_on_failure: true,
            source_extensions: ["py", "rs", "go", "ts", "tsx", "js", "jsx", "java"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            servers: Vec::new(),
        }
    }
}

/// Partial configuration update
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfigUpdate {
    pub scan_concurrency: Option<usize>,
    pub request_timeout_ms: Option<u64>,
    pub startup_timeout_ms: Option<u64>,
    pub context_window_lines: Option<u32>,
    pub dependency_depth: Option<usize>,
    pub max_fixes_per_run: Option<usize>,
    pub auto_fixable_only: Option<bool>,
    pub stream_queue_capacity: Option<usize>,
    pub write_backup_on_failure: Option<bool>,
}

impl EngineConfig {
    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: EngineConfigUpdate) {
        if let Some(v) = update.scan_concurrency {
            self.scan_concurrency = v;
        }
        if let Some(v) = update.request_timeout_ms {
            self.request_timeout_ms = v;
        }
        if let Some(v) = update.startup_timeout_ms {
            self.startup_timeout_ms = v;
        }
        if let Some(v) = update.context_window_lines {
            self.context_window_lines = v;
        }
        if let Some(v) = update.dependency_depth {
            self.dependency_depth = v;
        }
        if let Some(v) = update.max_fixes_per_run {
            self.max_fixes_per_run = v;
        }
        if let Some(v) = update.auto_fixable_only {
            self.auto_fixable_only = v;
        }
        if let Some(v) = update.stream_queue_capacity {
            self.stream_queue_capacity = v;
        }
        if let Some(v) = update.write_backup_on_failure {
            self.write_backup_on_failure = v;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.scan_concurrency == 0 || self.scan_concurrency > 256 {
            return Err(format!(
                "scan_concurrency must be between 1 and 256, got {}",
                self.scan_concurrency
            ));
        }
        if self.request_timeout_ms < 50 {
            return Err("request_timeout_ms must be at least 50".to_string());
        }
        if self.startup_timeout_ms < 50 {
            return Err("startup_timeout_ms must be at least 50".to_string());
        }
        if self.dependency_depth > 10 {
            return Err("dependency_depth cannot exceed 10".to_string());
        }
        if self.stream_queue_capacity == 0 {
            return Err("stream_queue_capacity must be at least 1".to_string());
        }

        let mut names = std::collections::HashSet::new();
        for server in &self.servers {
            server.validate().map_err(|e| e.to_string())?;
            if !names.insert(server.name.as_str()) {
                return Err(format!("duplicate server name: {}", server.name));
            }
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.request_timeout_ms)
    }

    pub fn startup_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn is_source_extension(&self, ext: &str) -> bool {
        self.source_extensions
            .iter()
            .any(|e| e.eq_ignore_ascii_case(ext))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.auto_fixable_only);
        assert_eq!(config.scan_concurrency, 8);
    }

    #[test]
    fn test_apply_update() {
        let mut config = EngineConfig::default();
        config.apply_update(EngineConfigUpdate {
            scan_concurrency: Some(2),
            auto_fixable_only: Some(false),
            ..Default::default()
        });
        assert_eq!(config.scan_concurrency, 2);
        assert!(!config.auto_fixable_only);
        // Other fields unchanged
        assert_eq!(config.dependency_depth, 3);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = EngineConfig::default();
        config.scan_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_servers() {
        let mut config = EngineConfig::default();
        let server = ServerConfig::stdio("pyright", "pyright-langserver", vec!["--stdio".into()]);
        config.servers = vec![server.clone(), server];
        let err = config.validate().unwrap_err();
        assert!(err.contains("duplicate server name"));
    }

    #[test]
    fn test_validate_rejects_bad_server() {
        let mut config = EngineConfig::default();
        config.servers = vec![ServerConfig::socket("remote", "nowhere")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"scan_concurrency": 4}"#).unwrap();
        assert_eq!(config.scan_concurrency, 4);
        assert_eq!(config.request_timeout_ms, 10_000);
        assert!(config.is_source_extension("PY"));
    }
}
