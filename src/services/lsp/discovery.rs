//! Server Discovery
//!
//! Detects installed diagnostic backends from PATH and known fallback
//! install locations and turns them into ready-to-register `ServerConfig`s.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::{debug, info};

use cascade_resolver_core::ServerConfig;

use crate::utils::paths::candidate_install_dirs;

/// A backend this engine knows how to launch.
#[derive(Debug, Clone, Copy)]
pub struct KnownServer {
    pub name: &'static str,
    /// Binary names to look for, in preference order
    pub binaries: &'static [&'static str],
    pub args: &'static [&'static str],
    pub languages: &'static [&'static str],
}

impl KnownServer {
    fn to_config(self, binary: &Path) -> ServerConfig {
        ServerConfig::stdio(
            self.name,
            binary.to_string_lossy().to_string(),
            self.args.iter().map(|a| a.to_string()).collect(),
        )
        .with_languages(self.languages)
    }
}

pub const KNOWN_SERVERS: &[KnownServer] = &[
    KnownServer {
        name: "pyright",
        binaries: &["pyright-langserver", "basedpyright-langserver"],
        args: &["--stdio"],
        languages: &["python"],
    },
    KnownServer {
        name: "pylsp",
        binaries: &["pylsp"],
        args: &[],
        languages: &["python"],
    },
    KnownServer {
        name: "ruff",
        binaries: &["ruff"],
        args: &["server"],
        languages: &["python"],
    },
    KnownServer {
        name: "rust-analyzer",
        binaries: &["rust-analyzer"],
        args: &[],
        languages: &["rust"],
    },
    KnownServer {
        name: "gopls",
        binaries: &["gopls"],
        args: &[],
        languages: &["go"],
    },
    KnownServer {
        name: "typescript-language-server",
        binaries: &["typescript-language-server"],
        args: &["--stdio"],
        languages: &["typescript", "javascript"],
    },
    KnownServer {
        name: "eslint",
        binaries: &["vscode-eslint-language-server", "eslint-language-server"],
        args: &["--stdio"],
        languages: &["typescript", "javascript"],
    },
];

/// Detection over `KNOWN_SERVERS`. Results are cached until `clear_cache`.
pub struct ServerDiscovery {
    search_path: Vec<PathBuf>,
    fallback_dirs: Vec<PathBuf>,
    /// Cached detection results: server name -> binary path
    detected: RwLock<Option<BTreeMap<String, PathBuf>>>,
}

impl ServerDiscovery {
    /// Search `PATH`, then the standard install directories.
    pub fn new() -> Self {
        let search_path = std::env::var_os("PATH")
            .map(|p| std::env::split_paths(&p).collect())
            .unwrap_or_default();
        Self::with_dirs(search_path, candidate_install_dirs())
    }

    pub fn with_dirs(search_path: Vec<PathBuf>, fallback_dirs: Vec<PathBuf>) -> Self {
        Self {
            search_path,
            fallback_dirs,
            detected: RwLock::new(None),
        }
    }

    /// Run detection for every known server. Returns server name -> binary.
    pub fn detect_all(&self) -> BTreeMap<String, PathBuf> {
        {
            let cache = self.detected.read().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.as_ref() {
                return cached.clone();
            }
        }

        let mut results = BTreeMap::new();
        for server in KNOWN_SERVERS {
            match self.find_binary(server.binaries) {
                Some(path) => {
                    info!(server = %server.name, path = %path.display(), "Detected language server");
                    results.insert(server.name.to_string(), path);
                }
                None => debug!(server = %server.name, "Language server not found"),
            }
        }

        let mut cache = self.detected.write().unwrap_or_else(|e| e.into_inner());
        *cache = Some(results.clone());
        results
    }

    /// Configs for every detected server, in `KNOWN_SERVERS` order.
    pub fn discover(&self) -> Vec<ServerConfig> {
        let detected = self.detect_all();
        KNOWN_SERVERS
            .iter()
            .filter_map(|server| detected.get(server.name).map(|path| server.to_config(path)))
            .collect()
    }

    pub fn clear_cache(&self) {
        let mut cache = self.detected.write().unwrap_or_else(|e| e.into_inner());
        *cache = None;
    }

    /// First match across PATH, then fallback directories.
    fn find_binary(&self, names: &[&str]) -> Option<PathBuf> {
        for name in names {
            let found = self
                .search_path
                .iter()
                .chain(self.fallback_dirs.iter())
                .find_map(|dir| executable_in(dir, name));
            if found.is_some() {
                return found;
            }
        }
        None
    }
}

impl Default for ServerDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

fn executable_in(dir: &Path, name: &str) -> Option<PathBuf> {
    let candidate = dir.join(name);
    if candidate.is_file() {
        return Some(candidate);
    }
    if cfg!(windows) {
        for ext in ["exe", "cmd", "bat"] {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
    }
    None
}
