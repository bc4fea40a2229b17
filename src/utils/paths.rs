//! Cross-Platform Path Utilities
//!
//! Resolves the engine's config directory and the candidate install
//! directories searched during backend discovery, and normalizes
//! repo-relative paths.

use std::path::{Component, Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Name of the per-project config file.
pub const PROJECT_CONFIG_FILE: &str = ".cascade-resolver.json";

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the Cascade Resolver directory (~/.cascade-resolver/)
pub fn cascade_resolver_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".cascade-resolver"))
}

/// Get the global config file path (~/.cascade-resolver/config.json)
pub fn global_config_path() -> AppResult<PathBuf> {
    Ok(cascade_resolver_dir()?.join("config.json"))
}

/// Ensure a directory exists, creating it if necessary
pub fn ensure_dir(path: &Path) -> AppResult<()> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
    }
    Ok(())
}

/// Directories where language servers are commonly installed outside PATH.
pub fn candidate_install_dirs() -> Vec<PathBuf> {
    let mut candidates = vec![];

    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".cargo").join("bin"));
        candidates.push(home.join("go").join("bin"));
        candidates.push(home.join(".local").join("bin"));
        // npm / yarn globals
        candidates.push(home.join(".npm-global").join("bin"));
        candidates.push(home.join(".yarn").join("bin"));
    }
    if let Some(data) = dirs::data_local_dir() {
        candidates.push(data.join("pnpm"));
    }
    if let Some(brew) = homebrew_prefix() {
        candidates.push(brew.join("bin"));
    }
    candidates.push(PathBuf::from("/usr/local/bin"));

    candidates
}

/// Get Homebrew prefix on macOS.
fn homebrew_prefix() -> Option<PathBuf> {
    if cfg!(target_os = "macos") {
        let arm_prefix = PathBuf::from("/opt/homebrew");
        if arm_prefix.exists() {
            return Some(arm_prefix);
        }
        let intel_prefix = PathBuf::from("/usr/local");
        if intel_prefix.join("Cellar").exists() {
            return Some(intel_prefix);
        }
    }
    None
}

/// Render `path` relative to `root` with forward slashes, resolving `.`
/// and `..` lexically. Paths outside `root` are returned normalized but
/// absolute.
pub fn to_repo_relative(path: &Path, root: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    normalize_relative(relative)
}

/// Lexically normalize a relative path to forward-slash form.
pub fn normalize_relative(path: &Path) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut absolute = false;
    for component in path.components() {
        match component {
            Component::RootDir | Component::Prefix(_) => absolute = true,
            Component::CurDir => {}
            Component::ParentDir => {
                if parts.last().map_or(false, |p| p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..".to_string());
                }
            }
            Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{}", joined)
    } else {
        joined
    }
}

/// Language identifier for a file, from its extension.
pub fn language_for_path(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    let language = match ext.as_str() {
        "py" | "pyi" => "python",
        "rs" => "rust",
        "go" => "go",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "java" => "java",
        _ => return None,
    };
    Some(language)
}
