//! Filesystem Codebase
//!
//! `Codebase` implementation over a project directory. Source files are
//! enumerated with the gitignore-aware `ignore` walker, writes are atomic
//! (temp file + rename in the same directory), and symbol context comes
//! from a lightweight regex index of imports and function definitions.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use tracing::debug;

use cascade_resolver_core::{Codebase, CoreError, CoreResult, SymbolContext};

use crate::models::settings::EngineConfig;
use crate::utils::hashing::content_hash;
use crate::utils::paths::{language_for_path, normalize_relative, to_repo_relative};

/// Parsed imports of one file, keyed by the content hash they came from.
#[derive(Debug, Clone)]
struct CachedImports {
    hash: String,
    imports: Vec<String>,
}

pub struct FsCodebase {
    root: PathBuf,
    extensions: Vec<String>,
    import_cache: Mutex<HashMap<String, CachedImports>>,
}

impl FsCodebase {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: EngineConfig::default().source_extensions,
            import_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path for a repo-relative path. Paths escaping the root are
    /// rejected.
    fn resolve(&self, path: &str) -> CoreResult<PathBuf> {
        let relative = normalize_relative(Path::new(path));
        if relative.is_empty() || relative.starts_with('/') || relative.starts_with("..") {
            return Err(CoreError::validation(format!(
                "Path '{}' is outside the project root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    fn is_source_file(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
            .unwrap_or(false)
    }

    async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::metadata(full).await.map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Resolved imports of a file: repo-relative paths where the import maps
    /// to a project file, the raw module name otherwise.
    async fn imports_of(&self, file: &str, files: &BTreeSet<String>) -> Vec<String> {
        let content = match self.get_file_content(file).await {
            Ok(content) => content,
            Err(e) => {
                debug!(file = %file, error = %e, "Cannot read file for imports");
                return Vec::new();
            }
        };
        let hash = content_hash(&content);
        {
            let cache = self.import_cache.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(cached) = cache.get(file) {
                if cached.hash == hash {
                    return cached.imports.clone();
                }
            }
        }

        let language = language_for_path(file).unwrap_or("");
        let mut imports = Vec::new();
        for module in extract_imports(&content, language) {
            let resolved = resolve_import(file, &module, language, files).unwrap_or(module);
            if resolved != file && !imports.contains(&resolved) {
                imports.push(resolved);
            }
        }

        let mut cache = self.import_cache.lock().unwrap_or_else(|e| e.into_inner());
        cache.insert(
            file.to_string(),
            CachedImports {
                hash,
                imports: imports.clone(),
            },
        );
        imports
    }

    async fn file_context(&self, file: &str) -> CoreResult<SymbolContext> {
        let files: BTreeSet<String> = self.list_source_files().await?.into_iter().collect();
        let dependencies = self.imports_of(file, &files).await;

        let mut references = Vec::new();
        for other in files.iter().filter(|f| f.as_str() != file) {
            if self.imports_of(other, &files).await.iter().any(|i| i == file) {
                references.push(other.clone());
            }
        }

        Ok(SymbolContext {
            references,
            dependencies,
        })
    }

    /// Callers and callees of a function, across every source file.
    async fn function_context(&self, symbol: &str) -> CoreResult<SymbolContext> {
        let files = self.list_source_files().await?;
        let call = Regex::new(&format!(r"\b{}\s*\(", regex::escape(symbol)))
            .map_err(|e| CoreError::internal(e.to_string()))?;

        let mut references = BTreeSet::new();
        let mut dependencies = BTreeSet::new();
        for file in &files {
            let Ok(content) = self.get_file_content(file).await else {
                continue;
            };
            let language = language_for_path(file).unwrap_or("");
            for function in function_bodies(&content, language) {
                if function.name == symbol {
                    dependencies.extend(called_names(&function.body, symbol));
                } else if call.is_match(&function.body) {
                    references.insert(function.name.clone());
                }
            }
        }

        Ok(SymbolContext {
            references: references.into_iter().collect(),
            dependencies: dependencies.into_iter().collect(),
        })
    }
}

#[async_trait]
impl Codebase for FsCodebase {
    async fn get_symbol_context(&self, symbol_or_file: &str) -> CoreResult<SymbolContext> {
        if self.is_source_file(Path::new(symbol_or_file)) && self.exists(symbol_or_file).await {
            let file = normalize_relative(Path::new(symbol_or_file));
            self.file_context(&file).await
        } else {
            self.function_context(symbol_or_file).await
        }
    }

    async fn get_file_content(&self, path: &str) -> CoreResult<String> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::file_not_found(path)),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file_content(&self, path: &str, content: &str) -> CoreResult<()> {
        let target = self.resolve(path)?;
        let content = content.to_string();
        tokio::task::spawn_blocking(move || write_atomic(&target, &content))
            .await
            .map_err(|e| CoreError::internal(format!("Write task failed: {}", e)))?
    }

    async fn list_source_files(&self) -> CoreResult<Vec<String>> {
        let root = self.root.clone();
        let extensions = self.extensions.clone();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkBuilder::new(&root).hidden(true).git_ignore(true).build() {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!(error = %e, "Skipping unreadable entry");
                        continue;
                    }
                };
                if !entry.file_type().map_or(false, |t| t.is_file()) {
                    continue;
                }
                let path = entry.path();
                let matches = path
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| extensions.iter().any(|x| x.eq_ignore_ascii_case(e)))
                    .unwrap_or(false);
                if matches {
                    files.push(to_repo_relative(path, &root));
                }
            }
            files.sort();
            files
        })
        .await
        .map_err(|e| CoreError::internal(format!("File walk failed: {}", e)))
    }
}

/// Replace `target` with `content` via a sibling temp file and rename.
fn write_atomic(target: &Path, content: &str) -> CoreResult<()> {
    let dir = target
        .parent()
        .ok_or_else(|| CoreError::validation(format!("'{}' has no parent directory", target.display())))?;
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::NamedTempFile::new_in(dir)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    if let Ok(meta) = std::fs::metadata(target) {
        let _ = std::fs::set_permissions(temp.path(), meta.permissions());
    }
    temp.persist(target).map_err(|e| CoreError::Io(e.error))?;
    Ok(())
}

// =============================================================================
// Regex symbol index
// =============================================================================

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

fn import_patterns(language: &str) -> &'static [Regex] {
    static PYTHON: OnceLock<Vec<Regex>> = OnceLock::new();
    static RUST: OnceLock<Vec<Regex>> = OnceLock::new();
    static SCRIPT: OnceLock<Vec<Regex>> = OnceLock::new();
    static GO: OnceLock<Vec<Regex>> = OnceLock::new();
    static JAVA: OnceLock<Vec<Regex>> = OnceLock::new();
    match language {
        "python" => PYTHON.get_or_init(|| {
            compile(&[
                r"^\s*from\s+(\.*[\w.]*)\s+import\s",
                r"^\s*import\s+([\w.]+)",
            ])
        }),
        "rust" => RUST.get_or_init(|| {
            compile(&[
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?mod\s+(\w+)\s*;",
                r"^\s*(?:pub(?:\([^)]*\))?\s+)?use\s+((?:crate|super|self)::\w+)",
            ])
        }),
        "typescript" | "javascript" => SCRIPT.get_or_init(|| {
            compile(&[
                r#"^\s*import\s.*?from\s+['"]([^'"]+)['"]"#,
                r#"^\s*import\s+['"]([^'"]+)['"]"#,
                r#"^\s*export\s.*?from\s+['"]([^'"]+)['"]"#,
                r#"require\(\s*['"]([^'"]+)['"]\s*\)"#,
            ])
        }),
        "go" => GO.get_or_init(|| compile(&[r#"^\s*import\s+"([^"]+)""#, r#"^\s*(?:\w+\s+)?"([^"]+)"\s*$"#])),
        "java" => JAVA.get_or_init(|| compile(&[r"^\s*import\s+(?:static\s+)?([\w.]+)\s*;"])),
        _ => &[],
    }
}

fn function_patterns(language: &str) -> &'static [Regex] {
    static PYTHON: OnceLock<Vec<Regex>> = OnceLock::new();
    static RUST: OnceLock<Vec<Regex>> = OnceLock::new();
    static SCRIPT: OnceLock<Vec<Regex>> = OnceLock::new();
    static GO: OnceLock<Vec<Regex>> = OnceLock::new();
    static JAVA: OnceLock<Vec<Regex>> = OnceLock::new();
    match language {
        "python" => PYTHON.get_or_init(|| compile(&[r"^\s*(?:async\s+)?def\s+([A-Za-z_]\w*)\s*\("])),
        "rust" => RUST.get_or_init(|| {
            compile(&[r"^\s*(?:pub(?:\s*\([^)]*\))?\s+)?(?:const\s+)?(?:async\s+)?(?:unsafe\s+)?fn\s+([A-Za-z_]\w*)\s*[<(]"])
        }),
        "typescript" | "javascript" => SCRIPT.get_or_init(|| {
            compile(&[
                r"(?:^|[\s;])(?:export\s+)?(?:default\s+)?(?:async\s+)?function\s*\*?\s*([A-Za-z_$][\w$]*)\s*[<(]",
                r"^\s*(?:export\s+)?(?:const|let|var)\s+([A-Za-z_$][\w$]*)\s*=\s*(?:async\s+)?(?:\([^)]*\)|[A-Za-z_$][\w$]*)\s*=>",
            ])
        }),
        "go" => GO.get_or_init(|| compile(&[r"^func\s+(?:\([^)]*\)\s*)?([A-Za-z_]\w*)\s*[\[(]"])),
        "java" => JAVA.get_or_init(|| {
            compile(&[r"^\s*(?:(?:public|private|protected|static|final|synchronized|abstract)\s+)*[\w<>\[\],\s]+\s+([A-Za-z_]\w*)\s*\([^;]*$"])
        }),
        _ => &[],
    }
}

fn call_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([A-Za-z_]\w*)\s*\(").ok()).as_ref()
}

/// Keywords that look like calls (`if (`, `while (`).
const CALL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "match", "switch", "return", "catch", "fn", "def", "function", "print",
    "elif", "and", "or", "not", "in", "Some", "Ok", "Err", "new", "super", "self", "sizeof",
];

/// Module names imported by `content`, in order of appearance.
pub fn extract_imports(content: &str, language: &str) -> Vec<String> {
    let patterns = import_patterns(language);
    let mut modules = Vec::new();
    for line in content.lines() {
        for pattern in patterns {
            if let Some(module) = pattern.captures(line).and_then(|c| c.get(1)) {
                let module = module.as_str().to_string();
                if !modules.contains(&module) {
                    modules.push(module);
                }
                break;
            }
        }
    }
    modules
}

/// Function definitions in `content` as (name, 1-based line).
pub fn function_definitions(content: &str, language: &str) -> Vec<(String, u32)> {
    let patterns = function_patterns(language);
    let mut definitions = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if let Some(name) = patterns
            .iter()
            .find_map(|p| p.captures(line).and_then(|c| c.get(1)))
        {
            if !CALL_KEYWORDS.contains(&name.as_str()) {
                definitions.push((name.as_str().to_string(), idx as u32 + 1));
            }
        }
    }
    definitions
}

/// Innermost function whose definition precedes `line`.
pub fn enclosing_function(content: &str, language: &str, line: u32) -> Option<String> {
    function_definitions(content, language)
        .into_iter()
        .take_while(|(_, start)| *start <= line)
        .last()
        .map(|(name, _)| name)
}

struct FunctionBody {
    name: String,
    body: String,
}

/// Each function spans from its definition to the next definition.
fn function_bodies(content: &str, language: &str) -> Vec<FunctionBody> {
    let lines: Vec<&str> = content.lines().collect();
    let definitions = function_definitions(content, language);
    definitions
        .iter()
        .enumerate()
        .map(|(i, (name, start))| {
            let from = *start as usize;
            let to = definitions
                .get(i + 1)
                .map_or(lines.len(), |(_, next)| (*next as usize).saturating_sub(1));
            FunctionBody {
                name: name.clone(),
                body: lines.get(from..to.max(from)).map(|l| l.join("\n")).unwrap_or_default(),
            }
        })
        .collect()
}

fn called_names(body: &str, exclude: &str) -> BTreeSet<String> {
    let Some(call) = call_pattern() else {
        return BTreeSet::new();
    };
    call.captures_iter(body)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .filter(|name| name != exclude && !CALL_KEYWORDS.contains(&name.as_str()))
        .collect()
}

/// Map an import to a project file, if it names one.
fn resolve_import(from_file: &str, module: &str, language: &str, files: &BTreeSet<String>) -> Option<String> {
    let dir = Path::new(from_file).parent().unwrap_or_else(|| Path::new(""));
    let first = |candidates: Vec<PathBuf>| {
        candidates
            .into_iter()
            .map(|c| normalize_relative(&c))
            .find(|c| files.contains(c))
    };

    match language {
        "python" => {
            let dots = module.chars().take_while(|c| *c == '.').count();
            let name = module[dots..].replace('.', "/");
            let base = if dots > 0 {
                let mut base = dir.to_path_buf();
                for _ in 1..dots {
                    base.push("..");
                }
                base.join(&name)
            } else {
                PathBuf::from(&name)
            };
            let base_str = base.to_string_lossy().to_string();
            first(vec![
                PathBuf::from(format!("{}.py", base_str)),
                base.join("__init__.py"),
                dir.join(format!("{}.py", name)),
            ])
        }
        "rust" => {
            let name = module.rsplit("::").next().unwrap_or(module);
            let sibling_dir = match Path::new(from_file).file_stem().and_then(|s| s.to_str()) {
                Some("mod") | Some("lib") | Some("main") => dir.to_path_buf(),
                Some(stem) => dir.join(stem),
                None => dir.to_path_buf(),
            };
            let mut candidates = vec![
                sibling_dir.join(format!("{}.rs", name)),
                sibling_dir.join(name).join("mod.rs"),
                dir.join(format!("{}.rs", name)),
            ];
            if module.starts_with("crate::") {
                candidates.push(PathBuf::from("src").join(format!("{}.rs", name)));
                candidates.push(PathBuf::from("src").join(name).join("mod.rs"));
            }
            first(candidates)
        }
        "typescript" | "javascript" => {
            if !module.starts_with('.') {
                return None;
            }
            let base = dir.join(module);
            let base_str = base.to_string_lossy().to_string();
            let mut candidates = vec![base.clone()];
            for ext in ["ts", "tsx", "js", "jsx", "mjs", "cjs"] {
                candidates.push(PathBuf::from(format!("{}.{}", base_str, ext)));
            }
            for ext in ["ts", "tsx", "js", "jsx"] {
                candidates.push(base.join(format!("index.{}", ext)));
            }
            first(candidates)
        }
        "java" => {
            let suffix = format!("{}.java", module.replace('.', "/"));
            files.iter().find(|f| f.ends_with(&suffix)).cloned()
        }
        "go" => {
            // Package imports name a directory; map to its first file
            files
                .iter()
                .find(|f| {
                    Path::new(f.as_str())
                        .parent()
                        .map(|p| p.to_string_lossy().to_string())
                        .map_or(false, |p| !p.is_empty() && module.ends_with(&p))
                })
                .cloned()
        }
        _ => None,
    }
}
