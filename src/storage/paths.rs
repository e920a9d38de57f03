//! Default locations for event logs - ~/.cache/histmine/<repo-hash>/

use std::path::{Path, PathBuf};

/// Data directory for a repository.
/// Uses ~/.cache/histmine/<repo-hash>/ on Unix, %LOCALAPPDATA%/histmine/<repo-hash>/ on Windows.
pub fn get_data_dir(repo_path: &Path) -> PathBuf {
    let repo_hash = hash_path(repo_path);

    let base = if cfg!(windows) {
        std::env::var("LOCALAPPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|_| dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".")))
    } else {
        dirs::cache_dir().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".cache"))
                .unwrap_or_else(|| PathBuf::from("."))
        })
    };

    base.join("histmine").join(&repo_hash)
}

/// Default event log file for a repository: `<data dir>/<name>-file-events.csv`.
pub fn default_events_path(repo_path: &Path) -> PathBuf {
    get_data_dir(repo_path).join(format!("{}-file-events.csv", repo_name(repo_path)))
}

/// Name used to key per-repository settings.
pub fn repo_name(repo_path: &Path) -> String {
    let canonical = repo_path
        .canonicalize()
        .unwrap_or_else(|_| repo_path.to_path_buf());
    let name: String = canonical
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("repo")
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || *c == '.')
        .collect();
    if name.is_empty() {
        "repo".to_string()
    } else {
        name
    }
}

/// Hash a path to create a unique but deterministic directory name.
fn hash_path(path: &Path) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.to_string_lossy().hash(&mut hasher);

    let short_name: String = repo_name(path).chars().take(20).collect();
    format!("{}-{:012x}", short_name, hasher.finish())
}
