//! Environment file discovery and variable access.

use std::path::{Path, PathBuf};
use tracing::debug;

/// Environment files in priority order. Earlier files win since loading
/// never overrides a variable that is already set.
pub const ENV_FILES: &[&str] = &[".env.local", ".env"];

/// Load environment files from the working directory and its parent
pub fn load_env_files() -> Vec<PathBuf> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    load_env_files_from(&cwd)
}

/// Load environment files from `dir` and its parent, returning the files
/// that were read
pub fn load_env_files_from(dir: &Path) -> Vec<PathBuf> {
    let mut dirs = vec![dir.to_path_buf()];
    if let Some(parent) = dir.parent() {
        dirs.push(parent.to_path_buf());
    }

    let mut loaded = Vec::new();
    for dir in dirs {
        for name in ENV_FILES {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            match dotenvy::from_path(&path) {
                Ok(()) => loaded.push(path),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping environment file"),
            }
        }
    }
    loaded
}

/// Read a non-empty variable from the process environment
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Interpret `1` / `true` (any case) as set
#[must_use]
pub fn env_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true")
}
