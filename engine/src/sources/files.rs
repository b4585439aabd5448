//! File globbing for file-based sources.
//!
//! `/landing/orders/**/*.parquet` is split into a literal base directory
//! (`/landing/orders`) that is walked with `walkdir`, and the full pattern,
//! matched with `globset`. `*` stops at path separators, `**` crosses them.

use globset::GlobBuilder;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{StorageError, StorageResult};
use crate::storage::resolve_uri;

const GLOB_CHARS: &[char] = &['*', '?', '[', '{'];

/// Files matching `glob_uri`, in sorted path order. No match is an error.
pub fn resolve_glob(glob_uri: &str) -> StorageResult<Vec<PathBuf>> {
    let pattern_path = resolve_uri(glob_uri)?;
    let pattern = pattern_path.to_string_lossy().to_string();

    if !pattern.contains(GLOB_CHARS) {
        return if pattern_path.is_file() {
            Ok(vec![pattern_path])
        } else {
            Err(StorageError::NotFound(glob_uri.to_string()))
        };
    }

    let matcher = GlobBuilder::new(&pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| StorageError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?
        .compile_matcher();

    let base = literal_base(&pattern_path);
    if !base.is_dir() {
        return Err(StorageError::NotFound(base.display().to_string()));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&base).follow_links(true) {
        let entry = entry.map_err(|e| StorageError::Glob {
            pattern: pattern.clone(),
            message: e.to_string(),
        })?;
        if entry.file_type().is_file() && matcher.is_match(entry.path()) {
            files.push(entry.into_path());
        }
    }

    if files.is_empty() {
        return Err(StorageError::NotFound(glob_uri.to_string()));
    }
    files.sort();
    Ok(files)
}

/// Leading path components free of glob syntax.
fn literal_base(pattern: &Path) -> PathBuf {
    let mut base = PathBuf::new();
    for component in pattern.components() {
        if let Component::Normal(part) = component {
            if part.to_string_lossy().contains(GLOB_CHARS) {
                break;
            }
        }
        base.push(component);
    }
    if base.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        base
    }
}
