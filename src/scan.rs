//! Dataset file discovery
//!
//! Directory traversal shared by conversion, manifest building, validation
//! and health checks. Results are always sorted so every downstream report
//! is reproducible.

use crate::error::{DatasetError, Result};
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Extension-filtered directory scanner
#[derive(Debug, Clone)]
pub struct FileScanner {
    extensions: Vec<String>,
    ignore_patterns: Vec<String>,
    max_depth: usize,
}

impl FileScanner {
    /// Scanner for the given extensions (without dot, case-insensitive),
    /// looking only at the top level of the directory.
    ///
    /// Ignores system files like .DS_Store, Thumbs.db, .git.
    pub fn new<S: AsRef<str>>(extensions: &[S]) -> Self {
        Self {
            extensions: extensions
                .iter()
                .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
                .collect(),
            ignore_patterns: vec![
                ".DS_Store".to_string(),
                "Thumbs.db".to_string(),
                ".git".to_string(),
            ],
            max_depth: 1,
        }
    }

    /// Descend into subdirectories
    pub fn recursive(mut self) -> Self {
        self.max_depth = usize::MAX;
        self
    }

    /// Whether `path` has one of the scanner's extensions
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| self.extensions.contains(&ext.to_lowercase()))
            .unwrap_or(false)
    }

    /// Matching files under `root`, sorted
    pub fn scan(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.exists() {
            return Err(DatasetError::InvalidInput(format!(
                "Path not found: {}",
                root.display()
            )));
        }
        if !root.is_dir() {
            return Err(DatasetError::InvalidInput(format!(
                "Not a directory: {}",
                root.display()
            )));
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .max_depth(self.max_depth)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.is_ignored(e));

        let mut files = Vec::new();
        for entry in walker {
            match entry {
                Ok(entry) => {
                    if entry.file_type().is_file() && self.matches(entry.path()) {
                        files.push(entry.into_path());
                    }
                }
                Err(e) => {
                    tracing::warn!("Error accessing entry: {}", e);
                }
            }
        }

        files.sort();
        tracing::debug!(root = %root.display(), files = files.len(), "Scan complete");
        Ok(files)
    }

    /// A single file is taken as-is when it matches; a directory is scanned
    pub fn collect(&self, path: &Path) -> Result<Vec<PathBuf>> {
        if path.is_file() {
            if self.matches(path) {
                Ok(vec![path.to_path_buf()])
            } else {
                Err(DatasetError::InvalidInput(format!(
                    "Unsupported file type: {}",
                    path.display()
                )))
            }
        } else {
            self.scan(path)
        }
    }

    fn is_ignored(&self, entry: &DirEntry) -> bool {
        // Never filter the scan root itself
        if entry.depth() == 0 {
            return false;
        }
        let file_name = entry.file_name().to_string_lossy();
        self.ignore_patterns
            .iter()
            .any(|pattern| file_name.contains(pattern.as_str()))
    }
}

/// `path` relative to `root`, joined with forward slashes on every platform.
///
/// Returns `None` when `path` is not under `root`.
pub fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Forward-slash form of a configured relative path, tolerant of
/// backslashes and `./` prefixes.
pub fn normalize_relpath(relpath: &str) -> String {
    relpath
        .split(|c: char| c == '/' || c == '\\')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect::<Vec<_>>()
        .join("/")
}
