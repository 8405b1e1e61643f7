//! Filesystems manifests are loaded from
//!
//! Paths are relative and `/`-separated. An empty path or `.` is the root.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Component, Path, PathBuf};

use walkdir::WalkDir;

use feature_common::{Error, Result};

/// Read-only view of a tree of manifest files
pub trait ManifestFs: Send + Sync + fmt::Debug {
    /// Read a file as UTF-8
    fn read_to_string(&self, path: &str) -> Result<String>;

    /// Returns true if the path is a file or directory
    fn exists(&self, path: &str) -> bool;

    /// Returns true if the path is a directory
    fn is_dir(&self, path: &str) -> bool;

    /// Files at or below the path, sorted. A file path yields itself.
    fn walk_files(&self, path: &str) -> Result<Vec<String>>;

    /// Directory on disk backing this filesystem, if any
    fn disk_root(&self) -> Option<&Path>;
}

/// Normalize a relative manifest path: strip `./` and trailing slashes.
///
/// Absolute paths and `..` components are rejected.
pub fn normalize_path(path: &str) -> Result<String> {
    let candidate = Path::new(path);
    if candidate.is_absolute() || path.starts_with('/') {
        return Err(Error::manifest(path, "manifest paths must be relative"));
    }

    let mut parts = Vec::new();
    for component in candidate.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(Error::manifest(
                    path,
                    "manifest paths may not leave the manifest root",
                ))
            }
        }
    }
    Ok(parts.join("/"))
}

/// File name component of a manifest path
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Parent directory of a manifest path, empty for the root
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

fn is_below(path: &str, dir: &str) -> bool {
    dir.is_empty()
        || path
            .strip_prefix(dir)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Manifest tree on disk
#[derive(Clone, Debug)]
pub struct DiskFs {
    root: PathBuf,
}

impl DiskFs {
    /// Filesystem rooted at the given directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        if path.is_empty() {
            self.root.clone()
        } else {
            self.root.join(path)
        }
    }
}

impl ManifestFs for DiskFs {
    fn read_to_string(&self, path: &str) -> Result<String> {
        std::fs::read_to_string(self.resolve(path))
            .map_err(|e| Error::manifest(path, format!("failed to read file: {}", e)))
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).exists()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.resolve(path).is_dir()
    }

    fn walk_files(&self, path: &str) -> Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(self.resolve(path)).sort_by_file_name() {
            let entry =
                entry.map_err(|e| Error::manifest(path, format!("failed to walk: {}", e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(&self.root).map_err(|e| {
                Error::internal_with_context("walk_files", e.to_string())
            })?;
            let parts: Vec<String> = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            files.push(parts.join("/"));
        }
        files.sort();
        Ok(files)
    }

    fn disk_root(&self) -> Option<&Path> {
        Some(&self.root)
    }
}

/// Manifest tree held in memory, for embedded manifests and tests
#[derive(Clone, Debug, Default)]
pub struct MemoryFs {
    files: BTreeMap<String, String>,
}

impl MemoryFs {
    /// Create an empty filesystem
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file, returning the filesystem
    pub fn with_file(mut self, path: &str, content: impl Into<String>) -> Self {
        self.insert(path, content);
        self
    }

    /// Add or replace a file
    pub fn insert(&mut self, path: &str, content: impl Into<String>) {
        let path = path.trim_start_matches("./").trim_matches('/').to_string();
        self.files.insert(path, content.into());
    }
}

impl ManifestFs for MemoryFs {
    fn read_to_string(&self, path: &str) -> Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| Error::manifest(path, "file does not exist"))
    }

    fn exists(&self, path: &str) -> bool {
        self.files.contains_key(path) || self.is_dir(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.files
            .keys()
            .any(|file| file != path && is_below(file, path))
    }

    fn walk_files(&self, path: &str) -> Result<Vec<String>> {
        if self.files.contains_key(path) {
            return Ok(vec![path.to_string()]);
        }
        Ok(self
            .files
            .keys()
            .filter(|file| is_below(file, path))
            .cloned()
            .collect())
    }

    fn disk_root(&self) -> Option<&Path> {
        None
    }
}
