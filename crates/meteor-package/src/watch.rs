//! Watch metadata handed to an external file watcher
//!
//! The bundle does not watch anything itself; it records exactly which files
//! it read (with content hashes) and which directories a watcher should
//! observe, so the caller can trigger a rebuild when any of them change.

use sha1::{Digest, Sha1};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Watch rules for one directory. The pattern strings are regular
/// expressions matched against paths relative to the watched directory,
/// with forward slashes on every platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryWatch {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// Everything the bundle read or depends on, keyed by absolute path.
#[derive(Debug, Clone, Default)]
pub struct DependencyInfo {
    /// Exact content hash (sha1 hex) of every file read.
    pub files: BTreeMap<PathBuf, String>,
    /// Directories to watch recursively.
    pub directories: BTreeMap<PathBuf, DirectoryWatch>,
}

impl DependencyInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file read with its content hash.
    pub fn add_file(&mut self, path: impl Into<PathBuf>, contents: &[u8]) {
        self.files.insert(path.into(), sha1_hex(contents));
    }

    pub fn add_directory(&mut self, path: impl Into<PathBuf>, watch: DirectoryWatch) {
        self.directories.insert(path.into(), watch);
    }

    /// Fold another slice's dependency info into this one. File entries are
    /// content hashes of identical bytes, so collisions are harmless;
    /// directory rules are unioned.
    pub fn merge(&mut self, other: &DependencyInfo) {
        for (path, hash) in &other.files {
            self.files.insert(path.clone(), hash.clone());
        }
        for (path, watch) in &other.directories {
            let entry = self.directories.entry(path.clone()).or_default();
            for pattern in &watch.include {
                if !entry.include.contains(pattern) {
                    entry.include.push(pattern.clone());
                }
            }
            for pattern in &watch.exclude {
                if !entry.exclude.contains(pattern) {
                    entry.exclude.push(pattern.clone());
                }
            }
        }
    }
}

/// Lowercase sha1 hex of the given bytes.
pub fn sha1_hex(contents: &[u8]) -> String {
    format!("{:x}", Sha1::digest(contents))
}
