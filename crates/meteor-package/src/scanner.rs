//! Deterministic source discovery for application directories

use crate::{PackageError, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// File-name patterns that are never sources: editor droppings and hidden
/// files. Matched against every path segment.
pub const DEFAULT_IGNORES: [&str; 4] = ["~$", "^#.*#$", "^\\.#", "^\\."];

/// Enumerates candidate source files under a root.
///
/// Traversal is depth-first with byte-wise lexicographic ordering of
/// directory entries, so the result is identical across platforms and
/// locales. After filtering, `.html` files are moved ahead of everything
/// else (template registrations must load before code referencing them),
/// preserving relative order within each group.
pub struct SourceScanner {
    root: PathBuf,
    extensions: Vec<String>,
    ignores: Vec<Regex>,
}

impl SourceScanner {
    /// Create a scanner recognizing the given extensions (no leading dot).
    pub fn new(root: impl Into<PathBuf>, extensions: &[String]) -> Result<Self> {
        let mut ignores = Vec::new();
        for pattern in DEFAULT_IGNORES {
            ignores.push(Regex::new(pattern)?);
        }
        Ok(Self {
            root: root.into(),
            extensions: extensions.to_vec(),
            ignores,
        })
    }

    /// Add a caller-provided ignore pattern, matched against the
    /// slash-separated path relative to the scan root.
    pub fn ignore(mut self, pattern: &str) -> Result<Self> {
        self.ignores.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Enumerate matching files, relative to the scan root.
    pub fn scan(&self) -> Result<Vec<PathBuf>> {
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| PackageError::io(&self.root, e))?;

        let mut found = Vec::new();

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by(|a, b| a.file_name().cmp(b.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e
                    .path()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| self.root.clone());
                PackageError::io(path, e.into())
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walkdir yields paths under its root")
                .to_path_buf();

            if !self.recognizes(&rel) || self.ignored(&rel) {
                continue;
            }

            // A symlink must not smuggle in files from outside the root.
            let resolved = entry
                .path()
                .canonicalize()
                .map_err(|e| PackageError::io(entry.path(), e))?;
            if !resolved.starts_with(&canonical_root) {
                return Err(PackageError::SourceOutsideRoot {
                    path: entry.path().to_path_buf(),
                    root: self.root.clone(),
                });
            }

            found.push(rel);
        }

        Ok(html_first(found))
    }

    fn recognizes(&self, rel: &Path) -> bool {
        match rel.extension().and_then(|e| e.to_str()) {
            Some(ext) => self.extensions.iter().any(|e| e == ext),
            None => false,
        }
    }

    fn ignored(&self, rel: &Path) -> bool {
        let default_count = DEFAULT_IGNORES.len();

        for segment in rel.iter().filter_map(|s| s.to_str()) {
            if self.ignores[..default_count]
                .iter()
                .any(|re| re.is_match(segment))
            {
                return true;
            }
        }

        let slash_path = slash_join(rel);
        self.ignores[default_count..]
            .iter()
            .any(|re| re.is_match(&slash_path))
    }
}

/// Stable reorder moving `.html` files ahead of everything else.
pub fn html_first(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let (html, rest): (Vec<_>, Vec<_>) = paths
        .into_iter()
        .partition(|p| p.extension().and_then(|e| e.to_str()) == Some("html"));
    html.into_iter().chain(rest).collect()
}

/// Relative path with forward slashes regardless of host OS.
pub fn slash_join(rel: &Path) -> String {
    rel.iter()
        .filter_map(|s| s.to_str())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"x").unwrap();
    }

    fn scan(root: &Path, exts: &[&str]) -> Vec<String> {
        let exts: Vec<String> = exts.iter().map(|s| s.to_string()).collect();
        SourceScanner::new(root, &exts)
            .unwrap()
            .scan()
            .unwrap()
            .iter()
            .map(|p| slash_join(p))
            .collect()
    }

    #[test]
    fn test_scan_orders_lexicographically() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "b.js");
        touch(temp.path(), "a/z.js");
        touch(temp.path(), "a/m.js");

        assert_eq!(scan(temp.path(), &["js"]), vec!["a/m.js", "a/z.js", "b.js"]);
    }

    #[test]
    fn test_scan_filters_unrecognized_extensions() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.js");
        touch(temp.path(), "notes.txt");

        assert_eq!(scan(temp.path(), &["js"]), vec!["a.js"]);
    }

    #[test]
    fn test_scan_html_moves_first() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.js");
        touch(temp.path(), "b.html");
        touch(temp.path(), "c.js");
        touch(temp.path(), "d.html");

        assert_eq!(
            scan(temp.path(), &["js", "html"]),
            vec!["b.html", "d.html", "a.js", "c.js"]
        );
    }

    #[test]
    fn test_scan_ignores_hidden_and_editor_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.js");
        touch(temp.path(), ".hidden.js");
        touch(temp.path(), ".#lock.js");
        touch(temp.path(), ".git/config.js");

        assert_eq!(scan(temp.path(), &["js"]), vec!["a.js"]);
    }

    #[test]
    fn test_scan_caller_ignore_matches_relative_path() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), "client/a.js");
        touch(temp.path(), "server/b.js");

        let found = SourceScanner::new(temp.path(), &["js".to_string()])
            .unwrap()
            .ignore("(^|/)server(/|$)")
            .unwrap()
            .scan()
            .unwrap();
        assert_eq!(found, vec![PathBuf::from("client/a.js")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_scan_symlink_escape_is_fatal() {
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("evil.js"), b"x").unwrap();

        let temp = TempDir::new().unwrap();
        touch(temp.path(), "a.js");
        std::os::unix::fs::symlink(
            outside.path().join("evil.js"),
            temp.path().join("link.js"),
        )
        .unwrap();

        let exts = vec!["js".to_string()];
        let result = SourceScanner::new(temp.path(), &exts).unwrap().scan();
        assert!(matches!(
            result,
            Err(PackageError::SourceOutsideRoot { .. })
        ));
    }
}
