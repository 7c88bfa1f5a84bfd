//! Application project files
//!
//! An application directory carries its configuration under `.meteor/`:
//! the list of packages it uses and the release it was created with.

use crate::{PackageError, Result};
use std::path::{Path, PathBuf};

/// Project configuration directory inside an application.
pub const PROJECT_DIR: &str = ".meteor";
/// Per-project scratch space; never watched, never bundled.
pub const LOCAL_DIR: &str = "local";
/// Package list file name inside [`PROJECT_DIR`].
pub const PACKAGES_FILE: &str = "packages";
/// Release version file name inside [`PROJECT_DIR`].
pub const RELEASE_FILE: &str = "release";

pub fn packages_file(app_dir: &Path) -> PathBuf {
    app_dir.join(PROJECT_DIR).join(PACKAGES_FILE)
}

pub fn release_file(app_dir: &Path) -> PathBuf {
    app_dir.join(PROJECT_DIR).join(RELEASE_FILE)
}

/// Read the project's package list. One package name per line; blank lines
/// and `#` comments are ignored. A missing file means no packages.
pub fn read_package_list(app_dir: &Path) -> Result<Vec<String>> {
    let path = packages_file(app_dir);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(error) => return Err(PackageError::io(path, error)),
    };

    let mut names = Vec::new();
    for line in contents.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if !line.is_empty() && !names.iter().any(|n| n == line) {
            names.push(line.to_string());
        }
    }
    Ok(names)
}

/// Read the project's release version, if recorded.
pub fn read_release(app_dir: &Path) -> Result<Option<String>> {
    let path = release_file(app_dir);
    match std::fs::read_to_string(&path) {
        Ok(contents) => {
            let release = contents.trim().to_string();
            Ok(if release.is_empty() { None } else { Some(release) })
        }
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(error) => Err(PackageError::io(path, error)),
    }
}
