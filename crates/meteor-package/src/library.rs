//! Package name resolution
//!
//! The [`Library`] turns package names into [`Package`]s by searching a
//! configured set of roots, in precedence order, and caches what it finds
//! for the duration of a bundle operation.

use crate::declaration::DECLARATION_FILE;
use crate::package::Package;
use crate::{PackageError, Result};
use serde::Deserialize;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, warn};

/// Environment variable naming extra package roots, colon-separated.
pub const PACKAGE_DIRS_ENV: &str = "PACKAGE_DIRS";

/// A release's package index: name → version. Versioned packages live in
/// the warehouse under `packages/<name>/<version>`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReleaseManifest {
    #[serde(default)]
    pub packages: BTreeMap<String, String>,
}

impl ReleaseManifest {
    pub fn parse(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents =
            std::fs::read_to_string(path).map_err(|e| PackageError::io(path, e))?;
        Self::parse(&contents).map_err(|error| PackageError::DeclarationParse {
            path: path.to_path_buf(),
            error: error.to_string(),
        })
    }
}

/// Where a library looks for packages.
#[derive(Debug, Clone, Default)]
pub struct LibraryOptions {
    /// Application directory; its `packages/` subdirectory is the
    /// highest-precedence root.
    pub app_dir: Option<PathBuf>,
    /// Extra roots, usually from [`PACKAGE_DIRS_ENV`].
    pub package_dirs: Vec<PathBuf>,
    /// A source checkout's own packages directory, if running from one.
    pub checkout_packages_dir: Option<PathBuf>,
    /// Release package index, consulted after all local roots.
    pub release_manifest: Option<ReleaseManifest>,
    /// Warehouse root holding versioned package trees.
    pub warehouse_dir: Option<PathBuf>,
}

impl LibraryOptions {
    /// The usual setup for bundling an application: the app's own
    /// `packages/` directory first, then any roots named in
    /// `PACKAGE_DIRS`.
    pub fn for_app(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: Some(app_dir.into()),
            package_dirs: Self::package_dirs_from_env(),
            ..Default::default()
        }
    }

    /// Roots listed in the `PACKAGE_DIRS` environment variable.
    pub fn package_dirs_from_env() -> Vec<PathBuf> {
        match std::env::var(PACKAGE_DIRS_ENV) {
            Ok(value) => value
                .split(':')
                .filter(|s| !s.is_empty())
                .map(PathBuf::from)
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Name-resolution service with a per-operation cache.
pub struct Library {
    options: LibraryOptions,
    preloads: RefCell<HashMap<String, Rc<Package>>>,
    cache: RefCell<HashMap<String, Rc<Package>>>,
}

impl Library {
    pub fn new(options: LibraryOptions) -> Self {
        Self {
            options,
            preloads: RefCell::new(HashMap::new()),
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Local roots in precedence order.
    fn local_roots(&self) -> Vec<PathBuf> {
        let mut roots = Vec::new();
        if let Some(app_dir) = &self.options.app_dir {
            roots.push(app_dir.join("packages"));
        }
        roots.extend(self.options.package_dirs.iter().cloned());
        if let Some(checkout) = &self.options.checkout_packages_dir {
            roots.push(checkout.clone());
        }
        roots
    }

    /// Resolve a package by name: preloads, then the cache, then each local
    /// root in order, then the release manifest.
    pub fn get(&self, name: &str) -> Result<Rc<Package>> {
        if let Some(package) = self.preloads.borrow().get(name) {
            return Ok(package.clone());
        }
        if let Some(package) = self.cache.borrow().get(name) {
            return Ok(package.clone());
        }

        for root in self.local_roots() {
            let dir = root.join(name);
            if dir.join(DECLARATION_FILE).is_file() {
                debug!(package = name, root = %root.display(), "resolved package");
                let package = Rc::new(Package::from_package_dir(&dir, name, false)?);
                self.cache
                    .borrow_mut()
                    .insert(name.to_string(), package.clone());
                return Ok(package);
            }
        }

        if let (Some(manifest), Some(warehouse)) =
            (&self.options.release_manifest, &self.options.warehouse_dir)
        {
            if let Some(version) = manifest.packages.get(name) {
                let dir = warehouse.join("packages").join(name).join(version);
                if dir.join(DECLARATION_FILE).is_file() {
                    debug!(package = name, version = %version, "resolved package from warehouse");
                    let package = Rc::new(Package::from_package_dir(&dir, name, true)?);
                    self.cache
                        .borrow_mut()
                        .insert(name.to_string(), package.clone());
                    return Ok(package);
                }
            }
        }

        Err(PackageError::UnknownPackage(name.to_string()))
    }

    /// Register a package under a name ahead of any filesystem resolution.
    /// Preloads survive [`flush`](Self::flush).
    pub fn preload(&self, name: &str, package: Package) {
        self.preloads
            .borrow_mut()
            .insert(name.to_string(), Rc::new(package));
    }

    /// Drop all cached resolutions, keeping preloads.
    pub fn flush(&self) {
        self.cache.borrow_mut().clear();
    }

    /// Every package visible from the configured roots, keyed by name.
    /// Earlier roots win on collisions; release-manifest names are added
    /// last. Packages that fail to load are skipped.
    pub fn list(&self) -> BTreeMap<String, Rc<Package>> {
        let mut names: Vec<String> = Vec::new();
        for root in self.local_roots() {
            let Ok(entries) = std::fs::read_dir(&root) else { continue };
            let mut root_names: Vec<String> = entries
                .filter_map(|e| e.ok())
                .filter(|e| e.path().join(DECLARATION_FILE).is_file())
                .filter_map(|e| e.file_name().into_string().ok())
                .collect();
            root_names.sort();
            for name in root_names {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        if let Some(manifest) = &self.options.release_manifest {
            for name in manifest.packages.keys() {
                if !names.contains(name) {
                    names.push(name.clone());
                }
            }
        }

        let mut packages = BTreeMap::new();
        for name in names {
            match self.get(&name) {
                Ok(package) => {
                    packages.insert(name, package);
                }
                Err(error) => warn!(package = %name, %error, "skipping unloadable package"),
            }
        }
        packages
    }
}
