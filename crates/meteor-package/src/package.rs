//! Packages: named collections of slices
//!
//! A [`Package`] is instantiated either from a package directory (driven by
//! its `package.toml` declaration) or synthesized from an application
//! directory, in which case sources are discovered by the scanner and the
//! dependency set comes from the project's package file.

use crate::declaration::{self, Declaration, DECLARATION_FILE};
use crate::extensions::{ExtensionRegistry, HandlerKind};
use crate::library::Library;
use crate::project;
use crate::scanner::{slash_join, SourceScanner, DEFAULT_IGNORES};
use crate::slice::{Asset, Slice, UseEdge, APP_SLICE, MAIN_SLICE, TESTS_SLICE};
use crate::watch::{DependencyInfo, DirectoryWatch};
use crate::{Arch, PackageError, Result, Role};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;
use walkdir::WalkDir;

/// The framework-root package. Every slice depends on it implicitly.
pub const FRAMEWORK_PACKAGE: &str = "meteor";

/// Packages every application uses even with an empty package file.
pub const DEFAULT_APP_PACKAGES: [&str; 2] = ["meteor", "livedata"];

static NEXT_PACKAGE_ID: AtomicU64 = AtomicU64::new(1);

fn next_package_id() -> u64 {
    NEXT_PACKAGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// Descriptor metadata from the declaration's `[package]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageMetadata {
    pub summary: Option<String>,
    pub internal: bool,
}

/// A named unit of reusable code, or the unnamed application
/// pseudo-package.
#[derive(Debug)]
pub struct Package {
    id: u64,
    name: Option<String>,
    source_root: PathBuf,
    serve_root: String,
    metadata: PackageMetadata,
    extensions: BTreeMap<String, HandlerKind>,
    module_deps: Option<BTreeMap<String, String>>,
    in_warehouse: bool,
    slices: Vec<RefCell<Slice>>,
    default_slices: BTreeMap<Arch, Vec<String>>,
    test_slices: BTreeMap<Arch, Vec<String>>,
}

impl Package {
    /// Load a package from its directory. `in_warehouse` marks packages
    /// resolved from the warehouse, whose third-party modules are managed
    /// externally.
    pub fn from_package_dir(dir: &Path, name: &str, in_warehouse: bool) -> Result<Self> {
        let declaration_path = dir.join(DECLARATION_FILE);
        let declaration_bytes = std::fs::read(&declaration_path)
            .map_err(|e| PackageError::io(&declaration_path, e))?;
        let declaration = Declaration::parse(
            &String::from_utf8_lossy(&declaration_bytes),
            &declaration_path,
        )?;
        let applied = declaration::apply(&declaration)?;

        let id = next_package_id();
        let serve_root = format!("/packages/{}", name);
        debug!(package = name, id, "loading package declaration");

        let mut slices = Vec::new();
        for (role, builder, slice_name) in [
            (Role::Use, &applied.use_role, MAIN_SLICE),
            (Role::Test, &applied.test_role, TESTS_SLICE),
        ] {
            for arch in Arch::ALL {
                let mut uses = builder.uses.get(&arch).cloned().unwrap_or_default();

                // Everything rests on the framework root, so give every
                // slice an edge to it unless one is already declared (a
                // package may declare it `unordered` to break a cycle).
                // The framework root itself is the one exception.
                let is_framework_root = name == FRAMEWORK_PACKAGE && role == Role::Use;
                let already_declared = uses
                    .iter()
                    .any(|edge| edge.spec.package == FRAMEWORK_PACKAGE);
                if !is_framework_root && !already_declared {
                    uses.insert(0, UseEdge::ordered(FRAMEWORK_PACKAGE));
                }

                let mut slice = Slice::new(
                    id,
                    Some(name.to_string()),
                    dir.to_path_buf(),
                    serve_root.clone(),
                    applied.config.extensions.clone(),
                    slice_name.to_string(),
                    arch,
                );
                slice.uses = uses;
                slice.sources = builder.sources.get(&arch).cloned().unwrap_or_default();
                slice.force_export = builder.exports.get(&arch).cloned().unwrap_or_default();
                slice
                    .dependency_info
                    .add_file(&declaration_path, &declaration_bytes);
                slices.push(RefCell::new(slice));
            }
        }

        let per_arch = |slice: &str| {
            Arch::ALL
                .iter()
                .map(|arch| (*arch, vec![slice.to_string()]))
                .collect::<BTreeMap<_, _>>()
        };

        Ok(Self {
            id,
            name: Some(name.to_string()),
            source_root: dir.to_path_buf(),
            serve_root,
            metadata: PackageMetadata {
                summary: applied.config.summary,
                internal: applied.config.internal,
            },
            extensions: applied.config.extensions,
            module_deps: applied.module_deps,
            in_warehouse,
            slices,
            default_slices: per_arch(MAIN_SLICE),
            test_slices: per_arch(TESTS_SLICE),
        })
    }

    /// Synthesize the application pseudo-package from a project directory.
    ///
    /// The app has no name and serves from `/`. Its dependency set is the
    /// fixed framework packages plus the project's package file; its
    /// sources are discovered by the scanner, per arch, excluding the
    /// app-local `packages/` tree, the other arch's subtrees, and test
    /// directories.
    pub fn from_app_dir(app_dir: &Path, library: &Library) -> Result<Self> {
        let id = next_package_id();

        let mut package_names: Vec<String> =
            DEFAULT_APP_PACKAGES.iter().map(|s| s.to_string()).collect();
        for name in project::read_package_list(app_dir)? {
            if !package_names.contains(&name) {
                package_names.push(name);
            }
        }

        // Recognized extensions: built-ins plus whatever the used packages
        // register.
        let mut registry = ExtensionRegistry::new();
        for name in &package_names {
            let package = library.get(name)?;
            registry.merge(name, package.extensions())?;
        }
        let extensions = registry.extensions();

        let uses: Vec<UseEdge> = package_names
            .iter()
            .map(|name| UseEdge::ordered(name))
            .collect();

        let assets = scan_public_assets(app_dir)?;
        let mut dependency_info = DependencyInfo::new();
        seed_app_watches(app_dir, &extensions, &mut dependency_info)?;

        let mut slices = Vec::new();
        for arch in Arch::ALL {
            // Html sources are client document fragments; the server slice
            // never picks them up.
            let scan_extensions: Vec<String> = match arch {
                Arch::Client => extensions.clone(),
                Arch::Server => extensions
                    .iter()
                    .filter(|ext| ext.as_str() != "html")
                    .cloned()
                    .collect(),
            };
            let scanner = SourceScanner::new(app_dir, &scan_extensions)?
                .ignore("^packages(/|$)")?
                .ignore(&format!("(^|/){}(/|$)", arch.other().as_str()))?
                .ignore("(^|/)tests(/|$)")?;
            let sources = scanner.scan()?;

            let mut slice = Slice::new(
                id,
                None,
                app_dir.to_path_buf(),
                "/".to_string(),
                BTreeMap::new(),
                APP_SLICE.to_string(),
                arch,
            );
            slice.uses = uses.clone();
            slice.sources = sources;
            if arch == Arch::Client {
                slice.assets = assets.clone();
            }
            slice.dependency_info = dependency_info.clone();
            slices.push(RefCell::new(slice));
        }

        let per_arch = |names: Vec<String>| {
            Arch::ALL
                .iter()
                .map(|arch| (*arch, names.clone()))
                .collect::<BTreeMap<_, _>>()
        };

        Ok(Self {
            id,
            name: None,
            source_root: app_dir.to_path_buf(),
            serve_root: "/".to_string(),
            metadata: PackageMetadata::default(),
            extensions: BTreeMap::new(),
            module_deps: None,
            in_warehouse: false,
            slices,
            default_slices: per_arch(vec![APP_SLICE.to_string()]),
            test_slices: per_arch(Vec::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Logical name; `None` for the application pseudo-package.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn serve_root(&self) -> &str {
        &self.serve_root
    }

    pub fn metadata(&self) -> &PackageMetadata {
        &self.metadata
    }

    pub fn extensions(&self) -> &BTreeMap<String, HandlerKind> {
        &self.extensions
    }

    /// Third-party module pins (name → exact version), if declared.
    pub fn module_deps(&self) -> Option<&BTreeMap<String, String>> {
        self.module_deps.as_ref()
    }

    /// Local directory third-party modules are installed into.
    pub fn module_dir(&self) -> PathBuf {
        self.source_root.join(".modules")
    }

    pub fn in_warehouse(&self) -> bool {
        self.in_warehouse
    }

    pub fn slices(&self) -> impl Iterator<Item = &RefCell<Slice>> {
        self.slices.iter()
    }

    pub fn slice(&self, name: &str, arch: Arch) -> Option<&RefCell<Slice>> {
        self.slices.iter().find(|cell| {
            let slice = cell.borrow();
            slice.name() == name && slice.arch() == arch
        })
    }

    /// Slice names selected when the package is referenced without a
    /// qualifier.
    pub fn default_slice_names(&self, arch: Arch) -> Vec<String> {
        self.default_slices.get(&arch).cloned().unwrap_or_default()
    }

    /// Slice names selected when the package's tests are requested.
    pub fn test_slice_names(&self, arch: Arch) -> Vec<String> {
        self.test_slices.get(&arch).cloned().unwrap_or_default()
    }

    /// Slice names for a role.
    pub fn slice_names_for_role(&self, role: Role, arch: Arch) -> Vec<String> {
        match role {
            Role::Use => self.default_slice_names(arch),
            Role::Test => self.test_slice_names(arch),
        }
    }
}

/// Collect `public/` files as client assets served from `/`.
fn scan_public_assets(app_dir: &Path) -> Result<Vec<Asset>> {
    let public = app_dir.join("public");
    if !public.is_dir() {
        return Ok(Vec::new());
    }

    let mut assets = Vec::new();
    let walker = WalkDir::new(&public)
        .follow_links(true)
        .sort_by(|a, b| a.file_name().cmp(b.file_name()));
    for entry in walker {
        let entry = entry.map_err(|e| PackageError::io(&public, e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(&public)
            .expect("walkdir yields paths under its root");
        assets.push(Asset {
            path: entry.path().to_path_buf(),
            serve_path: format!("/{}", slash_join(rel)),
        });
    }
    Ok(assets)
}

/// Watch rules for an application: the project files themselves, the whole
/// app tree filtered to recognized extensions, and the app-local packages
/// directory for newly appearing declarations.
fn seed_app_watches(
    app_dir: &Path,
    extensions: &[String],
    info: &mut DependencyInfo,
) -> Result<()> {
    for path in [project::packages_file(app_dir), project::release_file(app_dir)] {
        if path.is_file() {
            let contents = std::fs::read(&path).map_err(|e| PackageError::io(&path, e))?;
            info.add_file(&path, &contents);
        }
    }

    let mut exclude: Vec<String> = DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect();
    exclude.push(format!(
        "(^|/){}/{}(/|$)",
        project::PROJECT_DIR.replace('.', "\\."),
        project::LOCAL_DIR
    ));
    info.add_directory(
        app_dir,
        DirectoryWatch {
            include: extensions
                .iter()
                .map(|ext| format!("\\.{}$", regex::escape(ext)))
                .collect(),
            exclude,
        },
    );

    info.add_directory(
        app_dir.join("packages"),
        DirectoryWatch {
            include: vec![format!("(^|/){}$", DECLARATION_FILE.replace('.', "\\."))],
            exclude: Vec::new(),
        },
    );

    let public = app_dir.join("public");
    if public.is_dir() {
        info.add_directory(
            public,
            DirectoryWatch {
                include: vec![".".to_string()],
                exclude: DEFAULT_IGNORES.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    Ok(())
}
