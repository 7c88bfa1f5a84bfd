//! Bundle staging and the top-level bundle operation

use crate::load_order::{determine_load_order, SliceHandle};
use crate::minify::{concatenate, Minifier, PassthroughMinifier, CSS_SEPARATOR, JS_SEPARATOR};
use crate::writer;
use crate::{BundleError, Result};
use meteor_package::watch::sha1_hex;
use meteor_package::{
    Arch, DependencyInfo, Library, Package, PackageError, Resource, ResourceKind, Role,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{info, warn};

/// How the shared server modules land in the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NodeModulesMode {
    /// Leave them out; the deploy target provides them.
    #[default]
    Skip,
    /// Copy the module tree into `server/node_modules`.
    Copy,
    /// Symlink `server/node_modules` to the source tree (development).
    Symlink,
}

/// Options for one bundle operation.
pub struct BundleOptions {
    pub library: Library,
    pub node_modules_mode: NodeModulesMode,
    /// Source tree for `server/node_modules` when the mode is not `Skip`.
    pub server_modules_dir: Option<PathBuf>,
    /// Release stamped into `app.json`; `None` or `"none"` omits it.
    pub release_stamp: Option<String>,
    pub minify: bool,
    pub minifier: Box<dyn Minifier>,
    /// Packages whose test slices are bundled in addition to the app.
    pub test_packages: Vec<String>,
}

impl BundleOptions {
    pub fn new(library: Library) -> Self {
        Self {
            library,
            node_modules_mode: NodeModulesMode::Skip,
            server_modules_dir: None,
            release_stamp: None,
            minify: false,
            minifier: Box::new(PassthroughMinifier),
            test_packages: Vec::new(),
        }
    }
}

/// What the operation produced. `errors` is `None` on success; on failure
/// it holds one human-readable message per failure and no output exists on
/// disk.
#[derive(Debug)]
pub struct BundleOutcome {
    pub errors: Option<Vec<String>>,
    pub dependency_info: DependencyInfo,
}

/// A file staged for the output directory.
#[derive(Debug, Clone)]
pub(crate) struct StagedFile {
    pub data: Vec<u8>,
    pub hash: String,
    pub kind: ResourceKind,
    pub cacheable: bool,
}

impl StagedFile {
    fn new(data: Vec<u8>, kind: ResourceKind, cacheable: bool) -> Self {
        let hash = sha1_hex(&data);
        Self {
            data,
            hash,
            kind,
            cacheable,
        }
    }
}

/// Accumulated per-arch output state for one bundle operation.
pub struct Bundle {
    pub(crate) slices: Vec<SliceHandle>,
    /// serve path → staged file, per arch.
    pub(crate) files: BTreeMap<Arch, BTreeMap<String, StagedFile>>,
    /// Emission order of serve paths, per arch.
    pub(crate) order: BTreeMap<Arch, Vec<String>>,
    /// Client/server script load order.
    pub(crate) js_load: BTreeMap<Arch, Vec<String>>,
    /// Client stylesheet order.
    pub(crate) css_load: Vec<String>,
    pub(crate) head_sections: Vec<String>,
    pub(crate) body_sections: Vec<String>,
    pub(crate) dependency_info: DependencyInfo,
}

impl Bundle {
    pub fn new(slices: Vec<SliceHandle>) -> Self {
        let mut files = BTreeMap::new();
        let mut order = BTreeMap::new();
        let mut js_load = BTreeMap::new();
        for arch in Arch::ALL {
            files.insert(arch, BTreeMap::new());
            order.insert(arch, Vec::new());
            js_load.insert(arch, Vec::new());
        }
        Self {
            slices,
            files,
            order,
            js_load,
            css_load: Vec::new(),
            head_sections: Vec::new(),
            body_sections: Vec::new(),
            dependency_info: DependencyInfo::new(),
        }
    }

    /// Distinct packages participating in the bundle, in load order.
    pub(crate) fn packages(&self) -> Vec<Rc<Package>> {
        let mut seen = Vec::new();
        let mut packages: Vec<Rc<Package>> = Vec::new();
        for handle in &self.slices {
            if !seen.contains(&handle.package.id()) {
                seen.push(handle.package.id());
                packages.push(handle.package.clone());
            }
        }
        packages
    }

    /// Compile and link every slice in load order, staging its resources.
    pub fn emit_resources(&mut self, library: &Library) -> Result<()> {
        let handles = self.slices.clone();
        for handle in &handles {
            let cell = handle
                .package
                .slice(&handle.slice_name, handle.arch)
                .ok_or_else(|| PackageError::UnknownSlice {
                    package: handle.package.name().unwrap_or("app").to_string(),
                    slice: handle.slice_name.clone(),
                    arch: handle.arch,
                })?;

            let resources = cell.borrow_mut().resources(library)?;
            self.dependency_info
                .merge(cell.borrow().dependency_info());

            for resource in resources {
                self.stage(handle, resource)?;
            }
        }
        Ok(())
    }

    fn stage(&mut self, handle: &SliceHandle, resource: Resource) -> Result<()> {
        let arch = handle.arch;
        match resource.kind {
            ResourceKind::Js => {
                let path = self.require_serve_path(handle, resource.serve_path)?;
                self.insert(arch, &path, StagedFile::new(resource.data, ResourceKind::Js, false));
                self.js_load.get_mut(&arch).expect("all archs staged").push(path);
            }
            ResourceKind::Css => {
                if arch != Arch::Client {
                    // Historical behavior: stylesheets from server slices
                    // are dropped rather than rejected.
                    warn!(slice = %handle.display_name(), "dropping css resource on server");
                    return Ok(());
                }
                let path = self.require_serve_path(handle, resource.serve_path)?;
                self.insert(arch, &path, StagedFile::new(resource.data, ResourceKind::Css, false));
                self.css_load.push(path);
            }
            ResourceKind::Static => {
                let path = self.require_serve_path(handle, resource.serve_path)?;
                self.insert(
                    arch,
                    &path,
                    StagedFile::new(resource.data, ResourceKind::Static, false),
                );
            }
            ResourceKind::Head | ResourceKind::Body => {
                if arch != Arch::Client {
                    return Err(BundleError::NonClientResource {
                        kind: resource.kind.as_str().to_string(),
                        slice: handle.display_name(),
                    });
                }
                let text = String::from_utf8_lossy(&resource.data).into_owned();
                match resource.kind {
                    ResourceKind::Head => self.head_sections.push(text),
                    _ => self.body_sections.push(text),
                }
            }
        }
        Ok(())
    }

    fn require_serve_path(
        &self,
        handle: &SliceHandle,
        serve_path: Option<String>,
    ) -> Result<String> {
        serve_path.ok_or_else(|| BundleError::MissingServePath {
            slice: handle.display_name(),
        })
    }

    fn insert(&mut self, arch: Arch, path: &str, file: StagedFile) {
        let files = self.files.get_mut(&arch).expect("all archs staged");
        let order = self.order.get_mut(&arch).expect("all archs staged");
        if files.insert(path.to_string(), file).is_none() {
            order.push(path.to_string());
        }
    }

    fn remove(&mut self, arch: Arch, path: &str) {
        self.files
            .get_mut(&arch)
            .expect("all archs staged")
            .remove(path);
        self.order
            .get_mut(&arch)
            .expect("all archs staged")
            .retain(|p| p != path);
    }

    /// Collapse the client js and css into single cacheable files keyed by
    /// their content hash. The concatenated inputs leave the bundle.
    pub fn minify(&mut self, minifier: &dyn Minifier) {
        let js_paths = self.js_load.get(&Arch::Client).expect("all archs staged").clone();
        if !js_paths.is_empty() {
            let sources: Vec<String> = js_paths
                .iter()
                .map(|path| {
                    let file = &self.files[&Arch::Client][path];
                    String::from_utf8_lossy(&file.data).into_owned()
                })
                .collect();
            let minified =
                minifier.minify_js(&concatenate(sources.iter().map(|s| s.as_str()), JS_SEPARATOR));

            for path in &js_paths {
                self.remove(Arch::Client, path);
            }
            let staged = StagedFile::new(minified.into_bytes(), ResourceKind::Js, true);
            let serve = format!("/{}.js", staged.hash);
            info!(file = %serve, "minified client js");
            self.insert(Arch::Client, &serve, staged);
            *self.js_load.get_mut(&Arch::Client).expect("all archs staged") = vec![serve];
        }

        let css_paths = std::mem::take(&mut self.css_load);
        if !css_paths.is_empty() {
            let sources: Vec<String> = css_paths
                .iter()
                .map(|path| {
                    let file = &self.files[&Arch::Client][path];
                    String::from_utf8_lossy(&file.data).into_owned()
                })
                .collect();
            let minified = minifier
                .minify_css(&concatenate(sources.iter().map(|s| s.as_str()), CSS_SEPARATOR));

            for path in &css_paths {
                self.remove(Arch::Client, path);
            }
            let staged = StagedFile::new(minified.into_bytes(), ResourceKind::Css, true);
            let serve = format!("/{}.css", staged.hash);
            info!(file = %serve, "minified client css");
            self.insert(Arch::Client, &serve, staged);
            self.css_load = vec![serve];
        }
    }

    /// Served URL of a staged client file. Cacheable files are addressed
    /// by their content-hash name; everything else gets a cache-busting
    /// query.
    pub(crate) fn client_url(&self, path: &str) -> String {
        let file = &self.files[&Arch::Client][path];
        if file.cacheable {
            path.to_string()
        } else {
            format!("{}?{}", path, file.hash)
        }
    }
}

/// Bundle an application directory into `output_path`.
///
/// On failure the output path is removed, no partial bundle is observable,
/// and each failure message appears in the outcome's `errors`.
pub fn bundle(app_dir: &Path, output_path: &Path, options: &BundleOptions) -> BundleOutcome {
    match try_bundle(app_dir, output_path, options) {
        Ok(dependency_info) => BundleOutcome {
            errors: None,
            dependency_info,
        },
        Err(error) => {
            let _ = std::fs::remove_dir_all(output_path);
            BundleOutcome {
                errors: Some(vec![error.to_string()]),
                dependency_info: DependencyInfo::new(),
            }
        }
    }
}

fn try_bundle(
    app_dir: &Path,
    output_path: &Path,
    options: &BundleOptions,
) -> Result<DependencyInfo> {
    let library = &options.library;
    info!(app = %app_dir.display(), out = %output_path.display(), "bundling");

    let app = Rc::new(Package::from_app_dir(app_dir, library)?);

    let mut roots: Vec<(Rc<Package>, Role, Arch)> = Arch::ALL
        .iter()
        .map(|arch| (app.clone(), Role::Use, *arch))
        .collect();
    for name in &options.test_packages {
        let package = library.get(name)?;
        for arch in Arch::ALL {
            roots.push((package.clone(), Role::Test, arch));
        }
    }

    let slices = determine_load_order(library, &roots)?;
    let mut bundle = Bundle::new(slices);
    bundle.emit_resources(library)?;

    if options.minify {
        bundle.minify(&*options.minifier);
    }

    writer::write_to_directory(&bundle, output_path, options)?;
    Ok(bundle.dependency_info)
}
