//! Slices: the (package, slice, arch) compile units
//!
//! A slice owns an ordered source list and dependency edges, compiles at
//! most once (handler dispatch + prelink), and afterwards can produce its
//! final resources for a concrete bundle (import map + link).

use crate::extensions::{run_handler, ExtensionRegistry, HandlerInput, HandlerKind};
use crate::library::Library;
use crate::scanner::{html_first, slash_join};
use crate::watch::DependencyInfo;
use crate::{Arch, PackageError, Result};
use meteor_linker::{link, prelink, LinkFile, LinkOptions, PrelinkOptions};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

/// Slice name used for a package's production code.
pub const MAIN_SLICE: &str = "main";
/// Slice name used for a package's test code.
pub const TESTS_SLICE: &str = "tests";
/// Slice name used for an application pseudo-package.
pub const APP_SLICE: &str = "app";

/// Serve path of the import stub emitted for application slices.
pub const IMPORT_STUB_SERVE_PATH: &str = "/packages/global-imports.js";

/// Kinds of resource a compilation can emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Js,
    Css,
    Head,
    Body,
    Static,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Js => "js",
            ResourceKind::Css => "css",
            ResourceKind::Head => "head",
            ResourceKind::Body => "body",
            ResourceKind::Static => "static",
        }
    }
}

/// A typed resource emitted by compilation. `serve_path` is an
/// absolute-style slash-separated path; head/body segments have none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub kind: ResourceKind,
    pub data: Vec<u8>,
    pub serve_path: Option<String>,
}

/// A dependency reference: `"name"` or `"name.slice"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceSpec {
    pub package: String,
    pub slice: Option<String>,
}

impl SliceSpec {
    pub fn parse(spec: &str) -> Self {
        match spec.split_once('.') {
            Some((package, slice)) => Self {
                package: package.to_string(),
                slice: Some(slice.to_string()),
            },
            None => Self {
                package: spec.to_string(),
                slice: None,
            },
        }
    }
}

impl std::fmt::Display for SliceSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.slice {
            Some(slice) => write!(f, "{}.{}", self.package, slice),
            None => f.write_str(&self.package),
        }
    }
}

/// A usage edge. `unordered` edges do not constrain load order and do not
/// contribute imported symbols; they only pull the target into the bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UseEdge {
    pub spec: SliceSpec,
    pub unordered: bool,
}

impl UseEdge {
    pub fn ordered(spec: &str) -> Self {
        Self {
            spec: SliceSpec::parse(spec),
            unordered: false,
        }
    }
}

/// A file served verbatim under an explicit path (application `public/`
/// assets).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Absolute path on disk.
    pub path: PathBuf,
    pub serve_path: String,
}

/// Output of a successful compilation.
#[derive(Debug, Clone)]
pub struct CompiledSlice {
    pub exports: Vec<String>,
    pub boundary: String,
    pub prelink_files: Vec<LinkFile>,
    /// Non-js resources, in handler emission order.
    pub resources: Vec<Resource>,
}

/// Compilation latch. `Compiling` exists so reentrant compilation (a slice
/// reached again while its own compile is on the stack) is an error rather
/// than a hang.
#[derive(Debug, Clone, Default)]
enum CompileState {
    #[default]
    Pending,
    Compiling,
    Compiled(CompiledSlice),
}

/// One (package, slice, arch) compile unit.
#[derive(Debug)]
pub struct Slice {
    pub(crate) package_id: u64,
    pub(crate) package_name: Option<String>,
    pub(crate) source_root: PathBuf,
    pub(crate) serve_root: String,
    pub(crate) own_extensions: BTreeMap<String, HandlerKind>,
    pub(crate) name: String,
    pub(crate) arch: Arch,
    pub(crate) uses: Vec<UseEdge>,
    pub(crate) sources: Vec<PathBuf>,
    pub(crate) assets: Vec<Asset>,
    pub(crate) force_export: Vec<String>,
    pub(crate) dependency_info: DependencyInfo,
    state: CompileState,
    cached_resources: Option<Vec<Resource>>,
}

impl Slice {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        package_id: u64,
        package_name: Option<String>,
        source_root: PathBuf,
        serve_root: String,
        own_extensions: BTreeMap<String, HandlerKind>,
        name: String,
        arch: Arch,
    ) -> Self {
        Self {
            package_id,
            package_name,
            source_root,
            serve_root,
            own_extensions,
            name,
            arch,
            uses: Vec::new(),
            sources: Vec::new(),
            assets: Vec::new(),
            force_export: Vec::new(),
            dependency_info: DependencyInfo::new(),
            state: CompileState::Pending,
            cached_resources: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    pub fn uses(&self) -> &[UseEdge] {
        &self.uses
    }

    pub fn dependency_info(&self) -> &DependencyInfo {
        &self.dependency_info
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.state, CompileState::Compiled(_))
    }

    /// Exported symbols; `None` until compiled.
    pub fn exports(&self) -> Option<&[String]> {
        match &self.state {
            CompileState::Compiled(compiled) => Some(&compiled.exports),
            _ => None,
        }
    }

    /// Append a source path. Sources are fixed once the slice is compiled.
    pub fn add_source(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        if !matches!(self.state, CompileState::Pending) {
            return Err(PackageError::SliceSealed {
                slice: self.name.clone(),
            });
        }
        self.sources.push(path.into());
        Ok(())
    }

    /// Compile the slice: read sources, dispatch handlers, prelink.
    /// Idempotent; the first success latches.
    pub fn compile(&mut self, library: &Library) -> Result<()> {
        match self.state {
            CompileState::Compiled(_) => return Ok(()),
            CompileState::Compiling => {
                return Err(PackageError::CompileCycle {
                    package: self.package_name.clone().unwrap_or_default(),
                    slice: self.name.clone(),
                })
            }
            CompileState::Pending => {}
        }
        self.state = CompileState::Compiling;

        match self.compile_inner(library) {
            Ok(compiled) => {
                debug!(
                    package = self.package_name.as_deref().unwrap_or("(app)"),
                    slice = %self.name,
                    arch = %self.arch,
                    exports = compiled.exports.len(),
                    "slice compiled"
                );
                self.state = CompileState::Compiled(compiled);
                Ok(())
            }
            Err(error) => {
                self.state = CompileState::Pending;
                Err(error)
            }
        }
    }

    fn compile_inner(&mut self, library: &Library) -> Result<CompiledSlice> {
        let registry = self.extension_registry(library)?;

        let mut js_inputs: Vec<LinkFile> = Vec::new();
        let mut finals: Vec<Resource> = Vec::new();

        // Template registrations load before the code that references them.
        let sources = html_first(self.sources.clone());

        for rel in &sources {
            let abs = self.source_root.join(rel);
            let contents = std::fs::read(&abs).map_err(|e| PackageError::io(&abs, e))?;
            self.dependency_info.add_file(&abs, &contents);

            let serve_path = join_serve_path(&self.serve_root, &slash_join(rel));
            let ext = rel.extension().and_then(|e| e.to_str()).unwrap_or("");

            match registry.handler(ext) {
                None => finals.push(Resource {
                    kind: ResourceKind::Static,
                    data: contents,
                    serve_path: Some(serve_path),
                }),
                Some(kind) => {
                    let input = HandlerInput {
                        contents: &contents,
                        serve_path,
                        arch: self.arch,
                    };
                    run_handler(kind, input, &mut |resource| {
                        if resource.kind == ResourceKind::Js {
                            js_inputs.push(LinkFile::new(
                                String::from_utf8_lossy(&resource.data).into_owned(),
                                resource.serve_path.clone().unwrap_or_default(),
                            ));
                        } else {
                            finals.push(resource);
                        }
                    });
                }
            }
        }

        for asset in &self.assets {
            let contents =
                std::fs::read(&asset.path).map_err(|e| PackageError::io(&asset.path, e))?;
            self.dependency_info.add_file(&asset.path, &contents);
            finals.push(Resource {
                kind: ResourceKind::Static,
                data: contents,
                serve_path: Some(asset.serve_path.clone()),
            });
        }

        let prelinked = prelink(PrelinkOptions {
            inputs: js_inputs,
            package_name: self.package_name.clone(),
            force_export: self.force_export.clone(),
            use_global_namespace: self.package_name.is_none(),
            combined_serve_path: self.combined_serve_path(),
            import_stub_serve_path: IMPORT_STUB_SERVE_PATH.to_string(),
        })?;

        Ok(CompiledSlice {
            exports: prelinked.exports,
            boundary: prelinked.boundary,
            prelink_files: prelinked.files,
            resources: finals,
        })
    }

    /// Built-ins plus this package's registrations plus every direct
    /// dependency's registrations. Resolved now, against the library's
    /// current contents.
    fn extension_registry(&self, library: &Library) -> Result<ExtensionRegistry> {
        let mut registry = ExtensionRegistry::new();
        let own_provider = self.package_name.as_deref().unwrap_or("(app)");
        registry.merge(own_provider, &self.own_extensions)?;

        for edge in &self.uses {
            let package = library.get(&edge.spec.package)?;
            if let Some(name) = package.name() {
                registry.merge(name, package.extensions())?;
            }
        }
        Ok(registry)
    }

    fn combined_serve_path(&self) -> String {
        let name = self.package_name.as_deref().unwrap_or("");
        if self.name == MAIN_SLICE {
            format!("/packages/{}.js", name)
        } else {
            format!("/packages/{}.{}.js", name, self.name)
        }
    }

    /// Final resources for this bundle: compute the import map from the
    /// ordered `uses` list (later entry wins on symbol collisions,
    /// `unordered` edges contribute nothing), link, and append the js
    /// fragments after the non-js resources.
    pub fn resources(&mut self, library: &Library) -> Result<Vec<Resource>> {
        self.compile(library)?;
        if let Some(cached) = &self.cached_resources {
            return Ok(cached.clone());
        }

        let mut imports: Vec<(String, String)> = Vec::new();
        for edge in &self.uses {
            if edge.unordered {
                continue;
            }
            let package = library.get(&edge.spec.package)?;
            let slice_names = match &edge.spec.slice {
                Some(slice) => vec![slice.clone()],
                None => package.default_slice_names(self.arch),
            };
            let supplier = package.name().unwrap_or_default().to_string();

            for slice_name in slice_names {
                let cell = package.slice(&slice_name, self.arch).ok_or_else(|| {
                    PackageError::UnknownSlice {
                        package: supplier.clone(),
                        slice: slice_name.clone(),
                        arch: self.arch,
                    }
                })?;
                let mut target = cell.try_borrow_mut().map_err(|_| {
                    PackageError::CompileCycle {
                        package: supplier.clone(),
                        slice: slice_name.clone(),
                    }
                })?;
                target.compile(library)?;

                for symbol in target.exports().unwrap_or(&[]) {
                    match imports.iter_mut().find(|entry| entry.0 == *symbol) {
                        Some(entry) => entry.1 = supplier.clone(),
                        None => imports.push((symbol.clone(), supplier.clone())),
                    }
                }
            }
        }

        let compiled = match &self.state {
            CompileState::Compiled(compiled) => compiled,
            _ => unreachable!("compile() latched above"),
        };

        let linked = link(LinkOptions {
            imports,
            use_global_namespace: self.package_name.is_none(),
            prelink_files: compiled.prelink_files.clone(),
            boundary: compiled.boundary.clone(),
        })?;

        let mut resources = compiled.resources.clone();
        resources.extend(linked.into_iter().map(|file| Resource {
            kind: ResourceKind::Js,
            data: file.source.into_bytes(),
            serve_path: Some(file.serve_path),
        }));

        self.cached_resources = Some(resources.clone());
        Ok(resources)
    }
}

/// Join a serve root and a slash-relative path into an absolute-style
/// served path.
pub fn join_serve_path(serve_root: &str, rel: &str) -> String {
    format!("{}/{}", serve_root.trim_end_matches('/'), rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{Library, LibraryOptions};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::TempDir;

    fn bare_slice(root: &std::path::Path, name: Option<&str>) -> Slice {
        Slice::new(
            1,
            name.map(|s| s.to_string()),
            root.to_path_buf(),
            match name {
                Some(n) => format!("/packages/{}", n),
                None => "/".to_string(),
            },
            BTreeMap::new(),
            MAIN_SLICE.to_string(),
            Arch::Server,
        )
    }

    fn empty_library() -> Library {
        Library::new(LibraryOptions::default())
    }

    #[test]
    fn test_slice_spec_parse() {
        assert_eq!(
            SliceSpec::parse("livedata"),
            SliceSpec {
                package: "livedata".to_string(),
                slice: None
            }
        );
        assert_eq!(
            SliceSpec::parse("livedata.tests"),
            SliceSpec {
                package: "livedata".to_string(),
                slice: Some("tests".to_string())
            }
        );
        assert_eq!(SliceSpec::parse("livedata.tests").to_string(), "livedata.tests");
    }

    #[test]
    fn test_join_serve_path() {
        assert_eq!(join_serve_path("/", "client/a.js"), "/client/a.js");
        assert_eq!(
            join_serve_path("/packages/p", "lib/a.js"),
            "/packages/p/lib/a.js"
        );
    }

    #[test]
    fn test_compile_latches_and_is_idempotent() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.js"), "// @export Foo\nvar Foo = 1;\n").unwrap();

        let mut slice = bare_slice(temp.path(), Some("p"));
        slice.sources.push(PathBuf::from("a.js"));

        let library = empty_library();
        slice.compile(&library).unwrap();
        assert!(slice.is_compiled());
        let exports_first = slice.exports().unwrap().to_vec();
        let boundary_first = match &slice.state {
            CompileState::Compiled(c) => c.boundary.clone(),
            _ => unreachable!(),
        };

        // Second compile is a no-op on the same output.
        slice.compile(&library).unwrap();
        assert_eq!(slice.exports().unwrap(), exports_first.as_slice());
        match &slice.state {
            CompileState::Compiled(c) => assert_eq!(c.boundary, boundary_first),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_sealed_after_compile() {
        let temp = TempDir::new().unwrap();
        let mut slice = bare_slice(temp.path(), Some("p"));
        slice.compile(&empty_library()).unwrap();

        let err = slice.add_source("late.js").unwrap_err();
        assert!(matches!(err, PackageError::SliceSealed { .. }));
    }

    #[test]
    fn test_unhandled_extension_becomes_static_resource() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("font.woff"), b"\x00\x01").unwrap();

        let mut slice = bare_slice(temp.path(), Some("p"));
        slice.sources.push(PathBuf::from("font.woff"));

        let library = empty_library();
        let resources = slice.resources(&library).unwrap();
        let stat = resources
            .iter()
            .find(|r| r.kind == ResourceKind::Static)
            .unwrap();
        assert_eq!(stat.serve_path.as_deref(), Some("/packages/p/font.woff"));
        assert_eq!(stat.data, b"\x00\x01");
    }

    #[test]
    fn test_dependency_info_records_every_source_read() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.js"), "var a;\n").unwrap();
        fs::write(temp.path().join("b.css"), "body {}\n").unwrap();

        let mut slice = bare_slice(temp.path(), Some("p"));
        slice.sources.push(PathBuf::from("a.js"));
        slice.sources.push(PathBuf::from("b.css"));
        slice.compile(&empty_library()).unwrap();

        let files = &slice.dependency_info().files;
        assert_eq!(files.len(), 2);
        assert!(files.contains_key(&temp.path().join("a.js")));
        assert!(files.contains_key(&temp.path().join("b.css")));
    }

    #[test]
    fn test_html_sources_emit_before_js() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("z.js"), "var z;\n").unwrap();
        fs::write(temp.path().join("a.html"), "<body><p>a</p></body>").unwrap();

        let mut slice = bare_slice(temp.path(), Some("p"));
        slice.sources.push(PathBuf::from("z.js"));
        slice.sources.push(PathBuf::from("a.html"));
        slice.compile(&empty_library()).unwrap();

        // The body segment was produced even though z.js was listed first.
        match &slice.state {
            CompileState::Compiled(c) => {
                assert_eq!(c.resources[0].kind, ResourceKind::Body);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_app_slice_resources_keep_sources_unwrapped() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.js"), "var x = 1;\n").unwrap();

        let mut slice = bare_slice(temp.path(), None);
        slice.sources.push(PathBuf::from("a.js"));

        let library = empty_library();
        let resources = slice.resources(&library).unwrap();
        let js: Vec<_> = resources
            .iter()
            .filter(|r| r.kind == ResourceKind::Js)
            .collect();
        // No imports, so the global-imports stub is dropped.
        assert_eq!(js.len(), 1);
        assert_eq!(js[0].serve_path.as_deref(), Some("/a.js"));
        assert_eq!(js[0].data, b"var x = 1;\n");
    }

    #[test]
    fn test_package_slice_resources_wrap_and_register_namespace() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.js"), "// @export Foo\nvar Foo = {};\n").unwrap();

        let mut slice = bare_slice(temp.path(), Some("p"));
        slice.sources.push(PathBuf::from("a.js"));

        let resources = slice.resources(&empty_library()).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].serve_path.as_deref(), Some("/packages/p.js"));
        let text = String::from_utf8(resources[0].data.clone()).unwrap();
        assert!(text.contains("Package['p'] = {Foo: Foo};"));
        assert!(!text.contains("__imports_"));
    }
}
