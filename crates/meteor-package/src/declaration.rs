//! Package declarations (`package.toml`)
//!
//! A package directory describes itself declaratively. The declaration is
//! applied through three closed interfaces, so everything a declaration can
//! do is enumerable: [`PackageConfig`] (metadata and extension
//! registration), [`ModuleDeps`] (third-party module pins), and one
//! [`SliceBuilder`] per role (dependency edges, sources, exports).
//!
//! ```toml
//! [package]
//! summary = "Reactive data transport"
//!
//! [extensions]
//! less = "css"
//!
//! [modules]
//! connect = "1.8.7"
//!
//! [use]
//! use = [{ packages = ["logging"], where = ["server"], unordered = true }]
//! files = [{ paths = ["lib/stream.js"] }]
//! exports = [{ symbols = ["Stream"] }]
//! ```

use crate::extensions::HandlerKind;
use crate::slice::{SliceSpec, UseEdge};
use crate::{Arch, PackageError, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Declaration file name inside a package directory.
pub const DECLARATION_FILE: &str = "package.toml";

/// Raw `package.toml` contents.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Declaration {
    #[serde(default)]
    pub package: MetadataSection,
    #[serde(default)]
    pub extensions: BTreeMap<String, String>,
    #[serde(default)]
    pub modules: Option<BTreeMap<String, String>>,
    #[serde(default, rename = "use")]
    pub use_role: Option<RoleSection>,
    #[serde(default)]
    pub test: Option<RoleSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetadataSection {
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub internal: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleSection {
    #[serde(default, rename = "use")]
    pub uses: Vec<UseEntry>,
    #[serde(default)]
    pub files: Vec<FileEntry>,
    #[serde(default)]
    pub exports: Vec<ExportEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UseEntry {
    pub packages: Vec<String>,
    #[serde(default, rename = "where")]
    pub archs: Option<Vec<String>>,
    #[serde(default)]
    pub unordered: bool,
    /// Only `"use"` is accepted; targeting another role is rejected.
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileEntry {
    pub paths: Vec<PathBuf>,
    #[serde(default, rename = "where")]
    pub archs: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExportEntry {
    pub symbols: Vec<String>,
    #[serde(default, rename = "where")]
    pub archs: Option<Vec<String>>,
}

impl Declaration {
    pub fn parse(contents: &str, path: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|error| PackageError::DeclarationParse {
            path: path.to_path_buf(),
            error: error.to_string(),
        })
    }
}

/// Parse a `where` list; absent means both archs.
fn parse_archs(archs: &Option<Vec<String>>) -> Result<Vec<Arch>> {
    match archs {
        None => Ok(Arch::ALL.to_vec()),
        Some(names) => names
            .iter()
            .map(|name| {
                Arch::parse(name).ok_or_else(|| PackageError::UnknownArch(name.clone()))
            })
            .collect(),
    }
}

/// Package-level configuration capability: metadata and extension
/// registration.
#[derive(Debug, Default)]
pub struct PackageConfig {
    pub summary: Option<String>,
    pub internal: bool,
    pub extensions: BTreeMap<String, HandlerKind>,
}

impl PackageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn describe(&mut self, summary: Option<String>, internal: bool) {
        self.summary = summary;
        self.internal = internal;
    }

    /// Bind an extension (no leading dot) to a handler kind.
    pub fn register_extension(&mut self, ext: &str, kind: &str) -> Result<()> {
        let kind = HandlerKind::parse(kind).ok_or_else(|| PackageError::UnknownHandlerKind {
            ext: ext.to_string(),
            kind: kind.to_string(),
        })?;
        self.extensions.insert(ext.to_string(), kind);
        Ok(())
    }
}

/// Third-party module capability. Versions must be exact; `depends` may be
/// called at most once.
#[derive(Debug, Default)]
pub struct ModuleDeps {
    declared: Option<BTreeMap<String, String>>,
}

impl ModuleDeps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn depends(&mut self, modules: &BTreeMap<String, String>) -> Result<()> {
        if self.declared.is_some() {
            return Err(PackageError::DuplicateModuleDeps);
        }
        for (module, version) in modules {
            if semver::Version::parse(version).is_err() {
                return Err(PackageError::FuzzyVersion {
                    module: module.clone(),
                    version: version.clone(),
                });
            }
        }
        self.declared = Some(modules.clone());
        Ok(())
    }

    pub fn into_declared(self) -> Option<BTreeMap<String, String>> {
        self.declared
    }

    /// Resolve a declared module inside the package's local module
    /// directory, falling back to an ambient module root if given.
    pub fn resolve(
        &self,
        name: &str,
        local_dir: &Path,
        ambient_dir: Option<&Path>,
    ) -> Option<PathBuf> {
        let local = local_dir.join("node_modules").join(name);
        if local.exists() {
            return Some(local);
        }
        let ambient = ambient_dir?.join(name);
        ambient.exists().then_some(ambient)
    }
}

/// Per-role slice-building capability: dependency edges, source files, and
/// forced exports, each scoped to a set of archs.
#[derive(Debug, Default)]
pub struct SliceBuilder {
    pub uses: BTreeMap<Arch, Vec<UseEdge>>,
    pub sources: BTreeMap<Arch, Vec<PathBuf>>,
    pub exports: BTreeMap<Arch, Vec<String>>,
}

impl SliceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append dependency edges for the given archs. Only role `use` may be
    /// targeted from a declaration.
    pub fn use_packages(
        &mut self,
        names: &[String],
        archs: &[Arch],
        unordered: bool,
        role: Option<&str>,
    ) -> Result<()> {
        if let Some(role) = role {
            if role != "use" {
                return Err(PackageError::InvalidRoleOverride {
                    role: role.to_string(),
                });
            }
        }
        for arch in archs {
            let edges = self.uses.entry(*arch).or_default();
            for name in names {
                edges.push(UseEdge {
                    spec: SliceSpec::parse(name),
                    unordered,
                });
            }
        }
        Ok(())
    }

    /// Append source paths (relative to the package root) for the archs.
    pub fn add_files(&mut self, paths: &[PathBuf], archs: &[Arch]) {
        for arch in archs {
            self.sources
                .entry(*arch)
                .or_default()
                .extend(paths.iter().cloned());
        }
    }

    /// Export symbols unconditionally for the archs.
    pub fn export_symbol(&mut self, symbols: &[String], archs: &[Arch]) {
        for arch in archs {
            let exports = self.exports.entry(*arch).or_default();
            for symbol in symbols {
                if !exports.contains(symbol) {
                    exports.push(symbol.clone());
                }
            }
        }
    }
}

/// The result of applying a declaration through the capability interfaces.
#[derive(Debug)]
pub struct AppliedDeclaration {
    pub config: PackageConfig,
    pub module_deps: Option<BTreeMap<String, String>>,
    pub use_role: SliceBuilder,
    pub test_role: SliceBuilder,
}

/// Apply a parsed declaration. All eager validation happens here: unknown
/// handler kinds, fuzzy module versions, role overrides.
pub fn apply(declaration: &Declaration) -> Result<AppliedDeclaration> {
    let mut config = PackageConfig::new();
    config.describe(
        declaration.package.summary.clone(),
        declaration.package.internal,
    );
    for (ext, kind) in &declaration.extensions {
        config.register_extension(ext, kind)?;
    }

    let mut module_deps = ModuleDeps::new();
    if let Some(modules) = &declaration.modules {
        module_deps.depends(modules)?;
    }

    let mut roles = [SliceBuilder::new(), SliceBuilder::new()];
    let sections = [&declaration.use_role, &declaration.test];
    for (builder, section) in roles.iter_mut().zip(sections) {
        let Some(section) = section else { continue };
        for entry in &section.uses {
            let archs = parse_archs(&entry.archs)?;
            builder.use_packages(
                &entry.packages,
                &archs,
                entry.unordered,
                entry.role.as_deref(),
            )?;
        }
        for entry in &section.files {
            builder.add_files(&entry.paths, &parse_archs(&entry.archs)?);
        }
        for entry in &section.exports {
            builder.export_symbol(&entry.symbols, &parse_archs(&entry.archs)?);
        }
    }
    let [use_role, test_role] = roles;

    Ok(AppliedDeclaration {
        config,
        module_deps: module_deps.into_declared(),
        use_role,
        test_role,
    })
}
