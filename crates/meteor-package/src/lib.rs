//! Package model and compilation for the bundler
//!
//! Provides the units the bundler operates on:
//! - Package declarations (`package.toml`) applied through closed
//!   configuration interfaces
//! - [`Package`]s and their [`Slice`]s (the (package, slice, arch) compile
//!   units) with handler dispatch and prelinking
//! - The [`Library`] name-resolution service over configured package roots
//! - The deterministic [`SourceScanner`] used for application directories
//! - Watch metadata ([`DependencyInfo`]) handed to an external file watcher

pub mod declaration;
pub mod extensions;
pub mod library;
pub mod package;
pub mod project;
pub mod scanner;
pub mod slice;
pub mod watch;

pub use declaration::{Declaration, ModuleDeps, PackageConfig, SliceBuilder};
pub use extensions::{ExtensionRegistry, HandlerKind};
pub use library::{Library, LibraryOptions, ReleaseManifest};
pub use package::{Package, PackageMetadata, FRAMEWORK_PACKAGE};
pub use scanner::SourceScanner;
pub use slice::{Resource, ResourceKind, Slice, SliceSpec, UseEdge};
pub use watch::{DependencyInfo, DirectoryWatch};

use std::path::PathBuf;
use thiserror::Error;

/// Target environment a slice is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    Client,
    Server,
}

impl Arch {
    pub const ALL: [Arch; 2] = [Arch::Client, Arch::Server];

    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Client => "client",
            Arch::Server => "server",
        }
    }

    /// The opposite target environment.
    pub fn other(&self) -> Arch {
        match self {
            Arch::Client => Arch::Server,
            Arch::Server => Arch::Client,
        }
    }

    pub fn parse(s: &str) -> Option<Arch> {
        match s {
            "client" => Some(Arch::Client),
            "server" => Some(Arch::Server),
            _ => None,
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Purpose of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Use,
    Test,
}

/// Package-layer errors
#[derive(Debug, Error)]
pub enum PackageError {
    #[error("module '{module}' uses fuzzy version '{version}': exact versions required")]
    FuzzyVersion { module: String, version: String },

    #[error("module dependencies may only be declared once per package")]
    DuplicateModuleDeps,

    #[error("role '{role}' cannot be overridden here; only 'use' is permitted")]
    InvalidRoleOverride { role: String },

    #[error("unknown handler kind '{kind}' for extension '.{ext}'")]
    UnknownHandlerKind { ext: String, kind: String },

    #[error("extension '.{ext}' is provided by both {first} and {second}")]
    ExtensionConflict {
        ext: String,
        first: String,
        second: String,
    },

    #[error("unknown arch '{0}'")]
    UnknownArch(String),

    #[error("unknown package '{0}'")]
    UnknownPackage(String),

    #[error("package '{package}' has no slice '{slice}' for {arch}")]
    UnknownSlice {
        package: String,
        slice: String,
        arch: Arch,
    },

    #[error("slice '{slice}' of package '{package}' depends on itself while compiling")]
    CompileCycle { package: String, slice: String },

    #[error("slice '{slice}' cannot be modified after compilation")]
    SliceSealed { slice: String },

    #[error("source file {path} resolves outside the scan root {root}")]
    SourceOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("failed to parse {path}: {error}")]
    DeclarationParse { path: PathBuf, error: String },

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("linker error: {0}")]
    Linker(#[from] meteor_linker::LinkerError),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl PackageError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

pub type Result<T> = std::result::Result<T, PackageError>;
