//! Bundle orchestration
//!
//! Turns an application directory plus a package library into a deployable
//! bundle: expands the dependency graph, orders slices, compiles and links
//! them, optionally minifies the client side, and writes the output
//! atomically with a content-addressed manifest and watch metadata for an
//! external file watcher.

pub mod bundle;
pub mod load_order;
pub mod manifest;
pub mod minify;
pub mod templates;
pub mod writer;

pub use bundle::{bundle, Bundle, BundleOptions, BundleOutcome, NodeModulesMode};
pub use load_order::{determine_load_order, SliceHandle};
pub use manifest::{AppManifest, ManifestEntry};
pub use minify::{Minifier, PassthroughMinifier};

use std::path::PathBuf;
use thiserror::Error;

/// Bundle-layer errors
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("circular dependency between {a} and {b}")]
    DependencyCycle { a: String, b: String },

    #[error("'{kind}' resource from {slice} is only valid on the client")]
    NonClientResource { kind: String, slice: String },

    #[error("resource from {slice} has no serve path")]
    MissingServePath { slice: String },

    #[error("missing required option: {0}")]
    MissingOption(&'static str),

    #[error("I/O error at {path}: {error}")]
    Io {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error(transparent)]
    Package(#[from] meteor_package::PackageError),

    #[error("failed to serialize manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl BundleError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            error,
        }
    }
}

pub type Result<T> = std::result::Result<T, BundleError>;
