//! Two-phase symbol linker for package bundles
//!
//! Packages are compiled independently of the set of siblings they will be
//! bundled with, so linking happens in two phases:
//!
//! 1. [`prelink`] depends only on a package's own sources. It scopes the
//!    package's top-level declarations, discovers the exported symbol set,
//!    and embeds an opaque [boundary](PrelinkOutput::boundary) marker at the
//!    position where imports will later be spliced. Its output is cacheable
//!    across bundles.
//! 2. [`link`] runs once the concrete dependency set for a bundle is known.
//!    It replaces every occurrence of the boundary with a generated prelude
//!    binding each imported symbol to the providing package's namespace.

pub mod boundary;
pub mod link;
pub mod prelink;

pub use boundary::derive_boundary;
pub use link::{link, LinkOptions};
pub use prelink::{prelink, PrelinkOptions, PrelinkOutput};

use thiserror::Error;

/// Linker errors
#[derive(Debug, Error, PartialEq)]
pub enum LinkerError {
    #[error("no prelinked fragment contains the import boundary marker")]
    MissingBoundary,

    #[error("link invoked with an empty boundary marker")]
    EmptyBoundary,

    #[error("fragment has an empty serve path")]
    EmptyServePath,
}

pub type Result<T> = std::result::Result<T, LinkerError>;

/// A code fragment addressed by the path it will be served under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkFile {
    pub source: String,
    pub serve_path: String,
}

impl LinkFile {
    pub fn new(source: impl Into<String>, serve_path: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            serve_path: serve_path.into(),
        }
    }
}
