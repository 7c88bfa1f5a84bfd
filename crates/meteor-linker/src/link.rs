//! Phase 2: splicing the per-bundle import prelude
//!
//! Runs once the bundle's concrete dependency set is known. Symbol
//! precedence (later dependency wins) is resolved by the caller when it
//! builds the import map; this phase only formats and splices.

use crate::{LinkFile, LinkerError, Result};

/// Inputs to [`link`].
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// symbol → providing package name, already precedence-resolved.
    pub imports: Vec<(String, String)>,
    /// Application mode: bind imports on the global namespace.
    pub use_global_namespace: bool,
    /// Fragments from [`crate::prelink`].
    pub prelink_files: Vec<LinkFile>,
    /// Boundary marker from the same prelink invocation.
    pub boundary: String,
}

pub fn link(options: LinkOptions) -> Result<Vec<LinkFile>> {
    if options.boundary.is_empty() {
        return Err(LinkerError::EmptyBoundary);
    }
    if options.prelink_files.is_empty() {
        return Ok(Vec::new());
    }
    if !options
        .prelink_files
        .iter()
        .any(|f| f.source.contains(&options.boundary))
    {
        return Err(LinkerError::MissingBoundary);
    }

    let prelude = import_prelude(&options.imports, options.use_global_namespace);

    Ok(options
        .prelink_files
        .into_iter()
        .filter(|file| {
            // An import stub that would carry no imports serves no purpose;
            // drop it rather than shipping an empty file.
            !(options.imports.is_empty() && file.source.trim() == options.boundary)
        })
        .map(|file| LinkFile {
            source: file.source.replace(&options.boundary, &prelude),
            serve_path: file.serve_path,
        })
        .collect())
}

/// One binding line per imported symbol. In namespaced mode the binding is a
/// closure-local `var`; in application mode it is a bare assignment so the
/// symbol lands on the global namespace.
fn import_prelude(imports: &[(String, String)], use_global_namespace: bool) -> String {
    if imports.is_empty() {
        return "/* imports */".to_string();
    }

    let mut prelude = String::from("/* imports */\n");
    for (symbol, package) in imports {
        if use_global_namespace {
            prelude.push_str(&format!("{} = Package['{}'].{};\n", symbol, package, symbol));
        } else {
            prelude.push_str(&format!(
                "var {} = Package['{}'].{};\n",
                symbol, package, symbol
            ));
        }
    }
    // Drop the trailing newline so the splice reads like a block.
    prelude.pop();
    prelude
}
