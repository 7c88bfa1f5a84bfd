//! Phase 1: package-local linking
//!
//! Transforms a package's fragments without knowing which sibling packages
//! the final bundle will contain.

use crate::boundary::derive_boundary;
use crate::{LinkFile, LinkerError, Result};

/// Inputs to [`prelink`].
#[derive(Debug, Clone)]
pub struct PrelinkOptions {
    /// Ordered fragments produced by the extension handlers.
    pub inputs: Vec<LinkFile>,
    /// Logical package name; `None` for an application pseudo-package.
    pub package_name: Option<String>,
    /// Symbols exported unconditionally, beyond any `@export` directives.
    pub force_export: Vec<String>,
    /// Application mode: leave declarations on the shared global namespace.
    pub use_global_namespace: bool,
    /// Serve path of the combined fragment in namespaced mode.
    pub combined_serve_path: String,
    /// Serve path of the import stub emitted in application mode.
    pub import_stub_serve_path: String,
}

/// Output of [`prelink`].
#[derive(Debug, Clone)]
pub struct PrelinkOutput {
    /// Partially-linked fragments, each containing the boundary marker
    /// exactly where [`crate::link`] will splice the import prelude.
    pub files: Vec<LinkFile>,
    /// Opaque marker unique to this invocation.
    pub boundary: String,
    /// Discovered exported symbols (directives plus force-exports), in
    /// declaration order, deduplicated.
    pub exports: Vec<String>,
}

/// Export directive recognized in handler output, e.g. `// @export Foo, Bar`.
const EXPORT_DIRECTIVE: &str = "// @export ";

pub fn prelink(options: PrelinkOptions) -> Result<PrelinkOutput> {
    for file in &options.inputs {
        if file.serve_path.is_empty() {
            return Err(LinkerError::EmptyServePath);
        }
    }

    let boundary = derive_boundary(options.inputs.iter().map(|f| f.source.as_str()));

    if options.use_global_namespace {
        // Application mode: sources stay on the global namespace untouched.
        // Imports are spliced into a dedicated stub so app code can see
        // package exports without being rewritten itself. Apps provide no
        // exports of their own.
        let mut files = Vec::with_capacity(options.inputs.len() + 1);
        files.push(LinkFile::new(
            format!("{}\n", boundary),
            options.import_stub_serve_path.clone(),
        ));
        files.extend(options.inputs);

        return Ok(PrelinkOutput {
            files,
            boundary,
            exports: Vec::new(),
        });
    }

    // Namespaced mode: combine all fragments into a single closure so
    // top-level declarations are scoped to the package, then publish the
    // exported subset on the package's namespace object.
    let exports = collect_exports(&options.inputs, &options.force_export);
    let package_name = options.package_name.as_deref().unwrap_or("");

    // A package with no js produces no fragment at all.
    if options.inputs.is_empty() {
        return Ok(PrelinkOutput {
            files: Vec::new(),
            boundary,
            exports,
        });
    }

    let mut combined = String::new();
    combined.push_str("(function () {\n\n");
    combined.push_str(&boundary);
    combined.push_str("\n\n");

    for file in &options.inputs {
        combined.push_str(&format!(
            "///////////////////////// {} /////////////////////////\n\n",
            file.serve_path
        ));
        combined.push_str(&file.source);
        if !file.source.ends_with('\n') {
            combined.push('\n');
        }
        combined.push('\n');
    }

    combined.push_str("/* exports */\n");
    combined.push_str(&format!(
        "Package['{}'] = {{{}}};\n",
        package_name,
        exports
            .iter()
            .map(|sym| format!("{}: {}", sym, sym))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    combined.push_str("\n})();\n");

    Ok(PrelinkOutput {
        files: vec![LinkFile::new(combined, options.combined_serve_path)],
        boundary,
        exports,
    })
}

/// Union of `@export` directives across the fragments and the force-export
/// list, preserving first-seen order.
fn collect_exports(inputs: &[LinkFile], force_export: &[String]) -> Vec<String> {
    let mut exports: Vec<String> = Vec::new();

    let mut push = |symbol: &str| {
        let symbol = symbol.trim();
        if !symbol.is_empty() && !exports.iter().any(|s| s == symbol) {
            exports.push(symbol.to_string());
        }
    };

    for file in inputs {
        for line in file.source.lines() {
            if let Some(rest) = line.trim_start().strip_prefix(EXPORT_DIRECTIVE) {
                for symbol in rest.split(',') {
                    push(symbol);
                }
            }
        }
    }
    for symbol in force_export {
        push(symbol);
    }

    exports
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn package_options(inputs: Vec<LinkFile>) -> PrelinkOptions {
        PrelinkOptions {
            inputs,
            package_name: Some("demo".to_string()),
            force_export: Vec::new(),
            use_global_namespace: false,
            combined_serve_path: "/packages/demo.js".to_string(),
            import_stub_serve_path: "/packages/global-imports.js".to_string(),
        }
    }

    #[test]
    fn test_package_mode_combines_into_single_fragment() {
        let output = prelink(package_options(vec![
            LinkFile::new("var a = 1;\n", "/packages/demo/a.js"),
            LinkFile::new("var b = 2;\n", "/packages/demo/b.js"),
        ]))
        .unwrap();

        assert_eq!(output.files.len(), 1);
        assert_eq!(output.files[0].serve_path, "/packages/demo.js");
        let source = &output.files[0].source;
        assert!(source.contains(&output.boundary));
        assert!(source.contains("var a = 1;"));
        assert!(source.contains("var b = 2;"));
        // a.js banner precedes b.js banner
        let a = source.find("/packages/demo/a.js").unwrap();
        let b = source.find("/packages/demo/b.js").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_package_mode_publishes_exports() {
        let output = prelink(package_options(vec![LinkFile::new(
            "// @export Foo, Bar\nvar Foo = {}, Bar = {};\n",
            "/packages/demo/main.js",
        )]))
        .unwrap();

        assert_eq!(output.exports, vec!["Foo", "Bar"]);
        assert!(output.files[0]
            .source
            .contains("Package['demo'] = {Foo: Foo, Bar: Bar};"));
    }

    #[test]
    fn test_force_export_union_and_dedup() {
        let mut options = package_options(vec![LinkFile::new(
            "// @export Foo\n",
            "/packages/demo/main.js",
        )]);
        options.force_export = vec!["Foo".to_string(), "Baz".to_string()];
        let output = prelink(options).unwrap();
        assert_eq!(output.exports, vec!["Foo", "Baz"]);
    }

    #[test]
    fn test_package_mode_empty_exports_still_registers_namespace() {
        let output = prelink(package_options(vec![LinkFile::new(
            "var internal = 1;\n",
            "/packages/demo/main.js",
        )]))
        .unwrap();
        assert!(output.files[0].source.contains("Package['demo'] = {};"));
    }

    #[test]
    fn test_package_mode_without_js_emits_no_fragment() {
        let mut options = package_options(Vec::new());
        options.force_export = vec!["Forced".to_string()];
        let output = prelink(options).unwrap();
        assert!(output.files.is_empty());
        assert_eq!(output.exports, vec!["Forced"]);
    }

    #[test]
    fn test_app_mode_passes_sources_through_with_stub() {
        let options = PrelinkOptions {
            inputs: vec![LinkFile::new("var x = 1;\n", "/client/a.js")],
            package_name: None,
            force_export: Vec::new(),
            use_global_namespace: true,
            combined_serve_path: "/packages/.js".to_string(),
            import_stub_serve_path: "/packages/global-imports.js".to_string(),
        };
        let output = prelink(options).unwrap();

        assert_eq!(output.files.len(), 2);
        assert_eq!(output.files[0].serve_path, "/packages/global-imports.js");
        assert!(output.files[0].source.contains(&output.boundary));
        assert_eq!(output.files[1].source, "var x = 1;\n");
        assert!(output.exports.is_empty());
    }

    #[test]
    fn test_prelink_idempotent_for_identical_inputs() {
        let first = prelink(package_options(vec![LinkFile::new(
            "var a = 1;\n",
            "/packages/demo/a.js",
        )]))
        .unwrap();
        let second = prelink(package_options(vec![LinkFile::new(
            "var a = 1;\n",
            "/packages/demo/a.js",
        )]))
        .unwrap();
        assert_eq!(first.boundary, second.boundary);
        assert_eq!(first.files[0].source, second.files[0].source);
    }

    #[test]
    fn test_empty_serve_path_rejected() {
        let result = prelink(package_options(vec![LinkFile::new("var a;", "")]));
        assert_eq!(result.unwrap_err(), LinkerError::EmptyServePath);
    }
}
