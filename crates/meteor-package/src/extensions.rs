//! Extension handler registration and composition
//!
//! Every slice compiles its sources through a handler map keyed by file
//! extension. The bundler owns three built-in handlers; packages map further
//! extensions onto them in their declarations. The effective map for a slice
//! is the union of the built-ins, the slice's own package's registrations,
//! and those of every direct dependency package.

use crate::slice::{Resource, ResourceKind};
use crate::{Arch, PackageError, Result};
use std::collections::BTreeMap;

/// Provider name used for the bundler's own handlers.
pub const BUILTIN_PROVIDER: &str = "(builtin)";

/// The handler behaviors a package may bind an extension to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Emit the file as a js fragment feeding the linker.
    Js,
    /// Emit the file as a stylesheet.
    Css,
    /// Split the file's `<head>` and `<body>` sections into document
    /// segments.
    Html,
}

impl HandlerKind {
    pub fn parse(s: &str) -> Option<HandlerKind> {
        match s {
            "js" => Some(HandlerKind::Js),
            "css" => Some(HandlerKind::Css),
            "html" => Some(HandlerKind::Html),
            _ => None,
        }
    }

    /// The extensions the bundler handles without any registration.
    pub fn builtins() -> [(&'static str, HandlerKind); 3] {
        [
            ("js", HandlerKind::Js),
            ("css", HandlerKind::Css),
            ("html", HandlerKind::Html),
        ]
    }
}

/// A handler registration together with the package that made it.
#[derive(Debug, Clone)]
struct Registration {
    kind: HandlerKind,
    provider: String,
}

/// Everything a handler gets to see about the file it is compiling.
pub struct HandlerInput<'a> {
    pub contents: &'a [u8],
    pub serve_path: String,
    pub arch: Arch,
}

/// Effective extension → handler map for one slice.
#[derive(Debug, Clone)]
pub struct ExtensionRegistry {
    registrations: BTreeMap<String, Registration>,
}

impl ExtensionRegistry {
    /// Start from the built-in handlers.
    pub fn new() -> Self {
        let mut registrations = BTreeMap::new();
        for (ext, kind) in HandlerKind::builtins() {
            registrations.insert(
                ext.to_string(),
                Registration {
                    kind,
                    provider: BUILTIN_PROVIDER.to_string(),
                },
            );
        }
        Self { registrations }
    }

    /// Merge one package's registrations. Two distinct providers claiming
    /// the same extension is fatal; seeing the same provider again (a
    /// package reachable through several uses edges) is not.
    pub fn merge(
        &mut self,
        provider: &str,
        extensions: &BTreeMap<String, HandlerKind>,
    ) -> Result<()> {
        for (ext, kind) in extensions {
            match self.registrations.get(ext) {
                Some(existing) if existing.provider == provider => {}
                Some(existing) => {
                    return Err(PackageError::ExtensionConflict {
                        ext: ext.clone(),
                        first: existing.provider.clone(),
                        second: provider.to_string(),
                    });
                }
                None => {
                    self.registrations.insert(
                        ext.clone(),
                        Registration {
                            kind: *kind,
                            provider: provider.to_string(),
                        },
                    );
                }
            }
        }
        Ok(())
    }

    /// Look up the handler for an extension (no leading dot).
    pub fn handler(&self, ext: &str) -> Option<HandlerKind> {
        self.registrations.get(ext).map(|r| r.kind)
    }

    /// All recognized extensions, for source scanning and watch patterns.
    pub fn extensions(&self) -> Vec<String> {
        self.registrations.keys().cloned().collect()
    }
}

impl Default for ExtensionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run a handler over one source file, emitting resources into the sink.
/// The sink is only valid for the duration of this call.
pub fn run_handler(
    kind: HandlerKind,
    input: HandlerInput<'_>,
    add_resource: &mut dyn FnMut(Resource),
) {
    match kind {
        HandlerKind::Js => add_resource(Resource {
            kind: ResourceKind::Js,
            data: input.contents.to_vec(),
            serve_path: Some(input.serve_path),
        }),
        HandlerKind::Css => add_resource(Resource {
            kind: ResourceKind::Css,
            data: input.contents.to_vec(),
            serve_path: Some(input.serve_path),
        }),
        HandlerKind::Html => {
            let text = String::from_utf8_lossy(input.contents);
            if let Some(head) = section(&text, "head") {
                add_resource(Resource {
                    kind: ResourceKind::Head,
                    data: head.into_bytes(),
                    serve_path: None,
                });
            }
            if let Some(body) = section(&text, "body") {
                add_resource(Resource {
                    kind: ResourceKind::Body,
                    data: body.into_bytes(),
                    serve_path: None,
                });
            }
        }
    }
}

/// Extract the contents of `<tag>…</tag>`, if present.
fn section(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)? + start;
    Some(text[start..end].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(kind: HandlerKind, contents: &[u8]) -> Vec<Resource> {
        let mut resources = Vec::new();
        run_handler(
            kind,
            HandlerInput {
                contents,
                serve_path: "/a".to_string(),
                arch: Arch::Client,
            },
            &mut |r| resources.push(r),
        );
        resources
    }

    #[test]
    fn test_registry_has_builtins() {
        let registry = ExtensionRegistry::new();
        assert_eq!(registry.handler("js"), Some(HandlerKind::Js));
        assert_eq!(registry.handler("css"), Some(HandlerKind::Css));
        assert_eq!(registry.handler("html"), Some(HandlerKind::Html));
        assert_eq!(registry.handler("png"), None);
    }

    #[test]
    fn test_merge_conflict_names_both_providers() {
        let mut registry = ExtensionRegistry::new();
        let less: BTreeMap<String, HandlerKind> =
            [("less".to_string(), HandlerKind::Css)].into_iter().collect();

        registry.merge("x", &less).unwrap();
        let err = registry.merge("y", &less).unwrap_err();
        match err {
            PackageError::ExtensionConflict { ext, first, second } => {
                assert_eq!(ext, "less");
                assert_eq!(first, "x");
                assert_eq!(second, "y");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_same_provider_twice_is_fine() {
        let mut registry = ExtensionRegistry::new();
        let less: BTreeMap<String, HandlerKind> =
            [("less".to_string(), HandlerKind::Css)].into_iter().collect();

        registry.merge("x", &less).unwrap();
        registry.merge("x", &less).unwrap();
        assert_eq!(registry.handler("less"), Some(HandlerKind::Css));
    }

    #[test]
    fn test_builtin_extensions_cannot_be_claimed() {
        let mut registry = ExtensionRegistry::new();
        let js: BTreeMap<String, HandlerKind> =
            [("js".to_string(), HandlerKind::Js)].into_iter().collect();

        let err = registry.merge("x", &js).unwrap_err();
        assert!(matches!(err, PackageError::ExtensionConflict { .. }));
    }

    #[test]
    fn test_js_handler_passes_through() {
        let resources = collect(HandlerKind::Js, b"var a = 1;\n");
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind, ResourceKind::Js);
        assert_eq!(resources[0].serve_path.as_deref(), Some("/a"));
        assert_eq!(resources[0].data, b"var a = 1;\n");
    }

    #[test]
    fn test_html_handler_splits_head_and_body() {
        let resources = collect(
            HandlerKind::Html,
            b"<head><title>t</title></head>\n<body><p>hi</p></body>\n",
        );
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind, ResourceKind::Head);
        assert_eq!(resources[0].data, b"<title>t</title>");
        assert_eq!(resources[1].kind, ResourceKind::Body);
        assert_eq!(resources[1].data, b"<p>hi</p>");
        assert_eq!(resources[0].serve_path, None);
    }

    #[test]
    fn test_html_handler_without_sections_emits_nothing() {
        let resources = collect(HandlerKind::Html, b"<div>loose</div>");
        assert!(resources.is_empty());
    }
}
