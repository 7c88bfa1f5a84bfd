//! Bundle output
//!
//! Everything is staged into a sibling `.build.<name>` directory and
//! renamed over the final path in one step, so a bundle either exists
//! completely or not at all.

use crate::bundle::{Bundle, BundleOptions, NodeModulesMode};
use crate::manifest::{AppManifest, ManifestEntry, WHERE_CLIENT, WHERE_INTERNAL};
use crate::templates;
use crate::{BundleError, Result};
use meteor_package::Arch;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Write the staged bundle to `output_path` atomically.
pub fn write_to_directory(
    bundle: &Bundle,
    output_path: &Path,
    options: &BundleOptions,
) -> Result<()> {
    let base = output_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "bundle".to_string());
    let build_dir = output_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!(".build.{}", base));

    if build_dir.exists() {
        fs::remove_dir_all(&build_dir).map_err(|e| BundleError::io(&build_dir, e))?;
    }

    let result = populate(bundle, &build_dir, options);
    if result.is_err() {
        let _ = fs::remove_dir_all(&build_dir);
        return result;
    }

    let finish = || -> Result<()> {
        if output_path.exists() {
            fs::remove_dir_all(output_path).map_err(|e| BundleError::io(output_path, e))?;
        }
        fs::rename(&build_dir, output_path).map_err(|e| BundleError::io(output_path, e))
    };
    if let Err(error) = finish() {
        let _ = fs::remove_dir_all(&build_dir);
        return Err(error);
    }
    info!(out = %output_path.display(), "bundle written");
    Ok(())
}

fn populate(bundle: &Bundle, build_dir: &Path, options: &BundleOptions) -> Result<()> {
    write_file(&build_dir.join("main.js"), templates::MAIN_JS.as_bytes())?;
    write_file(&build_dir.join("README"), templates::README.as_bytes())?;
    write_file(
        &build_dir.join("server/server.js"),
        templates::SERVER_JS.as_bytes(),
    )?;

    let mut manifest = Vec::new();

    // Client files: non-cacheable under static/, hash-named under
    // static_cacheable/. Emission order carries into the manifest, with
    // the cacheable outputs (appended during minification) last.
    for serve_path in &bundle.order[&Arch::Client] {
        let file = &bundle.files[&Arch::Client][serve_path];
        let rel = serve_path.trim_start_matches('/');
        let bundle_path = if file.cacheable {
            format!("static_cacheable/{}", rel)
        } else {
            format!("static/{}", rel)
        };
        write_file(&build_dir.join(&bundle_path), &file.data)?;
        manifest.push(ManifestEntry {
            path: bundle_path,
            where_: WHERE_CLIENT.to_string(),
            type_: file.kind.as_str().to_string(),
            cacheable: file.cacheable,
            url: Some(bundle.client_url(serve_path)),
            size: file.data.len() as u64,
            hash: Some(file.hash.clone()),
        });
    }

    // Server program: every server file lands under app/, js and data
    // alike. Only js enters the load list, in script load order.
    for serve_path in &bundle.order[&Arch::Server] {
        let file = &bundle.files[&Arch::Server][serve_path];
        let bundle_path = format!("app/{}", serve_path.trim_start_matches('/'));
        write_file(&build_dir.join(&bundle_path), &file.data)?;
        manifest.push(ManifestEntry {
            path: bundle_path,
            where_: WHERE_INTERNAL.to_string(),
            type_: file.kind.as_str().to_string(),
            cacheable: false,
            url: None,
            size: file.data.len() as u64,
            hash: Some(file.hash.clone()),
        });
    }
    let load: Vec<String> = bundle.js_load[&Arch::Server]
        .iter()
        .map(|serve_path| format!("app/{}", serve_path.trim_start_matches('/')))
        .collect();

    write_app_html(bundle, build_dir)?;

    let app_manifest = AppManifest {
        load,
        manifest,
        release: options_release(options),
    };
    write_file(
        &build_dir.join("app.json"),
        app_manifest.to_json()?.as_bytes(),
    )?;

    write_package_modules(bundle, build_dir)?;
    write_server_modules(build_dir, options)?;

    Ok(())
}

fn options_release(options: &BundleOptions) -> Option<String> {
    options
        .release_stamp
        .as_deref()
        .filter(|stamp| *stamp != "none")
        .map(str::to_string)
}

fn write_app_html(bundle: &Bundle, build_dir: &Path) -> Result<()> {
    let scripts = bundle.js_load[&Arch::Client]
        .iter()
        .map(|path| {
            format!(
                "  <script type=\"text/javascript\" src=\"{}\"></script>",
                bundle.client_url(path)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    let stylesheets = bundle
        .css_load
        .iter()
        .map(|path| format!("  <link rel=\"stylesheet\" href=\"{}\">", bundle.client_url(path)))
        .collect::<Vec<_>>()
        .join("\n");

    let html = templates::render(
        templates::APP_HTML_IN,
        &[
            ("stylesheets", stylesheets.as_str()),
            ("scripts", scripts.as_str()),
            ("head", bundle.head_sections.join("\n").as_str()),
            ("body", bundle.body_sections.join("\n").as_str()),
        ],
    );
    write_file(&build_dir.join("app.html"), html.as_bytes())
}

/// Each package's third-party modules travel with the bundle under
/// `npm/<package>/node_modules`.
fn write_package_modules(bundle: &Bundle, build_dir: &Path) -> Result<()> {
    for package in bundle.packages() {
        let Some(name) = package.name() else { continue };
        if package.module_deps().is_none() {
            continue;
        }
        let source = package.module_dir().join("node_modules");
        if !source.is_dir() {
            continue;
        }
        let dest = build_dir.join("npm").join(name).join("node_modules");
        debug!(package = name, "copying third-party modules");
        copy_dir(&source, &dest)?;
    }
    Ok(())
}

fn write_server_modules(build_dir: &Path, options: &BundleOptions) -> Result<()> {
    let dest = build_dir.join("server/node_modules");
    match options.node_modules_mode {
        NodeModulesMode::Skip => Ok(()),
        NodeModulesMode::Copy => {
            let source = options
                .server_modules_dir
                .as_deref()
                .ok_or(BundleError::MissingOption("server modules directory"))?;
            copy_dir(source, &dest)
        }
        NodeModulesMode::Symlink => {
            let source = options
                .server_modules_dir
                .as_deref()
                .ok_or(BundleError::MissingOption("server modules directory"))?;
            symlink_dir(source, &dest)
        }
    }
}

#[cfg(unix)]
fn symlink_dir(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
    }
    std::os::unix::fs::symlink(source, dest).map_err(|e| BundleError::io(dest, e))
}

#[cfg(not(unix))]
fn symlink_dir(source: &Path, dest: &Path) -> Result<()> {
    copy_dir(source, dest)
}

fn copy_dir(source: &Path, dest: &Path) -> Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(|e| BundleError::io(source, e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .expect("walkdir yields paths under its root");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| BundleError::io(&target, e))?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
            }
            fs::copy(entry.path(), &target).map_err(|e| BundleError::io(&target, e))?;
        }
    }
    Ok(())
}

fn write_file(path: &PathBuf, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BundleError::io(parent, e))?;
    }
    fs::write(path, data).map_err(|e| BundleError::io(path, e))
}
