//! Slice load-order computation
//!
//! Expands the root set transitively (uses edges always resolve to the
//! target package's default slices at the same arch) and topologically
//! sorts the slices so every dependency loads before its dependents.
//! Edges marked `unordered` pull their target into the bundle but impose
//! no ordering constraint.

use crate::{BundleError, Result};
use meteor_package::{Arch, Library, Package, Role};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

/// A slice selected for a bundle.
#[derive(Clone)]
pub struct SliceHandle {
    pub package: Rc<Package>,
    pub slice_name: String,
    pub arch: Arch,
}

impl SliceHandle {
    /// Qualified name for diagnostics: `name` or `name.slice`.
    pub fn display_name(&self) -> String {
        let package = self.package.name().unwrap_or("app");
        if Some(self.slice_name.as_str()) == self.package.default_slice_names(self.arch).first().map(|s| s.as_str())
        {
            package.to_string()
        } else {
            format!("{}.{}", package, self.slice_name)
        }
    }
}

impl std::fmt::Debug for SliceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}",
            self.display_name(),
            self.arch
        )
    }
}

struct Node {
    handle: SliceHandle,
    /// Indices of dependency nodes, with the ordered flag.
    deps: Vec<(usize, bool)>,
}

type NodeKey = (u64, String, Arch);

struct GraphBuilder<'a> {
    library: &'a Library,
    nodes: Vec<Node>,
    index: HashMap<NodeKey, usize>,
}

impl<'a> GraphBuilder<'a> {
    /// Ensure a slice and everything it transitively uses is present.
    /// Returns the node index.
    fn ensure(&mut self, package: Rc<Package>, slice_name: &str, arch: Arch) -> Result<usize> {
        let key = (package.id(), slice_name.to_string(), arch);
        if let Some(&index) = self.index.get(&key) {
            return Ok(index);
        }

        let cell = package.slice(slice_name, arch).ok_or_else(|| {
            meteor_package::PackageError::UnknownSlice {
                package: package.name().unwrap_or("app").to_string(),
                slice: slice_name.to_string(),
                arch,
            }
        })?;
        let uses = cell.borrow().uses().to_vec();

        let index = self.nodes.len();
        self.index.insert(key, index);
        self.nodes.push(Node {
            handle: SliceHandle {
                package: package.clone(),
                slice_name: slice_name.to_string(),
                arch,
            },
            deps: Vec::new(),
        });

        for edge in uses {
            let target = self.library.get(&edge.spec.package)?;
            let slice_names = match &edge.spec.slice {
                Some(slice) => vec![slice.clone()],
                None => target.default_slice_names(arch),
            };
            for name in slice_names {
                let dep_index = self.ensure(target.clone(), &name, arch)?;
                self.nodes[index].deps.push((dep_index, !edge.unordered));
            }
        }

        Ok(index)
    }
}

/// Expand and sort the root slices for a bundle.
///
/// Roots are processed in order, giving a deterministic result for
/// identical inputs: discovery order breaks ties between independent
/// slices. An ordered cycle is fatal and names both endpoints.
pub fn determine_load_order(
    library: &Library,
    roots: &[(Rc<Package>, Role, Arch)],
) -> Result<Vec<SliceHandle>> {
    let mut builder = GraphBuilder {
        library,
        nodes: Vec::new(),
        index: HashMap::new(),
    };

    for (package, role, arch) in roots {
        for slice_name in package.slice_names_for_role(*role, *arch) {
            builder.ensure(package.clone(), &slice_name, *arch)?;
        }
    }

    let nodes = builder.nodes;
    let mut emitted = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    // Kahn's algorithm over ordered edges only; scanning in discovery
    // order keeps ties deterministic.
    while order.len() < nodes.len() {
        let mut progressed = false;
        for (i, node) in nodes.iter().enumerate() {
            if emitted[i] {
                continue;
            }
            let ready = node
                .deps
                .iter()
                .all(|&(dep, ordered)| !ordered || emitted[dep]);
            if ready {
                emitted[i] = true;
                order.push(node.handle.clone());
                progressed = true;
            }
        }

        if !progressed {
            // Every remaining node waits on another remaining node; pick
            // one stuck edge to report.
            let (a, b) = nodes
                .iter()
                .enumerate()
                .filter(|(i, _)| !emitted[*i])
                .find_map(|(_, node)| {
                    node.deps
                        .iter()
                        .find(|&&(dep, ordered)| ordered && !emitted[dep])
                        .map(|&(dep, _)| {
                            (node.handle.display_name(), nodes[dep].handle.display_name())
                        })
                })
                .expect("a stalled sort has at least one ordered edge between remaining nodes");
            return Err(BundleError::DependencyCycle { a, b });
        }
    }

    debug!(slices = order.len(), "load order determined");
    Ok(order)
}
