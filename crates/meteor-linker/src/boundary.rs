//! Import boundary derivation

use sha1::{Digest, Sha1};

/// Derive the boundary marker for one prelink invocation.
///
/// The marker must never occur in any of the sources it is embedded into,
/// otherwise the link phase would splice imports into user code. It is
/// derived from a digest over the sources so repeated runs over identical
/// inputs embed an identical marker, keeping prelink output byte-stable.
/// On the (astronomically unlikely) collision the counter is bumped and the
/// digest re-derived.
pub fn derive_boundary<'a>(sources: impl Iterator<Item = &'a str> + Clone) -> String {
    let mut salt: u64 = 0;
    loop {
        let mut hasher = Sha1::new();
        for source in sources.clone() {
            hasher.update(source.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(salt.to_le_bytes());
        let digest = hasher.finalize();
        let hex: String = format!("{:x}", digest).chars().take(32).collect();
        let marker = format!("__imports_{}__", hex);

        if sources.clone().all(|s| !s.contains(&marker)) {
            return marker;
        }
        salt += 1;
    }
}
