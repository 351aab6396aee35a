//! GC engine: causal tombstone reclamation driven by the min-synced
//! version vector the server computes across a document's attached peers.
//!
//! The actual reclamation walk lives on [`crate::root::Root`] and each
//! primitive ([`crate::primitives::text::Text::collect_garbage`],
//! [`crate::primitives::tree::Tree::collect_garbage`]) since each owns the
//! structure its tombstones live in; this module is the single entry point
//! [`crate::document::Document::garbage_collect`] calls, so the `disableGC`
//! short-circuit lives in exactly one place.
use crate::root::Root;
use crate::time::VersionVector;

/// Runs one GC pass against `root` unless `disabled`, returning the number
/// of reclaimed nodes. `disabled` makes this always return 0.
pub fn collect(root: &mut Root, min_synced: &VersionVector, disabled: bool) -> usize {
    if disabled {
        return 0;
    }
    root.collect_garbage(min_synced)
}
