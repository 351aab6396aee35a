//! `Change` and `ChangePack`: the unit of client<->server exchange. A
//! [`Change`] bundles every [`Operation`] emitted by one `update()` closure
//! under a single [`crate::time::ChangeId`]; a [`ChangePack`] bundles the
//! changes pending push (or received on pull) with the checkpoint and
//! optional snapshot that frame them.
use crate::operation::Operation;
use crate::root::Root;
use crate::time::{ChangeId, Checkpoint, VersionVector};

/// An opaque presence delta, carried alongside a change but never
/// interpreted by the CRDT core — presence rides the same session but
/// doesn't touch CRDT state.
pub type PresenceDelta = Vec<u8>;

/// One committed update-closure's worth of operations.
#[derive(Clone, Debug)]
pub struct Change {
    pub id: ChangeId,
    pub operations: Vec<Operation>,
    pub message: Option<String>,
    pub presence_change: Option<PresenceDelta>,
}

impl Change {
    pub fn new(id: ChangeId, operations: Vec<Operation>, message: Option<String>) -> Self {
        Self {
            id,
            operations,
            message,
            presence_change: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Applies every operation in order against `root`, then records this
    /// change's lamport in `vv`.
    pub fn apply(&self, root: &mut Root, vv: &mut VersionVector) -> crate::error::Result<()> {
        for op in &self.operations {
            op.apply(root)?;
        }
        vv.record(self.id.ticket());
        Ok(())
    }
}

/// A full serialization of the document root, issued by the server when a
/// replica's lag exceeds the snapshot threshold. Carries a cloned [`Root`]
/// directly rather than a JSON projection, so installing a snapshot
/// preserves tombstones and element identities exactly as the server saw
/// them, not just their live-value shape.
#[derive(Clone)]
pub struct Snapshot {
    pub root: Root,
    pub version_vector: VersionVector,
    pub server_seq: i64,
}

/// The request/response envelope exchanged with the server. The same type
/// serves both directions: a request carries `changes = pending_changes` and
/// no snapshot; a response may carry `snapshot` and `changes = server_changes`.
#[derive(Clone, Default)]
pub struct ChangePack {
    pub doc_key: String,
    pub checkpoint: Checkpoint,
    pub is_removed: bool,
    pub changes: Vec<Change>,
    pub snapshot: Option<Snapshot>,
    pub min_synced_version_vector: Option<VersionVector>,
}

impl ChangePack {
    pub fn new(doc_key: String, checkpoint: Checkpoint, changes: Vec<Change>) -> Self {
        Self {
            doc_key,
            checkpoint,
            is_removed: false,
            changes,
            snapshot: None,
            min_synced_version_vector: None,
        }
    }
}
