//! `Document`: orchestrates the update closure, remote change application,
//! checkpointing and GC. This is the one synchronous, single-threaded entry
//! point the session layer (the root `converge` crate's
//! `Client`/`SyncEngine`) drives; all mutation, event dispatch and
//! local/remote apply for one document happen on a single logical executor
//! so the root is never observed mid-operation.
use crate::change::{Change, ChangePack};
use crate::error::{CrdtError, Result};
use crate::gc;
use crate::operation::{NewValue, Operation};
use crate::root::Root;
use crate::subscriber::{DocumentStatus, Event, EventBus, OperationSummary, SyncStatus, Unsubscribe};
use crate::time::{ActorId, ChangeId, Checkpoint, TimeTicket, VersionVector};
use std::collections::{BTreeMap, VecDeque};

pub type DocKey = String;

/// A transaction against a document's cloned root, recording every
/// mutation as an [`Operation`] to append to the pending change on commit.
///
/// All operations minted within one transaction share a single `lamport`
/// (the document's next clock value) and are disambiguated by a
/// monotonically increasing `delimiter`.
pub struct Transaction<'a> {
    root: &'a mut Root,
    actor: ActorId,
    lamport: u64,
    delimiter: u32,
    operations: Vec<Operation>,
}

impl<'a> Transaction<'a> {
    fn new(root: &'a mut Root, actor: ActorId, lamport: u64) -> Self {
        Self {
            root,
            actor,
            lamport,
            delimiter: 0,
            operations: Vec::new(),
        }
    }

    fn next_ticket(&mut self) -> TimeTicket {
        let ticket = TimeTicket::new(self.lamport, self.delimiter, self.actor);
        self.delimiter += 1;
        ticket
    }

    pub fn root_id(&self) -> TimeTicket {
        self.root.root_id()
    }

    pub fn root_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    fn push(&mut self, op: Operation) -> Result<()> {
        op.apply(self.root)?;
        self.operations.push(op);
        Ok(())
    }

    /// `Object.set`: materializes `value` under `key`, tombstoning
    /// whatever was previously visible there.
    pub fn object_set(&mut self, parent: TimeTicket, key: &str, value: NewValue) -> Result<TimeTicket> {
        let executed_at = self.next_ticket();
        self.push(Operation::Set {
            parent_created_at: parent,
            executed_at,
            key: key.to_string(),
            value,
        })?;
        Ok(executed_at)
    }

    /// `Object.remove`, addressed by key; resolves to the child's own
    /// identity before building the wire `Remove` op, which carries only
    /// `createdAt`.
    pub fn object_remove(&mut self, parent: TimeTicket, key: &str) -> Result<()> {
        let created_at = self
            .root
            .element(parent)?
            .as_object()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not an Object".into()))?
            .get(key)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("no such key {:?}", key)))?;
        let executed_at = self.next_ticket();
        self.push(Operation::Remove {
            parent_created_at: parent,
            executed_at,
            created_at,
        })
    }

    /// `Array.insertAfter`. `prev = None` inserts at the head.
    pub fn array_insert_after(&mut self, parent: TimeTicket, prev: Option<TimeTicket>, value: NewValue) -> Result<TimeTicket> {
        let executed_at = self.next_ticket();
        self.push(Operation::Add {
            parent_created_at: parent,
            executed_at,
            prev_created_at: prev,
            value,
        })?;
        Ok(executed_at)
    }

    /// Inserts at a live 0-based `index`, resolving the anchor from the
    /// array's current live order.
    pub fn array_insert(&mut self, parent: TimeTicket, index: usize, value: NewValue) -> Result<TimeTicket> {
        let prev = self.live_array_anchor(parent, index)?;
        self.array_insert_after(parent, prev, value)
    }

    fn live_array_anchor(&self, parent: TimeTicket, index: usize) -> Result<Option<TimeTicket>> {
        if index == 0 {
            return Ok(None);
        }
        let array = self
            .root
            .element(parent)?
            .as_array()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not an Array".into()))?;
        array
            .iter_ids()
            .filter(|id| self.root.is_live(*id))
            .nth(index - 1)
            .map(Some)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("array index {} out of range", index)))
    }

    pub fn array_move_after(&mut self, parent: TimeTicket, target: TimeTicket, new_prev: Option<TimeTicket>) -> Result<()> {
        let executed_at = self.next_ticket();
        self.push(Operation::Move {
            parent_created_at: parent,
            executed_at,
            prev_created_at: new_prev,
            created_at: target,
        })
    }

    pub fn array_remove(&mut self, parent: TimeTicket, target: TimeTicket) -> Result<()> {
        let executed_at = self.next_ticket();
        self.push(Operation::Remove {
            parent_created_at: parent,
            executed_at,
            created_at: target,
        })
    }

    pub fn array_remove_at(&mut self, parent: TimeTicket, index: usize) -> Result<()> {
        let array = self
            .root
            .element(parent)?
            .as_array()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not an Array".into()))?;
        let target = array
            .iter_ids()
            .filter(|id| self.root.is_live(*id))
            .nth(index)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("array index {} out of range", index)))?;
        self.array_remove(parent, target)
    }

    pub fn counter_increase(&mut self, parent: TimeTicket, delta: i64) -> Result<()> {
        let executed_at = self.next_ticket();
        self.push(Operation::Increase {
            parent_created_at: parent,
            executed_at,
            value: delta,
        })
    }

    /// `Text.edit`: the primitive itself resolves `[from, to)` against the
    /// clone's current run layout and mutates in place, returning the
    /// stable `Pos` pair and the per-actor max-created-at map recorded on
    /// the outgoing operation so a receiver can exempt content a
    /// concurrent insert added inside the deleted range.
    pub fn text_edit(
        &mut self,
        parent: TimeTicket,
        from: u32,
        to: u32,
        content: &str,
        attrs: BTreeMap<String, String>,
    ) -> Result<()> {
        let executed_at = self.next_ticket();
        let text = self
            .root
            .element_mut(parent)?
            .as_text_mut()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not Text".into()))?;
        let (from_pos, to_pos, max_created_at_map) = text.edit(from, to, content, executed_at)?;
        if !attrs.is_empty() {
            text.apply_style(from_pos, to_pos, &attrs, executed_at);
        }
        self.operations.push(Operation::Edit {
            parent_created_at: parent,
            executed_at,
            from: from_pos,
            to: to_pos,
            content: content.to_string(),
            attrs,
            max_created_at_map,
        });
        Ok(())
    }

    pub fn text_style(&mut self, parent: TimeTicket, from: u32, to: u32, attrs: BTreeMap<String, String>) -> Result<()> {
        self.text_style_inner(parent, from, to, attrs, Vec::new())
    }

    pub fn text_remove_style(&mut self, parent: TimeTicket, from: u32, to: u32, keys: Vec<String>) -> Result<()> {
        self.text_style_inner(parent, from, to, BTreeMap::new(), keys)
    }

    fn text_style_inner(
        &mut self,
        parent: TimeTicket,
        from: u32,
        to: u32,
        attrs: BTreeMap<String, String>,
        remove_keys: Vec<String>,
    ) -> Result<()> {
        let executed_at = self.next_ticket();
        let text = self
            .root
            .element_mut(parent)?
            .as_text_mut()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not Text".into()))?;
        if from > to {
            return Err(CrdtError::InvalidArgument("text style from > to".into()));
        }
        let from_pos = text.index_to_pos(from);
        let to_pos = text.index_to_pos(to);
        if !attrs.is_empty() {
            text.apply_style(from_pos, to_pos, &attrs, executed_at);
        }
        if !remove_keys.is_empty() {
            text.apply_remove_style(from_pos, to_pos, &remove_keys, executed_at);
        }
        self.operations.push(Operation::Style {
            parent_created_at: parent,
            executed_at,
            from: from_pos,
            to: to_pos,
            attrs,
            remove_keys,
        });
        Ok(())
    }

    /// `Tree.edit`, addressed by character index. Rejects `from > to` and
    /// a `from`/`to` pair that resolves to different nesting depths.
    pub fn tree_edit(
        &mut self,
        parent: TimeTicket,
        from: u32,
        to: u32,
        contents: Vec<crate::primitives::tree::TreeNodeSpec>,
        split_level: u32,
    ) -> Result<()> {
        let executed_at = self.next_ticket();
        let tree = self
            .root
            .element_mut(parent)?
            .as_tree_mut()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not a Tree".into()))?;
        let (from_pos, to_pos, max_created_at_map) = tree.edit(from, to, &contents, split_level, executed_at)?;
        self.operations.push(Operation::TreeEdit {
            parent_created_at: parent,
            executed_at,
            from: from_pos,
            to: to_pos,
            contents,
            split_level,
            max_created_at_map,
        });
        Ok(())
    }

    /// `Tree.editByPath`, addressed by a path of child ordinals at each
    /// depth. Rejects `from`/`to` paths of differing length — a cross-depth
    /// edit.
    pub fn tree_edit_by_path(
        &mut self,
        parent: TimeTicket,
        from: &[usize],
        to: &[usize],
        contents: Vec<crate::primitives::tree::TreeNodeSpec>,
        split_level: u32,
    ) -> Result<()> {
        let executed_at = self.next_ticket();
        let tree = self
            .root
            .element_mut(parent)?
            .as_tree_mut()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not a Tree".into()))?;
        let (from_pos, to_pos, max_created_at_map) = tree.edit_by_path(from, to, &contents, split_level, executed_at)?;
        self.operations.push(Operation::TreeEdit {
            parent_created_at: parent,
            executed_at,
            from: from_pos,
            to: to_pos,
            contents,
            split_level,
            max_created_at_map,
        });
        Ok(())
    }

    pub fn tree_style(&mut self, parent: TimeTicket, from: u32, to: u32, attrs: BTreeMap<String, String>) -> Result<()> {
        self.tree_style_inner(parent, from, to, attrs, Vec::new())
    }

    pub fn tree_remove_style(&mut self, parent: TimeTicket, from: u32, to: u32, keys: Vec<String>) -> Result<()> {
        self.tree_style_inner(parent, from, to, BTreeMap::new(), keys)
    }

    fn tree_style_inner(
        &mut self,
        parent: TimeTicket,
        from: u32,
        to: u32,
        attrs: BTreeMap<String, String>,
        remove_keys: Vec<String>,
    ) -> Result<()> {
        let executed_at = self.next_ticket();
        let tree = self
            .root
            .element_mut(parent)?
            .as_tree_mut()
            .ok_or_else(|| CrdtError::InvalidArgument("target is not a Tree".into()))?;
        let from_pos = tree.index_to_pos(from)?;
        let to_pos = tree.index_to_pos(to)?;
        for (key, value) in &attrs {
            tree.apply_style_by_pos(from_pos, to_pos, key, value.clone(), executed_at)?;
        }
        for key in &remove_keys {
            tree.apply_remove_style_by_pos(from_pos, to_pos, key, executed_at)?;
        }
        self.operations.push(Operation::TreeStyle {
            parent_created_at: parent,
            executed_at,
            from: from_pos,
            to: to_pos,
            attrs,
            remove_keys,
        });
        Ok(())
    }

}

/// A document replica: the live root, its logical clock, the pending
/// (unacknowledged) local change queue, and the event bus.
pub struct Document {
    doc_key: DocKey,
    root: Root,
    actor: ActorId,
    lamport: u64,
    client_seq: u32,
    vv: VersionVector,
    pending: VecDeque<Change>,
    checkpoint: Checkpoint,
    status: DocumentStatus,
    disable_gc: bool,
    events: EventBus,
}

impl Document {
    pub fn new(doc_key: impl Into<String>) -> Self {
        Self::with_options(doc_key, false)
    }

    pub fn with_options(doc_key: impl Into<String>, disable_gc: bool) -> Self {
        let root_id = TimeTicket::INITIAL;
        Self {
            doc_key: doc_key.into(),
            root: Root::new(root_id),
            actor: ActorId::INITIAL,
            lamport: 0,
            client_seq: 0,
            vv: VersionVector::new(),
            pending: VecDeque::new(),
            checkpoint: Checkpoint::default(),
            status: DocumentStatus::Detached,
            disable_gc,
            events: EventBus::new(),
        }
    }

    pub fn doc_key(&self) -> &str {
        &self.doc_key
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn root_id(&self) -> TimeTicket {
        self.root.root_id()
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn version_vector(&self) -> &VersionVector {
        &self.vv
    }

    pub fn checkpoint(&self) -> Checkpoint {
        self.checkpoint
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.root.to_json()
    }

    /// A deep copy of the live root, used by snapshot issuers that need to
    /// hand a consistent root to a lagging replica without exposing this
    /// document's own mutable state.
    pub fn clone_root(&self) -> Root {
        self.root.clone()
    }

    pub fn to_json_pretty(&self) -> String {
        self.root.to_json_pretty()
    }

    pub fn tombstone_count(&self) -> usize {
        self.root.tombstone_count()
    }

    pub fn subscribe(&mut self, path_prefix: Option<String>, callback: impl FnMut(&Event) + Send + 'static) -> Unsubscribe {
        self.events.subscribe(path_prefix, callback)
    }

    pub fn unsubscribe(&mut self, handle: &Unsubscribe) {
        self.events.unsubscribe(handle);
    }

    /// `attach`: requires `Detached`.
    pub fn attach(&mut self, actor: ActorId) -> Result<()> {
        if self.status != DocumentStatus::Detached {
            return Err(CrdtError::DocumentNotDetached);
        }
        self.actor = actor;
        self.status = DocumentStatus::Attached;
        self.events.emit(Event::DocumentStatusChanged(DocumentStatus::Attached));
        Ok(())
    }

    /// `detach`: requires `Attached`.
    pub fn detach(&mut self) -> Result<()> {
        if self.status != DocumentStatus::Attached {
            return Err(CrdtError::DocumentNotAttached);
        }
        self.status = DocumentStatus::Detached;
        self.events.emit(Event::DocumentStatusChanged(DocumentStatus::Detached));
        Ok(())
    }

    pub fn mark_removed(&mut self) {
        self.status = DocumentStatus::Removed;
        self.events.emit(Event::DocumentStatusChanged(DocumentStatus::Removed));
    }

    /// `update`: clones the live root, runs `f` against a [`Transaction`]
    /// over the clone, and atomically either appends the resulting change
    /// (on success) or discards the clone (on failure — including a
    /// schema-validation failure the caller raises from `f`). An empty
    /// closure (no operations recorded) produces no change at all.
    pub fn update<F>(&mut self, message: Option<String>, f: F) -> Result<()>
    where
        F: FnOnce(&mut Transaction) -> Result<()>,
    {
        if self.status == DocumentStatus::Removed {
            return Err(CrdtError::DocumentRemoved);
        }
        let change_lamport = self.lamport + 1;
        let mut clone = self.root.clone();
        let mut tx = Transaction::new(&mut clone, self.actor, change_lamport);
        f(&mut tx)?;
        let operations = tx.operations;
        if operations.is_empty() {
            return Ok(());
        }
        self.lamport = change_lamport;
        self.client_seq += 1;
        let id = ChangeId::new(self.client_seq, change_lamport, self.actor, self.vv.clone());
        self.vv.record(id.ticket());
        let summaries: Vec<OperationSummary> = operations.iter().map(OperationSummary::from).collect();
        self.root = clone;
        self.pending.push_back(Change::new(id, operations, message));
        self.events.emit(Event::LocalChange(summaries));
        Ok(())
    }

    /// Builds the push request envelope.
    pub fn create_change_pack(&self) -> ChangePack {
        let mut pack = ChangePack::new(self.doc_key.clone(), self.checkpoint, self.pending.iter().cloned().collect());
        pack.is_removed = self.status == DocumentStatus::Removed;
        pack.min_synced_version_vector = Some(self.vv.clone());
        pack
    }

    /// Drops pending changes the server has acknowledged (identified by
    /// `client_seq`) and advances the checkpoint. A change leaves the
    /// pending queue only once the server's response confirms its
    /// `clientSeq` — the duplicate-push guard.
    pub fn acknowledge_push(&mut self, checkpoint: Checkpoint) {
        self.checkpoint = self.checkpoint.forward(checkpoint.server_seq(), checkpoint.client_seq());
        let acked = self.checkpoint.client_seq();
        self.pending.retain(|c| c.id.client_seq() > acked);
    }

    /// Acknowledges a push without installing the server's response
    /// (`Realtime(push-only)` mode): advances only the `clientSeq` half of
    /// the checkpoint and drops the now-acked pending changes, leaving
    /// `serverSeq` (and the root) untouched so a later push-pull catch-up
    /// still re-fetches every server change since. Pairing this with
    /// [`Document::apply_change_pack`] would defeat the point — callers in
    /// push-only mode must discard the response's changes entirely.
    pub fn acknowledge_push_only(&mut self, acked_client_seq: u32) {
        let client_seq = self.checkpoint.client_seq().max(acked_client_seq);
        self.checkpoint = Checkpoint::new(self.checkpoint.server_seq(), client_seq);
        self.pending.retain(|c| c.id.client_seq() > acked_client_seq);
    }

    /// Emits `StreamConnectionStatusChanged`, driven by the sync engine's
    /// watch-stream lifecycle rather than anything the document core
    /// itself observes.
    pub fn emit_stream_status(&mut self, status: crate::subscriber::StreamConnectionStatus) {
        self.events.emit(Event::StreamConnectionStatusChanged(status));
    }

    /// Emits `SyncStatusChanged` outside of an `apply_change_pack` call,
    /// e.g. to report a sync-loop failure.
    pub fn emit_sync_status(&mut self, status: SyncStatus) {
        self.events.emit(Event::SyncStatusChanged(status));
    }

    /// Emits `AuthError`: the sync engine calls this when a push-pull fails
    /// with `Unauthenticated`, forwarding the server's reason string so the
    /// caller's auth injector can distinguish "no token" from "expired
    /// token".
    pub fn emit_auth_error(&mut self, reason: String, method: String) {
        self.events.emit(Event::AuthError { reason, method });
    }

    /// Emits `Broadcast`: presence/broadcast payloads ride the same
    /// session but are opaque to the CRDT core.
    pub fn emit_broadcast(&mut self, topic: String, payload: Vec<u8>) {
        self.events.emit(Event::Broadcast { topic, payload });
    }

    /// Applies a server-provided [`ChangePack`]: installs any snapshot,
    /// replays this replica's own still-pending local changes against the
    /// newly-installed root (a tombstoned target silently drops, same as
    /// any other stale operation), applies each incoming change in order,
    /// advances the checkpoint, and fires `RemoteChange`/`SyncStatusChanged`.
    /// In `push-only` mode the caller should not invoke this at all: server
    /// changes received in that mode are discarded untouched.
    pub fn apply_change_pack(&mut self, pack: ChangePack) -> Result<()> {
        if let Some(snapshot) = pack.snapshot {
            self.root = snapshot.root;
            self.vv = self.vv.max(&snapshot.version_vector);
            for change in &self.pending {
                for op in &change.operations {
                    op.apply(&mut self.root)?;
                }
            }
        }
        let mut summaries = Vec::new();
        for change in &pack.changes {
            if change.id.lamport() > self.lamport {
                self.lamport = change.id.lamport();
            }
            for op in &change.operations {
                op.apply(&mut self.root)?;
                summaries.push(OperationSummary::from(op));
            }
            self.vv.record(change.id.ticket());
        }
        self.checkpoint = self.checkpoint.forward(pack.checkpoint.server_seq(), pack.checkpoint.client_seq());
        if pack.is_removed {
            self.mark_removed();
        }
        if !summaries.is_empty() || !pack.changes.is_empty() {
            self.events.emit(Event::RemoteChange(summaries));
        }
        self.events.emit(Event::SyncStatusChanged(SyncStatus::Synced));
        Ok(())
    }

    /// Runs one GC pass. `min_synced` should be the server's reported
    /// min-synced version vector, restricted to this document's
    /// currently-attached peers.
    pub fn garbage_collect(&mut self, min_synced: &VersionVector) -> usize {
        gc::collect(&mut self.root, min_synced, self.disable_gc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(n: u8) -> ActorId {
        ActorId::new([n; 12])
    }

    #[test]
    fn empty_update_produces_no_pending_change() {
        let mut doc = Document::new("d1");
        doc.attach(actor(1)).unwrap();
        doc.update(None, |_tx| Ok(())).unwrap();
        assert!(!doc.has_pending_changes());
    }

    #[test]
    fn update_sets_a_key_and_is_visible_immediately() {
        let mut doc = Document::new("d1");
        doc.attach(actor(1)).unwrap();
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "k1", NewValue::Register(serde_json::json!("v1")))?;
            Ok(())
        })
        .unwrap();
        assert_eq!(doc.to_json(), serde_json::json!({"k1": "v1"}));
        assert!(doc.has_pending_changes());
    }

    #[test]
    fn reattach_without_detach_is_rejected() {
        let mut doc = Document::new("d1");
        doc.attach(actor(1)).unwrap();
        assert!(doc.attach(actor(1)).is_err());
    }

    #[test]
    fn double_detach_is_rejected() {
        let mut doc = Document::new("d1");
        doc.attach(actor(1)).unwrap();
        doc.detach().unwrap();
        assert!(doc.detach().is_err());
    }

    #[test]
    fn push_pull_round_trip_converges_two_replicas() {
        let mut d1 = Document::new("shared");
        let mut d2 = Document::new("shared");
        d1.attach(actor(1)).unwrap();
        d2.attach(actor(2)).unwrap();
        let root_id = d1.root_id();
        d1.update(None, |tx| {
            tx.object_set(root_id, "k1", NewValue::Register(serde_json::json!("v1")))?;
            Ok(())
        })
        .unwrap();

        let pack = d1.create_change_pack();
        d1.acknowledge_push(Checkpoint::new(1, pack.changes.last().unwrap().id.client_seq()));
        d2.apply_change_pack(ChangePack::new("shared".into(), Checkpoint::new(1, 0), pack.changes))
            .unwrap();

        assert_eq!(d1.to_json(), d2.to_json());
        assert!(!d1.has_pending_changes());
    }

    #[test]
    fn gc_reclaims_tombstones_dominated_by_min_synced() {
        let mut doc = Document::new("d1");
        doc.attach(actor(1)).unwrap();
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "k1", NewValue::Register(serde_json::json!(1)))?;
            Ok(())
        })
        .unwrap();
        doc.update(None, |tx| {
            tx.object_remove(root_id, "k1")?;
            Ok(())
        })
        .unwrap();
        assert_eq!(doc.tombstone_count(), 1);
        let mut vv = VersionVector::new();
        vv.set(actor(1), doc.version_vector().get(&actor(1)));
        assert_eq!(doc.garbage_collect(&vv), 1);
        assert_eq!(doc.tombstone_count(), 0);
    }

    #[test]
    fn snapshot_install_preserves_still_pending_local_changes() {
        use crate::change::Snapshot;

        let mut d1 = Document::new("shared");
        d1.attach(actor(1)).unwrap();
        let root_id = d1.root_id();

        // A local change not yet acknowledged by the server.
        d1.update(None, |tx| {
            tx.object_set(root_id, "local", NewValue::Register(serde_json::json!("x")))?;
            Ok(())
        })
        .unwrap();
        assert!(d1.has_pending_changes());
        assert_eq!(d1.to_json(), serde_json::json!({"local": "x"}));

        // The server's view, built independently (e.g. folding in another
        // actor's committed change), carries no knowledge of "local".
        let mut server_view = Document::new("shared");
        server_view.attach(actor(2)).unwrap();
        let server_root_id = server_view.root_id();
        server_view
            .update(None, |tx| {
                tx.object_set(server_root_id, "server", NewValue::Register(serde_json::json!("y")))?;
                Ok(())
            })
            .unwrap();

        let snapshot = Snapshot {
            root: server_view.clone_root(),
            version_vector: server_view.version_vector().clone(),
            server_seq: 10,
        };
        let pack = ChangePack {
            doc_key: "shared".into(),
            checkpoint: Checkpoint::new(10, 0),
            is_removed: false,
            changes: Vec::new(),
            snapshot: Some(snapshot),
            min_synced_version_vector: None,
        };
        d1.apply_change_pack(pack).unwrap();

        // Both the snapshot's content and the still-pending local change
        // must be visible; the snapshot install must not have discarded
        // "local" silently.
        assert_eq!(d1.to_json(), serde_json::json!({"server": "y", "local": "x"}));
        assert!(d1.has_pending_changes());
    }
}
