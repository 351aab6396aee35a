//! `Text`: plain/attributed text, a thin public surface over
//! [`crate::rga_split::RgaTreeSplit`].
//!
//! `edit`/`style`/`remove_style` are the local-generation entry points: they
//! resolve the caller's index range against the *current* run layout into a
//! stable [`Pos`] pair, apply it, and hand that `Pos` pair back so
//! `document::update` can stash it in the outgoing [`crate::operation::Operation`].
//! `apply_edit`/`apply_style`/`apply_remove_style` are the wire-apply
//! entry points: they take a `Pos` pair generated elsewhere (possibly by a
//! now-stale replica) and never re-resolve it against today's index space,
//! which is what makes remote application correct under concurrent edits.
use crate::error::{CrdtError, Result};
use crate::rga_split::{Pos, RgaTreeSplit};
use crate::time::{ActorId, TimeTicket, VersionVector};
use std::collections::BTreeMap;

#[derive(Clone, Default)]
pub struct Text {
    runs: RgaTreeSplit,
}

impl Text {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> u32 {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn to_string_lossy(&self) -> String {
        self.runs.to_string_lossy()
    }

    pub fn index_to_pos(&self, index: u32) -> Pos {
        self.runs.index_to_pos(index)
    }

    pub fn pos_to_index(&self, pos: Pos) -> u32 {
        self.runs.pos_to_index(pos)
    }

    /// Deletes `[from, to)` and inserts `content` at the left boundary.
    /// Returns the resolved `(from, to)` positions plus the per-actor
    /// max-created-at map covering the deleted range, both of which the
    /// caller must record on the outgoing operation so a receiver can
    /// exempt concurrently-inserted content from this delete.
    pub fn edit(
        &mut self,
        from: u32,
        to: u32,
        content: &str,
        executed_at: TimeTicket,
    ) -> Result<(Pos, Pos, BTreeMap<ActorId, TimeTicket>)> {
        if from > to {
            return Err(CrdtError::InvalidArgument("text edit from > to".into()));
        }
        let from_pos = self.runs.index_to_pos(from);
        let to_pos = self.runs.index_to_pos(to);
        let max_created_at_map = self.runs.max_created_at_map(from_pos, to_pos);
        self.apply_edit(from_pos, to_pos, content, &max_created_at_map, executed_at);
        Ok((from_pos, to_pos, max_created_at_map))
    }

    pub fn apply_edit(
        &mut self,
        from: Pos,
        to: Pos,
        content: &str,
        max_created_at_map: &BTreeMap<ActorId, TimeTicket>,
        executed_at: TimeTicket,
    ) {
        if to != from {
            self.runs.remove_range(from, to, executed_at, max_created_at_map);
        }
        if !content.is_empty() {
            let anchor = Some((from.id, from.offset));
            self.runs.insert_after(anchor, executed_at, content.to_string());
        }
    }

    pub fn style(&mut self, from: u32, to: u32, attrs: &BTreeMap<String, String>, executed_at: TimeTicket) -> Result<(Pos, Pos)> {
        if from > to {
            return Err(CrdtError::InvalidArgument("text style from > to".into()));
        }
        let from_pos = self.runs.index_to_pos(from);
        let to_pos = self.runs.index_to_pos(to);
        self.apply_style(from_pos, to_pos, attrs, executed_at);
        Ok((from_pos, to_pos))
    }

    pub fn apply_style(&mut self, from: Pos, to: Pos, attrs: &BTreeMap<String, String>, executed_at: TimeTicket) {
        for (key, value) in attrs {
            self.runs.style_range(from, to, key, value.clone(), executed_at);
        }
    }

    pub fn remove_style(&mut self, from: u32, to: u32, keys: &[String], executed_at: TimeTicket) -> Result<(Pos, Pos)> {
        if from > to {
            return Err(CrdtError::InvalidArgument("text removeStyle from > to".into()));
        }
        let from_pos = self.runs.index_to_pos(from);
        let to_pos = self.runs.index_to_pos(to);
        self.apply_remove_style(from_pos, to_pos, keys, executed_at);
        Ok((from_pos, to_pos))
    }

    pub fn apply_remove_style(&mut self, from: Pos, to: Pos, keys: &[String], executed_at: TimeTicket) {
        for key in keys {
            self.runs.remove_style_range(from, to, key, executed_at);
        }
    }

    pub fn collect_garbage(&mut self, min_synced: &VersionVector) -> usize {
        self.runs.collect_garbage(min_synced)
    }

    pub fn tombstone_count(&self) -> usize {
        self.runs.tombstone_count()
    }
}
