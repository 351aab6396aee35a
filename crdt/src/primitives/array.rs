//! `Array`: an RGA-ordered sequence of child element identities.
//! Child `Element`s live in the document's flat arena; this type
//! only tracks physical order, each item's insertion anchor, and move
//! timestamps.
use crate::error::{CrdtError, Result};
use crate::time::TimeTicket;

#[derive(Clone)]
struct Item {
    id: TimeTicket,
    /// The anchor this item was inserted after at creation time. Updated
    /// only when this specific item is moved.
    positioned_after: Option<TimeTicket>,
    moved_at: Option<TimeTicket>,
}

#[derive(Clone, Default)]
pub struct Array {
    items: Vec<Item>,
}

impl Array {
    pub fn new() -> Self {
        Self::default()
    }

    fn index_of(&self, id: TimeTicket) -> Option<usize> {
        self.items.iter().position(|i| i.id == id)
    }

    fn anchor_index(&self, prev: Option<TimeTicket>) -> Result<Option<usize>> {
        match prev {
            None => Ok(None),
            Some(id) => self
                .index_of(id)
                .map(Some)
                .ok_or_else(|| CrdtError::InvalidArgument(format!("array anchor {:?} not found", id))),
        }
    }

    /// RGA tie-break: among items already positioned after the same
    /// anchor, the new item is placed before any with a larger `createdAt`.
    fn insertion_slot(&self, anchor: Option<usize>, prev: Option<TimeTicket>, created_at: TimeTicket) -> usize {
        let mut at = anchor.map(|i| i + 1).unwrap_or(0);
        while at < self.items.len() {
            let candidate = &self.items[at];
            if candidate.positioned_after == prev && candidate.id > created_at {
                at += 1;
            } else {
                break;
            }
        }
        at
    }

    pub fn insert_after(&mut self, prev: Option<TimeTicket>, id: TimeTicket) -> Result<()> {
        let anchor = self.anchor_index(prev)?;
        let at = self.insertion_slot(anchor, prev, id);
        self.items.insert(
            at,
            Item {
                id,
                positioned_after: prev,
                moved_at: None,
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: TimeTicket) -> bool {
        self.index_of(id).is_some()
    }

    /// LWW among concurrent moves of the same element.
    pub fn move_after(&mut self, target: TimeTicket, new_prev: Option<TimeTicket>, executed_at: TimeTicket) -> Result<()> {
        let idx = self
            .index_of(target)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("array target {:?} not found", target)))?;
        if self.items[idx].moved_at.map(|m| m >= executed_at).unwrap_or(false) {
            return Ok(());
        }
        let mut item = self.items.remove(idx);
        let anchor = self.anchor_index(new_prev)?;
        let at = self.insertion_slot(anchor, new_prev, item.id);
        item.positioned_after = new_prev;
        item.moved_at = Some(executed_at);
        self.items.insert(at, item);
        Ok(())
    }

    /// Physical order of every child identity, live or tombstoned — the
    /// caller (holding the arena) filters by liveness.
    pub fn iter_ids(&self) -> impl Iterator<Item = TimeTicket> + '_ {
        self.items.iter().map(|i| i.id)
    }

    pub fn detach_child(&mut self, id: TimeTicket) {
        self.items.retain(|i| i.id != id);
    }
}
