//! The split-table overlay shared by plain/attributed text
//! (`rga_split::RgaTreeSplit`) and the inline text leaves of `primitives::tree::Tree`.
//!
//! A run created at `createdAt` may be cut into sub-runs as later operations
//! address offsets inside it. The split table records, for every
//! `(createdAt, offset)` identity that currently exists, which arena slot is
//! responsible for it — so a later operation addressing the same identity
//! (e.g. a concurrent edit whose anchor fell inside the original run) finds
//! the right place even after the run has been fragmented.
use crate::time::TimeTicket;
use std::collections::BTreeMap;

#[derive(Clone, Debug)]
pub struct SplitTable<K> {
    entries: BTreeMap<(TimeTicket, u32), K>,
}

impl<K> Default for SplitTable<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Copy> SplitTable<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: TimeTicket, offset: u32, key: K) {
        self.entries.insert((id, offset), key);
    }

    pub fn remove(&mut self, id: TimeTicket, offset: u32) {
        self.entries.remove(&(id, offset));
    }

    /// Finds the node currently responsible for offset `at` within the run
    /// originally created at `id`: the greatest registered offset `<= at`
    /// among entries sharing `id`.
    pub fn find(&self, id: TimeTicket, at: u32) -> Option<K> {
        self.entries
            .range(..=(id, at))
            .rev()
            .find(|((eid, _), _)| *eid == id)
            .map(|(_, k)| *k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> crate::time::ActorId {
        crate::time::ActorId::new([1; 12])
    }

    #[test]
    fn finds_the_closest_preceding_split() {
        let id = TimeTicket::new(1, 0, actor());
        let mut table = SplitTable::<u32>::new();
        table.insert(id, 0, 100);
        table.insert(id, 4, 200);
        table.insert(id, 9, 300);
        assert_eq!(table.find(id, 0), Some(100));
        assert_eq!(table.find(id, 3), Some(100));
        assert_eq!(table.find(id, 4), Some(200));
        assert_eq!(table.find(id, 8), Some(200));
        assert_eq!(table.find(id, 9), Some(300));
        assert_eq!(table.find(id, 1000), Some(300));
    }

    #[test]
    fn unknown_identity_is_absent() {
        let id = TimeTicket::new(1, 0, actor());
        let other = TimeTicket::new(2, 0, actor());
        let mut table = SplitTable::<u32>::new();
        table.insert(id, 0, 1);
        assert_eq!(table.find(other, 0), None);
    }
}
