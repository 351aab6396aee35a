//! `Object`: an LWW string-keyed map from key to child element identity.
//! The child `Element` itself lives in the document's flat
//! arena ([`crate::root::Root`]); this type only tracks which identity is
//! currently visible under each key.
use crate::time::TimeTicket;
use std::collections::BTreeMap;

/// What happened when `set` was applied, for the caller (`Operation::apply`,
/// which owns the arena) to act on.
pub enum SetOutcome {
    /// `candidate` is now visible under `key`; `superseded`, if any, should
    /// be tombstoned with `candidate`'s timestamp.
    Applied { superseded: Option<TimeTicket> },
    /// A later value is already visible under `key`; `candidate` should be
    /// tombstoned immediately rather than attached.
    Stale,
}

#[derive(Clone, Default)]
pub struct Object {
    entries: BTreeMap<String, TimeTicket>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<TimeTicket> {
        self.entries.get(key).copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, TimeTicket)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Concurrent `set` on the same key: the candidate with the larger
    /// `createdAt` (== its own `executedAt`) wins.
    pub fn set(&mut self, key: &str, candidate: TimeTicket) -> SetOutcome {
        match self.entries.get(key).copied() {
            Some(existing) if existing > candidate => SetOutcome::Stale,
            Some(existing) => {
                self.entries.insert(key.to_string(), candidate);
                SetOutcome::Applied {
                    superseded: Some(existing),
                }
            }
            None => {
                self.entries.insert(key.to_string(), candidate);
                SetOutcome::Applied { superseded: None }
            }
        }
    }

    /// Removes by the child's own identity rather than its key — what a
    /// wire `Remove` operation carries (`createdAt` only). Returns the key
    /// it was removed from, if still live.
    pub fn remove_by_created_at(&mut self, created_at: TimeTicket) -> Option<String> {
        let key = self
            .entries
            .iter()
            .find(|(_, id)| **id == created_at)
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&key);
        Some(key)
    }

    /// Drops a child identity from this container once GC has proven it
    /// reclaimable. A no-op if some other (later) child already holds the
    /// key.
    pub fn detach_child(&mut self, id: TimeTicket) {
        self.entries.retain(|_, v| *v != id);
    }
}
