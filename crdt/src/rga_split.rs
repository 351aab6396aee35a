//! `RGATreeSplit`: the ordered run-list substrate for plain/attributed text.
//! Runs are created whole and later split at an offset as operations
//! address their interior; the split table lets a later operation
//! addressing the pre-split identity still find the right fragment.
use crate::attrs::AttrMap;
use crate::split_table::SplitTable;
use crate::time::{ActorId, TimeTicket};
use std::collections::BTreeMap;

/// A stable run position: `None` means "at the head, before anything".
pub type Anchor = Option<(TimeTicket, u32)>;

#[derive(Clone, Debug)]
struct Run {
    /// Identity of the run this fragment descends from; unchanged by splits.
    id: TimeTicket,
    /// Offset within the originally created run where this fragment starts.
    offset: u32,
    content: String,
    removed_at: Option<TimeTicket>,
    attrs: AttrMap,
    /// The anchor this run (or the whole run it was split from) was
    /// originally inserted after. Used only for ordering brand-new
    /// concurrent inserts; unaffected by later splits.
    left_origin: Anchor,
}

impl Run {
    fn len(&self) -> u32 {
        self.content.chars().count() as u32
    }

    fn is_live(&self) -> bool {
        self.removed_at.is_none()
    }

    fn live_len(&self) -> u32 {
        if self.is_live() {
            self.len()
        } else {
            0
        }
    }

    fn identity_at(&self, local_offset: u32) -> (TimeTicket, u32) {
        (self.id, self.offset + local_offset)
    }
}

/// A resolved insertion/deletion boundary: stable under concurrent edits
/// because it names a run identity and an offset into it rather than a
/// plain character index.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Pos {
    pub id: TimeTicket,
    pub offset: u32,
}

#[derive(Clone, Default)]
pub struct RgaTreeSplit {
    runs: Vec<Run>,
    table: SplitTable<usize>,
}

impl RgaTreeSplit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total live (non-tombstoned) character count.
    pub fn len(&self) -> u32 {
        self.runs.iter().map(Run::live_len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_string_lossy(&self) -> String {
        self.runs
            .iter()
            .filter(|r| r.is_live())
            .map(|r| r.content.as_str())
            .collect()
    }

    /// Resolves a live character index to its stable `Pos`.
    pub fn index_to_pos(&self, index: u32) -> Pos {
        let mut remaining = index;
        for run in &self.runs {
            let live = run.live_len();
            if run.is_live() && remaining <= live {
                return Pos {
                    id: run.id,
                    offset: run.offset + remaining,
                };
            }
            if run.is_live() {
                remaining -= live;
            }
        }
        // Past the end: position at the end of the last run, or HEAD if empty.
        match self.runs.last() {
            Some(run) => Pos {
                id: run.id,
                offset: run.offset + run.len(),
            },
            None => Pos {
                id: TimeTicket::INITIAL,
                offset: 0,
            },
        }
    }

    /// Resolves a stable `Pos` back to a live character index, rounding to
    /// the nearest live boundary (left-biased) when the run the pos names
    /// has since been removed.
    pub fn pos_to_index(&self, pos: Pos) -> u32 {
        let mut acc = 0u32;
        for run in &self.runs {
            let run_end = run.offset + run.len();
            if run.id == pos.id && pos.offset >= run.offset && pos.offset <= run_end {
                let local = pos.offset - run.offset;
                return acc + if run.is_live() { local } else { 0 };
            }
            acc += run.live_len();
        }
        acc
    }

    fn find_run_index(&self, id: TimeTicket, offset: u32) -> Option<usize> {
        self.table.find(id, offset)
    }

    /// Splits the run responsible for `at` (if `at` falls strictly inside a
    /// run) so a later operation can address `at` exactly. Returns the
    /// index of the run now starting at `at`.
    fn split_at(&mut self, at: Pos) -> usize {
        let run_idx = self
            .find_run_index(at.id, at.offset)
            .expect("pos must resolve to a known run");
        let local_offset = at.offset - self.runs[run_idx].offset;
        if local_offset == 0 {
            return run_idx;
        }
        let run = self.runs[run_idx].clone();
        if local_offset >= run.len() {
            return run_idx + 1;
        }
        let left_content: String = run.content.chars().take(local_offset as usize).collect();
        let right_content: String = run.content.chars().skip(local_offset as usize).collect();
        let right = Run {
            id: run.id,
            offset: run.offset + local_offset,
            content: right_content,
            removed_at: run.removed_at,
            attrs: run.attrs.clone(),
            left_origin: run.left_origin,
        };
        self.runs[run_idx].content = left_content;
        self.runs.insert(run_idx + 1, right);
        self.table.insert(run.id, run.offset + local_offset, run_idx + 1);
        // Every split entry after this insertion point shifted right by one.
        self.reindex_from(run_idx + 2);
        run_idx + 1
    }

    fn reindex_from(&mut self, from: usize) {
        for i in from..self.runs.len() {
            let r = &self.runs[i];
            self.table.insert(r.id, r.offset, i);
        }
    }

    /// Inserts `content` (with `attrs`) immediately after the run position
    /// identified by `left`, as `id`. `left = None` inserts at the head.
    /// RGA tie-break: among existing runs whose `left_origin` is the same
    /// anchor, the new run is placed before any with `createdAt < id`.
    pub fn insert_after(&mut self, left: Anchor, id: TimeTicket, content: String) {
        if content.is_empty() {
            return;
        }
        let anchor_run = left.and_then(|(aid, aoff)| self.find_run_index(aid, aoff));
        let mut insert_at = match anchor_run {
            Some(idx) => {
                let local = left.unwrap().1 - self.runs[idx].offset;
                if local == self.runs[idx].len() {
                    idx + 1
                } else {
                    self.split_at(Pos {
                        id: left.unwrap().0,
                        offset: left.unwrap().1,
                    })
                }
            }
            None => 0,
        };
        while insert_at < self.runs.len() {
            let candidate = &self.runs[insert_at];
            if candidate.left_origin == left {
                if candidate.id > id {
                    insert_at += 1;
                    continue;
                }
            }
            break;
        }
        let run = Run {
            id,
            offset: 0,
            content,
            removed_at: None,
            attrs: AttrMap::new(),
            left_origin: left,
        };
        self.runs.insert(insert_at, run);
        self.reindex_from(insert_at);
    }

    /// Records, per actor, the greatest run identity that actor has within
    /// `[from, to)` at the moment this range is about to be deleted. A
    /// receiving replica uses this to tell "this run already existed when
    /// the delete was generated" from "this run was inserted by an actor
    /// the deleting actor hadn't seen yet" — the latter must survive the
    /// delete rather than be silently swallowed when it arrives out of
    /// order.
    pub fn max_created_at_map(&mut self, from: Pos, to: Pos) -> BTreeMap<ActorId, TimeTicket> {
        let start = self.split_at(from);
        let end = self.split_at(to);
        let mut map = BTreeMap::new();
        for run in &self.runs[start..end] {
            let actor = run.id.actor();
            map.entry(actor)
                .and_modify(|max| {
                    if run.id > *max {
                        *max = run.id;
                    }
                })
                .or_insert(run.id);
        }
        map
    }

    /// Removes (tombstones) the run fragments covering `[from, to)`
    /// (inclusive run-identity range), splitting at both boundaries first.
    /// Runs that don't yet exist locally (because this replica hasn't seen
    /// their creation) are simply skipped — remote apply is idempotent.
    /// A run whose actor is absent from `max_created_at_map`, or whose id
    /// exceeds that actor's recorded maximum, was inserted concurrently
    /// with this delete and is exempt from it.
    pub fn remove_range(
        &mut self,
        from: Pos,
        to: Pos,
        removed_at: TimeTicket,
        max_created_at_map: &BTreeMap<ActorId, TimeTicket>,
    ) {
        let start = self.split_at(from);
        let end = self.split_at(to);
        for run in &mut self.runs[start..end] {
            let actor = run.id.actor();
            let exempt = match max_created_at_map.get(&actor) {
                Some(max) => run.id > *max,
                None => true,
            };
            if exempt {
                continue;
            }
            if run.removed_at.map(|r| r < removed_at).unwrap_or(true) {
                run.removed_at = Some(removed_at);
            }
        }
    }

    /// Applies a per-attribute LWW style over `[from, to)`.
    pub fn style_range(&mut self, from: Pos, to: Pos, key: &str, value: String, executed_at: TimeTicket) {
        let start = self.split_at(from);
        let end = self.split_at(to);
        for run in &mut self.runs[start..end] {
            run.attrs.set(key, value.clone(), executed_at);
        }
    }

    pub fn remove_style_range(&mut self, from: Pos, to: Pos, key: &str, executed_at: TimeTicket) {
        let start = self.split_at(from);
        let end = self.split_at(to);
        for run in &mut self.runs[start..end] {
            run.attrs.remove(key, executed_at);
        }
    }

    /// Tombstones whose `removedAt` is dominated by `min_synced` can be
    /// reclaimed: merges them away entirely. Returns the reclaimed count.
    pub fn collect_garbage(&mut self, min_synced: &crate::time::VersionVector) -> usize {
        let before = self.runs.len();
        self.runs.retain(|run| match run.removed_at {
            Some(removed_at) => !min_synced.after_or_equal(&removed_at),
            None => true,
        });
        self.table = SplitTable::new();
        self.reindex_from(0);
        before - self.runs.len()
    }

    pub fn tombstone_count(&self) -> usize {
        self.runs.iter().filter(|r| !r.is_live()).count()
    }
}
