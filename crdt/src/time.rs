//! Logical time: actor identity, Lamport tickets and version vectors.
//!
//! Every CRDT node, operation and change is addressed by a [`TimeTicket`]
//! rather than by a server-assigned integer id. Replicas never need to
//! agree on wall-clock time; they only need `TimeTicket`'s total order and
//! the causal summary a [`VersionVector`] provides.
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// A replica identity, assigned by the server on activation.
///
/// Represented as 12 raw bytes, printed as a 24 character hex string (the
/// `Display`/`Debug` impls agree, unlike [`TimeTicket`]'s).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ActorId([u8; 12]);

impl ActorId {
    /// The sentinel actor used for pre-activation ticks and snapshot-origin
    /// entries. Strictly less than every other actor under `Ord`.
    pub const INITIAL: ActorId = ActorId([0; 12]);

    /// The maximum representable actor, used to build [`TimeTicket::MAX`].
    pub const MAX: ActorId = ActorId([0xff; 12]);

    pub fn new(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }

    pub fn as_bytes(&self) -> &[u8; 12] {
        &self.0
    }
}

impl fmt::Debug for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl std::str::FromStr for ActorId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 24 {
            return Err(anyhow::anyhow!("invalid actor id length {}", s.len()));
        }
        let bytes = hex::decode(s)?;
        let mut out = [0u8; 12];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }
}

/// A Lamport timestamp, scoped to an actor and disambiguated by a
/// `delimiter` for multiple ticks sharing the same `(lamport, actor)`
/// (i.e. operations emitted within the same change).
///
/// Ordered by `(lamport, actor, delimiter)`, not by field declaration
/// order: two tickets from different actors at the same lamport compare by
/// actor before delimiter, so the order is stable regardless of how many
/// sub-ticks either replica minted.
#[derive(Clone, Copy, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct TimeTicket {
    lamport: u64,
    delimiter: u32,
    actor: ActorId,
}

impl TimeTicket {
    /// Strictly less than any other ticket. Used as the `HEAD` sentinel for
    /// array insertion and as the parent of a document's root container.
    pub const INITIAL: TimeTicket = TimeTicket {
        lamport: 0,
        delimiter: 0,
        actor: ActorId::INITIAL,
    };

    /// Strictly greater than any other ticket. Used as an upper search
    /// bound when scanning ranges keyed by `TimeTicket`.
    pub const MAX: TimeTicket = TimeTicket {
        lamport: u64::MAX,
        delimiter: u32::MAX,
        actor: ActorId::MAX,
    };

    pub fn new(lamport: u64, delimiter: u32, actor: ActorId) -> Self {
        Self {
            lamport,
            delimiter,
            actor,
        }
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    pub fn delimiter(&self) -> u32 {
        self.delimiter
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    /// Returns the next ticket sharing this one's `(lamport, actor)`, for
    /// minting several operations within a single local change.
    pub fn next_delimiter(&self) -> TimeTicket {
        TimeTicket {
            lamport: self.lamport,
            delimiter: self.delimiter + 1,
            actor: self.actor,
        }
    }

    pub fn is_initial(&self) -> bool {
        *self == Self::INITIAL
    }
}

impl Ord for TimeTicket {
    fn cmp(&self, other: &Self) -> Ordering {
        self.lamport
            .cmp(&other.lamport)
            .then_with(|| self.actor.cmp(&other.actor))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
    }
}

impl PartialOrd for TimeTicket {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for TimeTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.lamport, self.actor, self.delimiter)
    }
}

/// A mapping `ActorID -> lamport`, summarizing what a replica has observed.
///
/// The [`ActorId::INITIAL`] entry, when present, does not mean "the
/// initial actor produced this many operations" (it never produces any):
/// it records the highest snapshot lamport this replica has absorbed, so a
/// client that started from a snapshot can still answer `after_or_equal`
/// correctly for tickets minted before it joined.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct VersionVector {
    entries: BTreeMap<ActorId, u64>,
}

impl VersionVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, actor: &ActorId) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    pub fn set(&mut self, actor: ActorId, lamport: u64) {
        if lamport == 0 {
            self.entries.remove(&actor);
        } else {
            self.entries.insert(actor, lamport);
        }
    }

    /// Records the given ticket's lamport against its actor, but never
    /// moves the entry backwards.
    pub fn record(&mut self, ticket: TimeTicket) {
        let entry = self.entries.entry(ticket.actor()).or_insert(0);
        if ticket.lamport() > *entry {
            *entry = ticket.lamport();
        }
    }

    /// True iff this vector has observed every operation that produced
    /// `ticket`, i.e. `get(ticket.actor()) >= ticket.lamport()`.
    pub fn after_or_equal(&self, ticket: &TimeTicket) -> bool {
        self.get(&ticket.actor()) >= ticket.lamport()
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ActorId, &u64)> {
        self.entries.iter()
    }

    /// Pointwise maximum: the causal union of two vectors.
    pub fn max(&self, other: &VersionVector) -> VersionVector {
        let mut out = self.clone();
        for (actor, lamport) in &other.entries {
            let entry = out.entries.entry(*actor).or_insert(0);
            if *lamport > *entry {
                *entry = *lamport;
            }
        }
        out
    }

    /// Pointwise minimum, restricted to actors present in both vectors.
    /// This is what the server uses to compute the min-synced VV across a
    /// document's attached peers: an actor absent from one peer's vector
    /// contributes 0, so it drops the min to 0 for every other actor too
    /// unless the caller pre-filters to the set of currently attached
    /// actors (which `document::min_synced` does).
    pub fn min(&self, other: &VersionVector) -> VersionVector {
        let mut out = VersionVector::new();
        for (actor, lamport) in &self.entries {
            let o = other.get(actor);
            let m = std::cmp::min(*lamport, o);
            if m > 0 {
                out.entries.insert(*actor, m);
            }
        }
        out
    }

    /// Folds `actor`'s contribution into the sentinel initial-actor entry
    /// and removes its own entry, used when the server reports an actor as
    /// deactivated.
    pub fn prune_into_initial(&mut self, actor: &ActorId) {
        if let Some(lamport) = self.entries.remove(actor) {
            let initial = self.entries.entry(ActorId::INITIAL).or_insert(0);
            if lamport > *initial {
                *initial = lamport;
            }
        }
    }
}

impl std::iter::FromIterator<(ActorId, u64)> for VersionVector {
    fn from_iter<I: IntoIterator<Item = (ActorId, u64)>>(iter: I) -> Self {
        let mut vv = VersionVector::new();
        for (actor, lamport) in iter {
            vv.set(actor, lamport);
        }
        vv
    }
}

/// Identifies a local change before the server has acknowledged it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChangeId {
    client_seq: u32,
    lamport: u64,
    actor: ActorId,
    version_vector: VersionVector,
}

impl ChangeId {
    pub fn new(client_seq: u32, lamport: u64, actor: ActorId, version_vector: VersionVector) -> Self {
        Self {
            client_seq,
            lamport,
            actor,
            version_vector,
        }
    }

    pub fn client_seq(&self) -> u32 {
        self.client_seq
    }

    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn version_vector(&self) -> &VersionVector {
        &self.version_vector
    }

    /// The ticket identifying the change itself (its first sub-op unless
    /// otherwise delimited).
    pub fn ticket(&self) -> TimeTicket {
        TimeTicket::new(self.lamport, 0, self.actor)
    }

    pub fn next_client_seq(&self) -> ChangeId {
        ChangeId {
            client_seq: self.client_seq + 1,
            lamport: self.lamport,
            actor: self.actor,
            version_vector: self.version_vector.clone(),
        }
    }
}

/// `(serverSeq, clientSeq)`: what each side of a document's sync has
/// acknowledged. Both fields are monotone non-decreasing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    server_seq: i64,
    client_seq: u32,
}

impl Checkpoint {
    pub fn new(server_seq: i64, client_seq: u32) -> Self {
        Self {
            server_seq,
            client_seq,
        }
    }

    pub fn server_seq(&self) -> i64 {
        self.server_seq
    }

    pub fn client_seq(&self) -> u32 {
        self.client_seq
    }

    /// Advances to the server's view, never moving either field backwards.
    pub fn forward(&self, server_seq: i64, client_seq: u32) -> Checkpoint {
        Checkpoint {
            server_seq: std::cmp::max(self.server_seq, server_seq),
            client_seq: std::cmp::max(self.client_seq, client_seq),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn actor(n: u8) -> ActorId {
        let mut bytes = [0u8; 12];
        bytes[11] = n;
        ActorId::new(bytes)
    }

    #[test]
    fn initial_ticket_is_smallest() {
        let t = TimeTicket::new(1, 0, actor(1));
        assert!(TimeTicket::INITIAL < t);
        assert!(t < TimeTicket::MAX);
    }

    #[test]
    fn ticket_order_prefers_lamport_then_actor_then_delimiter() {
        let a = TimeTicket::new(5, 9, actor(2));
        let b = TimeTicket::new(5, 0, actor(3));
        assert!(a < b, "lower actor with a higher delimiter still wins on actor");

        let c = TimeTicket::new(5, 0, actor(2));
        let d = TimeTicket::new(5, 1, actor(2));
        assert!(c < d, "same lamport+actor falls back to delimiter");
    }

    #[test]
    fn after_or_equal_matches_spec_definition() {
        let mut vv = VersionVector::new();
        vv.set(actor(1), 10);
        assert!(vv.after_or_equal(&TimeTicket::new(10, 0, actor(1))));
        assert!(vv.after_or_equal(&TimeTicket::new(3, 0, actor(1))));
        assert!(!vv.after_or_equal(&TimeTicket::new(11, 0, actor(1))));
        assert!(!vv.after_or_equal(&TimeTicket::new(1, 0, actor(2))));
    }

    fn arb_vv() -> impl Strategy<Value = VersionVector> {
        prop::collection::btree_map(0u8..6, 1u64..20, 0..6).prop_map(|m| {
            m.into_iter().map(|(a, l)| (actor(a), l)).collect::<VersionVector>()
        })
    }

    proptest! {
        #[test]
        fn max_is_idempotent(v in arb_vv()) {
            prop_assert_eq!(v.max(&v), v);
        }

        #[test]
        fn max_is_commutative(a in arb_vv(), b in arb_vv()) {
            prop_assert_eq!(a.max(&b), b.max(&a));
        }

        #[test]
        fn max_is_associative(a in arb_vv(), b in arb_vv(), c in arb_vv()) {
            prop_assert_eq!(a.max(&b).max(&c), a.max(&b.max(&c)));
        }

        #[test]
        fn max_dominates_both_operands(a in arb_vv(), b in arb_vv()) {
            let m = a.max(&b);
            for (actor, lamport) in a.iter() {
                prop_assert!(m.get(actor) >= *lamport);
            }
            for (actor, lamport) in b.iter() {
                prop_assert!(m.get(actor) >= *lamport);
            }
        }
    }
}
