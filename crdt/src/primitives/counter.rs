//! `Counter`: LWW `set` plus a commuting `increase`.
use crate::time::TimeTicket;
use std::collections::BTreeMap;

#[derive(Clone)]
pub struct Counter {
    set_value: i64,
    set_at: TimeTicket,
    /// Increments recorded by ticket, deduplicating replay of the same
    /// operation. Only entries with `executed_at > set_at` contribute to
    /// [`Counter::value`] — a `set` implicitly discards older increments
    /// without needing to walk and delete them.
    increments: BTreeMap<TimeTicket, i64>,
}

impl Counter {
    pub fn new(value: i64, set_at: TimeTicket) -> Self {
        Self {
            set_value: value,
            set_at,
            increments: BTreeMap::new(),
        }
    }

    pub fn value(&self) -> i64 {
        self.set_value
            + self
                .increments
                .iter()
                .filter(|(at, _)| **at > self.set_at)
                .map(|(_, delta)| delta)
                .sum::<i64>()
    }

    pub fn set(&mut self, value: i64, executed_at: TimeTicket) {
        if executed_at > self.set_at {
            self.set_value = value;
            self.set_at = executed_at;
        }
    }

    /// Commutative and idempotent: replaying the same `executed_at` twice
    /// overwrites the same map slot with the same delta.
    pub fn increase(&mut self, delta: i64, executed_at: TimeTicket) {
        self.increments.insert(executed_at, delta);
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!(self.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(n: u8) -> crate::time::ActorId {
        crate::time::ActorId::new([n; 12])
    }

    fn t(lamport: u64, a: u8) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(a))
    }

    #[test]
    fn increases_commute() {
        let mut a = Counter::new(0, t(0, 1));
        let mut b = Counter::new(0, t(0, 1));
        a.increase(3, t(1, 1));
        a.increase(5, t(2, 2));
        b.increase(5, t(2, 2));
        b.increase(3, t(1, 1));
        assert_eq!(a.value(), 8);
        assert_eq!(b.value(), 8);
    }

    #[test]
    fn set_resets_prior_increments() {
        let mut c = Counter::new(0, t(0, 1));
        c.increase(10, t(1, 1));
        c.set(100, t(2, 1));
        assert_eq!(c.value(), 100);
        c.increase(1, t(3, 1));
        assert_eq!(c.value(), 101);
    }

    #[test]
    fn replaying_same_increase_is_idempotent() {
        let mut c = Counter::new(0, t(0, 1));
        c.increase(7, t(1, 1));
        c.increase(7, t(1, 1));
        assert_eq!(c.value(), 7);
    }
}
