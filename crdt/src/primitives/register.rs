//! `Register`: a single LWW value.
use crate::time::TimeTicket;

#[derive(Clone)]
pub struct Register {
    value: serde_json::Value,
    set_at: TimeTicket,
}

impl Register {
    pub fn new(value: serde_json::Value, set_at: TimeTicket) -> Self {
        Self { value, set_at }
    }

    pub fn get(&self) -> &serde_json::Value {
        &self.value
    }

    /// Concurrent sets resolve by `executed_at`; ties are impossible since
    /// `TimeTicket` is a total order over distinct operations.
    pub fn set(&mut self, value: serde_json::Value, executed_at: TimeTicket) {
        if executed_at > self.set_at {
            self.value = value;
            self.set_at = executed_at;
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(n: u8) -> crate::time::ActorId {
        crate::time::ActorId::new([n; 12])
    }

    #[test]
    fn later_set_wins_regardless_of_arrival_order() {
        let mut r = Register::new(serde_json::json!(1), TimeTicket::new(1, 0, actor(1)));
        r.set(serde_json::json!(3), TimeTicket::new(2, 0, actor(1)));
        r.set(serde_json::json!(2), TimeTicket::new(1, 5, actor(2)));
        assert_eq!(r.get(), &serde_json::json!(3));
    }
}
