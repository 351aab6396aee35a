//! Per-attribute LWW map shared by text runs and tree element nodes.
use crate::time::TimeTicket;
use std::collections::BTreeMap;

/// `None` values are kept, not deleted, so a later `style` call can still
/// beat an earlier `removeStyle` by timestamp: a later style after
/// removeStyle restores the attribute.
#[derive(Clone, Debug, Default)]
pub struct AttrMap {
    entries: BTreeMap<String, (Option<String>, TimeTicket)>,
}

impl AttrMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `key` to `value` if `executed_at` is newer than whatever is
    /// currently recorded for `key` (LWW, per-attribute).
    pub fn set(&mut self, key: &str, value: String, executed_at: TimeTicket) {
        self.apply(key, Some(value), executed_at);
    }

    pub fn remove(&mut self, key: &str, executed_at: TimeTicket) {
        self.apply(key, None, executed_at);
    }

    fn apply(&mut self, key: &str, value: Option<String>, executed_at: TimeTicket) {
        match self.entries.get(key) {
            Some((_, existing_at)) if *existing_at >= executed_at => {}
            _ => {
                self.entries.insert(key.to_string(), (value, executed_at));
            }
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|(v, _)| v.as_deref())
    }

    /// Only the live (non-removed) attributes, for serialization.
    pub fn iter_live(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .filter_map(|(k, (v, _))| v.as_deref().map(|v| (k.as_str(), v)))
    }

    pub fn merge_from(&mut self, other: &AttrMap) {
        for (key, (value, at)) in &other.entries {
            self.apply(key, value.clone(), *at);
        }
    }

    pub fn is_empty_live(&self) -> bool {
        self.iter_live().next().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor() -> crate::time::ActorId {
        crate::time::ActorId::new([3; 12])
    }

    #[test]
    fn later_timestamp_wins() {
        let mut a = AttrMap::new();
        a.set("bold", "true".into(), TimeTicket::new(1, 0, actor()));
        a.set("bold", "false".into(), TimeTicket::new(2, 0, actor()));
        assert_eq!(a.get("bold"), Some("false"));
        a.set("bold", "ignored".into(), TimeTicket::new(1, 5, actor()));
        assert_eq!(a.get("bold"), Some("false"));
    }

    #[test]
    fn later_style_restores_after_remove_style() {
        let mut a = AttrMap::new();
        a.remove("bold", TimeTicket::new(1, 0, actor()));
        assert_eq!(a.get("bold"), None);
        a.set("bold", "true".into(), TimeTicket::new(2, 0, actor()));
        assert_eq!(a.get("bold"), Some("true"));
    }
}
