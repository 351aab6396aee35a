//! `Root`: the document's flat element arena, indexed by `TimeTicket`.
//! Every reachable `Element` —
//! however deeply nested under `Object`/`Array` containers — lives here,
//! addressed by its `createdAt`, so an `Operation` can resolve its
//! `parentCreatedAt` in O(1) regardless of document depth.
use crate::element::{Element, Value};
use crate::error::{CrdtError, Result};
use crate::primitives::object::Object;
use crate::time::{TimeTicket, VersionVector};
use std::collections::HashMap;

#[derive(Clone)]
pub struct Root {
    root_id: TimeTicket,
    elements: HashMap<TimeTicket, Element>,
}

impl Root {
    pub fn new(root_id: TimeTicket) -> Self {
        let mut elements = HashMap::new();
        elements.insert(root_id, Element::new(root_id, None, Value::Object(Object::new())));
        Self { root_id, elements }
    }

    pub fn root_id(&self) -> TimeTicket {
        self.root_id
    }

    pub fn contains(&self, id: TimeTicket) -> bool {
        self.elements.contains_key(&id)
    }

    pub fn is_live(&self, id: TimeTicket) -> bool {
        self.elements.get(&id).map(|e| e.is_live()).unwrap_or(false)
    }

    pub fn element(&self, id: TimeTicket) -> Result<&Element> {
        self.elements
            .get(&id)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("unknown element {:?}", id)))
    }

    pub fn element_mut(&mut self, id: TimeTicket) -> Result<&mut Element> {
        self.elements
            .get_mut(&id)
            .ok_or_else(|| CrdtError::InvalidArgument(format!("unknown element {:?}", id)))
    }

    /// Adds a freshly-materialized child to the arena, keyed by its own
    /// `createdAt`. Panics on a duplicate id, which would indicate a
    /// `TimeTicket` collision (an actor replaying a ticket it already
    /// used) — a bug upstream, not a recoverable condition here.
    pub fn register(&mut self, element: Element) {
        let id = element.created_at;
        assert!(
            self.elements.insert(id, element).is_none(),
            "duplicate element id {:?}",
            id
        );
    }

    /// Reclaims every tombstone dominated by `min_synced`, detaching it
    /// from its parent container, then runs each surviving Text/Tree's own
    /// internal run-level GC. Returns the total reclaimed count.
    pub fn collect_garbage(&mut self, min_synced: &VersionVector) -> usize {
        let removable: Vec<TimeTicket> = self
            .elements
            .iter()
            .filter(|(_, e)| e.removed_at.map(|r| min_synced.after_or_equal(&r)).unwrap_or(false))
            .map(|(id, _)| *id)
            .collect();
        let mut reclaimed = 0;
        for id in removable {
            if let Some(element) = self.elements.remove(&id) {
                reclaimed += 1;
                if let Some(parent_id) = element.parent {
                    if let Some(parent) = self.elements.get_mut(&parent_id) {
                        match &mut parent.value {
                            Value::Object(o) => o.detach_child(id),
                            Value::Array(a) => a.detach_child(id),
                            _ => {}
                        }
                    }
                }
            }
        }
        for element in self.elements.values_mut() {
            reclaimed += match &mut element.value {
                Value::Text(t) => t.collect_garbage(min_synced),
                Value::Tree(t) => t.collect_garbage(min_synced),
                _ => 0,
            };
        }
        reclaimed
    }

    pub fn tombstone_count(&self) -> usize {
        self.elements.values().filter(|e| !e.is_live()).count()
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.resolve_json(self.root_id)
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.to_json()).unwrap_or_default()
    }

    fn resolve_json(&self, id: TimeTicket) -> serde_json::Value {
        let element = match self.elements.get(&id) {
            Some(e) if e.is_live() => e,
            _ => return serde_json::Value::Null,
        };
        match &element.value {
            Value::Object(o) => {
                let map: serde_json::Map<String, serde_json::Value> = o
                    .iter()
                    .filter(|(_, child)| self.is_live(*child))
                    .map(|(k, child)| (k.to_string(), self.resolve_json(child)))
                    .collect();
                serde_json::Value::Object(map)
            }
            Value::Array(a) => serde_json::Value::Array(
                a.iter_ids()
                    .filter(|id| self.is_live(*id))
                    .map(|id| self.resolve_json(id))
                    .collect(),
            ),
            Value::Register(r) => r.to_json(),
            Value::Counter(c) => c.to_json(),
            Value::Text(t) => serde_json::Value::String(t.to_string_lossy()),
            Value::Tree(t) => serde_json::Value::String(t.to_xml()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitives::register::Register;

    fn actor(n: u8) -> crate::time::ActorId {
        crate::time::ActorId::new([n; 12])
    }

    fn t(lamport: u64, a: u8) -> TimeTicket {
        TimeTicket::new(lamport, 0, actor(a))
    }

    #[test]
    fn nested_object_resolves_through_the_arena() {
        let root_id = TimeTicket::INITIAL;
        let mut root = Root::new(root_id);
        let child_id = t(1, 1);
        root.element_mut(root_id)
            .unwrap()
            .as_object_mut()
            .unwrap()
            .set("name", child_id);
        root.register(Element::new(
            child_id,
            Some(root_id),
            Value::Register(Register::new(serde_json::json!("alice"), child_id)),
        ));
        assert_eq!(root.to_json(), serde_json::json!({"name": "alice"}));
    }

    #[test]
    fn garbage_collection_detaches_from_parent() {
        let root_id = TimeTicket::INITIAL;
        let mut root = Root::new(root_id);
        let child_id = t(1, 1);
        root.element_mut(root_id)
            .unwrap()
            .as_object_mut()
            .unwrap()
            .set("x", child_id);
        root.register(Element::new(
            child_id,
            Some(root_id),
            Value::Register(Register::new(serde_json::json!(1), child_id)),
        ));
        root.element_mut(child_id).unwrap().remove(t(2, 1));
        let mut vv = VersionVector::new();
        vv.set(actor(1), 2);
        assert_eq!(root.collect_garbage(&vv), 1);
        assert_eq!(root.to_json(), serde_json::json!({}));
        assert!(!root.contains(child_id));
    }
}
