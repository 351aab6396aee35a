//! `Element`: the tagged union every CRDT primitive is wrapped in once it
//! is reachable from the document root. Elements live in
//! [`crate::root::Root`]'s flat arena, addressed by `createdAt`;
//! `Object`/`Array` hold child identities rather than owning child
//! `Element`s directly, so any operation can resolve its `parentCreatedAt`
//! in O(1) regardless of nesting depth.
use crate::primitives::array::Array;
use crate::primitives::counter::Counter;
use crate::primitives::object::Object;
use crate::primitives::register::Register;
use crate::primitives::text::Text;
use crate::primitives::tree::Tree;
use crate::time::TimeTicket;

#[derive(Clone)]
pub enum Value {
    Object(Object),
    Array(Array),
    Register(Register),
    Counter(Counter),
    Text(Text),
    Tree(Tree),
}

/// A value reachable from the document root, carrying the identity,
/// parent link and tombstone state every primitive shares regardless of
/// kind. `parent` is `None` only for the document root itself.
#[derive(Clone)]
pub struct Element {
    pub created_at: TimeTicket,
    pub parent: Option<TimeTicket>,
    pub removed_at: Option<TimeTicket>,
    pub value: Value,
}

impl Element {
    pub fn new(created_at: TimeTicket, parent: Option<TimeTicket>, value: Value) -> Self {
        Self {
            created_at,
            parent,
            removed_at: None,
            value,
        }
    }

    pub fn is_live(&self) -> bool {
        self.removed_at.is_none()
    }

    /// Tombstones this element, keeping `removedAt` monotone under replay.
    pub fn remove(&mut self, removed_at: TimeTicket) {
        if self.removed_at.map(|r| r < removed_at).unwrap_or(true) {
            self.removed_at = Some(removed_at);
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match &self.value {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Object> {
        match &mut self.value {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match &self.value {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut Array> {
        match &mut self.value {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_text_mut(&mut self) -> Option<&mut Text> {
        match &mut self.value {
            Value::Text(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_tree_mut(&mut self) -> Option<&mut Tree> {
        match &mut self.value {
            Value::Tree(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_counter_mut(&mut self) -> Option<&mut Counter> {
        match &mut self.value {
            Value::Counter(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_register_mut(&mut self) -> Option<&mut Register> {
        match &mut self.value {
            Value::Register(r) => Some(r),
            _ => None,
        }
    }
}
