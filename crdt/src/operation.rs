//! `Operation`: the tagged operation envelope applied against a live
//! [`crate::root::Root`]. Every variant carries `parent_created_at` (the
//! container) and `executed_at`; local generation (`document::update`)
//! resolves any index/path arguments into stable positions before an
//! operation is built, so `apply` never needs to know whether it's running
//! against the replica that generated the op or a remote one.
use crate::element::{Element, Value};
use crate::error::{CrdtError, Result};
use crate::primitives::counter::Counter;
use crate::primitives::object::Object;
use crate::primitives::register::Register;
use crate::primitives::text::Text;
use crate::primitives::tree::{Tree, TreeNodeSpec, TreePos};
use crate::rga_split::Pos;
use crate::root::Root;
use crate::time::{ActorId, TimeTicket};
use std::collections::BTreeMap;

/// What a `Set`/`Add` operation materializes. A freshly-created container
/// starts empty; its own contents arrive as further operations against its
/// `created_at` within the same or a later change.
#[derive(Clone, Debug)]
pub enum NewValue {
    Object,
    Array,
    Register(serde_json::Value),
    Counter(i64),
    Text,
    Tree(String),
}

impl NewValue {
    fn materialize(&self, created_at: TimeTicket) -> Value {
        match self {
            NewValue::Object => Value::Object(Object::new()),
            NewValue::Array => Value::Array(crate::primitives::array::Array::new()),
            NewValue::Register(v) => Value::Register(Register::new(v.clone(), created_at)),
            NewValue::Counter(v) => Value::Counter(Counter::new(*v, created_at)),
            NewValue::Text => Value::Text(Text::new()),
            NewValue::Tree(root_tag) => Value::Tree(Tree::new(root_tag, created_at)),
        }
    }
}

#[derive(Clone, Debug)]
pub enum Operation {
    Set {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        key: String,
        value: NewValue,
    },
    Add {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        prev_created_at: Option<TimeTicket>,
        value: NewValue,
    },
    Move {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        prev_created_at: Option<TimeTicket>,
        created_at: TimeTicket,
    },
    Remove {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        created_at: TimeTicket,
    },
    Increase {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        value: i64,
    },
    Edit {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from: Pos,
        to: Pos,
        content: String,
        attrs: BTreeMap<String, String>,
        /// Per-actor greatest run identity covered by `[from, to)` at
        /// generation time, so a receiver can exempt a run a concurrent
        /// insert added inside this range from this delete.
        max_created_at_map: BTreeMap<ActorId, TimeTicket>,
    },
    Style {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from: Pos,
        to: Pos,
        attrs: BTreeMap<String, String>,
        remove_keys: Vec<String>,
    },
    TreeEdit {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        contents: Vec<TreeNodeSpec>,
        split_level: u32,
        /// Per-actor greatest node identity covered by `[from, to)` at
        /// generation time, mirroring `Edit::max_created_at_map` for the
        /// tree's own node identities.
        max_created_at_map: BTreeMap<ActorId, TimeTicket>,
    },
    TreeStyle {
        parent_created_at: TimeTicket,
        executed_at: TimeTicket,
        from: TreePos,
        to: TreePos,
        attrs: BTreeMap<String, String>,
        remove_keys: Vec<String>,
    },
}

impl Operation {
    pub fn parent_created_at(&self) -> TimeTicket {
        match self {
            Operation::Set { parent_created_at, .. }
            | Operation::Add { parent_created_at, .. }
            | Operation::Move { parent_created_at, .. }
            | Operation::Remove { parent_created_at, .. }
            | Operation::Increase { parent_created_at, .. }
            | Operation::Edit { parent_created_at, .. }
            | Operation::Style { parent_created_at, .. }
            | Operation::TreeEdit { parent_created_at, .. }
            | Operation::TreeStyle { parent_created_at, .. } => *parent_created_at,
        }
    }

    pub fn executed_at(&self) -> TimeTicket {
        match self {
            Operation::Set { executed_at, .. }
            | Operation::Add { executed_at, .. }
            | Operation::Move { executed_at, .. }
            | Operation::Remove { executed_at, .. }
            | Operation::Increase { executed_at, .. }
            | Operation::Edit { executed_at, .. }
            | Operation::Style { executed_at, .. }
            | Operation::TreeEdit { executed_at, .. }
            | Operation::TreeStyle { executed_at, .. } => *executed_at,
        }
    }

    /// Applies this operation against `root`. Idempotent: replaying the
    /// same `(parent_created_at, executed_at)` is always a no-op on the
    /// second application, since every primitive's mutations are
    /// timestamp-gated.
    ///
    /// If the parent was tombstoned by a remote change since this
    /// operation was generated, application is a silent no-op rather than
    /// an error — only a genuinely missing parent (one the replica never
    /// learned of) is an error. This also makes replaying a document's own
    /// pending operations against a freshly-installed snapshot safe: any
    /// operation whose target the snapshot already tombstoned just drops.
    pub fn apply(&self, root: &mut Root) -> Result<()> {
        let parent = self.parent_created_at();
        if !root.contains(parent) {
            return Err(CrdtError::InvalidArgument(format!(
                "operation target {:?} not found",
                parent
            )));
        }
        if !root.is_live(parent) {
            return Ok(());
        }
        match self {
            Operation::Set { executed_at, key, value, .. } => {
                use crate::primitives::object::SetOutcome;
                let outcome = root.element_mut(parent)?.as_object_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("Set target is not an Object".into()))?
                    .set(key, *executed_at);
                let mut element = Element::new(*executed_at, Some(parent), value.materialize(*executed_at));
                match outcome {
                    SetOutcome::Applied { superseded } => {
                        if let Some(old_id) = superseded {
                            if let Ok(old) = root.element_mut(old_id) {
                                old.remove(*executed_at);
                            }
                        }
                    }
                    SetOutcome::Stale => element.remove(*executed_at),
                }
                root.register(element);
                Ok(())
            }
            Operation::Add { executed_at, prev_created_at, value, .. } => {
                root.element_mut(parent)?.as_array_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("Add target is not an Array".into()))?
                    .insert_after(*prev_created_at, *executed_at)?;
                root.register(Element::new(*executed_at, Some(parent), value.materialize(*executed_at)));
                Ok(())
            }
            Operation::Move { prev_created_at, created_at, executed_at, .. } => {
                root.element_mut(parent)?.as_array_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("Move target is not an Array".into()))?
                    .move_after(*created_at, *prev_created_at, *executed_at)
            }
            Operation::Remove { created_at, executed_at, .. } => {
                let el = root.element_mut(parent)?;
                let is_array = el.as_array().is_some();
                if is_array {
                    if !el.as_array().unwrap().contains(*created_at) {
                        return Err(CrdtError::InvalidArgument(format!("array target {:?} not found", created_at)));
                    }
                } else if el.as_object().is_none() {
                    return Err(CrdtError::InvalidArgument("Remove target is not an Object or Array".into()));
                }
                if let Ok(child) = root.element_mut(*created_at) {
                    child.remove(*executed_at);
                }
                Ok(())
            }
            Operation::Increase { value, executed_at, .. } => {
                root.element_mut(parent)?.as_counter_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("Increase target is not a Counter".into()))?
                    .increase(*value, *executed_at);
                Ok(())
            }
            Operation::Edit { from, to, content, attrs, max_created_at_map, executed_at, .. } => {
                let text = root.element_mut(parent)?.as_text_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("Edit target is not Text".into()))?;
                text.apply_edit(*from, *to, content, max_created_at_map, *executed_at);
                if !attrs.is_empty() {
                    text.apply_style(*from, *to, attrs, *executed_at);
                }
                Ok(())
            }
            Operation::Style { from, to, attrs, remove_keys, executed_at, .. } => {
                let text = root.element_mut(parent)?.as_text_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("Style target is not Text".into()))?;
                if !attrs.is_empty() {
                    text.apply_style(*from, *to, attrs, *executed_at);
                }
                if !remove_keys.is_empty() {
                    text.apply_remove_style(*from, *to, remove_keys, *executed_at);
                }
                Ok(())
            }
            Operation::TreeEdit { from, to, contents, split_level, max_created_at_map, executed_at, .. } => {
                root.element_mut(parent)?.as_tree_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("TreeEdit target is not a Tree".into()))?
                    .edit_by_pos(*from, *to, contents, *split_level, max_created_at_map, *executed_at)
            }
            Operation::TreeStyle { from, to, attrs, remove_keys, executed_at, .. } => {
                let tree = root.element_mut(parent)?.as_tree_mut()
                    .ok_or_else(|| CrdtError::InvalidArgument("TreeStyle target is not a Tree".into()))?;
                for (key, value) in attrs {
                    tree.apply_style_by_pos(*from, *to, key, value.clone(), *executed_at)?;
                }
                for key in remove_keys {
                    tree.apply_remove_style_by_pos(*from, *to, key, *executed_at)?;
                }
                Ok(())
            }
        }
    }
}
