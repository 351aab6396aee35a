//! Event bus for [`crate::document::Document`]. Three logical channels —
//! `Document`, `SyncStatus` and `AuthError` — are modeled as one typed
//! [`Event`] enum so a single registry can dispatch all of them; callers
//! that only care about one channel filter in their listener rather than
//! splitting into separate bus types.
use crate::operation::Operation;
use crate::time::TimeTicket;

/// A brief summary of one applied operation, for `LocalChange`/`RemoteChange`
/// listeners that want to know what happened without re-deriving it from the
/// full `Operation` payload.
#[derive(Clone, Debug)]
pub struct OperationSummary {
    pub parent_created_at: TimeTicket,
    pub kind: &'static str,
}

impl From<&Operation> for OperationSummary {
    fn from(op: &Operation) -> Self {
        let kind = match op {
            Operation::Set { .. } => "set",
            Operation::Add { .. } => "add",
            Operation::Move { .. } => "move",
            Operation::Remove { .. } => "remove",
            Operation::Increase { .. } => "increase",
            Operation::Edit { .. } => "edit",
            Operation::Style { .. } => "style",
            Operation::TreeEdit { .. } => "tree_edit",
            Operation::TreeStyle { .. } => "tree_style",
        };
        Self {
            parent_created_at: op.parent_created_at(),
            kind,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DocumentStatus {
    Detached,
    Attached,
    Removed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncStatus {
    Synced,
    SyncFailed,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamConnectionStatus {
    Connected,
    Disconnected,
}

/// The discrete document/session/sync events, unified for dispatch.
#[derive(Clone, Debug)]
pub enum Event {
    DocumentStatusChanged(DocumentStatus),
    StreamConnectionStatusChanged(StreamConnectionStatus),
    SyncStatusChanged(SyncStatus),
    LocalChange(Vec<OperationSummary>),
    RemoteChange(Vec<OperationSummary>),
    AuthError { reason: String, method: String },
    Broadcast { topic: String, payload: Vec<u8> },
}

pub type SubscriptionId = u64;

struct Listener {
    id: SubscriptionId,
    path_prefix: Option<String>,
    callback: Box<dyn FnMut(&Event) + Send>,
}

/// Handle returned by [`EventBus::subscribe`]; dropping it does not
/// unsubscribe (callers must call [`EventBus::unsubscribe`] explicitly).
pub struct Unsubscribe(SubscriptionId);

impl Unsubscribe {
    pub fn id(&self) -> SubscriptionId {
        self.0
    }
}

/// The event dispatcher owned by a [`crate::document::Document`]. Listener
/// callbacks for one change are invoked in registration order and complete
/// before the next event is dispatched.
#[derive(Default)]
pub struct EventBus {
    next_id: SubscriptionId,
    listeners: Vec<Listener>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to every event, optionally filtered by `path_prefix` for
    /// `Document`-channel (LocalChange/RemoteChange) events; all other event
    /// kinds are delivered regardless of `path_prefix`, since only
    /// `Document`-channel events carry a path.
    pub fn subscribe(
        &mut self,
        path_prefix: Option<String>,
        callback: impl FnMut(&Event) + Send + 'static,
    ) -> Unsubscribe {
        self.next_id += 1;
        let id = self.next_id;
        self.listeners.push(Listener {
            id,
            path_prefix,
            callback: Box::new(callback),
        });
        Unsubscribe(id)
    }

    pub fn unsubscribe(&mut self, handle: &Unsubscribe) {
        self.listeners.retain(|l| l.id != handle.0);
    }

    pub fn emit(&mut self, event: Event) {
        for listener in &mut self.listeners {
            if Self::matches_prefix(listener.path_prefix.as_deref(), &event) {
                (listener.callback)(&event);
            }
        }
    }

    fn matches_prefix(prefix: Option<&str>, event: &Event) -> bool {
        let prefix = match prefix {
            None => return true,
            Some(p) => p,
        };
        match event {
            // Path-prefix filtering against operation targets would require
            // resolving each `parent_created_at` back to a root-relative
            // path; only the root path ("" or "$") is supported as a
            // pass-through filter, every other prefix is left to the
            // listener to re-check against resolved paths it fetches itself.
            Event::LocalChange(_) | Event::RemoteChange(_) => prefix.is_empty() || prefix == "$",
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn listeners_fire_in_registration_order() {
        let mut bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        bus.subscribe(None, move |_| o1.lock().unwrap().push(1));
        bus.subscribe(None, move |_| o2.lock().unwrap().push(2));
        bus.emit(Event::SyncStatusChanged(SyncStatus::Synced));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = EventBus::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        let handle = bus.subscribe(None, move |_| *c.lock().unwrap() += 1);
        bus.emit(Event::SyncStatusChanged(SyncStatus::Synced));
        bus.unsubscribe(&handle);
        bus.emit(Event::SyncStatusChanged(SyncStatus::Synced));
        assert_eq!(*count.lock().unwrap(), 1);
    }
}
