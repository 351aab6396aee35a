//! `converge-crdt`: the client-side CRDT document core — logical time, the
//! index-tree/RGA substrate, the six primitives, the operation/change wire
//! model, document orchestration and garbage collection. No networking; the
//! session, sync and transport layers live in the `converge` crate on top
//! of this one.
pub mod attrs;
pub mod change;
pub mod document;
pub mod element;
pub mod error;
pub mod gc;
pub mod operation;
pub mod primitives;
pub mod rga_split;
pub mod root;
pub mod split_table;
pub mod subscriber;
pub mod time;

pub use change::{Change, ChangePack, PresenceDelta, Snapshot};
pub use document::{DocKey, Document, Transaction};
pub use element::{Element, Value};
pub use error::{CrdtError, Result};
pub use operation::{NewValue, Operation};
pub use root::Root;
pub use subscriber::{
    DocumentStatus, Event, EventBus, OperationSummary, StreamConnectionStatus, SubscriptionId,
    SyncStatus, Unsubscribe,
};
pub use time::{ActorId, ChangeId, Checkpoint, TimeTicket, VersionVector};
