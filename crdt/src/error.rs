//! The CRDT core's error taxonomy: document-lifecycle and in-process
//! errors. The sync/transport subset lives in the root crate's
//! `ClientError` since it classifies RPC failures.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CrdtError {
    /// `attach` called on a document that isn't `Detached`.
    #[error("document is not detached")]
    DocumentNotDetached,

    /// `detach` (or any attached-only operation) called on a document that
    /// isn't `Attached`.
    #[error("document is not attached")]
    DocumentNotAttached,

    /// The document has transitioned to `Removed`; no further operations
    /// are possible.
    #[error("document has been removed")]
    DocumentRemoved,

    /// Raised inside an `update()` closure by the schema-validation hook.
    /// The closure aborts and the live root is left unchanged.
    #[error("schema validation failed: {message}")]
    SchemaValidationFailed { message: String },

    /// Path/index out of range, mixed-type bulk insert, empty text node in
    /// a bulk insert, or a cross-depth tree edit.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CrdtError>;
