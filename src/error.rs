//! The session/sync-layer subset of the error taxonomy. Document-
//! lifecycle and in-process CRDT errors are [`converge_crdt::CrdtError`];
//! this enum adds the failure modes that only make sense once a transport
//! is involved (RPC classification, auth, schema) and wraps the core error
//! so callers driving `Client`/`SyncEngine` only ever match one type.
use converge_crdt::CrdtError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Bubbled up unchanged from the CRDT core (document lifecycle misuse,
    /// invalid arguments, etc).
    #[error(transparent)]
    Crdt(#[from] CrdtError),

    /// Raised inside an `update()` closure by the schema-validation hook.
    /// The closure aborts and the live root is unchanged.
    #[error("schema validation failed: {message}")]
    SchemaValidationFailed { message: String },

    /// The transport classified the failing RPC as requiring a fresh auth
    /// token. `reason` forwards the server's message so the caller's
    /// [`crate::transport::AuthTokenInjector`] can distinguish "no token"
    /// from "expired token".
    #[error("unauthenticated: {reason}")]
    Unauthenticated { reason: String },

    /// Fatal for the current session; the caller must re-authenticate or
    /// reconfigure out of band.
    #[error("permission denied")]
    PermissionDenied,

    /// The sync loop terminates; the document remains attached but stale
    /// until the caller takes action.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Retried by the sync loop with `retrySyncLoopDelay` backoff.
    #[error("transient transport error: {0}")]
    Transient(String),

    /// Broadcast-specific: the payload could not be serialized. Surfaced
    /// only via the broadcast error handler, never the sync/auth channels.
    #[error("broadcast payload not serializable: {0}")]
    PayloadNotSerializable(String),

    /// No [`crate::transport::AuthTokenInjector`] was configured but the
    /// transport required one.
    #[error("no auth token available: {0}")]
    NoAuthToken(String),

    /// Operation attempted on a document the client has no record of.
    #[error("document {0:?} is not registered with this client")]
    UnknownDocument(String),

    /// `Client::attach` called while the client is not active.
    #[error("client is not active")]
    ClientNotActive,
}

pub type Result<T> = std::result::Result<T, ClientError>;
