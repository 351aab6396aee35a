//! The wire transport boundary: an async `Transport` trait standing in for
//! the RPC surface (`ActivateClient`, `DeactivateClient`, `AttachDocument`,
//! `DetachDocument`, `PushPullChanges`, `WatchDocument`, `Broadcast`) plus
//! the server-side auth-token refresh path. The core emits typed request
//! payloads and consumes typed response payloads; bytes on the wire are
//! the transport's problem.
use async_trait::async_trait;
use converge_crdt::{ActorId, ChangePack, DocKey};
use futures::stream::BoxStream;
use std::fmt;

use crate::error::ClientError;

/// Identifies which RPC failed, for retry/error-classification logging and
/// for the reason string threaded to [`AuthTokenInjector`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RpcMethod {
    ActivateClient,
    DeactivateClient,
    AttachDocument,
    DetachDocument,
    PushPull,
    WatchDocument,
    Broadcast,
}

impl fmt::Display for RpcMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RpcMethod::ActivateClient => "ActivateClient",
            RpcMethod::DeactivateClient => "DeactivateClient",
            RpcMethod::AttachDocument => "AttachDocument",
            RpcMethod::DetachDocument => "DetachDocument",
            RpcMethod::PushPull => "PushPullChanges",
            RpcMethod::WatchDocument => "WatchDocument",
            RpcMethod::Broadcast => "Broadcast",
        };
        f.write_str(name)
    }
}

/// A transport-level failure, classified so the sync engine can decide
/// retry vs. terminate vs. refresh-and-retry without string-matching.
#[derive(Debug, Clone)]
pub enum TransportError {
    Unauthenticated { reason: String },
    PermissionDenied,
    FailedPrecondition(String),
    Transient(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Unauthenticated { reason } => write!(f, "unauthenticated: {reason}"),
            TransportError::PermissionDenied => write!(f, "permission denied"),
            TransportError::FailedPrecondition(msg) => write!(f, "failed precondition: {msg}"),
            TransportError::Transient(msg) => write!(f, "transient: {msg}"),
        }
    }
}

impl std::error::Error for TransportError {}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthenticated { reason } => ClientError::Unauthenticated { reason },
            TransportError::PermissionDenied => ClientError::PermissionDenied,
            TransportError::FailedPrecondition(msg) => ClientError::FailedPrecondition(msg),
            TransportError::Transient(msg) => ClientError::Transient(msg),
        }
    }
}

pub struct ActivateClientRequest {
    pub client_key: String,
    pub api_key: Option<String>,
    pub auth_token: Option<String>,
}

pub struct ActivateClientResponse {
    pub actor_id: ActorId,
}

pub struct DeactivateClientRequest {
    pub actor_id: ActorId,
}

pub struct AttachDocumentRequest {
    pub actor_id: ActorId,
    pub change_pack: ChangePack,
    pub schema_key: Option<String>,
}

pub struct AttachDocumentResponse {
    pub change_pack: ChangePack,
}

pub struct DetachDocumentRequest {
    pub actor_id: ActorId,
    pub doc_key: DocKey,
}

pub struct PushPullRequest {
    pub actor_id: ActorId,
    pub change_pack: ChangePack,
}

pub struct PushPullResponse {
    pub change_pack: ChangePack,
}

/// A server-initiated notification that out-of-cycle changes are available
/// for `doc_key`; triggers an out-of-cycle push-pull rather than carrying
/// the changes itself.
#[derive(Clone, Debug)]
pub struct WatchEvent {
    pub doc_key: DocKey,
}

/// The RPC surface this crate never implements itself, standing in for
/// the real wire transport. A concrete implementation owns serialization,
/// connection pooling and the actual network calls; this crate only ever
/// sees the typed payloads above.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn activate_client(
        &self,
        req: ActivateClientRequest,
    ) -> Result<ActivateClientResponse, TransportError>;

    async fn deactivate_client(&self, req: DeactivateClientRequest) -> Result<(), TransportError>;

    async fn attach_document(
        &self,
        req: AttachDocumentRequest,
    ) -> Result<AttachDocumentResponse, TransportError>;

    async fn detach_document(&self, req: DetachDocumentRequest) -> Result<(), TransportError>;

    async fn push_pull(&self, req: PushPullRequest) -> Result<PushPullResponse, TransportError>;

    /// Opens the realtime watch stream for `doc_key`. Returns a stream of
    /// server-initiated notifications; the sync engine reconnects on
    /// stream error after `reconnectStreamDelay`.
    async fn watch_document(
        &self,
        actor_id: ActorId,
        doc_key: DocKey,
    ) -> Result<BoxStream<'static, WatchEvent>, TransportError>;

    async fn broadcast(
        &self,
        actor_id: ActorId,
        doc_key: DocKey,
        topic: String,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;
}

/// Callback invoked at session start and on every `Unauthenticated` RPC
/// failure. `reason` forwards the server's error message (e.g. `"expired
/// token"`) so the caller can distinguish "no token yet" from "token
/// expired".
#[async_trait]
pub trait AuthTokenInjector: Send + Sync {
    async fn get_token(&self, reason: Option<&str>) -> anyhow::Result<String>;
}
