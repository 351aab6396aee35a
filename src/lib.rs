//! `converge`: the client session, sync engine and transport boundary built
//! on top of `converge-crdt`. The CRDT algebra — logical time, the six
//! primitives, operations, change packs, GC — lives entirely in
//! `converge-crdt`; this crate only adds the parts that need a network and
//! a clock: `Client` (session lifecycle), `SyncEngine` (push/pull loop and
//! sync-mode state machine), and the `Transport`/`AuthTokenInjector` traits
//! the wire layer and auth layer implement.
pub mod client;
pub mod config;
pub mod error;
pub mod sync_engine;
pub mod transport;

/// An in-memory [`Transport`]/mock server, for tests that need to drive a
/// `Client`/`SyncEngine` without a real network.
pub mod mock_transport;

pub use client::Client;
pub use config::{ClientOptions, DocumentOptions};
pub use error::{ClientError, Result};
pub use sync_engine::{DocHandle, SyncEngine, SyncMode};
pub use transport::{
    ActivateClientRequest, ActivateClientResponse, AttachDocumentRequest, AttachDocumentResponse,
    AuthTokenInjector, DeactivateClientRequest, DetachDocumentRequest, PushPullRequest,
    PushPullResponse, RpcMethod, Transport, TransportError, WatchEvent,
};

pub use converge_crdt::{
    ActorId, Change, ChangePack, Checkpoint, CrdtError, DocKey, Document, Element,
    Event, NewValue, Operation, Root, SyncStatus, TimeTicket, Transaction, VersionVector,
};

/// Wires up `tracing` (env-filter + fmt + a `tracing-log` bridge + panic
/// logging), so an embedding app gets structured logs out of the box. Not
/// called automatically — the caller decides when process-wide logging is
/// safe to install.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    tracing_log::LogTracer::init().ok();
    let env = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_else(|_| "info".to_owned());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(env))
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
    log_panics::init();
}
