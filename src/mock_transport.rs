//! An in-memory mock [`Transport`] plus a tiny central-authority mock
//! server, used to drive end-to-end scenarios as integration tests without
//! a real network. Test-only scaffolding: no real sled/libp2p stack spun
//! up just to exercise CRDT convergence.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use converge_crdt::{ActorId, Change, ChangePack, Checkpoint, Document, Snapshot, VersionVector};
use futures::stream::BoxStream;
use tokio::sync::{broadcast, Mutex};

use crate::transport::{
    ActivateClientRequest, ActivateClientResponse, AttachDocumentRequest, AttachDocumentResponse,
    DeactivateClientRequest, DetachDocumentRequest, PushPullRequest, PushPullResponse, Transport,
    TransportError, WatchEvent,
};

/// A single log entry: a committed change plus the server-assigned
/// sequence number it was given on arrival.
struct LogEntry {
    server_seq: i64,
    change: Change,
}

struct DocState {
    log: Vec<LogEntry>,
    /// A server-side mirror document, replayed forward on every push, used
    /// purely to answer `to_json`/build snapshots without re-deriving state
    /// from the log each time.
    mirror: Document,
    /// The version vector each attached actor last reported in a push. The
    /// server folds these into `min_synced_version_vector` so a replica
    /// never reclaims a tombstone a slower peer hasn't seen yet. An actor's
    /// entry is removed on detach, so a departed peer no longer holds GC
    /// back.
    attached: HashMap<ActorId, VersionVector>,
}

impl DocState {
    fn new(doc_key: &str) -> Self {
        Self {
            log: Vec::new(),
            mirror: Document::new(doc_key),
            attached: HashMap::new(),
        }
    }

    /// The min-synced version vector across every currently-attached
    /// actor. `None` when no peer has reported in yet, so the caller can
    /// leave the field unset rather than claim everything is synced.
    fn min_synced_version_vector(&self) -> Option<VersionVector> {
        let mut iter = self.attached.values();
        let first = iter.next()?.clone();
        Some(iter.fold(first, |acc, vv| acc.min(vv)))
    }
}

/// Central authority: per-document change logs, actor allocation, and the
/// snapshot-lag threshold (default 500).
pub struct MockServer {
    next_actor: Mutex<u64>,
    docs: Mutex<HashMap<String, DocState>>,
    watchers: Mutex<HashMap<String, broadcast::Sender<WatchEvent>>>,
    snapshot_threshold: i64,
}

impl MockServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_actor: Mutex::new(1),
            docs: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            snapshot_threshold: 500,
        })
    }

    pub fn with_snapshot_threshold(threshold: i64) -> Arc<Self> {
        Arc::new(Self {
            next_actor: Mutex::new(1),
            docs: Mutex::new(HashMap::new()),
            watchers: Mutex::new(HashMap::new()),
            snapshot_threshold: threshold,
        })
    }

    async fn alloc_actor(&self) -> ActorId {
        let mut next = self.next_actor.lock().await;
        let n = *next;
        *next += 1;
        let mut bytes = [0u8; 12];
        bytes[4..12].copy_from_slice(&n.to_be_bytes());
        ActorId::new(bytes)
    }

    fn notify(&self, doc_key: &str) {
        if let Ok(watchers) = self.watchers.try_lock() {
            if let Some(tx) = watchers.get(doc_key) {
                let _ = tx.send(WatchEvent { doc_key: doc_key.to_string() });
            }
        }
    }

    async fn push_pull_locked(&self, req: PushPullRequest) -> Result<PushPullResponse, TransportError> {
        let doc_key = req.change_pack.doc_key.clone();
        let mut docs = self.docs.lock().await;
        let state = docs.entry(doc_key.clone()).or_insert_with(|| DocState::new(&doc_key));

        for change in req.change_pack.changes {
            let server_seq = state.log.len() as i64 + 1;
            let pack = ChangePack::new(doc_key.clone(), Checkpoint::new(server_seq, 0), vec![change.clone()]);
            state
                .mirror
                .apply_change_pack(pack)
                .map_err(|e| TransportError::FailedPrecondition(e.to_string()))?;
            state.log.push(LogEntry { server_seq, change });
        }

        if let Some(vv) = &req.change_pack.min_synced_version_vector {
            state.attached.insert(req.actor_id, vv.clone());
        } else {
            state.attached.entry(req.actor_id).or_insert_with(VersionVector::new);
        }
        let min_synced_version_vector = state.min_synced_version_vector();

        let since = req.change_pack.checkpoint.server_seq();
        let outgoing: Vec<Change> = state
            .log
            .iter()
            .filter(|e| e.server_seq > since && e.change.id.actor() != req.actor_id)
            .map(|e| e.change.clone())
            .collect();

        let highest_seq = state.log.last().map(|e| e.server_seq).unwrap_or(0);
        let client_seq_acked = req
            .change_pack
            .changes_client_seq_hint()
            .unwrap_or(0);

        let lag = highest_seq - since;
        let snapshot = if lag > self.snapshot_threshold {
            Some(Snapshot {
                root: state.mirror.clone_root(),
                version_vector: state.mirror.version_vector().clone(),
                server_seq: highest_seq,
            })
        } else {
            None
        };

        drop(docs);
        self.notify(&doc_key);

        Ok(PushPullResponse {
            change_pack: ChangePack {
                doc_key,
                checkpoint: Checkpoint::new(highest_seq, client_seq_acked),
                is_removed: false,
                changes: if snapshot.is_some() { Vec::new() } else { outgoing },
                snapshot,
                min_synced_version_vector,
            },
        })
    }

    async fn detach_document_locked(&self, doc_key: &str, actor_id: ActorId) {
        let mut docs = self.docs.lock().await;
        if let Some(state) = docs.get_mut(doc_key) {
            state.attached.remove(&actor_id);
        }
    }
}

/// Small helper extracting "the highest client_seq among this push's
/// changes" without the server needing to track per-actor state beyond the
/// log itself.
trait ChangePackExt {
    fn changes_client_seq_hint(&self) -> Option<u32>;
}

impl ChangePackExt for ChangePack {
    fn changes_client_seq_hint(&self) -> Option<u32> {
        self.changes.iter().map(|c| c.id.client_seq()).max()
    }
}

/// The [`Transport`] implementation that routes every RPC to a shared
/// [`MockServer`], simulating a single in-process relay all clients talk
/// to.
pub struct MockTransport {
    server: Arc<MockServer>,
}

impl MockTransport {
    pub fn new(server: Arc<MockServer>) -> Self {
        Self { server }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn activate_client(
        &self,
        _req: ActivateClientRequest,
    ) -> Result<ActivateClientResponse, TransportError> {
        Ok(ActivateClientResponse {
            actor_id: self.server.alloc_actor().await,
        })
    }

    async fn deactivate_client(&self, _req: DeactivateClientRequest) -> Result<(), TransportError> {
        Ok(())
    }

    async fn attach_document(
        &self,
        req: AttachDocumentRequest,
    ) -> Result<AttachDocumentResponse, TransportError> {
        let resp = self
            .server
            .push_pull_locked(PushPullRequest {
                actor_id: req.actor_id,
                change_pack: req.change_pack,
            })
            .await?;
        Ok(AttachDocumentResponse {
            change_pack: resp.change_pack,
        })
    }

    async fn detach_document(&self, req: DetachDocumentRequest) -> Result<(), TransportError> {
        self.server.detach_document_locked(&req.doc_key, req.actor_id).await;
        Ok(())
    }

    async fn push_pull(&self, req: PushPullRequest) -> Result<PushPullResponse, TransportError> {
        self.server.push_pull_locked(req).await
    }

    async fn watch_document(
        &self,
        _actor_id: ActorId,
        doc_key: String,
    ) -> Result<BoxStream<'static, WatchEvent>, TransportError> {
        let mut watchers = self.server.watchers.lock().await;
        let tx = watchers
            .entry(doc_key)
            .or_insert_with(|| broadcast::channel(64).0)
            .clone();
        let rx = tx.subscribe();
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            loop {
                match rx.recv().await {
                    Ok(event) => return Some((event, rx)),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });
        Ok(Box::pin(stream))
    }

    async fn broadcast(
        &self,
        _actor_id: ActorId,
        _doc_key: String,
        _topic: String,
        _payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        Ok(())
    }
}
