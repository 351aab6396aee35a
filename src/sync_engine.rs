//! `SyncEngine`: the push/pull loop, realtime watch stream and sync-mode
//! state machine that drives one [`converge_crdt::Document`].
//!
//! One engine per attached document; the `Client` owns a map of them. Each
//! engine holds a handle to its document's state as an
//! [`std::sync::Arc`]-shared [`tokio::sync::Mutex`] rather than a bespoke
//! command channel, since there's only one independent mutable resource to
//! serialize per document.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use converge_crdt::{ActorId, DocKey, Document, StreamConnectionStatus, SyncStatus};
use futures::StreamExt;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep};

use crate::config::ClientOptions;
use crate::error::{ClientError, Result};
use crate::transport::{PushPullRequest, RpcMethod, Transport, TransportError, WatchEvent};

/// The sync-mode state machine governing how a document's engine behaves.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SyncMode {
    /// Only explicit `sync(doc)` calls issue a push-pull RPC.
    Manual,
    /// The sync loop pushes local changes and pulls/applies server changes
    /// on every tick and whenever the watch stream fires.
    RealtimePushPull,
    /// The sync loop pushes local changes but discards whatever the server
    /// returns; no `RemoteChange` fires and no tombstone reclamation
    /// happens on what the server sent; this can accumulate tombstones
    /// across a long push-only session.
    RealtimePushOnly,
    /// Neither pushes nor pulls; pending changes accumulate.
    RealtimeSyncOff,
}

/// A shared handle to one attached document's state, serializing access so
/// the root is never observed mid-operation.
pub type DocHandle = Arc<Mutex<Document>>;

pub struct SyncEngine<T: Transport + 'static> {
    doc_key: DocKey,
    actor: ActorId,
    transport: Arc<T>,
    doc: DocHandle,
    options: ClientOptions,
    mode_tx: watch::Sender<SyncMode>,
    mode_rx: watch::Receiver<SyncMode>,
    cancelled: Arc<AtomicBool>,
    loop_handle: Option<JoinHandle<()>>,
    watch_handle: Option<JoinHandle<()>>,
}

impl<T: Transport + 'static> SyncEngine<T> {
    pub fn new(
        doc_key: DocKey,
        actor: ActorId,
        transport: Arc<T>,
        doc: DocHandle,
        options: ClientOptions,
        initial_mode: SyncMode,
    ) -> Self {
        let (mode_tx, mode_rx) = watch::channel(initial_mode);
        Self {
            doc_key,
            actor,
            transport,
            doc,
            options,
            mode_tx,
            mode_rx,
            cancelled: Arc::new(AtomicBool::new(false)),
            loop_handle: None,
            watch_handle: None,
        }
    }

    pub fn mode(&self) -> SyncMode {
        *self.mode_rx.borrow()
    }

    /// `changeSyncMode`. Transitions are idempotent; resuming from
    /// push-only or sync-off to push-pull performs a catch-up pull and
    /// fires `SyncStatusChanged(synced)` exactly once, even if nothing was
    /// transferred.
    pub async fn change_sync_mode(&mut self, mode: SyncMode) -> Result<()> {
        let previous = self.mode();
        if previous == mode {
            return Ok(());
        }
        self.mode_tx.send_replace(mode);
        let resuming_to_push_pull = mode == SyncMode::RealtimePushPull
            && matches!(previous, SyncMode::RealtimePushOnly | SyncMode::RealtimeSyncOff | SyncMode::Manual);
        if resuming_to_push_pull {
            self.catch_up().await?;
        }
        Ok(())
    }

    /// A catch-up pull on resuming realtime push-pull: always emits
    /// `SyncStatusChanged(synced)` once, even with nothing pending.
    async fn catch_up(&self) -> Result<()> {
        match push_pull_once(&self.transport, &self.doc, self.actor, SyncMode::RealtimePushPull).await {
            Ok(()) => Ok(()),
            Err(ClientError::Unauthenticated { reason }) => {
                self.refresh_token(RpcMethod::PushPull, &reason).await?;
                push_pull_once(&self.transport, &self.doc, self.actor, SyncMode::RealtimePushPull).await
            }
            Err(err) => {
                let mut doc = self.doc.lock().await;
                doc.emit_sync_status(SyncStatus::SyncFailed);
                Err(err)
            }
        }
    }

    /// Explicit manual `sync(doc)` under `SyncMode::Manual`.
    pub async fn sync_once(&self) -> Result<()> {
        match push_pull_once(&self.transport, &self.doc, self.actor, self.mode()).await {
            Ok(()) => Ok(()),
            Err(ClientError::Unauthenticated { reason }) => {
                self.refresh_token(RpcMethod::PushPull, &reason).await?;
                push_pull_once(&self.transport, &self.doc, self.actor, self.mode()).await
            }
            Err(err) => Err(err),
        }
    }

    async fn refresh_token(&self, method: RpcMethod, reason: &str) -> Result<()> {
        {
            let mut doc = self.doc.lock().await;
            doc.emit_auth_error(reason.to_string(), method.to_string());
        }
        match &self.options.auth_token_injector {
            Some(injector) => {
                injector
                    .get_token(Some(reason))
                    .await
                    .map_err(|e| ClientError::NoAuthToken(e.to_string()))?;
                Ok(())
            }
            None => Err(ClientError::NoAuthToken(reason.to_string())),
        }
    }

    /// Spawns the sync loop and the realtime watch stream. A no-op if
    /// already started.
    pub fn start(&mut self) {
        if self.loop_handle.is_some() {
            return;
        }
        self.cancelled.store(false, Ordering::SeqCst);
        self.loop_handle = Some(tokio::spawn(run_sync_loop(
            self.transport.clone(),
            self.doc.clone(),
            self.actor,
            self.mode_rx.clone(),
            self.options.clone(),
            self.cancelled.clone(),
        )));
        self.watch_handle = Some(tokio::spawn(run_watch_stream(
            self.transport.clone(),
            self.doc.clone(),
            self.doc_key.clone(),
            self.actor,
            self.mode_rx.clone(),
            self.options.clone(),
            self.cancelled.clone(),
        )));
    }

    /// Cancels the sync loop and watch stream. `deactivate`/`detach` must
    /// cancel all in-flight sync activity for this document.
    pub fn stop(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.take() {
            handle.abort();
        }
        if let Some(handle) = self.watch_handle.take() {
            handle.abort();
        }
    }
}

impl<T: Transport + 'static> Drop for SyncEngine<T> {
    fn drop(&mut self) {
        self.stop();
    }
}

/// One push-pull exchange: builds the request from pending changes,
/// applies the response according to `mode`, and drops acked pending
/// changes.
async fn push_pull_once<T: Transport>(
    transport: &T,
    doc: &DocHandle,
    actor: ActorId,
    mode: SyncMode,
) -> Result<()> {
    let pack = {
        let doc = doc.lock().await;
        doc.create_change_pack()
    };
    let req = PushPullRequest {
        actor_id: actor,
        change_pack: pack,
    };
    let resp = transport.push_pull(req).await?;
    let mut doc = doc.lock().await;
    match mode {
        SyncMode::RealtimePushOnly => {
            // Server changes in push-only mode are discarded untouched;
            // only the push side is acknowledged.
            doc.acknowledge_push_only(resp.change_pack.checkpoint.client_seq());
        }
        _ => {
            let checkpoint = resp.change_pack.checkpoint;
            doc.apply_change_pack(resp.change_pack)?;
            doc.acknowledge_push(checkpoint);
        }
    }
    Ok(())
}

/// The realtime sync loop. Manual and sync-off modes only wait;
/// push-pull and push-only modes issue a push-pull whenever local changes
/// are pending. On a transient failure, backs off `retrySyncLoopDelay` and
/// retries; on `Unauthenticated`, calls the auth injector and retries
/// immediately; on `FailedPrecondition`, the loop terminates.
async fn run_sync_loop<T: Transport>(
    transport: Arc<T>,
    doc: DocHandle,
    actor: ActorId,
    mut mode_rx: watch::Receiver<SyncMode>,
    options: ClientOptions,
    cancelled: Arc<AtomicBool>,
) {
    let mut ticker = interval(options.sync_loop_duration);
    loop {
        ticker.tick().await;
        if cancelled.load(Ordering::SeqCst) {
            return;
        }
        let mode = *mode_rx.borrow_and_update();
        if !matches!(mode, SyncMode::RealtimePushPull | SyncMode::RealtimePushOnly) {
            continue;
        }
        let has_pending = doc.lock().await.has_pending_changes();
        if !has_pending {
            continue;
        }
        match push_pull_once(&*transport, &doc, actor, mode).await {
            Ok(()) => {}
            Err(ClientError::Unauthenticated { reason }) => {
                tracing::warn!("push-pull unauthenticated: {reason}");
                {
                    let mut d = doc.lock().await;
                    d.emit_auth_error(reason.clone(), RpcMethod::PushPull.to_string());
                }
                if let Some(injector) = &options.auth_token_injector {
                    if injector.get_token(Some(&reason)).await.is_ok() {
                        continue;
                    }
                }
                sleep(options.retry_sync_loop_delay).await;
            }
            Err(ClientError::FailedPrecondition(msg)) => {
                tracing::error!("sync loop terminating: {msg}");
                let mut d = doc.lock().await;
                d.emit_sync_status(SyncStatus::SyncFailed);
                return;
            }
            Err(err) => {
                tracing::debug!("transient push-pull failure, retrying: {err}");
                let mut d = doc.lock().await;
                d.emit_sync_status(SyncStatus::SyncFailed);
                drop(d);
                sleep(options.retry_sync_loop_delay).await;
            }
        }
    }
}

/// The realtime watch stream: server-initiated notifications
/// trigger an out-of-cycle push-pull. Reconnects after
/// `reconnectStreamDelay` on stream error, emitting
/// `StreamConnectionStatusChanged` exactly twice per attach-detach cycle
/// (connected once on open, disconnected once on final teardown).
async fn run_watch_stream<T: Transport>(
    transport: Arc<T>,
    doc: DocHandle,
    doc_key: DocKey,
    actor: ActorId,
    mut mode_rx: watch::Receiver<SyncMode>,
    options: ClientOptions,
    cancelled: Arc<AtomicBool>,
) {
    let mut announced_connected = false;
    loop {
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        let stream = match transport.watch_document(actor, doc_key.clone()).await {
            Ok(stream) => stream,
            Err(_) => {
                sleep(options.reconnect_stream_delay).await;
                continue;
            }
        };
        if !announced_connected {
            let mut d = doc.lock().await;
            d.emit_stream_status(StreamConnectionStatus::Connected);
            announced_connected = true;
        }
        tokio::pin!(stream);
        loop {
            if cancelled.load(Ordering::SeqCst) {
                break;
            }
            match stream.next().await {
                Some(WatchEvent { .. }) => {
                    let mode = *mode_rx.borrow_and_update();
                    if mode == SyncMode::RealtimePushPull {
                        let _ = push_pull_once(&*transport, &doc, actor, mode).await;
                    }
                }
                None => break,
            }
        }
        if cancelled.load(Ordering::SeqCst) {
            break;
        }
        sleep(options.reconnect_stream_delay).await;
    }
    let mut d = doc.lock().await;
    d.emit_stream_status(StreamConnectionStatus::Disconnected);
}
