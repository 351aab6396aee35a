//! `Client`: session lifecycle, the multi-document registry, attach/detach,
//! and auth-token refresh. One long-lived handle owning a registry of
//! per-document workers, keyed by [`converge_crdt::DocKey`].
use std::sync::Arc;

use converge_crdt::{ActorId, ChangePack, Checkpoint, DocKey, Document};
use fnv::FnvHashMap;
use tokio::sync::Mutex;

use crate::config::ClientOptions;
use crate::error::{ClientError, Result};
use crate::sync_engine::{DocHandle, SyncEngine, SyncMode};
use crate::transport::{
    ActivateClientRequest, AttachDocumentRequest, DeactivateClientRequest, DetachDocumentRequest,
    Transport,
};

struct Attachment<T: Transport + 'static> {
    doc: DocHandle,
    engine: SyncEngine<T>,
}

/// A client session. Holds the session token/actor id, the registry of
/// attached documents, and drives each document's [`SyncEngine`].
pub struct Client<T: Transport + 'static> {
    transport: Arc<T>,
    options: ClientOptions,
    actor_id: Option<ActorId>,
    active: bool,
    documents: FnvHashMap<DocKey, Attachment<T>>,
}

impl<T: Transport + 'static> Client<T> {
    pub fn new(transport: T, options: ClientOptions) -> Self {
        Self {
            transport: Arc::new(transport),
            options,
            actor_id: None,
            active: false,
            documents: FnvHashMap::default(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn actor_id(&self) -> Option<ActorId> {
        self.actor_id
    }

    /// `activate()`: issues `ActivateClient` with the client key and
    /// stores the server-assigned actor id. Calls the auth injector
    /// first, if configured, so the RPC carries a token from the start.
    pub async fn activate(&mut self) -> Result<ActorId> {
        if self.active {
            return Ok(self.actor_id.expect("active client always has an actor id"));
        }
        let token = match &self.options.auth_token_injector {
            Some(injector) => Some(
                injector
                    .get_token(None)
                    .await
                    .map_err(|e| ClientError::NoAuthToken(e.to_string()))?,
            ),
            None => None,
        };
        let req = ActivateClientRequest {
            client_key: self.options.key.clone(),
            api_key: self.options.api_key.clone(),
            auth_token: token,
        };
        let resp = self.transport.activate_client(req).await?;
        self.actor_id = Some(resp.actor_id);
        self.active = true;
        tracing::info!(actor = %resp.actor_id, "client activated");
        Ok(resp.actor_id)
    }

    /// `deactivate()`: detaches every attached document, then issues
    /// `DeactivateClient`. Cancels all in-flight sync loops and watch
    /// streams.
    pub async fn deactivate(&mut self) -> Result<()> {
        if !self.active {
            return Ok(());
        }
        let doc_keys: Vec<DocKey> = self.documents.keys().cloned().collect();
        for doc_key in doc_keys {
            let _ = self.detach(&doc_key).await;
        }
        let actor_id = self.actor_id.expect("active client always has an actor id");
        self.transport
            .deactivate_client(DeactivateClientRequest { actor_id })
            .await?;
        self.active = false;
        Ok(())
    }

    /// `attach(doc, initialPresence?, syncMode, schemaKey?)`: hands the
    /// document to a fresh [`SyncEngine`]; the initial pull
    /// populates the root (possibly via snapshot). `doc`'s own
    /// `DocumentOptions` (e.g. `disableGC`) are set by the caller when
    /// constructing it via [`Document::with_options`].
    pub async fn attach(
        &mut self,
        mut doc: Document,
        sync_mode: SyncMode,
        schema_key: Option<String>,
    ) -> Result<DocHandle> {
        if !self.active {
            return Err(ClientError::ClientNotActive);
        }
        let actor_id = self.actor_id.expect("active client always has an actor id");
        let doc_key = doc.doc_key().to_string();
        doc.attach(actor_id)?;

        let initial_pack = ChangePack::new(doc_key.clone(), Checkpoint::default(), Vec::new());
        let req = AttachDocumentRequest {
            actor_id,
            change_pack: initial_pack,
            schema_key,
        };
        let resp = self.transport.attach_document(req).await?;
        doc.apply_change_pack(resp.change_pack)?;

        let handle: DocHandle = Arc::new(Mutex::new(doc));
        let mut engine = SyncEngine::new(
            doc_key.clone(),
            actor_id,
            self.transport.clone(),
            handle.clone(),
            self.options.clone(),
            sync_mode,
        );
        engine.start();
        self.documents.insert(doc_key, Attachment { doc: handle.clone(), engine });
        Ok(handle)
    }

    /// `detach`: requires the document to be currently registered.
    /// Stops the sync engine before issuing
    /// `DetachDocument`, so no further push-pull races the detach RPC.
    pub async fn detach(&mut self, doc_key: &str) -> Result<()> {
        let mut attachment = self
            .documents
            .remove(doc_key)
            .ok_or_else(|| ClientError::UnknownDocument(doc_key.to_string()))?;
        attachment.engine.stop();
        {
            let mut doc = attachment.doc.lock().await;
            doc.detach()?;
        }
        let actor_id = self.actor_id.expect("active client always has an actor id");
        self.transport
            .detach_document(DetachDocumentRequest {
                actor_id,
                doc_key: doc_key.to_string(),
            })
            .await?;
        Ok(())
    }

    pub fn document(&self, doc_key: &str) -> Option<DocHandle> {
        self.documents.get(doc_key).map(|a| a.doc.clone())
    }

    /// Explicit `sync(doc)` under `SyncMode::Manual`.
    pub async fn sync(&self, doc_key: &str) -> Result<()> {
        let attachment = self
            .documents
            .get(doc_key)
            .ok_or_else(|| ClientError::UnknownDocument(doc_key.to_string()))?;
        attachment.engine.sync_once().await
    }

    /// `changeSyncMode`: switches this document's engine between manual,
    /// realtime and sync-off.
    pub async fn change_sync_mode(&mut self, doc_key: &str, mode: SyncMode) -> Result<()> {
        let attachment = self
            .documents
            .get_mut(doc_key)
            .ok_or_else(|| ClientError::UnknownDocument(doc_key.to_string()))?;
        attachment.engine.change_sync_mode(mode).await
    }

    pub fn sync_mode(&self, doc_key: &str) -> Option<SyncMode> {
        self.documents.get(doc_key).map(|a| a.engine.mode())
    }
}
