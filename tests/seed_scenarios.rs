//! End-to-end convergence scenarios, driven against the in-process mock
//! transport (no real network).
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use converge::mock_transport::{MockServer, MockTransport};
use converge::transport::{
    ActivateClientRequest, ActivateClientResponse, AttachDocumentRequest, AttachDocumentResponse,
    AuthTokenInjector, DeactivateClientRequest, DetachDocumentRequest, PushPullRequest,
    PushPullResponse, Transport, TransportError, WatchEvent,
};
use converge::{
    ActorId, ChangePack, Client, ClientOptions, DocKey, Document, Event, NewValue, SyncMode, SyncStatus,
};
use converge_crdt::primitives::tree::TreeNodeSpec;
use futures::stream::BoxStream;
use serde_json::json;

fn client(server: &std::sync::Arc<MockServer>) -> Client<MockTransport> {
    Client::new(MockTransport::new(server.clone()), ClientOptions::new())
}

/// S1: manual sync convergence across 3 keys. Two clients attach to the
/// same document key in `Manual` mode; each local key only becomes visible
/// to the other client once both sides have explicitly synced.
#[tokio::test]
async fn s1_manual_sync_converges_across_three_keys() {
    let server = MockServer::new();

    let mut c1 = client(&server);
    let mut c2 = client(&server);
    c1.activate().await.unwrap();
    c2.activate().await.unwrap();

    let doc1 = c1
        .attach(Document::new("shared-doc"), SyncMode::Manual, None)
        .await
        .unwrap();
    let doc2 = c2
        .attach(Document::new("shared-doc"), SyncMode::Manual, None)
        .await
        .unwrap();

    for (key, value) in [("k1", "v1"), ("k2", "v2"), ("k3", "v3")] {
        {
            let mut doc = doc1.lock().await;
            let root_id = doc.root_id();
            doc.update(None, |tx| {
                tx.object_set(root_id, key, NewValue::Register(serde_json::json!(value)))?;
                Ok(())
            })
            .unwrap();
        }
        c1.sync("shared-doc").await.unwrap();
        c2.sync("shared-doc").await.unwrap();
    }

    let expected = serde_json::json!({"k1": "v1", "k2": "v2", "k3": "v3"});
    assert_eq!(doc1.lock().await.to_json(), expected);
    assert_eq!(doc2.lock().await.to_json(), expected);
}

/// S6: GC across detach. Tombstones left by one replica are only reclaimed
/// once every attached peer has reported a version vector past them; once
/// the lagging peer detaches, its vote drops out of `min_synced_version_vector`
/// and the tombstones become collectible.
#[tokio::test]
async fn s6_gc_reclaims_tombstones_once_lagging_peer_detaches() {
    let server = MockServer::new();
    let transport = MockTransport::new(server.clone());

    let a1 = transport
        .activate_client(converge::ActivateClientRequest {
            client_key: "replica-1".to_string(),
            api_key: None,
            auth_token: None,
        })
        .await
        .unwrap()
        .actor_id;
    let a2 = transport
        .activate_client(converge::ActivateClientRequest {
            client_key: "replica-2".to_string(),
            api_key: None,
            auth_token: None,
        })
        .await
        .unwrap()
        .actor_id;

    let mut d1 = Document::new("gc-doc");
    d1.attach(a1).unwrap();
    let mut d2 = Document::new("gc-doc");
    d2.attach(a2).unwrap();

    let root_id = d1.root_id();
    d1.update(None, |tx| {
        for i in 0..6 {
            tx.object_set(
                root_id,
                &format!("k{i}"),
                NewValue::Register(serde_json::json!(i)),
            )?;
        }
        Ok(())
    })
    .unwrap();
    d1.update(None, |tx| {
        for i in 0..6 {
            tx.object_remove(root_id, &format!("k{i}"))?;
        }
        Ok(())
    })
    .unwrap();
    assert_eq!(d1.tombstone_count(), 6);

    // d1 pushes its six tombstones to the server.
    let push1 = transport
        .push_pull(PushPullRequest {
            actor_id: a1,
            change_pack: d1.create_change_pack(),
        })
        .await
        .unwrap();
    let checkpoint1 = push1.change_pack.checkpoint;
    d1.apply_change_pack(push1.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1);

    // d2 pulls, becoming an attached peer that has NOT yet seen past the
    // tombstones from d1's perspective.
    let push2 = transport
        .push_pull(PushPullRequest {
            actor_id: a2,
            change_pack: d2.create_change_pack(),
        })
        .await
        .unwrap();
    let checkpoint2 = push2.change_pack.checkpoint;
    d2.apply_change_pack(push2.change_pack).unwrap();
    d2.acknowledge_push(checkpoint2);

    // While d2 is still attached, the server's min-synced vv can't clear
    // d1's own tombstones (d2 hasn't reported a vv past them yet).
    let push1_again = transport
        .push_pull(PushPullRequest {
            actor_id: a1,
            change_pack: d1.create_change_pack(),
        })
        .await
        .unwrap();
    let min_synced_still_blocked = push1_again
        .change_pack
        .min_synced_version_vector
        .clone()
        .unwrap();
    assert_eq!(d1.garbage_collect(&min_synced_still_blocked), 0);
    assert_eq!(d1.tombstone_count(), 6);

    // d2 detaches, dropping out of the server's attached-peer set.
    transport
        .detach_document(DetachDocumentRequest {
            actor_id: a2,
            doc_key: "gc-doc".to_string(),
        })
        .await
        .unwrap();

    let push1_final = transport
        .push_pull(PushPullRequest {
            actor_id: a1,
            change_pack: d1.create_change_pack(),
        })
        .await
        .unwrap();
    let min_synced = push1_final.change_pack.min_synced_version_vector.unwrap();
    assert_eq!(d1.garbage_collect(&min_synced), 6);
    assert_eq!(d1.tombstone_count(), 0);
}

/// S2: push-only isolation. Two of three clients drop to
/// `RealtimePushOnly`; their local edits reach the server but neither sees
/// the other's until both resume `RealtimePushPull`, at which point the
/// resume's catch-up pull brings everyone back in sync. A third client,
/// left in `Manual`, observes both edits the moment it explicitly syncs,
/// since `sync()` always performs a real push-pull except under push-only.
#[tokio::test]
async fn s2_push_only_clients_stay_isolated_until_resuming_push_pull() {
    let server = MockServer::new();

    let mut c1 = client(&server);
    let mut c2 = client(&server);
    let mut c3 = client(&server);
    c1.activate().await.unwrap();
    c2.activate().await.unwrap();
    c3.activate().await.unwrap();

    let doc1 = c1
        .attach(Document::new("push-only-doc"), SyncMode::Manual, None)
        .await
        .unwrap();
    let doc2 = c2
        .attach(Document::new("push-only-doc"), SyncMode::Manual, None)
        .await
        .unwrap();
    let doc3 = c3
        .attach(Document::new("push-only-doc"), SyncMode::Manual, None)
        .await
        .unwrap();

    {
        let mut doc = doc1.lock().await;
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "c1", NewValue::Register(json!(0)))?;
            Ok(())
        })
        .unwrap();
    }
    c1.sync("push-only-doc").await.unwrap();

    {
        let mut doc = doc2.lock().await;
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "c2", NewValue::Register(json!(0)))?;
            Ok(())
        })
        .unwrap();
    }
    c2.sync("push-only-doc").await.unwrap();
    c1.sync("push-only-doc").await.unwrap();
    c3.sync("push-only-doc").await.unwrap();

    let converged = json!({"c1": 0, "c2": 0});
    assert_eq!(doc1.lock().await.to_json(), converged);
    assert_eq!(doc2.lock().await.to_json(), converged);
    assert_eq!(doc3.lock().await.to_json(), converged);

    c1.change_sync_mode("push-only-doc", SyncMode::RealtimePushOnly)
        .await
        .unwrap();
    c2.change_sync_mode("push-only-doc", SyncMode::RealtimePushOnly)
        .await
        .unwrap();

    {
        let mut doc = doc1.lock().await;
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "c1", NewValue::Register(json!(1)))?;
            Ok(())
        })
        .unwrap();
    }
    c1.sync("push-only-doc").await.unwrap();

    {
        let mut doc = doc2.lock().await;
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "c2", NewValue::Register(json!(1)))?;
            Ok(())
        })
        .unwrap();
    }
    c2.sync("push-only-doc").await.unwrap();

    // Both pushes landed on the server, but push-only discards whatever
    // comes back, so neither replica has seen the other's edit yet.
    assert_eq!(doc1.lock().await.to_json(), json!({"c1": 1, "c2": 0}));
    assert_eq!(doc2.lock().await.to_json(), json!({"c1": 0, "c2": 1}));

    // A client on manual sync sees both the moment it explicitly syncs.
    c3.sync("push-only-doc").await.unwrap();
    assert_eq!(doc3.lock().await.to_json(), json!({"c1": 1, "c2": 1}));

    // Resuming push-pull performs a catch-up pull, converging immediately.
    c1.change_sync_mode("push-only-doc", SyncMode::RealtimePushPull)
        .await
        .unwrap();
    c2.change_sync_mode("push-only-doc", SyncMode::RealtimePushPull)
        .await
        .unwrap();

    let converged = json!({"c1": 1, "c2": 1});
    assert_eq!(doc1.lock().await.to_json(), converged);
    assert_eq!(doc2.lock().await.to_json(), converged);
}

/// S3: tree concurrent delete-vs-delete, at the `Document`/`MockServer`
/// integration level. One replica deletes the whole `<p>` paragraph while
/// another concurrently deletes one character inside it; exchanging both
/// changes through the server must converge both replicas on the same
/// (empty) tree rather than one side erroring or leaving dangling content.
#[tokio::test]
async fn s3_concurrent_tree_deletes_converge() {
    let server = MockServer::new();
    let transport = MockTransport::new(server.clone());

    let a1 = transport
        .activate_client(ActivateClientRequest {
            client_key: "tree-replica-1".to_string(),
            api_key: None,
            auth_token: None,
        })
        .await
        .unwrap()
        .actor_id;
    let a2 = transport
        .activate_client(ActivateClientRequest {
            client_key: "tree-replica-2".to_string(),
            api_key: None,
            auth_token: None,
        })
        .await
        .unwrap()
        .actor_id;

    let mut d1 = Document::new("tree-doc");
    d1.attach(a1).unwrap();
    let mut d2 = Document::new("tree-doc");
    d2.attach(a2).unwrap();

    let root_id = d1.root_id();
    let mut tree_id = None;
    d1.update(None, |tx| {
        let id = tx.object_set(root_id, "tree", NewValue::Tree("doc".to_string()))?;
        tx.tree_edit(
            id,
            0,
            0,
            vec![TreeNodeSpec::Element {
                tag: "p".to_string(),
                children: vec![TreeNodeSpec::Text { content: "ab".to_string() }],
            }],
            0,
        )?;
        tree_id = Some(id);
        Ok(())
    })
    .unwrap();
    let tree_id = tree_id.unwrap();

    // d1 pushes the paragraph creation; d2 pulls it so both start from the
    // same `<doc><p>ab</p></doc>`.
    let push1 = transport
        .push_pull(PushPullRequest { actor_id: a1, change_pack: d1.create_change_pack() })
        .await
        .unwrap();
    let checkpoint1 = push1.change_pack.checkpoint;
    d1.apply_change_pack(push1.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1);

    let push2 = transport
        .push_pull(PushPullRequest { actor_id: a2, change_pack: d2.create_change_pack() })
        .await
        .unwrap();
    let checkpoint2 = push2.change_pack.checkpoint;
    d2.apply_change_pack(push2.change_pack).unwrap();
    d2.acknowledge_push(checkpoint2);

    assert_eq!(d1.to_json(), json!({"tree": "<doc><p>ab</p></doc>"}));
    assert_eq!(d1.to_json(), d2.to_json());

    // d1 deletes the whole paragraph; d2 concurrently deletes just the 'a'.
    d1.update(None, |tx| tx.tree_edit(tree_id, 0, 4, vec![], 0)).unwrap();
    d2.update(None, |tx| tx.tree_edit(tree_id, 1, 2, vec![], 0)).unwrap();

    let push1 = transport
        .push_pull(PushPullRequest { actor_id: a1, change_pack: d1.create_change_pack() })
        .await
        .unwrap();
    let checkpoint1 = push1.change_pack.checkpoint;
    d1.apply_change_pack(push1.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1);

    let push2 = transport
        .push_pull(PushPullRequest { actor_id: a2, change_pack: d2.create_change_pack() })
        .await
        .unwrap();
    let checkpoint2 = push2.change_pack.checkpoint;
    d2.apply_change_pack(push2.change_pack).unwrap();
    d2.acknowledge_push(checkpoint2);

    // d1 needs one more pull to see d2's change landed after its own push.
    let push1_again = transport
        .push_pull(PushPullRequest { actor_id: a1, change_pack: d1.create_change_pack() })
        .await
        .unwrap();
    let checkpoint1_again = push1_again.change_pack.checkpoint;
    d1.apply_change_pack(push1_again.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1_again);

    assert_eq!(d1.to_json(), json!({"tree": "<doc></doc>"}));
    assert_eq!(d1.to_json(), d2.to_json());
}

/// S4: counter under snapshot. A lagging replica's pull is far enough
/// behind for the server to answer with a snapshot instead of a change
/// list; a local change still pending when the snapshot installs must
/// survive (rebased onto the snapshot's root), not be silently dropped.
#[tokio::test]
async fn s4_counter_increments_survive_a_snapshot_install() {
    let server = MockServer::with_snapshot_threshold(5);
    let transport = MockTransport::new(server.clone());

    let a1 = transport
        .activate_client(ActivateClientRequest {
            client_key: "counter-replica-1".to_string(),
            api_key: None,
            auth_token: None,
        })
        .await
        .unwrap()
        .actor_id;
    let a2 = transport
        .activate_client(ActivateClientRequest {
            client_key: "counter-replica-2".to_string(),
            api_key: None,
            auth_token: None,
        })
        .await
        .unwrap()
        .actor_id;

    let mut d1 = Document::new("counter-doc");
    d1.attach(a1).unwrap();
    let mut d2 = Document::new("counter-doc");
    d2.attach(a2).unwrap();

    let root_id = d1.root_id();
    let mut counter_id = None;
    d1.update(None, |tx| {
        counter_id = Some(tx.object_set(root_id, "counter", NewValue::Counter(0))?);
        Ok(())
    })
    .unwrap();
    let counter_id = counter_id.unwrap();

    let push1 = transport
        .push_pull(PushPullRequest { actor_id: a1, change_pack: d1.create_change_pack() })
        .await
        .unwrap();
    let checkpoint1 = push1.change_pack.checkpoint;
    d1.apply_change_pack(push1.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1);

    // d2 pulls the counter's creation directly (no local changes of its own
    // yet), so it starts from the same state as d1.
    let pull2 = transport
        .push_pull(PushPullRequest { actor_id: a2, change_pack: d2.create_change_pack() })
        .await
        .unwrap();
    let pull2_checkpoint = pull2.change_pack.checkpoint;
    d2.apply_change_pack(pull2.change_pack).unwrap();
    d2.acknowledge_push(pull2_checkpoint);

    // d1 lands six separate increments, each its own change, pushing the
    // server's log far enough ahead of d2's checkpoint to exceed the
    // snapshot threshold.
    for _ in 0..6 {
        d1.update(None, |tx| tx.counter_increase(counter_id, 1)).unwrap();
    }
    let push1_increments = transport
        .push_pull(PushPullRequest { actor_id: a1, change_pack: d1.create_change_pack() })
        .await
        .unwrap();
    let checkpoint1_increments = push1_increments.change_pack.checkpoint;
    d1.apply_change_pack(push1_increments.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1_increments);

    // d2 records its own concurrent increment locally, without pushing it
    // yet, then pulls (still a pure pull: its own pending change hasn't
    // reached the server). The resulting lag exceeds the threshold, so the
    // server answers with a snapshot.
    d2.update(None, |tx| tx.counter_increase(counter_id, 1)).unwrap();
    assert!(d2.has_pending_changes());

    let pull_only = ChangePack::new(d2.doc_key().to_string(), d2.checkpoint(), Vec::new());
    let snapshot_resp = transport
        .push_pull(PushPullRequest { actor_id: a2, change_pack: pull_only })
        .await
        .unwrap();
    assert!(snapshot_resp.change_pack.snapshot.is_some());
    let snapshot_checkpoint = snapshot_resp.change_pack.checkpoint;
    d2.apply_change_pack(snapshot_resp.change_pack).unwrap();
    d2.acknowledge_push(snapshot_checkpoint);

    // The snapshot carried d1's six increments; d2's own pending increment
    // must still be there, rebased on top rather than lost.
    assert_eq!(d2.to_json(), json!({"counter": 7}));
    assert!(d2.has_pending_changes());

    // d2 now pushes its surviving local increment for real.
    let push2 = transport
        .push_pull(PushPullRequest { actor_id: a2, change_pack: d2.create_change_pack() })
        .await
        .unwrap();
    let checkpoint2 = push2.change_pack.checkpoint;
    d2.apply_change_pack(push2.change_pack).unwrap();
    d2.acknowledge_push(checkpoint2);
    assert!(!d2.has_pending_changes());

    // d1 pulls to see d2's increment land.
    let pull1_final = transport
        .push_pull(PushPullRequest { actor_id: a1, change_pack: d1.create_change_pack() })
        .await
        .unwrap();
    let checkpoint1_final = pull1_final.change_pack.checkpoint;
    d1.apply_change_pack(pull1_final.change_pack).unwrap();
    d1.acknowledge_push(checkpoint1_final);

    assert_eq!(d1.to_json(), json!({"counter": 7}));
    assert_eq!(d1.to_json(), d2.to_json());
}

/// A transport that fails every `push_pull` with `Unauthenticated` once its
/// shared `authenticated` flag is flipped off, simulating a token expiring
/// mid-session; every other RPC passes straight through to the wrapped mock
/// transport.
struct ExpiringAuthTransport {
    inner: MockTransport,
    authenticated: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for ExpiringAuthTransport {
    async fn activate_client(
        &self,
        req: ActivateClientRequest,
    ) -> Result<ActivateClientResponse, TransportError> {
        self.inner.activate_client(req).await
    }

    async fn deactivate_client(&self, req: DeactivateClientRequest) -> Result<(), TransportError> {
        self.inner.deactivate_client(req).await
    }

    async fn attach_document(
        &self,
        req: AttachDocumentRequest,
    ) -> Result<AttachDocumentResponse, TransportError> {
        self.inner.attach_document(req).await
    }

    async fn detach_document(&self, req: DetachDocumentRequest) -> Result<(), TransportError> {
        self.inner.detach_document(req).await
    }

    async fn push_pull(&self, req: PushPullRequest) -> Result<PushPullResponse, TransportError> {
        if !self.authenticated.load(Ordering::SeqCst) {
            return Err(TransportError::Unauthenticated { reason: "expired token".to_string() });
        }
        self.inner.push_pull(req).await
    }

    async fn watch_document(
        &self,
        actor_id: ActorId,
        doc_key: DocKey,
    ) -> Result<BoxStream<'static, WatchEvent>, TransportError> {
        self.inner.watch_document(actor_id, doc_key).await
    }

    async fn broadcast(
        &self,
        actor_id: ActorId,
        doc_key: DocKey,
        topic: String,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.inner.broadcast(actor_id, doc_key, topic, payload).await
    }
}

/// An auth injector that flips `authenticated` back on and counts how many
/// times it was called, standing in for a real token-refresh call.
struct FlakyInjector {
    authenticated: Arc<AtomicBool>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl AuthTokenInjector for FlakyInjector {
    async fn get_token(&self, _reason: Option<&str>) -> anyhow::Result<String> {
        self.authenticated.store(true, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok("refreshed-token".to_string())
    }
}

/// S5: token refresh during realtime sync. While `RealtimePushPull`'s
/// background loop is ticking, the transport starts rejecting pushes as
/// `Unauthenticated`; the engine must surface an `AuthError`, call the auth
/// injector, and resume pushing on its own once the injector refreshes the
/// token, without the caller doing anything beyond having configured the
/// injector up front.
#[tokio::test]
async fn s5_token_refresh_resumes_realtime_sync_after_auth_error() {
    let server = MockServer::new();
    let authenticated = Arc::new(AtomicBool::new(true));
    let calls = Arc::new(AtomicUsize::new(0));
    let transport = ExpiringAuthTransport {
        inner: MockTransport::new(server.clone()),
        authenticated: authenticated.clone(),
    };
    let injector = Arc::new(FlakyInjector {
        authenticated: authenticated.clone(),
        calls: calls.clone(),
    });

    let mut options = ClientOptions::new()
        .with_auth_token_injector(injector)
        .with_key("token-refresh-client");
    options.sync_loop_duration = Duration::from_millis(20);

    let mut client = Client::new(transport, options);
    client.activate().await.unwrap();

    let doc = client
        .attach(Document::new("auth-doc"), SyncMode::RealtimePushPull, None)
        .await
        .unwrap();

    let events = Arc::new(std::sync::Mutex::new(Vec::new()));
    {
        let events = events.clone();
        let mut doc = doc.lock().await;
        doc.subscribe(None, move |event: &Event| {
            events.lock().unwrap().push(event.clone());
        });
        let root_id = doc.root_id();
        doc.update(None, |tx| {
            tx.object_set(root_id, "value", NewValue::Register(json!(1)))?;
            Ok(())
        })
        .unwrap();
    }

    // The token "expires" right after the local change is queued, so the
    // loop's very next tick finds the transport unauthenticated.
    authenticated.store(false, Ordering::SeqCst);

    // Several tick periods: one failing attempt (auth error + refresh),
    // then a successful retry on the following tick.
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!doc.lock().await.has_pending_changes());
    assert!(calls.load(Ordering::SeqCst) >= 2, "injector should run at activation and after the auth error");

    let recorded = events.lock().unwrap().clone();
    let auth_error_index = recorded
        .iter()
        .position(|e| matches!(e, Event::AuthError { reason, .. } if reason == "expired token"))
        .expect("expected an AuthError event with the expired-token reason");

    let synced_after = recorded[auth_error_index + 1..]
        .iter()
        .any(|e| matches!(e, Event::SyncStatusChanged(SyncStatus::Synced)));
    assert!(synced_after, "a successful resync should follow the auth error");
}
