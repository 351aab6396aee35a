//! Configuration surface: the options `Client` and `Document` accept, as a
//! plain options struct with a `Default` impl rather than a builder.
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::transport::AuthTokenInjector;

/// Options accepted when constructing a [`crate::client::Client`].
#[derive(Clone)]
pub struct ClientOptions {
    /// API key sent on every RPC, if the transport requires one.
    pub api_key: Option<String>,
    /// Client identity sent to `ActivateClient`. Defaults to a freshly
    /// generated 36-char UUID when not supplied.
    pub key: String,
    /// Interval of the realtime sync loop (default: 50ms).
    pub sync_loop_duration: Duration,
    /// Backoff before reconnecting a dropped watch stream.
    pub reconnect_stream_delay: Duration,
    /// Backoff before retrying a transient sync-loop failure (default:
    /// 1000ms).
    pub retry_sync_loop_delay: Duration,
    /// Invoked at session start and on every `Unauthenticated` failure.
    pub auth_token_injector: Option<Arc<dyn AuthTokenInjector>>,
    /// Test hook: lets a mock transport inject failures by RPC method name.
    pub is_mocking_enabled: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            api_key: None,
            key: Uuid::new_v4().to_string(),
            sync_loop_duration: Duration::from_millis(50),
            reconnect_stream_delay: Duration::from_millis(1000),
            retry_sync_loop_delay: Duration::from_millis(1000),
            auth_token_injector: None,
            is_mocking_enabled: false,
        }
    }
}

impl ClientOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_auth_token_injector(mut self, injector: Arc<dyn AuthTokenInjector>) -> Self {
        self.auth_token_injector = Some(injector);
        self
    }
}

/// Options accepted when attaching a [`converge_crdt::Document`].
#[derive(Clone, Copy, Debug, Default)]
pub struct DocumentOptions {
    /// Suppresses GC entirely; tombstones accumulate until detach.
    pub disable_gc: bool,
}
