//! Client facade
//!
//! [`Client`] ties the transport, the protocol layer, the resource cache and the
//! subscription registry together.
//!
//! # Architecture
//!
//! ```text
//!                   ┌──────────────── Client ────────────────┐
//!  caller ──────────▶ subscribe / get / call / auth           │
//!                   │        │                                │
//!                   │   ProtocolClient ◀── TransportEvent ◀───┼── Transport
//!                   │     │          │                        │
//!                   │     │    results + events (in order)    │
//!                   │     │          ▼                        │
//!                   │     │    ResourceCache ──▶ Dispatcher ──┼─▶ callbacks
//!                   │     ▼                                   │
//!                   │   ProtocolEvent (mpsc) ──▶ lifecycle loop
//!                   │                               │         │
//!                   │                        ConnectionState  │
//!                   └─────────────────────────────────────────┘
//! ```
//!
//! # Connection state
//!
//! The client starts `Disconnected`. After each successful version handshake it
//! runs the reconnect hooks, resubscribes every rid that still has a handle, and
//! only then reports `Connected`. `get`, `call` and `auth` suspend until then.
//! `close()` moves to the terminal `Closed` state.
//!
//! # Example
//!
//! ```rust,ignore
//! let client = Client::new(ClientConfig::for_uri("ws://localhost:8080"));
//!
//! let books = client
//!     .subscribe_collection(
//!         "library.books",
//!         CollectionCallbacks::<Book>::new()
//!             .on_initial(|books| println!("{} books", books.len()))
//!             .on_added(|idx, book| println!("{} added at {}", book.title, idx)),
//!     )
//!     .await?;
//!
//! client.call("library.books", "new", json!({"title": "B"})).await?;
//! books.dispose();
//! ```

mod dispatch;
pub mod hooks;
mod inner;

pub use hooks::{ReconnectAction, ReconnectHook, Session};

use crate::config::ClientConfig;
use crate::core::error::Result;
use crate::core::events::EventEnvelope;
use crate::protocol::client::ProtocolClient;
use crate::protocol::message::RequestKind;
use crate::subscription::{CollectionCallbacks, ModelCallbacks, Subscriber, SubscriptionHandle};
use crate::transport::{Transport, TransportEvent};
use futures::future::BoxFuture;
use inner::{ClientInner, Produced};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

/// Connection state as seen by callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// Handshake done and every live subscription replayed
    Connected,
    /// `close()` was called; terminal
    Closed,
}

/// RES client
///
/// Dropping the client closes it.
pub struct Client {
    inner: Arc<ClientInner>,
    config: ClientConfig,
}

impl Client {
    /// Connect over WebSocket
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(feature = "websocket")]
    pub fn new(config: ClientConfig) -> Self {
        let (transport, events) = crate::transport::WebSocketTransport::spawn(
            config.uri_provider.clone(),
            config.reconnect_interval,
        );
        Self::with_transport(config, transport, events)
    }

    /// Run on top of any transport
    ///
    /// `events` must be the receiver paired with `transport`. Must be called from
    /// within a tokio runtime.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        let (upward_tx, upward_rx) = mpsc::unbounded_channel();
        let protocol = ProtocolClient::new(
            transport.clone(),
            config.response_timeout,
            config.protocol_version.clone(),
            upward_tx,
        );

        let inner = Arc::new(ClientInner::new(protocol.clone(), transport));
        inner.track(tokio::spawn(protocol.run(events, inner.clone())));
        inner.track(tokio::spawn(inner.clone().run_lifecycle(upward_rx)));

        tracing::debug!(config = ?config, "Client started");
        Self { inner, config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state()
    }

    /// Wait until the client reports `Connected`
    pub async fn connected(&self) -> Result<()> {
        self.inner.wait_connected().await
    }

    /// Receiver for client-level events
    pub fn events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.inner.events().subscribe()
    }

    /// Client-level events as a stream; lagged events are skipped
    pub fn event_stream(&self) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        BroadcastStream::new(self.events()).filter_map(|item| item.ok())
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    /// Subscribe to a model
    ///
    /// The handle is registered even while disconnected and subscribed on the next
    /// connection. Subscribe errors are published as
    /// [`ClientEvent::SubscriptionError`](crate::core::events::ClientEvent) and the
    /// handle stays registered.
    pub async fn subscribe_model<T>(
        &self,
        rid: &str,
        callbacks: ModelCallbacks<T>,
    ) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + 'static,
    {
        self.inner.subscribe(rid, callbacks.into_subscriber()).await
    }

    /// Subscribe to a collection
    pub async fn subscribe_collection<T>(
        &self,
        rid: &str,
        callbacks: CollectionCallbacks<T>,
    ) -> Result<SubscriptionHandle>
    where
        T: DeserializeOwned + 'static,
    {
        self.inner.subscribe(rid, callbacks.into_subscriber()).await
    }

    // =========================================================================
    // One-shot reads
    // =========================================================================

    /// Fetch a model without subscribing
    ///
    /// Waits for the connection and retries transient failures. `None` if the
    /// server result does not contain the model.
    pub async fn get_model<T: DeserializeOwned>(&self, rid: &str) -> Result<Option<T>> {
        self.inner.get(rid).await?;
        self.inner.cache().model_as(rid)
    }

    /// Fetch a collection without subscribing; empty if the result lacks it
    pub async fn get_collection<T: DeserializeOwned>(&self, rid: &str) -> Result<Vec<T>> {
        self.inner.get(rid).await?;
        self.inner.cache().collection_as(rid)
    }

    /// Current cached view of a model, without any request
    pub fn cached_model<T: DeserializeOwned>(&self, rid: &str) -> Result<Option<T>> {
        self.inner.cache().model_as(rid)
    }

    /// Current cached view of a collection, without any request
    pub fn cached_collection<T: DeserializeOwned>(&self, rid: &str) -> Result<Vec<T>> {
        self.inner.cache().collection_as(rid)
    }

    // =========================================================================
    // call / auth
    // =========================================================================

    /// Call `method` on `rid`
    ///
    /// A resource produced by the call is merged into the cache and unsubscribed.
    pub async fn call(&self, rid: &str, method: &str, params: impl Serialize) -> Result<()> {
        self.inner
            .action(RequestKind::Call, rid, method, params, true, Produced::Release)
            .await?;
        Ok(())
    }

    /// Authenticate through `method` on `rid`
    pub async fn auth(&self, rid: &str, method: &str, params: impl Serialize) -> Result<()> {
        self.inner
            .action(RequestKind::Auth, rid, method, params, true, Produced::Release)
            .await?;
        Ok(())
    }

    /// Call `method` and keep the produced model under a new handle
    ///
    /// `None` if the call did not produce a resource.
    pub async fn call_for_model<T>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
        callbacks: ModelCallbacks<T>,
    ) -> Result<Option<SubscriptionHandle>>
    where
        T: DeserializeOwned + 'static,
    {
        self.action_for_subscription(RequestKind::Call, rid, method, params, callbacks.into_subscriber())
            .await
    }

    /// Call `method` and keep the produced collection under a new handle
    pub async fn call_for_collection<T>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
        callbacks: CollectionCallbacks<T>,
    ) -> Result<Option<SubscriptionHandle>>
    where
        T: DeserializeOwned + 'static,
    {
        self.action_for_subscription(RequestKind::Call, rid, method, params, callbacks.into_subscriber())
            .await
    }

    pub async fn auth_for_model<T>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
        callbacks: ModelCallbacks<T>,
    ) -> Result<Option<SubscriptionHandle>>
    where
        T: DeserializeOwned + 'static,
    {
        self.action_for_subscription(RequestKind::Auth, rid, method, params, callbacks.into_subscriber())
            .await
    }

    pub async fn auth_for_collection<T>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
        callbacks: CollectionCallbacks<T>,
    ) -> Result<Option<SubscriptionHandle>>
    where
        T: DeserializeOwned + 'static,
    {
        self.action_for_subscription(RequestKind::Auth, rid, method, params, callbacks.into_subscriber())
            .await
    }

    async fn action_for_subscription(
        &self,
        kind: RequestKind,
        rid: &str,
        method: &str,
        params: impl Serialize,
        subscriber: Subscriber,
    ) -> Result<Option<SubscriptionHandle>> {
        let outcome = self
            .inner
            .action(kind, rid, method, params, true, Produced::Keep(subscriber))
            .await?;
        Ok(outcome.handle)
    }

    /// Call `method` and return the result payload as-is (`null` if absent)
    pub async fn call_for_raw_payload(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value> {
        self.raw_payload(RequestKind::Call, rid, method, params).await
    }

    /// Call `method` and project the result payload into `T`
    pub async fn call_for_payload<T: DeserializeOwned>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<T> {
        let payload = self.raw_payload(RequestKind::Call, rid, method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Call `method` and return the result payload as compact JSON text
    pub async fn call_for_string_payload(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<String> {
        let payload = self.raw_payload(RequestKind::Call, rid, method, params).await?;
        Ok(serde_json::to_string(&payload)?)
    }

    pub async fn auth_for_raw_payload(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value> {
        self.raw_payload(RequestKind::Auth, rid, method, params).await
    }

    pub async fn auth_for_payload<T: DeserializeOwned>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<T> {
        let payload = self.raw_payload(RequestKind::Auth, rid, method, params).await?;
        Ok(serde_json::from_value(payload)?)
    }

    pub async fn auth_for_string_payload(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<String> {
        let payload = self.raw_payload(RequestKind::Auth, rid, method, params).await?;
        Ok(serde_json::to_string(&payload)?)
    }

    async fn raw_payload(
        &self,
        kind: RequestKind,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<Value> {
        let outcome = self
            .inner
            .action(kind, rid, method, params, true, Produced::Release)
            .await?;
        Ok(outcome.result.payload.unwrap_or(Value::Null))
    }

    // =========================================================================
    // Reconnect hooks
    // =========================================================================

    /// Register an action to run on every reconnection, before resubscription
    ///
    /// With `call_now`, the action also runs once as soon as the client is
    /// connected, and its error is returned (the hook is then dropped). If the
    /// client was offline, the resync that connects it already runs the action and
    /// it is not repeated.
    ///
    /// ```rust,ignore
    /// let hook = client
    ///     .auth_action(
    ///         |session| async move { session.auth("usersession", "login", json!({"token": "t"})).await }.boxed(),
    ///         true,
    ///     )
    ///     .await?;
    /// ```
    pub async fn auth_action<F>(&self, action: F, call_now: bool) -> Result<ReconnectHook>
    where
        F: Fn(Session) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        let action: ReconnectAction = Arc::new(action);
        let id = self.inner.add_hook(action.clone());
        let hook = ReconnectHook::new(Arc::downgrade(&self.inner), id);

        if call_now {
            self.inner.wait_connected().await?;
            if !self.inner.hook_replayed(id) {
                action(Session::new(self.inner.clone())).await?;
            }
        }

        Ok(hook)
    }

    /// Run `initial` once connected, then `reauth` on every later reconnection
    ///
    /// `reauth` is only registered after `initial` succeeded; an error from
    /// `initial` is returned and nothing is registered.
    pub async fn auth_action_with<I, F>(&self, initial: I, reauth: F) -> Result<ReconnectHook>
    where
        I: FnOnce(Session) -> BoxFuture<'static, Result<()>> + Send,
        F: Fn(Session) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.inner.wait_connected().await?;
        initial(Session::new(self.inner.clone())).await?;

        let id = self.inner.add_hook(Arc::new(reauth));
        Ok(ReconnectHook::new(Arc::downgrade(&self.inner), id))
    }

    /// Close the client
    ///
    /// Suspended and future requests fail with
    /// [`ResError::Closed`](crate::core::error::ResError::Closed).
    pub fn close(&self) {
        self.inner.close();
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.inner.close();
    }
}
