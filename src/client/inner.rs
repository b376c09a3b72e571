//! Shared client state and the connection lifecycle
//!
//! # Ordering
//!
//! Every write to the cache happens on the protocol dispatch task: events through
//! [`EventSink`], and subscribe/get/call/auth results through the [`ResponseHook`]
//! attached to their request. Results and events are therefore merged in the
//! order their frames arrived, and a caller resumes only after its result is in
//! the cache.
//!
//! # Locks
//!
//! - `cache` and `registry` are short synchronous critical sections, never held
//!   across an `.await` or while a callback runs.
//! - `delivery` is held while a merge and its callbacks run, and by `subscribe`
//!   while it hands a cached view to a new handle. A handle never sees a change
//!   before its initial view.
//! - `lifecycle` is an async mutex held for a whole resync, and by `subscribe` while
//!   it registers a handle and samples the connection state. A handle is therefore
//!   either seen by the resync or registered after `Connected` is published.

use super::ConnectionState;
use super::dispatch::Dispatcher;
use super::hooks::{HookTable, ReconnectAction, Session};
use crate::cache::{CacheNotification, ResourceCache};
use crate::core::error::{ResError, Result};
use crate::core::events::{ClientEvent, EventBus};
use crate::core::resource::{ResourceKind, validate_rid};
use crate::protocol::client::{EventSink, ProtocolClient, ProtocolEvent, ResponseHook};
use crate::protocol::message::{ActionResult, EventFrame, RequestKind, ResourceEvent, ResourceSet};
use crate::subscription::handle::HandleOwner;
use crate::subscription::{HandleId, Subscriber, SubscriptionHandle, SubscriptionRegistry};
use crate::transport::Transport;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Pause before retrying a request that failed transiently
const RETRY_DELAY: Duration = Duration::from_millis(100);

pub(crate) struct ClientInner {
    protocol: Arc<ProtocolClient>,
    transport: Arc<dyn Transport>,
    cache: Mutex<ResourceCache>,
    registry: Mutex<SubscriptionRegistry>,
    delivery: Mutex<()>,
    lifecycle: tokio::sync::Mutex<()>,
    state: watch::Sender<ConnectionState>,
    events: EventBus,
    hooks: Mutex<HookTable>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// What happens to the resource a `call` or `auth` produces
#[derive(Clone)]
pub(crate) enum Produced {
    /// Merge it, then unsubscribe
    Release,
    /// Merge it and keep it under a new handle
    Keep(Subscriber),
}

/// Outcome of a `call` or `auth` request
pub(crate) struct ActionOutcome {
    pub(crate) result: ActionResult,
    /// Handle for the produced resource, with [`Produced::Keep`]
    pub(crate) handle: Option<SubscriptionHandle>,
}

/// Serialize request parameters; `null` means no parameters
fn encode_params(params: impl Serialize) -> Result<Option<Value>> {
    let value = serde_json::to_value(params)?;
    Ok((!value.is_null()).then_some(value))
}

impl ClientInner {
    pub(crate) fn new(
        protocol: Arc<ProtocolClient>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            protocol,
            transport,
            cache: Mutex::new(ResourceCache::new()),
            registry: Mutex::new(SubscriptionRegistry::new()),
            delivery: Mutex::new(()),
            lifecycle: tokio::sync::Mutex::new(()),
            state,
            events: EventBus::default(),
            hooks: Mutex::new(HookTable::default()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn cache(&self) -> MutexGuard<'_, ResourceCache> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, SubscriptionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn delivery(&self) -> MutexGuard<'_, ()> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn hooks(&self) -> MutexGuard<'_, HookTable> {
        self.hooks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn events(&self) -> &EventBus {
        &self.events
    }

    pub(crate) fn track(&self, task: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    // =========================================================================
    // Connection state
    // =========================================================================

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Move to `next` unless the client is closed; returns whether it changed
    fn transition(&self, next: ConnectionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed || *state == next {
                false
            } else {
                *state = next;
                true
            }
        })
    }

    /// Suspend until the client is connected
    ///
    /// Fails with [`ResError::Closed`] once the client is closed.
    pub(crate) async fn wait_connected(&self) -> Result<()> {
        let mut rx = self.state.subscribe();
        let state = *rx
            .wait_for(|state| *state != ConnectionState::Disconnected)
            .await
            .map_err(|_| ResError::Closed)?;

        match state {
            ConnectionState::Connected => Ok(()),
            _ => Err(ResError::Closed),
        }
    }

    /// Send a request once connected, retrying transient failures
    ///
    /// `hook` builds a fresh [`ResponseHook`] for every attempt.
    pub(crate) async fn execute<H>(
        &self,
        kind: RequestKind,
        rid: &str,
        method: Option<&str>,
        params: Option<Value>,
        hook: H,
    ) -> Result<Value>
    where
        H: Fn() -> Option<ResponseHook>,
    {
        loop {
            self.wait_connected().await?;

            let sent = self
                .protocol
                .send_with(kind, Some(rid), method, params.clone(), hook())
                .await;
            match sent {
                Ok(result) => return Ok(result),
                Err(e) if e.is_transient() => {
                    tracing::debug!(
                        rid = %rid,
                        request = kind.as_str(),
                        error = %e,
                        "Transient request failure, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // =========================================================================
    // Cache plumbing
    // =========================================================================

    /// Replay notifications into the subscription callbacks
    pub(crate) fn dispatch(&self, notes: &[CacheNotification]) {
        let mut dispatcher = Dispatcher::new(&self.registry);
        for note in notes {
            note.deliver(&mut dispatcher);
        }
    }

    /// Merge a subscribe/call result and notify; the caller holds `delivery`
    ///
    /// With `seen`, initial notifications for rids already in the set are dropped and
    /// delivered rids are added to it.
    fn merge_subscription(&self, resources: &ResourceSet, seen: Option<&Mutex<HashSet<String>>>) {
        let mut notes = Vec::new();
        self.cache()
            .apply_subscription_result(resources, &mut notes);

        if let Some(seen) = seen {
            let mut seen = seen.lock().unwrap_or_else(PoisonError::into_inner);
            notes.retain(|note| match note {
                CacheNotification::ModelInitial { rid, .. }
                | CacheNotification::CollectionInitial { rid, .. } => seen.insert(rid.clone()),
                _ => true,
            });
        }

        self.dispatch(&notes);
    }

    fn handle_event(&self, frame: &EventFrame) {
        let rid = frame.rid();
        let event_type = frame.event_type();

        let event = match ResourceEvent::parse(event_type, frame.data.as_ref()) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(rid = %rid, event = %event_type, error = %e, "Malformed event body");
                return;
            }
        };

        let _delivery = self.delivery();
        let mut notes = Vec::new();
        let outcome = self.cache().apply_event(rid, event, &mut notes);
        if let Err(e) = outcome {
            tracing::warn!(rid = %rid, event = %event_type, error = %e, "Event rejected by cache");
        }
        self.dispatch(&notes);
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    fn handle(self: &Arc<Self>, id: HandleId, rid: &str, kind: ResourceKind) -> SubscriptionHandle {
        let owner: Weak<ClientInner> = Arc::downgrade(self);
        SubscriptionHandle::new(owner, id, rid, kind)
    }

    fn report_subscription_error(&self, rid: &str, error: &ResError) {
        tracing::warn!(rid = %rid, error = %error, "Subscription failed");
        self.events
            .publish(ClientEvent::subscription_error(rid, error));
    }

    /// Register a handle and subscribe if connected
    ///
    /// A second handle for a rid that is already cached gets the cached view as its
    /// initial state; the server keeps one subscription per rid.
    pub(crate) async fn subscribe(
        self: &Arc<Self>,
        rid: &str,
        subscriber: Subscriber,
    ) -> Result<SubscriptionHandle> {
        validate_rid(rid)?;
        let kind = subscriber.kind();

        let (id, connected, delivered) = {
            let _lifecycle = self.lifecycle.lock().await;
            if self.state() == ConnectionState::Closed {
                return Err(ResError::Closed);
            }

            let _delivery = self.delivery();
            let (id, shared) = {
                let mut registry = self.registry();
                let shared = registry.contains_rid(rid);
                (registry.add(rid, subscriber.clone()), shared)
            };
            let connected = self.state() == ConnectionState::Connected;
            let cached = if connected && shared { self.cache().resolve(rid) } else { None };
            let delivered = match cached {
                Some(view) => {
                    subscriber.initial(rid, &view);
                    true
                }
                None => false,
            };
            (id, connected, delivered)
        };

        let handle = self.handle(id, rid, kind);
        if !connected {
            tracing::debug!(rid = %rid, "Subscription queued until connected");
            return Ok(handle);
        }

        if !delivered && let Err(e) = self.subscribe_remote(rid, None).await {
            self.report_subscription_error(rid, &e);
        }
        Ok(handle)
    }

    /// Send `subscribe` for `rid`; the result is merged on the dispatch task
    async fn subscribe_remote(
        self: &Arc<Self>,
        rid: &str,
        seen: Option<Arc<Mutex<HashSet<String>>>>,
    ) -> Result<()> {
        let owner = Arc::downgrade(self);
        let target = rid.to_string();
        let hook: ResponseHook = Box::new(move |result: &Value| {
            let resources = ResourceSet::from_value(result)?;
            resources.check_error(&target)?;
            let inner = owner.upgrade().ok_or(ResError::Closed)?;
            let _delivery = inner.delivery();
            inner.merge_subscription(&resources, seen.as_deref());
            Ok(())
        });

        self.protocol
            .send_with(RequestKind::Subscribe, Some(rid), None, None, Some(hook))
            .await?;
        Ok(())
    }

    /// Best-effort `unsubscribe` in the background
    fn spawn_unsubscribe(&self, rid: &str) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(rid = %rid, "No runtime available, skipping unsubscribe");
            return;
        };

        let protocol = self.protocol.clone();
        let rid = rid.to_string();
        runtime.spawn(async move {
            match protocol
                .send(RequestKind::Unsubscribe, Some(&rid), None, None)
                .await
            {
                Ok(_) => tracing::debug!(rid = %rid, "Unsubscribed"),
                Err(e) => tracing::warn!(rid = %rid, error = %e, "Unsubscribe failed"),
            }
        });
    }

    // =========================================================================
    // get / call / auth
    // =========================================================================

    /// Fetch `rid` into the cache without subscribing
    pub(crate) async fn get(self: &Arc<Self>, rid: &str) -> Result<()> {
        validate_rid(rid)?;
        let owner = Arc::downgrade(self);
        let hook = || {
            let owner = owner.clone();
            let target = rid.to_string();
            let hook: ResponseHook = Box::new(move |result: &Value| {
                let resources = ResourceSet::from_value(result)?;
                resources.check_error(&target)?;
                let inner = owner.upgrade().ok_or(ResError::Closed)?;
                inner.cache().apply_get_result(&resources);
                Ok(())
            });
            Some(hook)
        };

        self.execute(RequestKind::Get, rid, None, None, hook).await?;
        Ok(())
    }

    /// Perform a `call` or `auth` request
    ///
    /// With `wait`, the request waits for the connection and retries transient
    /// failures; otherwise it is sent once as-is. The result is merged on the
    /// dispatch task, and `produced` decides what happens to a produced resource.
    pub(crate) async fn action(
        self: &Arc<Self>,
        kind: RequestKind,
        rid: &str,
        method: &str,
        params: impl Serialize,
        wait: bool,
        produced: Produced,
    ) -> Result<ActionOutcome> {
        validate_rid(rid)?;
        let params = encode_params(params)?;
        let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::default();
        let hook = || Some(self.action_hook(rid, produced.clone(), slot.clone()));

        let result = if wait {
            self.execute(kind, rid, Some(method), params, hook).await?
        } else {
            self.protocol
                .send_with(kind, Some(rid), Some(method), params, hook())
                .await?
        };

        let handle = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        Ok(ActionOutcome {
            result: ActionResult::from_value(&result)?,
            handle,
        })
    }

    fn action_hook(
        self: &Arc<Self>,
        rid: &str,
        produced: Produced,
        slot: Arc<Mutex<Option<SubscriptionHandle>>>,
    ) -> ResponseHook {
        let owner = Arc::downgrade(self);
        let target = rid.to_string();
        Box::new(move |result: &Value| {
            let action = ActionResult::from_value(result)?;
            action.resources.check_error(&target)?;
            if let Some(created) = action.resource_id() {
                action.resources.check_error(created)?;
            }

            let inner = owner.upgrade().ok_or(ResError::Closed)?;
            let _delivery = inner.delivery();
            match produced {
                Produced::Release => inner.finish_transient(&action),
                Produced::Keep(subscriber) => {
                    let handle = inner.finish_standing(&action, subscriber);
                    *slot.lock().unwrap_or_else(PoisonError::into_inner) = handle;
                }
            }
            Ok(())
        })
    }

    /// Merge an action result and drop the subscription it created, if any
    fn finish_transient(&self, action: &ActionResult) {
        self.merge_subscription(&action.resources, None);
        if let Some(rid) = action.resource_id() {
            self.spawn_unsubscribe(rid);
        }
    }

    /// Merge an action result and keep its produced resource under a new handle
    fn finish_standing(
        self: &Arc<Self>,
        action: &ActionResult,
        subscriber: Subscriber,
    ) -> Option<SubscriptionHandle> {
        let Some(rid) = action.resource_id() else {
            self.merge_subscription(&action.resources, None);
            return None;
        };

        let kind = subscriber.kind();
        let (id, shared) = {
            let mut registry = self.registry();
            let shared = registry.contains_rid(rid);
            (registry.add(rid, subscriber.clone()), shared)
        };

        self.merge_subscription(&action.resources, None);

        let delivered = action.resources.models.contains_key(rid)
            || action.resources.collections.contains_key(rid);
        if !delivered {
            let cached = self.cache().resolve(rid);
            if let Some(view) = cached {
                subscriber.initial(rid, &view);
            }
        }

        if shared {
            // Another handle already holds the server subscription
            self.spawn_unsubscribe(rid);
        }

        Some(self.handle(id, rid, kind))
    }

    // =========================================================================
    // Reconnect hooks
    // =========================================================================

    pub(crate) fn add_hook(&self, action: ReconnectAction) -> u64 {
        let mut hooks = self.hooks();
        let id = hooks.insert(action);
        tracing::debug!(hook = id, registered = hooks.len(), "Reconnect hook added");
        id
    }

    pub(crate) fn remove_hook(&self, id: u64) {
        if self.hooks().remove(id) {
            tracing::debug!(hook = id, "Reconnect hook removed");
        }
    }

    /// Whether a resync has already run hook `id` successfully
    pub(crate) fn hook_replayed(&self, id: u64) -> bool {
        self.hooks().replayed(id)
    }

    async fn run_reconnect_hooks(self: &Arc<Self>) {
        let actions = self.hooks().snapshot();
        for (id, action) in actions {
            match action(Session::new(self.clone())).await {
                Ok(()) => self.hooks().mark_replayed(id),
                Err(e) => tracing::warn!(hook = id, error = %e, "Reconnect hook failed"),
            }
        }
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Apply protocol events in order until the protocol layer stops
    pub(crate) async fn run_lifecycle(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<ProtocolEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                ProtocolEvent::ConnectionLost => self.on_connection_lost(),
                ProtocolEvent::ConnectionReestablished => self.resync().await,
                ProtocolEvent::Failed(error) => self.on_failed(&error),
            }
        }
        tracing::debug!("Client lifecycle loop stopped");
    }

    fn on_connection_lost(&self) {
        if self.transition(ConnectionState::Disconnected) {
            tracing::info!("Client disconnected");
        }
        self.events.publish(ClientEvent::ConnectionLost);
    }

    fn on_failed(&self, error: &ResError) {
        tracing::error!(error = %error, "Connection epoch failed, not resubscribing");
        self.events.publish(ClientEvent::failed(error));
    }

    /// Replay hooks and subscriptions, then report `Connected`
    async fn resync(self: &Arc<Self>) {
        let _lifecycle = self.lifecycle.lock().await;
        if self.state() == ConnectionState::Closed {
            return;
        }

        tracing::info!("Connection reestablished, resubscribing");
        self.run_reconnect_hooks().await;

        let (models, collections) = {
            let registry = self.registry();
            (
                registry.rids(ResourceKind::Model),
                registry.rids(ResourceKind::Collection),
            )
        };

        let seen = Arc::new(Mutex::new(HashSet::new()));
        for rid in models.iter().chain(collections.iter()) {
            let registered = self.registry().contains_rid(rid);
            if !registered {
                continue;
            }

            match self.subscribe_remote(rid, Some(seen.clone())).await {
                Ok(()) => {}
                Err(e @ (ResError::ConnectionLost | ResError::Transport(_))) => {
                    tracing::info!(error = %e, "Connection dropped during resync");
                    return;
                }
                Err(e) => self.report_subscription_error(rid, &e),
            }
        }

        if self.transition(ConnectionState::Connected) {
            tracing::info!(
                models = models.len(),
                collections = collections.len(),
                "Client connected"
            );
            self.events.publish(ClientEvent::Connected);
        }
    }

    /// Enter the terminal `Closed` state and stop every background task
    pub(crate) fn close(&self) {
        let closed = self.state.send_if_modified(|state| {
            if *state == ConnectionState::Closed {
                false
            } else {
                *state = ConnectionState::Closed;
                true
            }
        });
        if !closed {
            return;
        }

        self.transport.close();
        self.protocol.fail_all_pending();
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
        tracing::info!("Client closed");
    }
}

impl HandleOwner for ClientInner {
    fn release(&self, id: HandleId) {
        let Some(removed) = self.registry().remove_forward(id) else {
            return;
        };
        if !removed.last {
            return;
        }
        if self.state() != ConnectionState::Connected {
            tracing::debug!(rid = %removed.rid, "Last handle disposed while offline");
            return;
        }
        self.spawn_unsubscribe(&removed.rid);
    }
}

impl EventSink for ClientInner {
    fn on_event(&self, frame: EventFrame) {
        self.handle_event(&frame);
    }
}
