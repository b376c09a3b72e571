//! Request/response correlation over a transport
//!
//! The `ProtocolClient` owns the Pending Request table. It numbers outbound
//! requests, matches responses back to their callers, negotiates the protocol version
//! after every (re)connect and hands events to an [`EventSink`].
//!
//! Inbound frames are handled one at a time on the dispatch task. A response's
//! [`ResponseHook`] and an event's sink call both run there, so whatever they write
//! lands in the order the frames arrived.
//!
//! # Architecture
//!
//! ```text
//! Transport ──TransportEvent──▶ ProtocolClient::run()
//!                                    │
//!               ┌────────────────────┼─────────────────────────┐
//!          Connected            Message(text)             Disconnected
//!               │                    │                         │
//!     version handshake      id? ──yes──▶ hook, then waiter   fail all pending
//!               │                    │                         │
//!   Reestablished / Failed      no ──▶ EventSink::on_event    ConnectionLost
//!               └──────────▶ mpsc ──▶ client lifecycle loop ◀──┘
//! ```

use super::message::{
    EventFrame, InboundFrame, RequestFrame, RequestKind, VersionPayload, decode,
};
use crate::core::error::{ResError, Result};
use crate::transport::{Transport, TransportEvent};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Connection notifications passed up to the client facade, in transport order
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    /// The transport dropped; every pending request has been failed
    ConnectionLost,
    /// The version handshake succeeded on a fresh connection
    ConnectionReestablished,
    /// The handshake failed with `UnsupportedVersion` or `VersionNegotiationFailed`
    Failed(ResError),
}

/// Receiver of uncorrelated event frames
///
/// Called on the dispatch task; the next frame is not read until `on_event`
/// returns.
pub trait EventSink: Send + Sync {
    fn on_event(&self, frame: EventFrame);
}

/// Work run on a successful result inside the dispatch loop, before the caller
/// resumes. An error replaces the result handed to the caller.
pub type ResponseHook = Box<dyn FnOnce(&Value) -> Result<()> + Send>;

struct Waiter {
    tx: oneshot::Sender<Result<Value>>,
    hook: Option<ResponseHook>,
}

/// Requests waiting for their response within the current connection epoch
struct PendingTable {
    next_id: u64,
    requests: HashMap<u64, Waiter>,
}

/// Correlation layer between the client facade and the transport
pub struct ProtocolClient {
    transport: Arc<dyn Transport>,
    pending: Mutex<PendingTable>,
    response_timeout: Duration,
    protocol_version: String,
    upward: mpsc::UnboundedSender<ProtocolEvent>,
}

impl ProtocolClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        response_timeout: Duration,
        protocol_version: impl Into<String>,
        upward: mpsc::UnboundedSender<ProtocolEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            pending: Mutex::new(PendingTable {
                next_id: 1,
                requests: HashMap::new(),
            }),
            response_timeout,
            protocol_version: protocol_version.into(),
            upward,
        })
    }

    fn table(&self) -> MutexGuard<'_, PendingTable> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of requests still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.table().requests.len()
    }

    /// Send a request and wait for its correlated response
    ///
    /// Returns the `result` of the response. Fails with `Timeout` after the
    /// response deadline, with `ConnectionLost` if the transport drops first and with
    /// `Remote` if the server answers with an error.
    pub async fn send(
        &self,
        kind: RequestKind,
        rid: Option<&str>,
        method: Option<&str>,
        params: Option<Value>,
    ) -> Result<Value> {
        self.send_with(kind, rid, method, params, None).await
    }

    /// Like [`send`](Self::send), running `hook` on the result in the dispatch loop
    ///
    /// The hook runs before any later frame is handled. It does not run for error
    /// responses or for requests that timed out first.
    pub async fn send_with(
        &self,
        kind: RequestKind,
        rid: Option<&str>,
        method: Option<&str>,
        params: Option<Value>,
        hook: Option<ResponseHook>,
    ) -> Result<Value> {
        let (tx, mut rx) = oneshot::channel();
        let frame = {
            let mut table = self.table();
            let id = table.next_id;
            table.next_id += 1;
            table.requests.insert(id, Waiter { tx, hook });
            RequestFrame::new(id, kind, rid, method, params)
        };
        let id = frame.id;

        let text = match frame.encode() {
            Ok(text) => text,
            Err(e) => {
                self.table().requests.remove(&id);
                return Err(e);
            }
        };

        tracing::debug!(request_id = id, method = %frame.method, "Sending request");
        if let Err(e) = self.transport.send(text).await {
            self.table().requests.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.response_timeout, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped without an answer: the table was cleared
            Ok(Err(_)) => Err(ResError::ConnectionLost),
            Err(_) => {
                if self.table().requests.remove(&id).is_some() {
                    tracing::debug!(request_id = id, "Request timed out");
                    return Err(ResError::Timeout);
                }
                // The dispatch loop already took the waiter and may have run its hook
                rx.await.unwrap_or(Err(ResError::ConnectionLost))
            }
        }
    }

    /// Run the inbound loop until the transport's event channel closes
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<TransportEvent>,
        sink: Arc<dyn EventSink>,
    ) {
        tracing::debug!("Protocol dispatch loop started");

        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Connected => self.on_connected(),
                TransportEvent::Disconnected { reason } => self.on_disconnected(reason),
                TransportEvent::Message(text) => self.on_message(&text, sink.as_ref()),
            }
        }

        self.fail_all_pending();
        tracing::debug!("Transport closed, stopping protocol dispatch loop");
    }

    fn on_connected(self: &Arc<Self>) {
        // Ids are only unique within one connection
        self.table().next_id = 1;

        let this = self.clone();
        tokio::spawn(async move {
            let event = match this.negotiate_version().await {
                Ok(()) => ProtocolEvent::ConnectionReestablished,
                Err(e) => {
                    tracing::error!(error = %e, "Protocol handshake failed");
                    ProtocolEvent::Failed(e)
                }
            };
            let _ = this.upward.send(event);
        });
    }

    fn on_disconnected(&self, reason: Option<String>) {
        tracing::info!(reason = ?reason, "Connection lost");
        self.fail_all_pending();
        let _ = self.upward.send(ProtocolEvent::ConnectionLost);
    }

    fn on_message(&self, text: &str, sink: &dyn EventSink) {
        match decode(text) {
            Ok(InboundFrame::Response(response)) => {
                let waiter = self.table().requests.remove(&response.id);
                match waiter {
                    Some(Waiter { tx, hook }) => {
                        let outcome = response.into_result().and_then(|value| match hook {
                            Some(hook) => hook(&value).map(|()| value),
                            None => Ok(value),
                        });
                        let _ = tx.send(outcome);
                    }
                    None => {
                        tracing::debug!(request_id = response.id, "Dropping unmatched response");
                    }
                }
            }
            Ok(InboundFrame::Event(event)) => {
                tracing::trace!(event = %event.event, "Event received");
                sink.on_event(event);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed frame");
            }
        }
    }

    pub(crate) fn fail_all_pending(&self) {
        let drained: Vec<_> = self.table().requests.drain().collect();
        for (_, waiter) in drained {
            let _ = waiter.tx.send(Err(ResError::ConnectionLost));
        }
    }

    /// Exchange `version` and check the server's answer
    async fn negotiate_version(&self) -> Result<()> {
        let result = self
            .send(
                RequestKind::Version,
                None,
                None,
                Some(json!({ "protocol": self.protocol_version })),
            )
            .await
            .map_err(|e| ResError::VersionNegotiationFailed {
                reason: e.to_string(),
            })?;

        let actual = serde_json::from_value::<VersionPayload>(result)
            .map(|payload| payload.protocol)
            .unwrap_or_default();

        if actual != self.protocol_version {
            return Err(ResError::UnsupportedVersion {
                expected: self.protocol_version.clone(),
                actual,
            });
        }

        tracing::info!(version = %actual, "Protocol version negotiated");
        Ok(())
    }
}
