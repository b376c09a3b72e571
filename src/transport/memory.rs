//! In-memory transport for testing and development
//!
//! [`MemoryTransport`] is handed to the client; the paired [`MemoryPeer`] plays the
//! server: it decides when the connection is up, reads the frames the client sent and
//! pushes responses and events back.

use super::{Transport, TransportEvent};
use crate::core::error::{ResError, Result};
use crate::protocol::message::RequestFrame;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Client side of an in-memory connection
///
/// Frames sent while the peer reports the link as down are rejected, like a real
/// socket would.
pub struct MemoryTransport {
    connected: Arc<AtomicBool>,
    closed: AtomicBool,
    outbound: mpsc::UnboundedSender<String>,
}

/// Server side of an in-memory connection
pub struct MemoryPeer {
    connected: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<TransportEvent>,
    inbound: Mutex<mpsc::UnboundedReceiver<String>>,
}

impl MemoryTransport {
    /// Create a linked transport/peer pair
    ///
    /// Returns the transport, the receiver to hand to the client together with it,
    /// and the peer used to drive the connection.
    pub fn pair() -> (
        Arc<MemoryTransport>,
        mpsc::UnboundedReceiver<TransportEvent>,
        MemoryPeer,
    ) {
        let connected = Arc::new(AtomicBool::new(false));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (frame_tx, frame_rx) = mpsc::unbounded_channel();

        let transport = Arc::new(MemoryTransport {
            connected: connected.clone(),
            closed: AtomicBool::new(false),
            outbound: frame_tx,
        });

        let peer = MemoryPeer {
            connected,
            events: event_tx,
            inbound: Mutex::new(frame_rx),
        };

        (transport, event_rx, peer)
    }

    /// Whether `close()` has been called
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, frame: String) -> Result<()> {
        if self.is_closed() || !self.connected.load(Ordering::SeqCst) {
            return Err(ResError::Transport("not connected".to_string()));
        }
        self.outbound
            .send(frame)
            .map_err(|_| ResError::Transport("peer dropped".to_string()))
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl MemoryPeer {
    /// Bring the link up and notify the client
    pub fn connect(&self) {
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected);
    }

    /// Drop the link and notify the client
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Disconnected {
            reason: Some("peer disconnected".to_string()),
        });
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Push a raw text frame to the client
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.events.send(TransportEvent::Message(text.into()));
    }

    /// Push a JSON frame to the client
    pub fn push(&self, frame: Value) {
        self.push_text(frame.to_string());
    }

    /// Answer request `id` with a result
    pub fn respond(&self, id: u64, result: Value) {
        self.push(json!({"id": id, "result": result}));
    }

    /// Answer request `id` with an error
    pub fn respond_error(&self, id: u64, code: &str, message: &str) {
        self.push(json!({"id": id, "error": {"code": code, "message": message}}));
    }

    /// Emit a resource event
    pub fn event(&self, rid: &str, event_type: &str, data: Value) {
        self.push(json!({"event": format!("{}.{}", rid, event_type), "data": data}));
    }

    /// Wait for the next request sent by the client
    ///
    /// Returns `None` if nothing arrives within `wait`.
    pub async fn next_request_within(&self, wait: Duration) -> Option<RequestFrame> {
        let mut inbound = self.inbound.lock().await;
        match tokio::time::timeout(wait, inbound.recv()).await {
            Ok(Some(text)) => serde_json::from_str(&text).ok(),
            _ => None,
        }
    }

    /// Wait up to two seconds for the next request
    pub async fn next_request(&self) -> Option<RequestFrame> {
        self.next_request_within(Duration::from_secs(2)).await
    }

    /// Answer the version handshake that follows `connect()`
    pub async fn accept_handshake(&self, version: &str) -> Option<RequestFrame> {
        let request = self.next_request().await?;
        if request.method == "version" {
            self.respond(request.id, json!({"protocol": version}));
        }
        Some(request)
    }
}
