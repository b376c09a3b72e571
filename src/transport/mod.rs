//! Duplex transport boundary
//!
//! The protocol layer only needs two things from a connection: a way to push text
//! frames out, and an ordered stream of lifecycle/message notifications coming in.
//!
//! ```text
//! Transport ──TransportEvent──▶ mpsc ──▶ ProtocolClient::run()
//!     ▲
//!     └──── send(frame) ◀──── ProtocolClient::send()
//! ```
//!
//! Two implementations ship with the crate:
//! - [`WebSocketTransport`] (feature `websocket`) keeps a reconnecting WebSocket open
//! - [`MemoryTransport`] is an in-process transport for tests and development

pub mod memory;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::core::error::Result;
use async_trait::async_trait;

pub use memory::{MemoryPeer, MemoryTransport};
#[cfg(feature = "websocket")]
pub use websocket::WebSocketTransport;

/// Notification emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection was (re)established; emitted for the first connect too
    Connected,
    /// The connection dropped; the transport keeps trying to reconnect
    Disconnected { reason: Option<String> },
    /// A text frame arrived
    Message(String),
}

/// Outbound half of a duplex, frame-oriented connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one text frame on the current connection
    ///
    /// Fails with [`ResError::Transport`](crate::core::error::ResError::Transport)
    /// when no connection is open.
    async fn send(&self, frame: String) -> Result<()>;

    /// Stop reconnecting and drop the current connection
    fn close(&self);
}
