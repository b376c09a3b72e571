//! Client-level event bus
//!
//! Failures that do not belong to a single request (version handshake problems,
//! subscription errors raised during a background resync) and connection lifecycle
//! transitions are published here instead of being thrown.
//!
//! # Architecture
//!
//! ```text
//! Protocol layer ──┐
//!                  ├──▶ EventBus::publish() ──▶ broadcast channel ──▶ application listeners
//! Client facade  ──┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut rx = client.events();
//!
//! while let Ok(envelope) = rx.recv().await {
//!     if let ClientEvent::SubscriptionError { rid, message, .. } = envelope.event {
//!         eprintln!("Failed to subscribe {} because of {}", rid, message);
//!     }
//! }
//! ```

use crate::core::error::ResError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Why a connection epoch was given up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The server answered the handshake with another protocol version
    UnsupportedVersion,
    /// The handshake request errored or timed out
    VersionNegotiationFailed,
}

/// Events published by the client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The connection epoch failed and no resubscription took place
    Failed {
        reason: FailureReason,
        /// Human-readable cause, as reported by the handshake
        message: String,
        /// Version the client asked for, on `UnsupportedVersion`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expected: Option<String>,
        /// Version the server answered with, on `UnsupportedVersion`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        actual: Option<String>,
    },
    /// A subscribe request for `rid` failed
    SubscriptionError {
        rid: String,
        code: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<serde_json::Value>,
    },
    /// The transport dropped; requests are suspended until reconnection
    ConnectionLost,
    /// The version handshake succeeded and every live subscription was replayed
    Connected,
}

impl ClientEvent {
    /// Build a failure event from a handshake error
    pub fn failed(error: &ResError) -> Self {
        let (reason, expected, actual) = match error {
            ResError::UnsupportedVersion { expected, actual } => (
                FailureReason::UnsupportedVersion,
                Some(expected.clone()),
                Some(actual.clone()),
            ),
            _ => (FailureReason::VersionNegotiationFailed, None, None),
        };

        ClientEvent::Failed {
            reason,
            message: error.to_string(),
            expected,
            actual,
        }
    }

    /// Build a subscription error event from any client error
    pub fn subscription_error(rid: impl Into<String>, error: &ResError) -> Self {
        let data = error.as_remote().and_then(|e| e.data.clone());
        let message = match error.as_remote() {
            Some(remote) => remote.message.clone(),
            None => error.to_string(),
        };

        ClientEvent::SubscriptionError {
            rid: rid.into(),
            code: error.error_code().to_string(),
            message,
            data,
        }
    }

    /// Name of the event kind (failed, subscription_error, ...)
    pub fn kind(&self) -> &str {
        match self {
            ClientEvent::Failed { .. } => "failed",
            ClientEvent::SubscriptionError { .. } => "subscription_error",
            ClientEvent::ConnectionLost => "connection_lost",
            ClientEvent::Connected => "connected",
        }
    }
}

/// A published [`ClientEvent`] stamped with an id and a time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: Uuid,
    /// Publication time
    pub timestamp: DateTime<Utc>,
    pub event: ClientEvent,
}

impl EventEnvelope {
    pub fn new(event: ClientEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Fan-out of client events to any number of listeners
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per listener
    ///
    /// Slow receivers lose the oldest events once `capacity` is exceeded and get
    /// `Lagged` on their next `recv()`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Broadcast `event`; returns how many listeners will see it
    pub fn publish(&self, event: ClientEvent) -> usize {
        let envelope = EventEnvelope::new(event);
        // Err only means nobody is listening
        self.sender.send(envelope).unwrap_or(0)
    }

    /// Subscribe to future events
    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    /// Number of live listeners
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
