//! Reconnecting WebSocket transport
//!
//! One background task owns the socket. Each attempt asks the uri provider for the
//! endpoint, so a provider that rotates through several servers gives failover for
//! free.
//!
//! ```text
//! loop:
//!   uri_provider() ──connect_async──▶ Connected
//!        │                               │
//!        │                     read loop ──▶ TransportEvent::Message
//!        │                     write task ◀── send(frame)
//!        │                               │
//!        └──── sleep(reconnect_interval) ◀── Disconnected
//! ```

use super::{Transport, TransportEvent};
use crate::config::UriProvider;
use crate::core::error::{ResError, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

/// State shared between the transport handle and its connection task
struct Shared {
    /// Writer of the current connection, `None` while disconnected
    writer: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    closed: AtomicBool,
}

/// WebSocket implementation of [`Transport`]
pub struct WebSocketTransport {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WebSocketTransport {
    /// Start the connection task
    ///
    /// Must be called from within a tokio runtime. The returned receiver yields the
    /// transport events in order and should be handed to the client.
    pub fn spawn(
        uri_provider: UriProvider,
        reconnect_interval: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<TransportEvent>) {
        let shared = Arc::new(Shared {
            writer: Mutex::new(None),
            closed: AtomicBool::new(false),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(run_connection_loop(
            shared.clone(),
            uri_provider,
            reconnect_interval,
            events_tx,
        ));

        let transport = Arc::new(Self {
            shared,
            task: Mutex::new(Some(task)),
        });

        (transport, events_rx)
    }

    fn current_writer(&self) -> Option<mpsc::UnboundedSender<Message>> {
        self.shared
            .writer
            .lock()
            .ok()
            .and_then(|writer| writer.clone())
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&self, frame: String) -> Result<()> {
        let writer = self
            .current_writer()
            .ok_or_else(|| ResError::Transport("not connected".to_string()))?;

        writer
            .send(Message::Text(frame.into()))
            .map_err(|_| ResError::Transport("connection closed".to_string()))
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Ok(mut writer) = self.shared.writer.lock() {
            writer.take();
        }
        if let Ok(mut task) = self.task.lock()
            && let Some(handle) = task.take()
        {
            handle.abort();
        }
    }
}

impl Drop for WebSocketTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect, pump frames until the socket drops, wait, repeat
async fn run_connection_loop(
    shared: Arc<Shared>,
    uri_provider: UriProvider,
    reconnect_interval: Duration,
    events: mpsc::UnboundedSender<TransportEvent>,
) {
    while !shared.closed.load(Ordering::SeqCst) {
        let uri = uri_provider();
        tracing::debug!(uri = %uri, "Connecting WebSocket");

        match connect_async(uri.as_str()).await {
            Ok((stream, _)) => {
                let (mut sink, mut source) = stream.split();
                let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Message>();

                if let Ok(mut writer) = shared.writer.lock() {
                    *writer = Some(writer_tx);
                }

                tracing::info!(uri = %uri, "WebSocket connected");
                if events.send(TransportEvent::Connected).is_err() {
                    break;
                }

                let write_handle = tokio::spawn(async move {
                    while let Some(message) = writer_rx.recv().await {
                        if sink.send(message).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.close().await;
                });

                let reason = loop {
                    match source.next().await {
                        Some(Ok(Message::Text(text))) => {
                            if events
                                .send(TransportEvent::Message(text.as_str().to_owned()))
                                .is_err()
                            {
                                break Some("client dropped".to_string());
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            break frame.map(|f| f.reason.as_str().to_owned());
                        }
                        Some(Ok(_)) => {
                            // Ping/pong are answered by tungstenite, binary frames are ignored
                        }
                        Some(Err(e)) => break Some(e.to_string()),
                        None => break None,
                    }
                };

                if let Ok(mut writer) = shared.writer.lock() {
                    writer.take();
                }
                write_handle.abort();

                tracing::info!(uri = %uri, reason = ?reason, "WebSocket disconnected");
                if events.send(TransportEvent::Disconnected { reason }).is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(uri = %uri, error = %e, "WebSocket connection attempt failed");
            }
        }

        tokio::time::sleep(reconnect_interval).await;
    }

    tracing::debug!("WebSocket connection loop stopped");
}
