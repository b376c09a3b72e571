//! Shared harness for client integration tests
//!
//! Wires a [`Client`] to an in-memory transport and hands back the [`MemoryPeer`]
//! that plays the RES server.
//!
//! # Usage
//!
//! ```rust,ignore
//! mod harness;
//! use harness::*;
//! ```

#![allow(dead_code)]

use resgate::prelude::*;
use resgate::protocol::message::RequestFrame;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

pub const SERVER_VERSION: &str = "1.2.0";

/// Shape of the `library.book.<n>` models used across the tests
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
}

impl Book {
    pub fn new(title: &str, author: &str) -> Self {
        Self {
            title: title.to_string(),
            author: author.to_string(),
        }
    }
}

pub struct TestClient {
    pub client: Client,
    pub peer: MemoryPeer,
}

/// Client on a memory transport with short timeouts; not connected yet
pub fn client_with_peer() -> TestClient {
    client_with_timeout(Duration::from_millis(500))
}

pub fn client_with_timeout(response_timeout: Duration) -> TestClient {
    let (transport, events, peer) = MemoryTransport::pair();
    let config = ClientConfig::for_uri("memory://res").with_response_timeout(response_timeout);
    let client = Client::with_transport(config, transport, events);
    TestClient { client, peer }
}

impl TestClient {
    /// Bring the link up, answer the handshake and wait for `Connected`
    ///
    /// Only valid while no handle is registered, since resync would send subscribes.
    pub async fn connect(&self) {
        self.peer.connect();
        let handshake = self
            .peer
            .accept_handshake(SERVER_VERSION)
            .await
            .expect("handshake request");
        assert_eq!(handshake.method, "version");
        within(self.client.connected())
            .await
            .expect("client connected");
    }

    /// Next request, failing the test if none arrives
    pub async fn expect_request(&self, method: &str) -> RequestFrame {
        let request = self.peer.next_request().await.expect("request sent");
        assert_eq!(request.method, method);
        request
    }

    /// Assert that the client stays silent for a while
    pub async fn expect_silence(&self) {
        let request = self
            .peer
            .next_request_within(Duration::from_millis(250))
            .await;
        assert!(request.is_none(), "unexpected request: {:?}", request);
    }
}

/// Bound any test step to two seconds
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("step timed out")
}

/// Poll `check` until it holds
pub async fn eventually<F: Fn() -> bool>(check: F) {
    within(async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
}

/// Shared callback log
#[derive(Clone, Default)]
pub struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }
}

/// Next client event of any kind
pub async fn next_event(events: &mut broadcast::Receiver<EventEnvelope>) -> ClientEvent {
    within(events.recv()).await.expect("event received").event
}

/// Skip events until one matches
pub async fn wait_for_event<F>(events: &mut broadcast::Receiver<EventEnvelope>, matches: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

pub fn book_result(n: u32, title: &str, author: &str) -> Value {
    json!({
        "models": {
            format!("library.book.{}", n): {"title": title, "author": author}
        }
    })
}
