//! # resgate-rs
//!
//! A client for RES-style real-time resource protocols.
//!
//! A RES server exposes named resources (models and collections) that may reference
//! each other by id, and streams change events for them over one persistent
//! connection. This crate keeps a local, reference-resolved mirror of the resources
//! you subscribe to and calls you back whenever any part of them changes.
//!
//! ## Features
//!
//! - **Request correlation**: numbered requests, response deadlines, version handshake
//! - **Resource cache**: reference resolution that survives cycles, reverse-dependency
//!   tracking and ancestor change propagation
//! - **Subscriptions**: many handles per resource, typed callbacks, RAII disposal
//! - **Reconnection**: reconnect hooks (re-authentication) and automatic resubscription
//! - **Configuration-Based**: endpoints and timings via YAML
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use resgate::prelude::*;
//!
//! #[derive(Debug, Deserialize)]
//! struct Book {
//!     title: String,
//!     author: String,
//! }
//!
//! let client = Client::new(ClientConfig::for_uri("ws://localhost:8080"));
//!
//! let _books = client
//!     .subscribe_collection(
//!         "library.books",
//!         CollectionCallbacks::<Book>::new()
//!             .on_initial(|books| println!("{:?}", books))
//!             .on_added(|idx, book| println!("+ {} {:?}", idx, book))
//!             .on_removed(|idx| println!("- {}", idx)),
//!     )
//!     .await?;
//!
//! let book: Option<Book> = client.get_model("library.book.1").await?;
//! ```

pub mod cache;
pub mod client;
pub mod config;
pub mod core;
pub mod protocol;
pub mod subscription;
pub mod transport;

/// Re-exports of commonly used types and traits
pub mod prelude {
    // === Client ===
    pub use crate::client::{Client, ConnectionState, ReconnectAction, ReconnectHook, Session};

    // === Subscriptions ===
    pub use crate::subscription::{CollectionCallbacks, ModelCallbacks, SubscriptionHandle};

    // === Core ===
    pub use crate::core::{
        error::{RemoteError, ResError, Result},
        events::{ClientEvent, EventEnvelope, FailureReason},
        resource::ResourceKind,
    };

    // === Config ===
    pub use crate::config::{ClientConfig, ClientSettings};

    // === Transport ===
    #[cfg(feature = "websocket")]
    pub use crate::transport::WebSocketTransport;
    pub use crate::transport::{MemoryPeer, MemoryTransport, Transport, TransportEvent};

    // === External dependencies ===
    pub use async_trait::async_trait;
    pub use futures::FutureExt;
    pub use futures::future::BoxFuture;
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::{Value, json};
}
