//! Core module containing the error taxonomy, client-level events and resource primitives

pub mod error;
pub mod events;
pub mod resource;

pub use error::{RemoteError, ResError, Result};
pub use events::{ClientEvent, EventBus, EventEnvelope, FailureReason};
pub use resource::{ResourceKind, reference, reference_rid, validate_rid};
