//! RES wire protocol
//!
//! - [`message`]: frame and payload types
//! - [`client`]: request/response correlation and the version handshake

pub mod client;
pub mod message;

pub use client::{EventSink, ProtocolClient, ProtocolEvent, ResponseHook};
pub use message::{
    ActionResult, EventFrame, InboundFrame, RequestFrame, RequestKind, ResourceEvent,
    ResourceSet, ResponseFrame,
};
