//! Wire message definitions
//!
//! Every frame is a JSON text message.
//!
//! ## Client → Server
//!
//! ```json
//! {"id": 1, "method": "version", "params": {"protocol": "1.2.0"}}
//! {"id": 2, "method": "subscribe.library.books"}
//! {"id": 3, "method": "call.library.book.42.setTitle", "params": {"title": "B"}}
//! ```
//!
//! ## Server → Client
//!
//! ```json
//! // Response
//! {"id": 2, "result": {"collections": {"library.books": [{"rid": "library.book.42"}]}}}
//! {"id": 3, "error": {"code": "system.notFound", "message": "Not found"}}
//!
//! // Event (no id)
//! {"event": "library.books.add", "data": {"idx": 0, "value": {"rid": "library.book.43"}}}
//! ```

use crate::core::error::{RemoteError, ResError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request types understood by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Version,
    Subscribe,
    Unsubscribe,
    Get,
    Call,
    Auth,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Version => "version",
            RequestKind::Subscribe => "subscribe",
            RequestKind::Unsubscribe => "unsubscribe",
            RequestKind::Get => "get",
            RequestKind::Call => "call",
            RequestKind::Auth => "auth",
        }
    }
}

/// Outbound request frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    /// `<type>[.<rid>][.<method>]`
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl RequestFrame {
    /// Build a request, omitting blank rid/method segments
    pub fn new(
        id: u64,
        kind: RequestKind,
        rid: Option<&str>,
        method: Option<&str>,
        params: Option<Value>,
    ) -> Self {
        let mut name = kind.as_str().to_string();
        for segment in [rid, method].into_iter().flatten() {
            if !segment.trim().is_empty() {
                name.push('.');
                name.push_str(segment);
            }
        }

        Self {
            id,
            method: name,
            params,
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Correlated response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl ResponseFrame {
    /// Turn the frame into the request outcome
    ///
    /// A response without `result` and without `error` resolves to `null`.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(error) => Err(ResError::Remote(error)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Uncorrelated event frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    /// `<rid>.<eventType>`
    pub event: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl EventFrame {
    /// Resource id part of the event name
    pub fn rid(&self) -> &str {
        match self.event.rfind('.') {
            Some(pos) => &self.event[..pos],
            None => "",
        }
    }

    /// Event type part of the event name (`change`, `add`, ...)
    pub fn event_type(&self) -> &str {
        match self.event.rfind('.') {
            Some(pos) => &self.event[pos + 1..],
            None => &self.event,
        }
    }
}

/// Any frame the server may send
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response(ResponseFrame),
    Event(EventFrame),
}

/// Decode an inbound text frame
///
/// Frames with a non-zero `id` are responses, everything else must be an event.
pub fn decode(text: &str) -> Result<InboundFrame> {
    let value: Value = serde_json::from_str(text)?;

    let id = value.get("id").and_then(Value::as_u64).unwrap_or(0);
    if id != 0 {
        return Ok(InboundFrame::Response(serde_json::from_value(value)?));
    }

    if value.get("event").is_some_and(Value::is_string) {
        return Ok(InboundFrame::Event(serde_json::from_value(value)?));
    }

    Err(ResError::Protocol(format!(
        "frame is neither a response nor an event: {}",
        text
    )))
}

// =============================================================================
// Payloads
// =============================================================================

/// Parameters and result of the `version` handshake
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionPayload {
    pub protocol: String,
}

/// Resources carried by subscribe/get/call results and by events
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceSet {
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub models: IndexMap<String, Map<String, Value>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub collections: IndexMap<String, Vec<Value>>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub errors: IndexMap<String, RemoteError>,
}

impl ResourceSet {
    /// Parse a result payload; `null` yields an empty set
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.collections.is_empty()
    }

    /// Fail with the server error reported for `rid`, if any
    pub fn check_error(&self, rid: &str) -> Result<()> {
        match self.errors.get(rid) {
            Some(error) => Err(ResError::Remote(error.clone())),
            None => Ok(()),
        }
    }
}

/// Result of a `call` or `auth` request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    /// Resource created by the action, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rid: Option<String>,
    /// Plain result value, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(flatten)]
    pub resources: ResourceSet,
}

impl ActionResult {
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    /// The produced rid, ignoring blank values
    pub fn resource_id(&self) -> Option<&str> {
        self.rid.as_deref().filter(|rid| !rid.trim().is_empty())
    }
}

/// `change` event body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeBody {
    pub values: Map<String, Value>,
    #[serde(flatten)]
    pub resources: ResourceSet,
}

/// `add` event body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AddBody {
    pub idx: usize,
    pub value: Value,
    #[serde(flatten)]
    pub resources: ResourceSet,
}

/// `remove` event body
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoveBody {
    pub idx: usize,
}

/// A decoded resource event
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceEvent {
    Change(ChangeBody),
    Add(AddBody),
    Remove(RemoveBody),
    Delete,
    /// Event types the cache does not act on (`custom`, `reaccess`, ...)
    Other(String),
}

impl ResourceEvent {
    /// Decode the body of an event frame according to its type
    pub fn parse(event_type: &str, data: Option<&Value>) -> Result<Self> {
        let data = data.cloned().unwrap_or(Value::Null);
        let event = match event_type {
            "change" => ResourceEvent::Change(serde_json::from_value(data)?),
            "add" => ResourceEvent::Add(serde_json::from_value(data)?),
            "remove" => ResourceEvent::Remove(serde_json::from_value(data)?),
            "delete" => ResourceEvent::Delete,
            other => ResourceEvent::Other(other.to_string()),
        };
        Ok(event)
    }
}
