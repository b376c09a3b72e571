//! Typed error handling for the RES client
//!
//! Every fallible client operation returns [`ResError`]. The variants follow the
//! protocol's failure taxonomy so callers can match on the specific case instead of
//! inspecting strings.
//!
//! # Error Categories
//!
//! - Request-level: [`ResError::Timeout`], [`ResError::ConnectionLost`],
//!   [`ResError::Remote`] surface to the caller of the failing request.
//! - Connection-level: [`ResError::UnsupportedVersion`] and
//!   [`ResError::VersionNegotiationFailed`] are fatal to a connection epoch and are
//!   reported on the client event bus rather than to a request.
//! - Local: [`ResError::Serialization`], [`ResError::InvalidResourceId`],
//!   [`ResError::Protocol`], [`ResError::Transport`], [`ResError::Closed`].
//!
//! # Example
//!
//! ```rust,ignore
//! match client.call("library.book.42", "setTitle", json!({"title": "B"})).await {
//!     Ok(()) => {}
//!     Err(ResError::Remote(err)) if err.code == "system.notFound" => {
//!         println!("book is gone");
//!     }
//!     Err(e) => eprintln!("call failed: {}", e),
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Result alias used across the crate
pub type Result<T, E = ResError> = std::result::Result<T, E>;

/// The main error type of the client
#[derive(Debug, Clone, thiserror::Error)]
pub enum ResError {
    /// No correlated response arrived within the response deadline
    #[error("Timeout for reply exceeded")]
    Timeout,

    /// The transport dropped while the request was outstanding
    #[error("Connection lost before a response was received")]
    ConnectionLost,

    /// The server answered with an error payload
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The server speaks a different protocol version
    #[error("Unsupported protocol version: expected '{expected}', server answered '{actual}'")]
    UnsupportedVersion { expected: String, actual: String },

    /// The version handshake itself failed (error response, timeout, lost connection)
    #[error("Protocol version negotiation failed: {reason}")]
    VersionNegotiationFailed { reason: String },

    /// The transport refused or failed to send a frame
    #[error("Transport error: {0}")]
    Transport(String),

    /// A payload could not be encoded or projected into the requested type
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A resource id is empty or contains forbidden characters
    #[error("Invalid resource id: '{0}'")]
    InvalidResourceId(String),

    /// A frame or event body violated the wire format
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The client has been closed
    #[error("Client closed")]
    Closed,
}

impl ResError {
    /// Stable machine-readable code for this error
    pub fn error_code(&self) -> &str {
        match self {
            ResError::Timeout => "TIMEOUT",
            ResError::ConnectionLost => "CONNECTION_LOST",
            ResError::Remote(e) => &e.code,
            ResError::UnsupportedVersion { .. } => "UNSUPPORTED_VERSION",
            ResError::VersionNegotiationFailed { .. } => "VERSION_NEGOTIATION_FAILED",
            ResError::Transport(_) => "TRANSPORT_ERROR",
            ResError::Serialization(_) => "SERIALIZATION_ERROR",
            ResError::InvalidResourceId(_) => "INVALID_RESOURCE_ID",
            ResError::Protocol(_) => "PROTOCOL_ERROR",
            ResError::Closed => "CLIENT_CLOSED",
        }
    }

    /// Whether a retry after reconnection may succeed
    ///
    /// `get`, `call` and `auth` retry transparently on transient errors and
    /// propagate everything else.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ResError::Timeout | ResError::ConnectionLost | ResError::Transport(_)
        )
    }

    /// The remote error payload, if the server reported one
    pub fn as_remote(&self) -> Option<&RemoteError> {
        match self {
            ResError::Remote(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ResError {
    fn from(err: serde_json::Error) -> Self {
        ResError::Serialization(err.to_string())
    }
}

// =============================================================================
// Remote Errors
// =============================================================================

/// Application error reported by the server
///
/// Carries the original `code`, `message` and optional `data` of the error object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error code, e.g. `system.notFound`
    pub code: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Optional structured details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            data: None,
        }
    }

    /// Attach structured details
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Project the error data into a caller-supplied type
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.data
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(ResError::from)
    }

    /// Error data serialized as a compact JSON string
    pub fn data_string(&self) -> Option<String> {
        self.data.as_ref().map(|d| d.to_string())
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Remote error {}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_codes() {
        assert_eq!(ResError::Timeout.error_code(), "TIMEOUT");
        assert_eq!(ResError::ConnectionLost.error_code(), "CONNECTION_LOST");
        assert_eq!(ResError::Closed.error_code(), "CLIENT_CLOSED");

        let remote = ResError::Remote(RemoteError::new("system.notFound", "Not found"));
        assert_eq!(remote.error_code(), "system.notFound");
    }

    #[test]
    fn test_transient_classification() {
        assert!(ResError::Timeout.is_transient());
        assert!(ResError::ConnectionLost.is_transient());
        assert!(ResError::Transport("socket closed".to_string()).is_transient());

        assert!(!ResError::Remote(RemoteError::new("system.accessDenied", "")).is_transient());
        assert!(!ResError::Closed.is_transient());
        assert!(!ResError::InvalidResourceId("a..b".to_string()).is_transient());
    }

    #[test]
    fn test_remote_error_display() {
        let err = ResError::from(RemoteError::new("system.notFound", "Not found"));
        assert_eq!(err.to_string(), "Remote error system.notFound: Not found");
    }

    #[test]
    fn test_remote_error_data_projection() {
        #[derive(Deserialize)]
        struct Details {
            field: String,
        }

        let err = RemoteError::new("system.invalidParams", "Bad title")
            .with_data(json!({"field": "title"}));

        let details: Details = err.data_as().unwrap().unwrap();
        assert_eq!(details.field, "title");
        assert_eq!(err.data_string().as_deref(), Some(r#"{"field":"title"}"#));

        let none = RemoteError::new("x", "y");
        assert!(none.data_as::<Details>().unwrap().is_none());
    }

    #[test]
    fn test_remote_error_deserializes_without_optional_fields() {
        let err: RemoteError = serde_json::from_value(json!({"code": "system.timeout"})).unwrap();
        assert_eq!(err.code, "system.timeout");
        assert!(err.message.is_empty());
        assert!(err.data.is_none());
    }

    #[test]
    fn test_unsupported_version_display() {
        let err = ResError::UnsupportedVersion {
            expected: "1.2.0".to_string(),
            actual: "1.1.1".to_string(),
        };
        assert!(err.to_string().contains("1.2.0"));
        assert!(err.to_string().contains("1.1.1"));
    }
}
