//! Resource primitives shared by the cache, the registry and the facade
//!
//! A resource id (rid) is a dot-separated name such as `library.book.42`. The cache
//! treats it as an opaque key; the only place its shape matters is validation of ids
//! handed in by callers.

use crate::core::error::{ResError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::LazyLock;

/// Dot-separated segments without whitespace or wildcards, with an optional query part
static RID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[^\s.*>?]+(\.[^\s.*>?]+)*(\?\S*)?$").expect("valid resource id pattern")
});

/// Kind of a server resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Key/value object
    Model,
    /// Ordered list
    Collection,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Model => "model",
            ResourceKind::Collection => "collection",
        }
    }
}

/// Check that `rid` is a well-formed resource id
pub fn validate_rid(rid: &str) -> Result<()> {
    if RID_PATTERN.is_match(rid) {
        Ok(())
    } else {
        Err(ResError::InvalidResourceId(rid.to_string()))
    }
}

/// Return the target rid if `value` is a reference (`{"rid": "..."}`)
///
/// Any object carrying a non-blank string `rid` counts as a reference.
pub fn reference_rid(value: &Value) -> Option<&str> {
    value
        .as_object()
        .and_then(|obj| obj.get("rid"))
        .and_then(Value::as_str)
        .filter(|rid| !rid.trim().is_empty())
}

/// Build a reference value pointing at `rid`
pub fn reference(rid: &str) -> Value {
    serde_json::json!({ "rid": rid })
}

/// Whether a changed field value is the delete marker (`{"action": "delete"}`)
pub fn is_delete_marker(value: &Value) -> bool {
    value
        .as_object()
        .and_then(|obj| obj.get("action"))
        .and_then(Value::as_str)
        == Some("delete")
}
