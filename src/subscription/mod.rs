//! Subscription bookkeeping
//!
//! - [`callbacks`]: typed callback builders and their type-erased form
//! - [`registry`]: the handle ↔ rid mapping that drives dispatch and resync
//! - [`handle`]: the disposable handle returned to callers

pub mod callbacks;
pub mod handle;
pub mod registry;

pub use callbacks::{CollectionCallbacks, ModelCallbacks, Subscriber};
pub use handle::SubscriptionHandle;
pub use registry::{HandleId, Removed, SubscriptionRegistry};
