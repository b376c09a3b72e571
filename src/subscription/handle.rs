//! Live subscription handles
//!
//! A [`SubscriptionHandle`] keeps its callbacks registered until it is disposed,
//! explicitly or by being dropped. Disposal is synchronous and idempotent; any
//! network follow-up (unsubscribing the last handle of a rid) is left to the owner.

use super::registry::HandleId;
use crate::core::resource::ResourceKind;
use std::fmt;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};

/// Whoever registered the handle and must forget it on disposal
pub(crate) trait HandleOwner: Send + Sync {
    fn release(&self, id: HandleId);
}

/// A caller's live subscription to one resource
pub struct SubscriptionHandle {
    id: HandleId,
    rid: String,
    kind: ResourceKind,
    owner: Weak<dyn HandleOwner>,
    disposed: AtomicBool,
}

impl SubscriptionHandle {
    pub(crate) fn new(
        owner: Weak<dyn HandleOwner>,
        id: HandleId,
        rid: impl Into<String>,
        kind: ResourceKind,
    ) -> Self {
        Self {
            id,
            rid: rid.into(),
            kind,
            owner,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    /// The resource this handle is bound to
    pub fn rid(&self) -> &str {
        &self.rid
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Stop receiving notifications
    ///
    /// Never blocks and never fails. Calling it again is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(owner) = self.owner.upgrade() {
            owner.release(self.id);
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("id", &self.id)
            .field("rid", &self.rid)
            .field("kind", &self.kind)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
