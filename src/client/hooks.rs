//! Reconnect hooks
//!
//! A hook is an async action (usually re-authentication) that the client runs on
//! every reconnection after the version handshake and before any resource is
//! resubscribed. Hooks talk to the server through a [`Session`], which sends directly
//! instead of waiting for the client to report `Connected`.

use super::inner::{ClientInner, Produced};
use crate::core::error::Result;
use crate::protocol::message::RequestKind;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Action run by a reconnect hook
pub type ReconnectAction = Arc<dyn Fn(Session) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct HookEntry {
    action: ReconnectAction,
    /// Set once a resync ran the action successfully
    replayed: bool,
}

/// Registered hooks in registration order
#[derive(Default)]
pub(crate) struct HookTable {
    next_id: u64,
    actions: BTreeMap<u64, HookEntry>,
}

impl HookTable {
    pub(crate) fn insert(&mut self, action: ReconnectAction) -> u64 {
        self.next_id += 1;
        self.actions.insert(
            self.next_id,
            HookEntry {
                action,
                replayed: false,
            },
        );
        self.next_id
    }

    pub(crate) fn remove(&mut self, id: u64) -> bool {
        self.actions.remove(&id).is_some()
    }

    pub(crate) fn snapshot(&self) -> Vec<(u64, ReconnectAction)> {
        self.actions
            .iter()
            .map(|(id, entry)| (*id, entry.action.clone()))
            .collect()
    }

    pub(crate) fn mark_replayed(&mut self, id: u64) {
        if let Some(entry) = self.actions.get_mut(&id) {
            entry.replayed = true;
        }
    }

    pub(crate) fn replayed(&self, id: u64) -> bool {
        self.actions.get(&id).is_some_and(|entry| entry.replayed)
    }

    pub(crate) fn len(&self) -> usize {
        self.actions.len()
    }
}

/// Access to the server from inside a reconnect hook
///
/// Requests are sent once, without waiting for the client to be connected and
/// without retrying.
#[derive(Clone)]
pub struct Session {
    inner: Arc<ClientInner>,
}

impl Session {
    pub(crate) fn new(inner: Arc<ClientInner>) -> Self {
        Self { inner }
    }

    /// Send an `auth` request
    pub async fn auth(&self, rid: &str, method: &str, params: impl Serialize) -> Result<()> {
        self.inner
            .action(RequestKind::Auth, rid, method, params, false, Produced::Release)
            .await?;
        Ok(())
    }

    /// Send an `auth` request and project its payload into `T`
    pub async fn auth_for_payload<T: DeserializeOwned>(
        &self,
        rid: &str,
        method: &str,
        params: impl Serialize,
    ) -> Result<T> {
        let outcome = self
            .inner
            .action(RequestKind::Auth, rid, method, params, false, Produced::Release)
            .await?;
        Ok(serde_json::from_value(
            outcome.result.payload.unwrap_or(Value::Null),
        )?)
    }

    /// Send a `call` request
    pub async fn call(&self, rid: &str, method: &str, params: impl Serialize) -> Result<()> {
        self.inner
            .action(RequestKind::Call, rid, method, params, false, Produced::Release)
            .await?;
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session").finish_non_exhaustive()
    }
}

/// Registration of a reconnect hook
///
/// The hook stays registered until this value is disposed or dropped.
pub struct ReconnectHook {
    id: u64,
    owner: Weak<ClientInner>,
    disposed: AtomicBool,
}

impl ReconnectHook {
    pub(crate) fn new(owner: Weak<ClientInner>, id: u64) -> Self {
        Self {
            id,
            owner,
            disposed: AtomicBool::new(false),
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Unregister the hook; idempotent
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(inner) = self.owner.upgrade() {
            inner.remove_hook(self.id);
        }
    }
}

impl Drop for ReconnectHook {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for ReconnectHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectHook")
            .field("id", &self.id)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ResError;
    use futures::FutureExt;

    #[test]
    fn test_hook_table_keeps_registration_order() {
        let mut table = HookTable::default();
        let noop: ReconnectAction =
            Arc::new(|_session: Session| async { Ok::<(), ResError>(()) }.boxed());

        let first = table.insert(noop.clone());
        let second = table.insert(noop.clone());
        let third = table.insert(noop);

        assert!(table.remove(second));
        assert!(!table.remove(second));

        let ids: Vec<u64> = table.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![first, third]);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_replayed_flag_is_per_hook() {
        let mut table = HookTable::default();
        let noop: ReconnectAction =
            Arc::new(|_session: Session| async { Ok::<(), ResError>(()) }.boxed());

        let login = table.insert(noop.clone());
        let audit = table.insert(noop);
        assert!(!table.replayed(login));

        table.mark_replayed(login);
        assert!(table.replayed(login));
        assert!(!table.replayed(audit));

        table.remove(login);
        table.mark_replayed(login);
        assert!(!table.replayed(login));
    }
}
