//! Handle ↔ rid bookkeeping
//!
//! One registry serves both resource kinds; each entry carries its kind tag. The
//! forward map (handle → entry) and the reverse multimap (rid → handles) are only
//! mutated together.

use super::callbacks::Subscriber;
use crate::core::resource::ResourceKind;
use std::collections::{BTreeSet, HashMap};

/// Identity of a subscription handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(u64);

impl HandleId {
    pub fn value(&self) -> u64 {
        self.0
    }
}

#[derive(Debug)]
struct Entry {
    rid: String,
    subscriber: Subscriber,
}

/// What [`SubscriptionRegistry::remove_forward`] took out
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removed {
    pub rid: String,
    pub kind: ResourceKind,
    /// No handle is left for `rid`
    pub last: bool,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    next_id: u64,
    forward: HashMap<HandleId, Entry>,
    reverse: HashMap<String, BTreeSet<HandleId>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new handle for `rid`
    pub fn add(&mut self, rid: &str, subscriber: Subscriber) -> HandleId {
        self.next_id += 1;
        let id = HandleId(self.next_id);

        self.forward.insert(
            id,
            Entry {
                rid: rid.to_string(),
                subscriber,
            },
        );
        self.reverse.entry(rid.to_string()).or_default().insert(id);

        tracing::debug!(rid = %rid, handle = id.0, "Subscription handle registered");
        id
    }

    /// Remove a handle; `None` if it was already removed
    pub fn remove_forward(&mut self, id: HandleId) -> Option<Removed> {
        let entry = self.forward.remove(&id)?;

        let mut last = true;
        if let Some(handles) = self.reverse.get_mut(&entry.rid) {
            handles.remove(&id);
            last = handles.is_empty();
            if last {
                self.reverse.remove(&entry.rid);
            }
        }

        tracing::debug!(rid = %entry.rid, handle = id.0, last = last, "Subscription handle removed");
        Some(Removed {
            kind: entry.subscriber.kind(),
            rid: entry.rid,
            last,
        })
    }

    /// Handles bound to `rid`, oldest first
    pub fn reverse_lookup(&self, rid: &str) -> Vec<HandleId> {
        self.reverse
            .get(rid)
            .map(|handles| handles.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Callbacks of every handle bound to `rid`, oldest first
    pub fn subscribers(&self, rid: &str) -> Vec<Subscriber> {
        self.reverse_lookup(rid)
            .into_iter()
            .filter_map(|id| self.forward.get(&id))
            .map(|entry| entry.subscriber.clone())
            .collect()
    }

    pub fn subscriber(&self, id: HandleId) -> Option<Subscriber> {
        self.forward.get(&id).map(|entry| entry.subscriber.clone())
    }

    pub fn rid_of(&self, id: HandleId) -> Option<&str> {
        self.forward.get(&id).map(|entry| entry.rid.as_str())
    }

    /// Distinct rids with at least one live handle of `kind`, sorted
    pub fn rids(&self, kind: ResourceKind) -> Vec<String> {
        let mut rids: Vec<String> = self
            .reverse
            .iter()
            .filter(|(_, handles)| {
                handles
                    .iter()
                    .any(|id| self.forward.get(id).is_some_and(|e| e.subscriber.kind() == kind))
            })
            .map(|(rid, _)| rid.clone())
            .collect();
        rids.sort();
        rids
    }

    pub fn contains_rid(&self, rid: &str) -> bool {
        self.reverse.contains_key(rid)
    }

    /// Number of live handles
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}
