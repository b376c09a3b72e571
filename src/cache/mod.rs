//! Client-side resource cache
//!
//! The cache owns the raw data of every model and collection the client knows about.
//! Raw data may hold references (`{"rid": "..."}`) to other resources; the cache
//! resolves them on demand into reference-free views and keeps a
//! [`DependencyIndex`] so that a change deep in the graph can be reported to every
//! resource whose view it affects.
//!
//! # Event flow
//!
//! ```text
//! apply_event(rid, change/add/remove)
//!     │
//!     ├── mutate raw data, keep edges in sync
//!     ├── merge nested resources from the event body
//!     ├── notify rid (changed / added / removed)
//!     └── breadth-first over parents_of(): notify each ancestor once
//! ```
//!
//! All notifications go through a [`CacheObserver`].

pub mod index;
pub mod notify;

pub use index::DependencyIndex;
pub use notify::{CacheNotification, CacheObserver};

use crate::core::error::{ResError, Result};
use crate::core::resource::{ResourceKind, is_delete_marker, reference_rid};
use crate::protocol::message::{AddBody, ChangeBody, RemoveBody, ResourceEvent, ResourceSet};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};

/// Per-resolution scratch table
///
/// A rid still being built is `InProgress`; meeting it again means a cycle, and the
/// reference is returned as-is.
enum Slot {
    InProgress,
    Done(Value),
}

type Memo = HashMap<String, Slot>;

/// Raw resource store with reference resolution and change propagation
#[derive(Debug, Default)]
pub struct ResourceCache {
    models: HashMap<String, Map<String, Value>>,
    collections: HashMap<String, Vec<Value>>,
    dependencies: DependencyIndex,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, rid: &str) -> bool {
        self.models.contains_key(rid) || self.collections.contains_key(rid)
    }

    pub fn kind_of(&self, rid: &str) -> Option<ResourceKind> {
        if self.models.contains_key(rid) {
            Some(ResourceKind::Model)
        } else if self.collections.contains_key(rid) {
            Some(ResourceKind::Collection)
        } else {
            None
        }
    }

    /// Unresolved fields of a cached model
    pub fn raw_model(&self, rid: &str) -> Option<&Map<String, Value>> {
        self.models.get(rid)
    }

    /// Unresolved elements of a cached collection
    pub fn raw_collection(&self, rid: &str) -> Option<&[Value]> {
        self.collections.get(rid).map(Vec::as_slice)
    }

    pub fn dependencies(&self) -> &DependencyIndex {
        &self.dependencies
    }

    /// Number of cached resources
    pub fn len(&self) -> usize {
        self.models.len() + self.collections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty() && self.collections.is_empty()
    }

    // =========================================================================
    // Storage
    // =========================================================================

    fn store_model(&mut self, rid: &str, model: &Map<String, Value>, track_edges: bool) {
        if track_edges {
            self.dependencies.remove_parent(rid);
            for value in model.values() {
                if let Some(child) = reference_rid(value) {
                    self.dependencies.add(rid, child);
                }
            }
        }
        self.collections.remove(rid);
        self.models.insert(rid.to_string(), model.clone());
    }

    fn store_collection(&mut self, rid: &str, items: &[Value], track_edges: bool) {
        if track_edges {
            self.dependencies.remove_parent(rid);
            for value in items {
                if let Some(child) = reference_rid(value) {
                    self.dependencies.add(rid, child);
                }
            }
        }
        self.models.remove(rid);
        self.collections.insert(rid.to_string(), items.to_vec());
    }

    /// Store a subscribe result and emit an initial view per resource
    ///
    /// Models are announced before collections, each in payload order.
    pub fn apply_subscription_result(
        &mut self,
        resources: &ResourceSet,
        observer: &mut dyn CacheObserver,
    ) {
        for (rid, model) in &resources.models {
            self.store_model(rid, model, true);
        }
        for (rid, items) in &resources.collections {
            self.store_collection(rid, items, true);
        }

        for rid in resources.models.keys() {
            if let Some(view) = self.resolve(rid) {
                observer.on_model_initial(rid, &view);
            }
        }
        for rid in resources.collections.keys() {
            if let Some(Value::Array(items)) = self.resolve(rid) {
                observer.on_collection_initial(rid, &items);
            }
        }
    }

    /// Store a one-shot `get` result
    ///
    /// No notifications are emitted. Fresh entries get no edges; an entry that was
    /// already cached has its edges rebuilt so they keep matching its new content.
    pub fn apply_get_result(&mut self, resources: &ResourceSet) {
        for (rid, model) in &resources.models {
            let tracked = self.contains(rid);
            self.store_model(rid, model, tracked);
        }
        for (rid, items) in &resources.collections {
            let tracked = self.contains(rid);
            self.store_collection(rid, items, tracked);
        }
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Fully resolved view of `rid`, or `None` if it is not cached
    pub fn resolve(&self, rid: &str) -> Option<Value> {
        self.resolve_into(rid, &mut Memo::new())
    }

    /// Resolve a single raw value
    ///
    /// References to absent resources are returned unchanged.
    pub fn resolve_value(&self, value: &Value) -> Value {
        self.resolve_value_into(value, &mut Memo::new())
    }

    fn resolve_into(&self, rid: &str, memo: &mut Memo) -> Option<Value> {
        if let Some(model) = self.models.get(rid) {
            memo.insert(rid.to_string(), Slot::InProgress);
            let fields: Map<String, Value> = model
                .iter()
                .map(|(field, value)| (field.clone(), self.resolve_value_into(value, memo)))
                .collect();
            let view = Value::Object(fields);
            memo.insert(rid.to_string(), Slot::Done(view.clone()));
            return Some(view);
        }

        if let Some(items) = self.collections.get(rid) {
            memo.insert(rid.to_string(), Slot::InProgress);
            let elements: Vec<Value> = items
                .iter()
                .map(|value| self.resolve_value_into(value, memo))
                .collect();
            let view = Value::Array(elements);
            memo.insert(rid.to_string(), Slot::Done(view.clone()));
            return Some(view);
        }

        None
    }

    fn resolve_value_into(&self, value: &Value, memo: &mut Memo) -> Value {
        let Some(target) = reference_rid(value) else {
            return value.clone();
        };

        match memo.get(target) {
            Some(Slot::InProgress) => value.clone(),
            Some(Slot::Done(view)) => view.clone(),
            None => self
                .resolve_into(target, memo)
                .unwrap_or_else(|| value.clone()),
        }
    }

    /// Resolved view of a model projected into `T`
    pub fn model_as<T: DeserializeOwned>(&self, rid: &str) -> Result<Option<T>> {
        if !self.models.contains_key(rid) {
            return Ok(None);
        }
        match self.resolve(rid) {
            Some(view) => Ok(Some(serde_json::from_value(view)?)),
            None => Ok(None),
        }
    }

    /// Resolved view of a collection projected into `Vec<T>`, empty if absent
    pub fn collection_as<T: DeserializeOwned>(&self, rid: &str) -> Result<Vec<T>> {
        if !self.collections.contains_key(rid) {
            return Ok(Vec::new());
        }
        match self.resolve(rid) {
            Some(view) => Ok(serde_json::from_value(view)?),
            None => Ok(Vec::new()),
        }
    }

    // =========================================================================
    // Events
    // =========================================================================

    /// Apply a server event to `rid`
    ///
    /// Events for resources that are not cached are ignored. Events that do not fit
    /// the cached resource (wrong kind, index out of range) fail with
    /// [`ResError::Protocol`] and leave the cache untouched.
    pub fn apply_event(
        &mut self,
        rid: &str,
        event: ResourceEvent,
        observer: &mut dyn CacheObserver,
    ) -> Result<()> {
        match event {
            ResourceEvent::Change(body) => self.apply_change(rid, body, observer),
            ResourceEvent::Add(body) => self.apply_add(rid, body, observer),
            ResourceEvent::Remove(body) => self.apply_remove(rid, body, observer),
            ResourceEvent::Delete => {
                self.delete(rid);
                Ok(())
            }
            ResourceEvent::Other(event_type) => {
                tracing::debug!(rid = %rid, event = %event_type, "Ignoring event");
                Ok(())
            }
        }
    }

    fn expect_kind(&self, rid: &str, kind: ResourceKind, event: &str) -> Result<bool> {
        match self.kind_of(rid) {
            Some(actual) if actual == kind => Ok(true),
            Some(actual) => Err(ResError::Protocol(format!(
                "'{}' event for {} '{}'",
                event,
                actual.as_str(),
                rid
            ))),
            None => {
                tracing::debug!(rid = %rid, event = %event, "Event for uncached resource");
                Ok(false)
            }
        }
    }

    fn apply_change(
        &mut self,
        rid: &str,
        body: ChangeBody,
        observer: &mut dyn CacheObserver,
    ) -> Result<()> {
        if !self.expect_kind(rid, ResourceKind::Model, "change")? {
            return Ok(());
        }

        if let Some(model) = self.models.get_mut(rid) {
            for (field, value) in body.values {
                if let Some(previous) = model.get(&field)
                    && let Some(child) = reference_rid(previous)
                {
                    self.dependencies.remove(rid, child);
                }

                if is_delete_marker(&value) {
                    model.remove(&field);
                } else {
                    if let Some(child) = reference_rid(&value) {
                        self.dependencies.add(rid, child);
                    }
                    model.insert(field, value);
                }
            }
        }

        self.apply_subscription_result(&body.resources, observer);

        if let Some(view) = self.resolve(rid) {
            observer.on_model_changed(rid, &view);
        }
        self.propagate(rid, observer);
        Ok(())
    }

    fn apply_add(
        &mut self,
        rid: &str,
        body: AddBody,
        observer: &mut dyn CacheObserver,
    ) -> Result<()> {
        if !self.expect_kind(rid, ResourceKind::Collection, "add")? {
            return Ok(());
        }

        if let Some(items) = self.collections.get_mut(rid) {
            if body.idx > items.len() {
                return Err(ResError::Protocol(format!(
                    "add index {} out of range for '{}' of length {}",
                    body.idx,
                    rid,
                    items.len()
                )));
            }
            items.insert(body.idx, body.value.clone());
        }
        if let Some(child) = reference_rid(&body.value) {
            self.dependencies.add(rid, child);
        }

        self.apply_subscription_result(&body.resources, observer);

        let value = self.resolve_value(&body.value);
        observer.on_collection_added(rid, body.idx, &value);
        self.propagate(rid, observer);
        Ok(())
    }

    fn apply_remove(
        &mut self,
        rid: &str,
        body: RemoveBody,
        observer: &mut dyn CacheObserver,
    ) -> Result<()> {
        if !self.expect_kind(rid, ResourceKind::Collection, "remove")? {
            return Ok(());
        }

        if let Some(items) = self.collections.get_mut(rid) {
            if body.idx >= items.len() {
                return Err(ResError::Protocol(format!(
                    "remove index {} out of range for '{}' of length {}",
                    body.idx,
                    rid,
                    items.len()
                )));
            }
            let removed = items.remove(body.idx);
            if let Some(child) = reference_rid(&removed) {
                self.dependencies.remove(rid, child);
            }
        }

        observer.on_collection_removed(rid, body.idx);
        self.propagate(rid, observer);
        Ok(())
    }

    /// Drop `rid` and its outgoing edges
    ///
    /// Parents still referencing it keep their raw reference, which then resolves
    /// verbatim.
    pub fn delete(&mut self, rid: &str) {
        self.dependencies.remove_parent(rid);
        let removed = self.models.remove(rid).is_some() | self.collections.remove(rid).is_some();
        if removed {
            tracing::debug!(rid = %rid, "Resource deleted from cache");
        }
    }

    /// Notify every transitive parent of `rid` exactly once
    ///
    /// Models get their full new view. Collections report only the first element
    /// referencing the child through which the change reached them.
    fn propagate(&self, rid: &str, observer: &mut dyn CacheObserver) {
        let mut visited: HashSet<String> = HashSet::from([rid.to_string()]);
        let mut via: HashMap<String, String> = HashMap::new();
        let mut ancestors = Vec::new();
        let mut queue = VecDeque::from([rid.to_string()]);

        while let Some(current) = queue.pop_front() {
            for parent in self.dependencies.parents_of(&current) {
                if visited.insert(parent.clone()) {
                    via.insert(parent.clone(), current.clone());
                    ancestors.push(parent.clone());
                    queue.push_back(parent);
                }
            }
        }

        for ancestor in &ancestors {
            if self.models.contains_key(ancestor) {
                if let Some(view) = self.resolve(ancestor) {
                    observer.on_model_changed(ancestor, &view);
                }
            } else if let Some(items) = self.collections.get(ancestor)
                && let Some(child) = via.get(ancestor)
                && let Some(idx) = items
                    .iter()
                    .position(|item| reference_rid(item) == Some(child.as_str()))
            {
                let value = self.resolve_value(&items[idx]);
                observer.on_collection_changed(ancestor, idx, &value);
            }
        }
    }
}
