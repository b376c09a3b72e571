//! Cache notification sink
//!
//! The cache reports every observable mutation through [`CacheObserver`]. Mutations
//! happen under the cache lock, so the client collects them into a
//! `Vec<CacheNotification>` first and replays them into its dispatcher once the lock
//! is released.

use serde_json::Value;

/// Receiver of resolved cache notifications
///
/// All views are fully resolved.
pub trait CacheObserver {
    fn on_model_initial(&mut self, rid: &str, view: &Value);

    fn on_model_changed(&mut self, rid: &str, view: &Value);

    fn on_collection_initial(&mut self, rid: &str, view: &[Value]);

    fn on_collection_added(&mut self, rid: &str, idx: usize, value: &Value);

    /// Element `idx` of `rid` now resolves to a different view
    fn on_collection_changed(&mut self, rid: &str, idx: usize, value: &Value);

    fn on_collection_removed(&mut self, rid: &str, idx: usize);
}

/// A recorded observer call
#[derive(Debug, Clone, PartialEq)]
pub enum CacheNotification {
    ModelInitial { rid: String, view: Value },
    ModelChanged { rid: String, view: Value },
    CollectionInitial { rid: String, view: Vec<Value> },
    CollectionAdded { rid: String, idx: usize, value: Value },
    CollectionChanged { rid: String, idx: usize, value: Value },
    CollectionRemoved { rid: String, idx: usize },
}

impl CacheNotification {
    pub fn rid(&self) -> &str {
        match self {
            CacheNotification::ModelInitial { rid, .. }
            | CacheNotification::ModelChanged { rid, .. }
            | CacheNotification::CollectionInitial { rid, .. }
            | CacheNotification::CollectionAdded { rid, .. }
            | CacheNotification::CollectionChanged { rid, .. }
            | CacheNotification::CollectionRemoved { rid, .. } => rid,
        }
    }

    /// Replay this notification into `observer`
    pub fn deliver(&self, observer: &mut dyn CacheObserver) {
        match self {
            CacheNotification::ModelInitial { rid, view } => observer.on_model_initial(rid, view),
            CacheNotification::ModelChanged { rid, view } => observer.on_model_changed(rid, view),
            CacheNotification::CollectionInitial { rid, view } => {
                observer.on_collection_initial(rid, view)
            }
            CacheNotification::CollectionAdded { rid, idx, value } => {
                observer.on_collection_added(rid, *idx, value)
            }
            CacheNotification::CollectionChanged { rid, idx, value } => {
                observer.on_collection_changed(rid, *idx, value)
            }
            CacheNotification::CollectionRemoved { rid, idx } => {
                observer.on_collection_removed(rid, *idx)
            }
        }
    }
}

impl CacheObserver for Vec<CacheNotification> {
    fn on_model_initial(&mut self, rid: &str, view: &Value) {
        self.push(CacheNotification::ModelInitial {
            rid: rid.to_string(),
            view: view.clone(),
        });
    }

    fn on_model_changed(&mut self, rid: &str, view: &Value) {
        self.push(CacheNotification::ModelChanged {
            rid: rid.to_string(),
            view: view.clone(),
        });
    }

    fn on_collection_initial(&mut self, rid: &str, view: &[Value]) {
        self.push(CacheNotification::CollectionInitial {
            rid: rid.to_string(),
            view: view.to_vec(),
        });
    }

    fn on_collection_added(&mut self, rid: &str, idx: usize, value: &Value) {
        self.push(CacheNotification::CollectionAdded {
            rid: rid.to_string(),
            idx,
            value: value.clone(),
        });
    }

    fn on_collection_changed(&mut self, rid: &str, idx: usize, value: &Value) {
        self.push(CacheNotification::CollectionChanged {
            rid: rid.to_string(),
            idx,
            value: value.clone(),
        });
    }

    fn on_collection_removed(&mut self, rid: &str, idx: usize) {
        self.push(CacheNotification::CollectionRemoved {
            rid: rid.to_string(),
            idx,
        });
    }
}
