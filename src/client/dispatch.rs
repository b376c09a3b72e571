//! Routing of cache notifications to subscription callbacks

use crate::cache::CacheObserver;
use crate::subscription::{Subscriber, SubscriptionRegistry};
use serde_json::Value;
use std::sync::{Mutex, PoisonError};

/// [`CacheObserver`] that looks up the handles of each rid and invokes their callbacks
///
/// The registry lock is only held while copying the subscriber list, never while a
/// callback runs.
pub(crate) struct Dispatcher<'a> {
    registry: &'a Mutex<SubscriptionRegistry>,
}

impl<'a> Dispatcher<'a> {
    pub(crate) fn new(registry: &'a Mutex<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    fn subscribers(&self, rid: &str) -> Vec<Subscriber> {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers(rid)
    }
}

impl CacheObserver for Dispatcher<'_> {
    fn on_model_initial(&mut self, rid: &str, view: &Value) {
        for subscriber in self.subscribers(rid) {
            if let Subscriber::Model(sink) = subscriber {
                sink.initial(rid, view);
            }
        }
    }

    fn on_model_changed(&mut self, rid: &str, view: &Value) {
        for subscriber in self.subscribers(rid) {
            if let Subscriber::Model(sink) = subscriber {
                sink.changed(rid, view);
            }
        }
    }

    fn on_collection_initial(&mut self, rid: &str, view: &[Value]) {
        for subscriber in self.subscribers(rid) {
            if let Subscriber::Collection(sink) = subscriber {
                sink.initial(rid, view);
            }
        }
    }

    fn on_collection_added(&mut self, rid: &str, idx: usize, value: &Value) {
        for subscriber in self.subscribers(rid) {
            if let Subscriber::Collection(sink) = subscriber {
                sink.added(rid, idx, value);
            }
        }
    }

    fn on_collection_changed(&mut self, rid: &str, idx: usize, value: &Value) {
        for subscriber in self.subscribers(rid) {
            if let Subscriber::Collection(sink) = subscriber {
                sink.changed(rid, idx, value);
            }
        }
    }

    fn on_collection_removed(&mut self, rid: &str, idx: usize) {
        for subscriber in self.subscribers(rid) {
            if let Subscriber::Collection(sink) = subscriber {
                sink.removed(rid, idx);
            }
        }
    }
}
