//! Subscription callbacks
//!
//! Callers describe what they want to hear about with [`ModelCallbacks`] or
//! [`CollectionCallbacks`], typed over the shape they want resolved views projected
//! into. The registry stores them type-erased as [`Subscriber`]s working on
//! `serde_json::Value`.
//!
//! ```rust,ignore
//! let callbacks = CollectionCallbacks::<Book>::new()
//!     .on_initial(|books| println!("{} books", books.len()))
//!     .on_added(|idx, book| println!("added {} at {}", book.title, idx))
//!     .on_removed(|idx| println!("removed {}", idx));
//! ```

use crate::core::resource::ResourceKind;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type ViewFn = Box<dyn Fn(&str, &Value) + Send + Sync>;
type ListFn = Box<dyn Fn(&str, &[Value]) + Send + Sync>;
type ItemFn = Box<dyn Fn(&str, usize, &Value) + Send + Sync>;
type IndexFn = Box<dyn Fn(&str, usize) + Send + Sync>;

fn project_view<T, F>(f: F) -> ViewFn
where
    T: DeserializeOwned,
    F: Fn(T) + Send + Sync + 'static,
{
    Box::new(move |rid, view| match T::deserialize(view) {
        Ok(value) => f(value),
        Err(e) => tracing::warn!(rid = %rid, error = %e, "Failed to project resource view"),
    })
}

fn project_list<T, F>(f: F) -> ListFn
where
    T: DeserializeOwned,
    F: Fn(Vec<T>) + Send + Sync + 'static,
{
    Box::new(move |rid, view| {
        match view.iter().map(|item| T::deserialize(item)).collect::<Result<Vec<T>, _>>() {
            Ok(items) => f(items),
            Err(e) => tracing::warn!(rid = %rid, error = %e, "Failed to project collection view"),
        }
    })
}

fn project_item<T, F>(f: F) -> ItemFn
where
    T: DeserializeOwned,
    F: Fn(usize, T) + Send + Sync + 'static,
{
    Box::new(move |rid, idx, view| match T::deserialize(view) {
        Ok(value) => f(idx, value),
        Err(e) => {
            tracing::warn!(rid = %rid, idx = idx, error = %e, "Failed to project collection element")
        }
    })
}

// =============================================================================
// Type-erased sinks
// =============================================================================

/// Value-level callbacks of a model subscription
#[derive(Default)]
pub struct ModelSink {
    initial: Option<ViewFn>,
    changed: Option<ViewFn>,
}

impl ModelSink {
    pub fn initial(&self, rid: &str, view: &Value) {
        if let Some(f) = &self.initial {
            f(rid, view);
        }
    }

    pub fn changed(&self, rid: &str, view: &Value) {
        if let Some(f) = &self.changed {
            f(rid, view);
        }
    }
}

impl fmt::Debug for ModelSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSink")
            .field("initial", &self.initial.is_some())
            .field("changed", &self.changed.is_some())
            .finish()
    }
}

/// Value-level callbacks of a collection subscription
#[derive(Default)]
pub struct CollectionSink {
    initial: Option<ListFn>,
    added: Option<ItemFn>,
    changed: Option<ItemFn>,
    removed: Option<IndexFn>,
}

impl CollectionSink {
    pub fn initial(&self, rid: &str, view: &[Value]) {
        if let Some(f) = &self.initial {
            f(rid, view);
        }
    }

    pub fn added(&self, rid: &str, idx: usize, value: &Value) {
        if let Some(f) = &self.added {
            f(rid, idx, value);
        }
    }

    pub fn changed(&self, rid: &str, idx: usize, value: &Value) {
        if let Some(f) = &self.changed {
            f(rid, idx, value);
        }
    }

    pub fn removed(&self, rid: &str, idx: usize) {
        if let Some(f) = &self.removed {
            f(rid, idx);
        }
    }
}

impl fmt::Debug for CollectionSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionSink")
            .field("initial", &self.initial.is_some())
            .field("added", &self.added.is_some())
            .field("changed", &self.changed.is_some())
            .field("removed", &self.removed.is_some())
            .finish()
    }
}

/// Callbacks attached to one subscription handle
#[derive(Debug, Clone)]
pub enum Subscriber {
    Model(Arc<ModelSink>),
    Collection(Arc<CollectionSink>),
}

impl Subscriber {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Subscriber::Model(_) => ResourceKind::Model,
            Subscriber::Collection(_) => ResourceKind::Collection,
        }
    }

    /// Deliver a full view as the initial state
    ///
    /// A model view goes to model sinks, an array view to collection sinks; any
    /// other pairing is ignored.
    pub fn initial(&self, rid: &str, view: &Value) {
        match (self, view) {
            (Subscriber::Model(sink), Value::Object(_)) => sink.initial(rid, view),
            (Subscriber::Collection(sink), Value::Array(items)) => sink.initial(rid, items),
            _ => tracing::debug!(rid = %rid, "View does not match subscription kind"),
        }
    }
}

// =============================================================================
// Typed builders
// =============================================================================

/// Callbacks for a model subscription, typed over the projected shape `T`
pub struct ModelCallbacks<T> {
    sink: ModelSink,
    _marker: PhantomData<fn(T)>,
}

impl<T: DeserializeOwned + 'static> ModelCallbacks<T> {
    pub fn new() -> Self {
        Self {
            sink: ModelSink::default(),
            _marker: PhantomData,
        }
    }

    /// Called with the full view after every (re)subscription
    pub fn on_initial<F>(mut self, f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.sink.initial = Some(project_view(f));
        self
    }

    /// Called with the full view whenever the model or anything it references changes
    pub fn on_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.sink.changed = Some(project_view(f));
        self
    }

    pub(crate) fn into_subscriber(self) -> Subscriber {
        Subscriber::Model(Arc::new(self.sink))
    }
}

impl<T: DeserializeOwned + 'static> Default for ModelCallbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Callbacks for a collection subscription, typed over the element shape `T`
pub struct CollectionCallbacks<T> {
    sink: CollectionSink,
    _marker: PhantomData<fn(T)>,
}

impl<T: DeserializeOwned + 'static> CollectionCallbacks<T> {
    pub fn new() -> Self {
        Self {
            sink: CollectionSink::default(),
            _marker: PhantomData,
        }
    }

    pub fn on_initial<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<T>) + Send + Sync + 'static,
    {
        self.sink.initial = Some(project_list(f));
        self
    }

    pub fn on_added<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        self.sink.added = Some(project_item(f));
        self
    }

    /// Called when the resource referenced at an index changed
    pub fn on_changed<F>(mut self, f: F) -> Self
    where
        F: Fn(usize, T) + Send + Sync + 'static,
    {
        self.sink.changed = Some(project_item(f));
        self
    }

    pub fn on_removed<F>(mut self, f: F) -> Self
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.sink.removed = Some(Box::new(move |_rid, idx| f(idx)));
        self
    }

    pub(crate) fn into_subscriber(self) -> Subscriber {
        Subscriber::Collection(Arc::new(self.sink))
    }
}

impl<T: DeserializeOwned + 'static> Default for CollectionCallbacks<T> {
    fn default() -> Self {
        Self::new()
    }
}
