//! Ordered transform pipelines over a single configuration value
//!
//! Extensions append pure `T -> T` transforms while a service is being
//! registered; the sequencer folds the base configuration through them once,
//! right before the resource is built.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use tracing::warn;

type Transform<T> = Rc<dyn Fn(T) -> T>;

/// An append-only list of transforms applied in registration order.
pub struct FilterChain<T> {
    name: &'static str,
    filters: RefCell<Vec<Transform<T>>>,
    applied: Cell<bool>,
}

impl<T> FilterChain<T> {
    /// Create an empty chain. `name` only shows up in logs.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            filters: RefCell::new(Vec::new()),
            applied: Cell::new(false),
        }
    }

    /// Append a transform.
    ///
    /// Adding after the chain has been applied is accepted, but the new
    /// transform cannot affect whatever was already built from it.
    pub fn add<F>(&self, filter: F)
    where
        F: Fn(T) -> T + 'static,
    {
        if self.applied.get() {
            warn!(
                chain = self.name,
                "filter added after the chain was applied; it will not affect the built resource"
            );
        }
        self.filters.borrow_mut().push(Rc::new(filter));
    }

    /// Fold `input` through every transform, left to right.
    ///
    /// Transforms registered while the fold runs are not part of it.
    pub fn filter(&self, input: T) -> T {
        self.applied.set(true);
        let snapshot: Vec<Transform<T>> = self.filters.borrow().clone();
        snapshot.iter().fold(input, |value, filter| filter(value))
    }

    /// Drop every transform.
    pub fn clear(&self) {
        self.filters.borrow_mut().clear();
    }

    pub fn len(&self) -> usize {
        self.filters.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.borrow().is_empty()
    }

    /// Whether `filter` has run at least once.
    pub fn is_applied(&self) -> bool {
        self.applied.get()
    }
}

impl<T> fmt::Debug for FilterChain<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterChain")
            .field("name", &self.name)
            .field("filters", &self.len())
            .field("applied", &self.applied.get())
            .finish()
    }
}
