use std::sync::{Arc, Weak};

use super::Inner;
use crate::draft::Draft;
use crate::error::{BoxError, StoreError};

/// The `get`/`set` capability handed to a store's initializer.
///
/// A handle can be created before the store holds a value, and does not keep the store alive, so
/// every call can fail: [`StoreError::Uninitialized`] while the initializer is still running,
/// [`StoreError::Dropped`] once the store is gone.
pub struct StoreHandle<S>(Weak<Inner<S>>);

impl<S> Clone for StoreHandle<S> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<S> std::fmt::Debug for StoreHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.upgrade() {
            Some(inner) => f.debug_tuple("StoreHandle").field(&inner.name()).finish(),
            None => f.write_str("StoreHandle(<dropped>)"),
        }
    }
}

impl<S> StoreHandle<S> {
    pub(super) fn new(inner: Weak<Inner<S>>) -> Self { Self(inner) }

    fn inner(&self) -> Result<Arc<Inner<S>>, StoreError> { self.0.upgrade().ok_or(StoreError::Dropped) }

    pub fn get(&self) -> Result<Arc<S>, StoreError> { self.inner()?.snapshot() }

    /// Whether the initializer has returned. False once the store is dropped.
    pub fn is_ready(&self) -> bool { self.inner().and_then(|inner| inner.snapshot()).is_ok() }
}

impl<S> StoreHandle<S>
where S: Clone
{
    pub fn set<F>(&self, recipe: F) -> Result<(), StoreError>
    where F: FnOnce(&mut Draft<'_, S>) {
        self.inner()?.set(recipe)
    }

    pub fn try_set<E, F>(&self, recipe: F) -> Result<(), StoreError>
    where
        E: Into<BoxError>,
        F: FnOnce(&mut Draft<'_, S>) -> Result<(), E>,
    {
        self.inner()?.try_set(recipe)
    }

    pub fn replace<F>(&self, f: F) -> Result<(), StoreError>
    where F: FnOnce(&S) -> S {
        self.inner()?.replace(f)
    }
}
