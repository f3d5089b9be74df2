use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{MountEffect, StateSetter, Teardown, ViewHost};

/// A [`ViewHost`] that renders without a UI framework.
///
/// Each `HeadlessView` is one view instance. Local state lives in hook slots indexed by call
/// order; mount effects run after the first [`render`](HeadlessView::render) and their teardowns
/// run on [`unmount`](HeadlessView::unmount) (or drop). A state write marks the view dirty and
/// calls the invalidation callback, if any, so the owner can schedule the next render.
pub struct HeadlessView {
    inner: Arc<Inner>,
    cursor: usize,
    pending_effects: Vec<MountEffect>,
    teardowns: Vec<Teardown>,
    mounted: bool,
    unmounted: bool,
    renders: usize,
}

struct Inner {
    slots: Mutex<Vec<Box<dyn Any + Send + Sync>>>,
    live: AtomicBool,
    dirty: AtomicBool,
    /// Bumped on every state write
    version: AtomicUsize,
    on_invalidate: Mutex<Option<Arc<dyn Fn() + Send + Sync>>>,
}

impl Inner {
    fn slots(&self) -> MutexGuard<'_, Vec<Box<dyn Any + Send + Sync>>> { self.slots.lock().unwrap_or_else(PoisonError::into_inner) }

    fn write<T: Send + Sync + 'static>(&self, index: usize, value: T) {
        if !self.live.load(Ordering::SeqCst) {
            return;
        }
        if let Some(slot) = self.slots().get_mut(index) {
            *slot = Box::new(value);
        }
        self.version.fetch_add(1, Ordering::SeqCst);
        self.dirty.store(true, Ordering::SeqCst);

        let callback = self.on_invalidate.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(callback) = callback {
            callback();
        }
    }
}

impl Default for HeadlessView {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for HeadlessView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeadlessView")
            .field("mounted", &self.mounted)
            .field("renders", &self.renders)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

impl HeadlessView {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                slots: Mutex::new(Vec::new()),
                live: AtomicBool::new(true),
                dirty: AtomicBool::new(false),
                version: AtomicUsize::new(0),
                on_invalidate: Mutex::new(None),
            }),
            cursor: 0,
            pending_effects: Vec::new(),
            teardowns: Vec::new(),
            mounted: false,
            unmounted: false,
            renders: 0,
        }
    }

    /// Called (from whichever thread wrote the state) each time local state changes
    pub fn on_invalidate<F>(&self, callback: F)
    where F: Fn() + Send + Sync + 'static {
        *self.inner.on_invalidate.lock().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Run one render pass of `component` against this instance
    pub fn render<R, C>(&mut self, component: C) -> R
    where C: FnOnce(&mut Self) -> R {
        self.cursor = 0;
        self.inner.dirty.store(false, Ordering::SeqCst);

        let output = component(self);
        self.renders += 1;

        if !self.mounted && !self.unmounted {
            self.mounted = true;
            for effect in std::mem::take(&mut self.pending_effects) {
                self.teardowns.push(effect());
            }
        }
        output
    }

    /// Render again only if local state changed since the last render
    pub fn render_if_dirty<R, C>(&mut self, component: C) -> Option<R>
    where C: FnOnce(&mut Self) -> R {
        if self.is_dirty() { Some(self.render(component)) } else { None }
    }

    /// Tear the instance down. Later state writes are ignored. Calling this twice is a no-op.
    pub fn unmount(&mut self) {
        if self.unmounted {
            return;
        }
        self.unmounted = true;
        self.mounted = false;
        self.inner.live.store(false, Ordering::SeqCst);
        self.pending_effects.clear();
        for teardown in self.teardowns.drain(..).rev() {
            teardown();
        }
    }

    pub fn is_mounted(&self) -> bool { self.mounted }

    pub fn is_dirty(&self) -> bool { self.inner.dirty.load(Ordering::SeqCst) }

    pub fn render_count(&self) -> usize { self.renders }

    /// Number of state writes so far
    pub fn version(&self) -> usize { self.inner.version.load(Ordering::SeqCst) }
}

impl ViewHost for HeadlessView {
    fn use_state<T, F>(&mut self, init: F) -> (T, StateSetter<T>)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        let index = self.cursor;
        self.cursor += 1;

        let existing = self.inner.slots().get(index).map(|slot| slot.downcast_ref::<T>().cloned());
        let value = match existing {
            Some(Some(value)) => value,
            Some(None) => {
                tracing::warn!("Hook {index} changed type between renders, reinitializing");
                let value = init();
                self.inner.slots()[index] = Box::new(value.clone());
                value
            }
            None => {
                let value = init();
                self.inner.slots().push(Box::new(value.clone()));
                value
            }
        };

        let weak = Arc::downgrade(&self.inner);
        let setter = StateSetter::new(move |value: T| {
            if let Some(inner) = weak.upgrade() {
                inner.write(index, value);
            }
        });
        (value, setter)
    }

    fn use_mount_effect(&mut self, effect: MountEffect) {
        if !self.mounted && !self.unmounted {
            self.pending_effects.push(effect);
        }
    }
}

impl Drop for HeadlessView {
    fn drop(&mut self) { self.unmount(); }
}
