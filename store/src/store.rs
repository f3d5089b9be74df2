use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use crate::draft::{Draft, produce, try_produce};
use crate::emitter::{Emitter, IntoListener, Unsubscribe};
use crate::error::{BoxError, BroadcastError, StoreError};
use crate::options::StoreOptions;
use crate::view::UseStore;

mod handle;
pub use handle::*;

/// Holds one immutable snapshot of `S` and broadcasts every replacement of it.
///
/// Cloning a `Store` yields another handle to the same state.
pub struct Store<S>(Arc<Inner<S>>);

struct Inner<S> {
    options: StoreOptions,
    /// `None` until the initializer has returned
    current: RwLock<Option<Arc<S>>>,
    version: AtomicU64,
    emitter: Emitter<Arc<S>>,
    outbox: Mutex<Outbox<S>>,
}

/// Committed snapshots waiting to be broadcast, in commit order
struct Outbox<S> {
    pending: VecDeque<Arc<S>>,
    draining: bool,
}

impl<S> Inner<S> {
    fn new(options: StoreOptions) -> Self {
        Self {
            options,
            current: RwLock::new(None),
            version: AtomicU64::new(0),
            emitter: Emitter::new(),
            outbox: Mutex::new(Outbox { pending: VecDeque::new(), draining: false }),
        }
    }

    fn name(&self) -> &str { self.options.name.as_deref().unwrap_or("store") }

    fn snapshot(&self) -> Result<Arc<S>, StoreError> {
        self.current.read().unwrap_or_else(PoisonError::into_inner).clone().ok_or(StoreError::Uninitialized)
    }

    fn outbox(&self) -> MutexGuard<'_, Outbox<S>> { self.outbox.lock().unwrap_or_else(PoisonError::into_inner) }

    fn install(&self, value: S) { *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(value)); }
}

impl<S> Inner<S>
where S: Clone
{
    fn set<F>(&self, recipe: F) -> Result<(), StoreError>
    where F: FnOnce(&mut Draft<'_, S>) {
        let base = self.snapshot()?;
        let next = produce(&base, recipe);
        self.commit(&base, next)
    }

    fn try_set<E, F>(&self, recipe: F) -> Result<(), StoreError>
    where
        E: Into<BoxError>,
        F: FnOnce(&mut Draft<'_, S>) -> Result<(), E>,
    {
        let base = self.snapshot()?;
        let next = try_produce(&base, recipe).map_err(|e| StoreError::Recipe(e.into()))?;
        self.commit(&base, next)
    }

    fn replace<F>(&self, f: F) -> Result<(), StoreError>
    where F: FnOnce(&S) -> S {
        let base = self.snapshot()?;
        let next = Arc::new(f(&base));
        self.commit(&base, next)
    }

    fn commit(&self, base: &Arc<S>, next: Arc<S>) -> Result<(), StoreError> {
        {
            let mut outbox = self.outbox();
            {
                let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
                if current.as_ref().is_some_and(|current| !Arc::ptr_eq(current, base)) {
                    tracing::warn!("Store {} committed over a value that changed while its recipe ran", self.name());
                }
                *current = Some(next.clone());
            }
            let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::debug!("Store {} committed version {version}", self.name());

            outbox.pending.push_back(next);
            if outbox.draining {
                // delivered by the broadcast loop already running further up
                tracing::trace!("Store {} queued version {version} behind an in-flight broadcast", self.name());
                return Ok(());
            }
            outbox.draining = true;
        }
        self.drain()
    }

    fn drain(&self) -> Result<(), StoreError> {
        let _reset = DrainReset(&self.outbox);
        let mut failures = Vec::new();
        loop {
            let next = {
                let mut outbox = self.outbox();
                match outbox.pending.pop_front() {
                    Some(next) => next,
                    None => {
                        outbox.draining = false;
                        break;
                    }
                }
            };

            if self.options.isolate_observers {
                if let Err(err) = self.emitter.emit_isolated(next) {
                    failures.extend(err.failures);
                }
            } else {
                self.emitter.emit(next);
            }
        }

        if failures.is_empty() { Ok(()) } else { Err(BroadcastError { failures }.into()) }
    }
}

/// Releases the drain when an observer unwinds out of the broadcast loop. Queued snapshots stay
/// pending and go out, in commit order, ahead of the next commit.
struct DrainReset<'a, S>(&'a Mutex<Outbox<S>>);

impl<S> Drop for DrainReset<'_, S> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut outbox = self.0.lock().unwrap_or_else(PoisonError::into_inner);
            tracing::warn!("Broadcast unwound with {} snapshot(s) still queued", outbox.pending.len());
            outbox.draining = false;
        }
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<S> std::fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("name", &self.0.name())
            .field("version", &self.0.version.load(Ordering::Relaxed))
            .field("observers", &self.0.emitter.len())
            .finish()
    }
}

impl<S> Store<S>
where S: Clone + Send + Sync + 'static
{
    /// Create a store from an initializer.
    ///
    /// The initializer receives a [`StoreHandle`] that it may capture (for example into action
    /// closures held by the state). The handle only becomes usable once the initializer has
    /// returned; calling it earlier fails with [`StoreError::Uninitialized`].
    pub fn new<F>(initializer: F) -> Self
    where F: FnOnce(&StoreHandle<S>) -> S {
        Self::with_options(StoreOptions::default(), initializer)
    }

    pub fn with_options<F>(options: StoreOptions, initializer: F) -> Self
    where F: FnOnce(&StoreHandle<S>) -> S {
        let store = Self(Arc::new(Inner::new(options)));
        let value = initializer(&store.handle());
        store.0.install(value);
        tracing::debug!("Store {} initialized", store.name());
        store
    }

    /// Create a store from a fallible initializer
    pub fn try_new<F, E>(initializer: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&StoreHandle<S>) -> Result<S, E>,
        E: Into<BoxError>,
    {
        Self::try_with_options(StoreOptions::default(), initializer)
    }

    pub fn try_with_options<F, E>(options: StoreOptions, initializer: F) -> Result<Self, StoreError>
    where
        F: FnOnce(&StoreHandle<S>) -> Result<S, E>,
        E: Into<BoxError>,
    {
        let store = Self(Arc::new(Inner::new(options)));
        let value = initializer(&store.handle()).map_err(|e| StoreError::Initializer(e.into()))?;
        store.0.install(value);
        tracing::debug!("Store {} initialized", store.name());
        Ok(store)
    }

    pub fn from_value(value: S) -> Self { Self::new(move |_| value) }

    /// The current snapshot
    pub fn get(&self) -> Arc<S> {
        match self.0.snapshot() {
            Ok(value) => value,
            Err(_) => unreachable!("a Store is only handed out after its initializer returned"),
        }
    }

    /// Apply a draft recipe, commit the result and broadcast it to every observer.
    ///
    /// Returns once the broadcast has completed. When called from inside an observer, the commit
    /// happens immediately but delivery waits for the in-flight broadcast to finish, so every
    /// observer sees snapshots in commit order.
    ///
    /// The same holds when another thread is broadcasting: this call returns once its value is
    /// committed and queued, and that thread delivers it. Failures of isolated observers during
    /// that delivery are reported to the thread running the broadcast, not to this caller.
    pub fn set<F>(&self, recipe: F) -> Result<(), StoreError>
    where F: FnOnce(&mut Draft<'_, S>) {
        self.0.set(recipe)
    }

    /// Like [`Store::set`], but the recipe may fail, in which case nothing is committed
    pub fn try_set<E, F>(&self, recipe: F) -> Result<(), StoreError>
    where
        E: Into<BoxError>,
        F: FnOnce(&mut Draft<'_, S>) -> Result<(), E>,
    {
        self.0.try_set(recipe)
    }

    /// Replace the value wholesale with the result of `f(current)`
    pub fn replace<F>(&self, f: F) -> Result<(), StoreError>
    where F: FnOnce(&S) -> S {
        self.0.replace(f)
    }

    /// A capability that does not keep the store alive
    pub fn handle(&self) -> StoreHandle<S> { StoreHandle::new(Arc::downgrade(&self.0)) }

    pub fn emitter(&self) -> &Emitter<Arc<S>> { &self.0.emitter }

    pub fn subscribe<L>(&self, listener: L) -> Unsubscribe<Arc<S>>
    where L: IntoListener<Arc<S>> {
        self.0.emitter.subscribe(listener)
    }

    pub fn getter(&self) -> Getter<S> { Getter(self.clone()) }

    pub fn use_store(&self) -> UseStore<S> { UseStore::new(self.clone()) }

    /// The view binding, reader and emitter as a triple
    pub fn parts(&self) -> (UseStore<S>, Getter<S>, Emitter<Arc<S>>) { (self.use_store(), self.getter(), self.0.emitter.clone()) }

    pub fn name(&self) -> &str { self.0.name() }

    /// Number of commits since construction
    pub fn version(&self) -> u64 { self.0.version.load(Ordering::Relaxed) }

    pub fn options(&self) -> &StoreOptions { &self.0.options }
}

/// Read-only access to a store
pub struct Getter<S>(Store<S>);

impl<S> Clone for Getter<S> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<S> std::fmt::Debug for Getter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_tuple("Getter").field(&self.0).finish() }
}

impl<S> Getter<S>
where S: Clone + Send + Sync + 'static
{
    pub fn get(&self) -> Arc<S> { self.0.get() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Debug, PartialEq)]
    struct Counter {
        count: u32,
    }

    #[test]
    fn test_set_commits_and_broadcasts() {
        let store = Store::from_value(Counter { count: 0 });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _sub = {
            let seen = seen.clone();
            store.subscribe(move |value: Arc<Counter>| seen.lock().unwrap().push(value.count))
        };

        store.set(|draft| draft.count += 1).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        assert_eq!(store.get().count, 1);
        assert_eq!(store.version(), 1);
    }

    #[test]
    fn test_get_is_stable_between_sets() {
        let store = Store::from_value(Counter { count: 3 });
        assert!(Arc::ptr_eq(&store.get(), &store.get()));
    }

    #[test]
    fn test_noop_recipe_still_broadcasts_same_snapshot() {
        let store = Store::from_value(Counter { count: 3 });
        let before = store.get();
        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let hits = hits.clone();
            let before = before.clone();
            store.subscribe(move |value: Arc<Counter>| {
                assert!(Arc::ptr_eq(&value, &before));
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };

        store.set(|_| {}).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&store.get(), &before));
    }

    #[test]
    fn test_reentrant_set_is_delivered_in_commit_order() {
        let store = Store::from_value(Counter { count: 0 });
        let log = Arc::new(Mutex::new(Vec::new()));

        // first observer bumps the counter once more when it sees 1
        let _bump = {
            let handle = store.handle();
            let log = log.clone();
            store.subscribe(move |value: Arc<Counter>| {
                log.lock().unwrap().push(("bump", value.count));
                if value.count == 1 {
                    handle.set(|draft| draft.count = 2).unwrap();
                    // committed, not yet delivered
                    assert_eq!(handle.get().unwrap().count, 2);
                }
            })
        };
        let _watch = {
            let log = log.clone();
            store.subscribe(move |value: Arc<Counter>| log.lock().unwrap().push(("watch", value.count)))
        };

        store.set(|draft| draft.count = 1).unwrap();

        let log = log.lock().unwrap().clone();
        let counts: Vec<u32> = log.iter().map(|(_, count)| *count).collect();
        assert_eq!(counts, vec![1, 1, 2, 2]);
        assert_eq!(store.get().count, 2);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_store_recovers_after_observer_panic() {
        let store = Store::from_value(Counter { count: 0 });
        let unsubscribe = store.subscribe(|value: Arc<Counter>| {
            if value.count == 1 {
                panic!("boom");
            }
        });

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.set(|draft| draft.count = 1)));
        assert!(result.is_err());
        // the value was committed before the broadcast started
        assert_eq!(store.get().count, 1);

        // the drain was released, so later sets still deliver
        let hits = Arc::new(AtomicUsize::new(0));
        let _sub = {
            let hits = hits.clone();
            store.subscribe(move |_: Arc<Counter>| {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(unsubscribe.unsubscribe());
        store.set(|draft| draft.count = 2).unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_queued_set_survives_observer_panic() {
        let store = Store::from_value(Counter { count: 0 });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _watch = {
            let seen = seen.clone();
            store.subscribe(move |value: Arc<Counter>| seen.lock().unwrap().push(value.count))
        };
        let nested = Arc::new(Mutex::new(None));
        let _chain = {
            let handle = store.handle();
            let nested = nested.clone();
            store.subscribe(move |value: Arc<Counter>| {
                if value.count == 1 {
                    *nested.lock().unwrap() = Some(handle.set(|draft| draft.count = 2).is_ok());
                    panic!("chain failed after queueing 2");
                }
            })
        };

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| store.set(|draft| draft.count = 1)));
        assert!(result.is_err());
        assert_eq!(*nested.lock().unwrap(), Some(true));
        assert_eq!(store.get().count, 2);

        // 2 is still queued and goes out ahead of the next commit
        store.set(|draft| draft.count = 3).unwrap();
        let seen = seen.lock().unwrap().clone();
        assert!(seen.ends_with(&[2, 3]), "seen: {seen:?}");
        assert_eq!(seen.iter().filter(|count| **count == 2).count(), 1);
    }

    #[test]
    fn test_set_from_other_thread_is_delivered_by_running_broadcast() {
        let store = Store::from_value(Counter { count: 0 });
        let seen = Arc::new(Mutex::new(Vec::new()));
        let _watch = {
            let seen = seen.clone();
            store.subscribe(move |value: Arc<Counter>| seen.lock().unwrap().push(value.count))
        };
        // holds the broadcast of 1 open until the main thread has committed 2
        let gate = Arc::new(std::sync::Barrier::new(2));
        let _hold = {
            let gate = gate.clone();
            store.subscribe(move |value: Arc<Counter>| {
                if value.count == 1 {
                    gate.wait();
                    gate.wait();
                }
            })
        };

        std::thread::scope(|scope| {
            let broadcaster = scope.spawn(|| store.set(|draft| draft.count = 1));

            gate.wait();
            store.set(|draft| draft.count = 2).unwrap();
            assert_eq!(store.get().count, 2);
            assert!(!seen.lock().unwrap().contains(&2));
            gate.wait();

            broadcaster.join().unwrap().unwrap();
        });

        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_nested_set_in_recipe_wins_last() {
        let store = Store::from_value(Counter { count: 0 });
        let handle = store.handle();
        store
            .set(|draft| {
                handle.set(|inner| inner.count = 50).unwrap();
                draft.count = 1;
            })
            .unwrap();
        assert_eq!(store.get().count, 1);
        assert_eq!(store.version(), 2);
    }

    #[test]
    fn test_debug_output() {
        let store = Store::with_options(StoreOptions::named("counter"), |_| Counter { count: 0 });
        let rendered = format!("{store:?}");
        assert!(rendered.contains("counter"));
        assert!(rendered.contains("version: 0"));
    }
}
