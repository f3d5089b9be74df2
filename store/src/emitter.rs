use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::error::{BroadcastError, ObserverFailure};

/// Identity of a single registration. Minted fresh for every `subscribe` call and never reused
/// by the emitter that issued it.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct SubscriptionId(usize);

impl From<SubscriptionId> for usize {
    fn from(id: SubscriptionId) -> Self { id.0 }
}
impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{}", self.0) }
}

/// A unique identifier for an emitter, usable for deduplication and diagnostics.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct EmitterId(usize);

impl std::fmt::Display for EmitterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "{:#x}", self.0) }
}

/// A registered observer callback
pub type Listener<T> = Arc<dyn Fn(T) + Send + Sync + 'static>;

/// Trait for types that can be registered with an [`Emitter`].
pub trait IntoListener<T> {
    fn into_listener(self) -> Listener<T>;
}

/// The subscriber registry. Tracks an unordered set of observers and broadcasts values to them.
///
/// Cloning an `Emitter` yields another handle to the same registry.
pub struct Emitter<T>(Arc<Inner<T>>);

struct Inner<T> {
    listeners: RwLock<HashMap<SubscriptionId, Listener<T>>>,
    next_id: AtomicUsize,
}

impl<T> Inner<T> {
    fn read(&self) -> RwLockReadGuard<'_, HashMap<SubscriptionId, Listener<T>>> {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SubscriptionId, Listener<T>>> {
        self.listeners.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_live(&self, id: SubscriptionId) -> bool { self.read().contains_key(&id) }

    fn remove(&self, id: SubscriptionId) -> bool { self.write().remove(&id).is_some() }
}

impl<T> Clone for Emitter<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> std::fmt::Debug for Emitter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Emitter").field("id", &self.id()).field("listeners", &self.len()).finish()
    }
}

impl<T> Default for Emitter<T> {
    fn default() -> Self { Self::new() }
}

impl<T> Emitter<T> {
    pub fn new() -> Self { Self(Arc::new(Inner { listeners: RwLock::new(HashMap::new()), next_id: AtomicUsize::new(0) })) }

    pub fn id(&self) -> EmitterId { EmitterId(Arc::as_ptr(&self.0) as *const () as usize) }

    /// Number of live registrations
    pub fn len(&self) -> usize { self.0.read().len() }

    pub fn is_empty(&self) -> bool { self.0.read().is_empty() }

    /// Register an observer. Every call creates an independent registration, even when handed
    /// the same callback twice.
    pub fn subscribe<L>(&self, listener: L) -> Unsubscribe<T>
    where L: IntoListener<T> {
        let id = SubscriptionId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
        self.0.write().insert(id, listener.into_listener());
        tracing::debug!("Emitter {} subscribed listener {id}", self.id());
        Unsubscribe { inner: Arc::downgrade(&self.0), id }
    }

    /// Copy the current registrations so no lock is held while callbacks run
    fn snapshot(&self) -> Vec<(SubscriptionId, Listener<T>)> {
        self.0.read().iter().map(|(id, listener)| (*id, listener.clone())).collect()
    }
}

impl<T> Emitter<T>
where T: Clone
{
    /// Invoke every registered observer with `value`, synchronously, on the calling thread.
    ///
    /// Observers registered during the broadcast first hear the next emission. Observers removed
    /// during the broadcast are skipped if they have not been reached yet. A panicking observer
    /// unwinds through the caller and the remaining observers are not invoked.
    pub fn emit(&self, value: T) {
        let listeners = self.snapshot();
        tracing::trace!("Emitter {} broadcasting to {} listeners", self.id(), listeners.len());

        // clone the value for each listener except the last one
        if let Some(((last_id, last), rest)) = listeners.split_last() {
            for (id, listener) in rest {
                if self.0.is_live(*id) {
                    listener(value.clone());
                }
            }
            if self.0.is_live(*last_id) {
                last(value);
            }
        }
    }

    /// Like [`Emitter::emit`], but a panicking observer does not stop delivery to the others.
    /// Failures are collected and reported once every observer has been given the value.
    pub fn emit_isolated(&self, value: T) -> Result<(), BroadcastError> {
        let listeners = self.snapshot();
        tracing::trace!("Emitter {} broadcasting (isolated) to {} listeners", self.id(), listeners.len());

        let mut failures = Vec::new();
        for (id, listener) in listeners {
            if !self.0.is_live(id) {
                continue;
            }
            let value = value.clone();
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
                let message = panic_message(payload.as_ref());
                tracing::warn!("Listener {id} of emitter {} panicked: {message}", self.id());
                failures.push(ObserverFailure { subscription: id, message });
            }
        }

        if failures.is_empty() { Ok(()) } else { Err(BroadcastError { failures }) }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Removes one registration. Does not keep the emitter alive.
pub struct Unsubscribe<T> {
    inner: Weak<Inner<T>>,
    id: SubscriptionId,
}

impl<T> Clone for Unsubscribe<T> {
    fn clone(&self) -> Self { Self { inner: self.inner.clone(), id: self.id } }
}

impl<T> std::fmt::Debug for Unsubscribe<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_tuple("Unsubscribe").field(&self.id).finish() }
}

impl<T> Unsubscribe<T> {
    pub fn id(&self) -> SubscriptionId { self.id }

    /// Remove the registration. Returns `true` if it was present, `false` if it had already been
    /// removed (or the emitter is gone).
    pub fn unsubscribe(&self) -> bool {
        let removed = self.inner.upgrade().is_some_and(|inner| inner.remove(self.id));
        tracing::debug!("Unsubscribe listener {} (removed: {removed})", self.id);
        removed
    }
}

impl<T: 'static> Unsubscribe<T> {
    /// Convert into a guard that unsubscribes when dropped
    pub fn guard(self) -> SubscriptionGuard {
        let id = self.id;
        SubscriptionGuard { id, unsubscribe: Box::new(move || self.unsubscribe()) }
    }
}

/// Unsubscribes its registration on drop
pub struct SubscriptionGuard {
    id: SubscriptionId,
    unsubscribe: Box<dyn Fn() -> bool + Send + Sync>,
}

impl SubscriptionGuard {
    pub fn id(&self) -> SubscriptionId { self.id }
}

impl std::fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_tuple("SubscriptionGuard").field(&self.id).finish() }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) { (self.unsubscribe)(); }
}

// IntoListener implementations

impl<F, T> IntoListener<T> for F
where F: Fn(T) + Send + Sync + 'static
{
    fn into_listener(self) -> Listener<T> { Arc::new(self) }
}

impl<T> IntoListener<T> for Arc<dyn Fn(T) + Send + Sync + 'static> {
    fn into_listener(self) -> Listener<T> { self }
}

#[cfg(feature = "tokio")]
impl<T> IntoListener<T> for tokio::sync::mpsc::UnboundedSender<T>
where T: Send + 'static
{
    fn into_listener(self) -> Listener<T> {
        Arc::new(move |value| {
            let _ = self.send(value); // receiver may be gone
        })
    }
}

impl<T> IntoListener<T> for std::sync::mpsc::Sender<T>
where T: Send + 'static
{
    fn into_listener(self) -> Listener<T> {
        Arc::new(move |value| {
            let _ = self.send(value); // receiver may be gone
        })
    }
}
