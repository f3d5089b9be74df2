//! View binding
//!
//! Lets a rendering component read a store and re-render when it changes, without manual
//! subscription bookkeeping. The rendering layer is abstracted by [`ViewHost`], which only needs
//! to offer per-instance local state and a mount/unmount effect. [`HeadlessView`] is a host that
//! works without any UI framework.

use std::sync::Arc;

use crate::store::Store;

mod headless;
pub use headless::*;

/// Cleanup returned by a mount effect, run once when the view instance is torn down
pub type Teardown = Box<dyn FnOnce() + Send>;

/// Runs once when a view instance mounts
pub type MountEffect = Box<dyn FnOnce() -> Teardown + Send>;

/// Writes a view instance's local state and schedules a re-render of that instance
pub struct StateSetter<T>(Arc<dyn Fn(T) + Send + Sync>);

impl<T> StateSetter<T> {
    pub fn new<F>(f: F) -> Self
    where F: Fn(T) + Send + Sync + 'static {
        Self(Arc::new(f))
    }

    pub fn set(&self, value: T) { (self.0)(value) }
}

impl<T> Clone for StateSetter<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

/// The primitives a rendering layer exposes to the components it renders.
///
/// Hooks are identified by call order within a render, so a component must call them in the same
/// order every time it renders.
pub trait ViewHost {
    /// Local state for the current view instance. `init` only runs on the first render.
    fn use_state<T, F>(&mut self, init: F) -> (T, StateSetter<T>)
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T;

    /// Register an effect that runs once after the instance first mounts. Later renders pass the
    /// effect again and the host discards it.
    fn use_mount_effect(&mut self, effect: MountEffect);
}

/// Binds a view instance to a store's current value.
pub struct UseStore<S> {
    store: Store<S>,
}

impl<S> Clone for UseStore<S> {
    fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S> std::fmt::Debug for UseStore<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.debug_struct("UseStore").field("store", &self.store).finish() }
}

impl<S> UseStore<S>
where S: Clone + Send + Sync + 'static
{
    pub fn new(store: Store<S>) -> Self { Self { store } }

    /// Call from a component's render. Returns the value the instance should render.
    ///
    /// The first render captures the store's current value. After mounting, the instance is
    /// subscribed once and every emitted snapshot is pushed into its local state. Unmounting
    /// removes the subscription.
    pub fn bind<H>(&self, host: &mut H) -> Arc<S>
    where H: ViewHost {
        let (local, set_local) = host.use_state(|| self.store.get());

        let store = self.store.clone();
        let seen = local.clone();
        host.use_mount_effect(Box::new(move || -> Teardown {
            let unsubscribe = {
                let set_local = set_local.clone();
                store.subscribe(move |next: Arc<S>| set_local.set(next))
            };
            // a commit may have landed between the first render and mounting
            let latest = store.get();
            if !Arc::ptr_eq(&latest, &seen) {
                set_local.set(latest);
            }
            tracing::debug!("View bound to store {} ({})", store.name(), unsubscribe.id());

            Box::new(move || {
                unsubscribe.unsubscribe();
            })
        }));

        local
    }
}
