use thiserror::Error;

use crate::emitter::SubscriptionId;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum StoreError {
    /// `get`/`set` was called through a handle while the initializer was still running
    #[error("Store accessed before its initializer returned")]
    Uninitialized,
    #[error("Store has been dropped")]
    Dropped,
    /// The recipe failed; nothing was committed
    #[error("Recipe failed: {0}")]
    Recipe(#[source] BoxError),
    #[error("Initializer failed: {0}")]
    Initializer(#[source] BoxError),
    /// The new value was committed, but one or more observers panicked while receiving it
    #[error(transparent)]
    Observers(#[from] BroadcastError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{} observer(s) failed during broadcast", .failures.len())]
pub struct BroadcastError {
    pub failures: Vec<ObserverFailure>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("listener {subscription}: {message}")]
pub struct ObserverFailure {
    pub subscription: SubscriptionId,
    pub message: String,
}
