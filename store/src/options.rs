/// Construction-time settings for a [`Store`](crate::Store).
///
/// ```rust
/// use draft_store::StoreOptions;
///
/// let options = StoreOptions::named("session").isolate_observers();
/// assert_eq!(options.name.as_deref(), Some("session"));
/// assert!(options.isolate_observers);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Shown in log output and `Debug`
    pub name: Option<String>,
    /// When set, a panicking observer no longer stops the broadcast. Every observer still gets
    /// the value and the panics come back from `set` as [`StoreError::Observers`](crate::StoreError::Observers).
    pub isolate_observers: bool,
}

impl StoreOptions {
    pub fn new() -> Self { Self::default() }

    pub fn named(name: impl Into<String>) -> Self { Self { name: Some(name.into()), ..Self::default() } }

    pub fn isolate_observers(mut self) -> Self {
        self.isolate_observers = true;
        self
    }
}
