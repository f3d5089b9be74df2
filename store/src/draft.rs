//! Copy-on-write drafts with structural sharing.
//!
//! A store value is an ordinary `Clone` type whose independently replaceable parts are wrapped in
//! [`Shared`]. Cloning a value therefore only copies pointers for those parts, and writing through
//! a `Shared` copies that one node, and only when some other snapshot still refers to it.
//!
//! Layout rules:
//! - records: plain structs. Fields that should survive an unrelated edit by identity are
//!   `Shared<_>`; scalar fields are copied along with their parent.
//! - sequences: `Shared<Vec<Shared<T>>>`. Writing element `i` copies the spine (a vector of
//!   pointers) once, then element `i`. All other elements stay shared.
//! - mappings: `Shared<BTreeMap<K, Shared<V>>>` or `Shared<HashMap<K, Shared<V>>>`, same rule as
//!   sequences, keyed instead of indexed.
//!
//! ```rust
//! use draft_store::{Shared, produce};
//! use std::sync::Arc;
//!
//! #[derive(Clone)]
//! struct State {
//!     a: Shared<Vec<u32>>,
//!     b: Shared<String>,
//! }
//!
//! let current = Arc::new(State { a: Shared::new(vec![1]), b: Shared::new("b".into()) });
//! let next = produce(&current, |draft| draft.a.push(2));
//!
//! assert_eq!(*current.a, vec![1]);
//! assert_eq!(*next.a, vec![1, 2]);
//! assert!(Shared::ptr_eq(&current.b, &next.b));
//! ```

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// A copy-on-write node. Reads are free; the first write copies the node if it is shared.
pub struct Shared<T>(Arc<T>);

impl<T> Shared<T> {
    pub fn new(value: T) -> Self { Self(Arc::new(value)) }

    /// Whether two nodes are the same allocation
    pub fn ptr_eq(a: &Self, b: &Self) -> bool { Arc::ptr_eq(&a.0, &b.0) }

    pub fn as_arc(&self) -> &Arc<T> { &self.0 }
}

impl<T: Clone> Shared<T> {
    /// Mutable access, copying the node first if another snapshot refers to it
    pub fn make_mut(&mut self) -> &mut T { Arc::make_mut(&mut self.0) }

    pub fn into_inner(self) -> T { Arc::unwrap_or_clone(self.0) }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self { Self(self.0.clone()) }
}

impl<T> Deref for Shared<T> {
    type Target = T;
    fn deref(&self) -> &T { &self.0 }
}

impl<T: Clone> DerefMut for Shared<T> {
    fn deref_mut(&mut self) -> &mut T { self.make_mut() }
}

impl<T> From<T> for Shared<T> {
    fn from(value: T) -> Self { Self::new(value) }
}

impl<T> From<Arc<T>> for Shared<T> {
    fn from(value: Arc<T>) -> Self { Self(value) }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self { Self::new(T::default()) }
}

impl<T: PartialEq> PartialEq for Shared<T> {
    fn eq(&self, other: &Self) -> bool { Self::ptr_eq(self, other) || *self.0 == *other.0 }
}
impl<T: Eq> Eq for Shared<T> {}

impl<T: std::hash::Hash> std::hash::Hash for Shared<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) { self.0.hash(state) }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

impl<T: std::fmt::Display> std::fmt::Display for Shared<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { self.0.fmt(f) }
}

/// A mutable working view of a snapshot, valid for the duration of one recipe.
///
/// Reads go straight to the base snapshot. The first write makes a shallow copy of the root, and
/// the base is never touched.
pub struct Draft<'a, T: Clone> {
    base: &'a Arc<T>,
    copy: Option<T>,
}

impl<'a, T: Clone> Draft<'a, T> {
    pub fn new(base: &'a Arc<T>) -> Self { Self { base, copy: None } }

    /// The snapshot this draft started from
    pub fn base(&self) -> &T { self.base }

    /// Whether anything has been written through this draft
    pub fn is_modified(&self) -> bool { self.copy.is_some() }

    /// Replace the whole value
    pub fn replace(&mut self, value: T) { self.copy = Some(value); }

    fn finish(self) -> Arc<T> {
        match self.copy {
            Some(value) => Arc::new(value),
            None => Arc::clone(self.base),
        }
    }
}

impl<T: Clone> Deref for Draft<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        match &self.copy {
            Some(value) => value,
            None => self.base,
        }
    }
}

impl<T: Clone> DerefMut for Draft<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        let base = self.base;
        self.copy.get_or_insert_with(|| T::clone(base))
    }
}

impl<T: Clone + std::fmt::Debug> std::fmt::Debug for Draft<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Draft").field("value", &**self).field("modified", &self.is_modified()).finish()
    }
}

/// Apply `recipe` to a draft of `base` and return the successor snapshot.
///
/// If the recipe never writes, the result is `base` itself.
pub fn produce<T, F>(base: &Arc<T>, recipe: F) -> Arc<T>
where
    T: Clone,
    F: FnOnce(&mut Draft<'_, T>),
{
    let mut draft = Draft::new(base);
    recipe(&mut draft);
    draft.finish()
}

/// Fallible [`produce`]. On error the draft is discarded.
pub fn try_produce<T, E, F>(base: &Arc<T>, recipe: F) -> Result<Arc<T>, E>
where
    T: Clone,
    F: FnOnce(&mut Draft<'_, T>) -> Result<(), E>,
{
    let mut draft = Draft::new(base);
    recipe(&mut draft)?;
    Ok(draft.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Clone, Debug, PartialEq)]
    struct Point {
        x: i32,
    }

    #[derive(Clone, Debug, PartialEq)]
    struct Pair {
        a: Shared<Point>,
        b: Shared<Point>,
    }

    fn pair() -> Arc<Pair> { Arc::new(Pair { a: Shared::new(Point { x: 1 }), b: Shared::new(Point { x: 2 }) }) }

    #[test]
    fn untouched_fields_keep_identity() {
        let current = pair();
        let next = produce(&current, |draft| draft.a.x = 10);

        assert!(!Arc::ptr_eq(&current, &next));
        assert!(!Shared::ptr_eq(&current.a, &next.a));
        assert!(Shared::ptr_eq(&current.b, &next.b));
        assert_eq!(next.a.x, 10);
    }

    #[test]
    fn old_snapshot_is_untouched() {
        let current = pair();
        let before = (*current).clone();
        let _next = produce(&current, |draft| {
            draft.a.x += 1;
            draft.b.x += 1;
        });
        assert_eq!(*current, before);
    }

    #[test]
    fn no_write_returns_base() {
        let current = pair();
        let next = produce(&current, |draft| {
            let _ = draft.a.x + draft.b.x;
        });
        assert!(Arc::ptr_eq(&current, &next));
    }

    #[test]
    fn repeated_writes_copy_once() {
        let current = pair();
        let next = produce(&current, |draft| {
            draft.a.x = 5;
            let first = Arc::as_ptr(draft.a.as_arc());
            draft.a.x = 6;
            assert_eq!(first, Arc::as_ptr(draft.a.as_arc()));
        });
        assert_eq!(next.a.x, 6);
    }

    #[test]
    fn sequence_shares_untouched_elements() {
        let current: Arc<Shared<Vec<Shared<Point>>>> =
            Arc::new(Shared::new((0..4).map(|x| Shared::new(Point { x })).collect()));
        let next = produce(&current, |draft| draft.make_mut()[2].x = 99);

        for i in [0, 1, 3] {
            assert!(Shared::ptr_eq(&current[i], &next[i]));
        }
        assert!(!Shared::ptr_eq(&current[2], &next[2]));
        assert_eq!(current[2].x, 2);
        assert_eq!(next[2].x, 99);
    }

    #[test]
    fn mapping_shares_untouched_entries() {
        let mut entries = BTreeMap::new();
        entries.insert("left", Shared::new(Point { x: 1 }));
        entries.insert("right", Shared::new(Point { x: 2 }));
        let current = Arc::new(Shared::new(entries));

        let next = produce(&current, |draft| {
            if let Some(point) = draft.make_mut().get_mut("left") {
                point.x = 7;
            }
            draft.make_mut().insert("middle", Shared::new(Point { x: 0 }));
        });

        assert!(Shared::ptr_eq(&current["right"], &next["right"]));
        assert_eq!(next["left"].x, 7);
        assert_eq!(current["left"].x, 1);
        assert!(!current.contains_key("middle"));
        assert_eq!(next.len(), 3);
    }

    #[test]
    fn replace_swaps_whole_value() {
        let current = pair();
        let next = produce(&current, |draft| draft.replace(Pair { a: current.b.clone(), b: current.a.clone() }));
        assert!(Shared::ptr_eq(&current.a, &next.b));
        assert!(Shared::ptr_eq(&current.b, &next.a));
    }

    #[test]
    fn failed_recipe_discards_draft() {
        let current = pair();
        let result: Result<Arc<Pair>, &str> = try_produce(&current, |draft| {
            draft.a.x = 100;
            Err("nope")
        });
        assert_eq!(result.unwrap_err(), "nope");
        assert_eq!(current.a.x, 1);
    }
}
