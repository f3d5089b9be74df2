/*!
A copy-on-write state store with synchronous change notification.

A [`Store`] holds exactly one immutable snapshot of an application-defined value. The only way to
replace it is a recipe: a function that edits a [`Draft`] of the current snapshot. The edited
draft becomes the next snapshot, sharing every part the recipe did not touch (see [`draft`]), and
is broadcast to every observer before `set` returns.

# Design requirements:
- Snapshots are never mutated. Readers hold an `Arc<S>` that stays valid and unchanged forever.
- Exactly one recipe per `set`; no batching, merging or deferral of recipes.
- Observers are invoked synchronously, once per emission, with the full new value.
- Subscribing or unsubscribing from inside an observer must neither deadlock nor disturb the
  broadcast in flight.
- Calling `get`/`set` from an initializer before it returns is an error, not undefined state.

# Basic usage

```rust
use draft_store::*;
use std::sync::Arc;

#[derive(Clone)]
struct Counter {
    count: u32,
}

let store = Store::new(|_| Counter { count: 0 });
let unsubscribe = store.subscribe(|value: Arc<Counter>| println!("count: {}", value.count));

store.set(|draft| draft.count += 1).unwrap();
// Should print:
// count: 1
assert_eq!(store.get().count, 1);

assert!(unsubscribe.unsubscribe());
assert!(!unsubscribe.unsubscribe());
```

# Actions in state

The initializer receives a [`StoreHandle`], so the state can carry its own actions:

```rust
use draft_store::*;
use std::sync::Arc;

#[derive(Clone)]
struct Todos {
    items: Shared<Vec<String>>,
    add: Arc<dyn Fn(&str) + Send + Sync>,
}

let store = Store::new(|handle: &StoreHandle<Todos>| {
    let handle = handle.clone();
    Todos {
        items: Shared::default(),
        add: Arc::new(move |item: &str| {
            let item = item.to_string();
            handle.set(|draft| draft.items.push(item)).unwrap();
        }),
    }
});

(store.get().add)("write docs");
assert_eq!(*store.get().items, vec!["write docs".to_string()]);
```

# View binding

```rust
use draft_store::*;

let store = Store::from_value(0u32);
let use_store = store.use_store();
let mut view = HeadlessView::new();

let rendered = view.render(|view| *use_store.bind(view));
assert_eq!(rendered, 0);

store.replace(|n| n + 1).unwrap();
assert!(view.is_dirty());
assert_eq!(view.render(|view| *use_store.bind(view)), 1);
```
*/

pub mod draft;
mod emitter;
mod error;
mod options;
mod store;
mod view;

pub use draft::{Draft, Shared, produce, try_produce};
pub use emitter::*;
pub use error::*;
pub use options::*;
pub use store::*;
pub use view::*;
