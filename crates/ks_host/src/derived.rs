//! Indices derived from registry contents, kept current by per-entry listeners instead of polling.

use std::fmt::{Debug, Formatter};

use crate::prelude::*;

/// Reverse lookup from an unqualified path (`stone`) to every full key registered with it (`ks:stone`, `mymod:stone`).
///
/// Clones share the same index. Feed it by attaching [`Self::listener`] to registries.
#[derive(Clone, Default)]
pub struct KeyLookupCache {
    by_path: Rc<RefCell<HashMap<String, Vec<ResourceKey>>>>,
}

static_assertions::assert_not_impl_any!(KeyLookupCache: Send, Sync);

impl KeyLookupCache {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry listener that records every key it sees.
    pub fn listener<T: ?Sized + 'static>(&self) -> EntryListener<T> {
        let cache = self.clone();
        Box::new(move |path: &str, key: &ResourceKey, _value: &Arc<T>| cache.record(path, key))
    }

    /// Records `key` under `path`. Keys are kept once, in first-seen order.
    pub fn record(&self, path: &str, key: &ResourceKey) {
        let mut by_path = self.by_path.borrow_mut();
        let keys = by_path.entry_ref(path).or_default();
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }

    /// Every key recorded under `path`.
    pub fn lookup(&self, path: &str) -> Vec<ResourceKey> {
        self.by_path.borrow().get(path).cloned().unwrap_or_default()
    }

    /// The key recorded under `path`, if there is exactly one.
    pub fn resolve_unique(&self, path: &str) -> Option<ResourceKey> {
        match self.by_path.borrow().get(path).map(Vec::as_slice) {
            Some([key]) => Some(key.clone()),
            _ => None,
        }
    }

    /// Number of distinct paths.
    pub fn len(&self) -> usize {
        self.by_path.borrow().len()
    }

    /// Checks if nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.by_path.borrow().is_empty()
    }
}

impl Debug for KeyLookupCache {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLookupCache")
            .field("paths", &self.len())
            .finish()
    }
}

struct HandleState<T: ?Sized> {
    handles: HashMap<String, Arc<T>>,
    relinks: u64,
}

/// Raw value handles cached by unqualified path, re-linked whenever a registry hands out a new value for a path.
///
/// Attach [`Self::listener`] to a refreshable registry and every reload swaps the cached handles to
/// the freshly loaded values, so holders never keep serving objects from before the reload.
pub struct HandleCache<T: ?Sized> {
    state: Rc<RefCell<HandleState<T>>>,
}

impl<T: ?Sized + 'static> HandleCache<T> {
    /// An empty cache.
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(HandleState {
                handles: HashMap::new(),
                relinks: 0,
            })),
        }
    }

    /// A registry listener that stores or replaces the handle for every entry it sees.
    pub fn listener(&self) -> EntryListener<T> {
        let cache = self.clone();
        Box::new(move |path: &str, _key: &ResourceKey, value: &Arc<T>| cache.link(path, value))
    }

    fn link(&self, path: &str, value: &Arc<T>) {
        let mut state = self.state.borrow_mut();
        let replaced = state.handles.insert(path.to_owned(), Arc::clone(value));
        if replaced.is_some_and(|old| !Arc::ptr_eq(&old, value)) {
            state.relinks += 1;
        }
    }

    /// The current handle for `path`.
    pub fn get(&self, path: &str) -> Option<Arc<T>> {
        self.state.borrow().handles.get(path).cloned()
    }

    /// How many cached handles were swapped for a different value so far.
    pub fn relinks(&self) -> u64 {
        self.state.borrow().relinks
    }

    /// Number of cached handles.
    pub fn len(&self) -> usize {
        self.state.borrow().handles.len()
    }

    /// Checks if no handle is cached.
    pub fn is_empty(&self) -> bool {
        self.state.borrow().handles.is_empty()
    }
}

impl<T: ?Sized + 'static> Default for HandleCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> Clone for HandleCache<T> {
    fn clone(&self) -> Self {
        Self {
            state: Rc::clone(&self.state),
        }
    }
}

impl<T: ?Sized> Debug for HandleCache<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("HandleCache")
            .field("handles", &state.handles.len())
            .field("relinks", &state.relinks)
            .finish()
    }
}
