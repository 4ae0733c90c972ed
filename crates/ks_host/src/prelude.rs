//! Common type aliases

// some of the imports here are not used yet, but are pre-defined for symmetry
#![allow(unused)]

// Anyhow error handling
pub use anyhow::{anyhow, bail, ensure, Context, Result};

// Common synchronization/cell types
pub use std::cell::{Cell, RefCell};
pub use std::rc::Rc;
pub use std::sync::{Arc, Weak};

// hashbrown Hash* types
pub use hashbrown::{HashMap, HashSet};

// Registry vocabulary
pub use ks_registry::access::{RegistryAccess, RegistryAccessExt};
pub use ks_registry::key::{RegistryKey, RegistryType, ResourceKey};
pub use ks_registry::lifecycle::Lifecycle;
pub use ks_registry::registry::{EntryListener, LoadedEntry, Registry};
