#![warn(missing_docs)]
#![deny(clippy::disallowed_types)]

//! The Keystone registry engine: namespaced, optionally id-indexed collections of shared values,
//! override overlays, hot-reloadable and tag-backed registry variants, the root hierarchy that owns
//! them, and the type-indexed builder/factory providers used to construct abstract values.
//!
//! Nothing in this crate is synchronized. Mutation goes through `&mut` on a single control thread;
//! sharing across threads is up to the embedding application.

pub mod access;
pub mod error;
pub mod holder;
pub mod key;
pub mod lifecycle;
pub mod mapped;
pub mod provider;
pub mod refreshable;
pub mod registry;
pub mod tag;

/// Re-exported dependencies used in API types
pub mod dependencies {
    pub use arc_swap;
    pub use hashbrown;
    pub use itertools;
    pub use kstring;
    pub use serde;
    pub use smallvec;
    pub use thiserror;
}
