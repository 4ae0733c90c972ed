#![warn(missing_docs)]
#![deny(clippy::disallowed_types)]
#![allow(clippy::type_complexity)]

//! Keystone process bootstrap: the registry configuration, the explicit context object threaded
//! through every subsystem that needs registries or providers, and the derived indices kept in sync
//! with registries through per-entry listeners.

pub mod config;
pub mod context;
pub mod derived;
pub mod prelude;
