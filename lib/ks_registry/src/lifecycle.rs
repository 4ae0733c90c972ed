//! Stability tags attached to registry entries, and the merge that aggregates them.
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// How much confidence the provider of an entry has in its stability.
///
/// Merging two lifecycles yields the less stable of the two, so a registry's aggregate lifecycle
/// is never better than its least stable member. The merge is commutative, associative and idempotent.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Lifecycle {
    /// Safe to depend on.
    #[default]
    Stable,
    /// Still works, scheduled for removal. `since` is the data version that deprecated it.
    Deprecated {
        /// The data version the deprecation happened in.
        since: u32,
    },
    /// May change or disappear without notice.
    Experimental,
}

impl Lifecycle {
    /// Shorthand for [`Lifecycle::Deprecated`].
    pub const fn deprecated(since: u32) -> Self {
        Self::Deprecated { since }
    }

    /// Checks if this is [`Lifecycle::Stable`].
    pub const fn is_stable(self) -> bool {
        matches!(self, Self::Stable)
    }

    /// Position in the instability order: stable, then deprecations from newest to oldest, then experimental.
    const fn instability(self) -> (u8, u32) {
        match self {
            Self::Stable => (0, 0),
            Self::Deprecated { since } => (1, u32::MAX - since),
            Self::Experimental => (2, 0),
        }
    }

    /// Joins two lifecycles, keeping the less stable one.
    /// Two deprecations merge into the older one.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        if other.instability() > self.instability() {
            other
        } else {
            self
        }
    }

    /// Folds any number of lifecycles, an empty input is [`Lifecycle::Stable`].
    pub fn merge_all(lifecycles: impl IntoIterator<Item = Self>) -> Self {
        lifecycles.into_iter().fold(Self::Stable, Self::merge)
    }

    /// Checks if `self` is at least as stable as `other`.
    pub fn is_at_least_as_stable_as(self, other: Self) -> bool {
        self.instability() <= other.instability()
    }
}

impl Display for Lifecycle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => f.write_str("stable"),
            Self::Deprecated { since } => write!(f, "deprecated(since {since})"),
            Self::Experimental => f.write_str("experimental"),
        }
    }
}
