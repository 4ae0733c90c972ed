//! The registry contract shared by every registry kind, and its type-erased form.
use std::any::{type_name, Any};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use tracing::warn;

use crate::error::RegistryError;
use crate::key::{RegistryId, RegistryLocation, RegistryType, ResourceKey};
use crate::lifecycle::Lifecycle;

/// The storage strategy behind a registry.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegistryKind {
    /// Populated once, entries may carry stable integer ids.
    Mapped,
    /// Cleared and repopulated by reloads; no integer ids.
    Refreshable,
    /// A read-only view over an externally maintained tag index; no integer ids.
    Tag,
}

impl RegistryKind {
    /// Dynamic registries may change contents after bootstrap, observed snapshots go stale.
    pub const fn is_dynamic(self) -> bool {
        !matches!(self, Self::Mapped)
    }
}

/// Called with `(unqualified path, key, value)` for every value that lands in a registry.
pub type EntryListener<T> = Box<dyn FnMut(&str, &ResourceKey, &Arc<T>)>;

/// One `(key, optional id, value)` triple handed over by a loader, plus the entry's lifecycle.
pub struct LoadedEntry<T: ?Sized> {
    /// The entry key.
    pub key: ResourceKey,
    /// The legacy integer id, if the source has one.
    pub id: Option<RegistryId>,
    /// The value.
    pub value: Arc<T>,
    /// Stability of the entry.
    pub lifecycle: Lifecycle,
}

impl<T: ?Sized> LoadedEntry<T> {
    /// A stable, id-less entry.
    pub fn new(key: ResourceKey, value: impl Into<Arc<T>>) -> Self {
        Self {
            key,
            id: None,
            value: value.into(),
            lifecycle: Lifecycle::Stable,
        }
    }

    /// Attaches a legacy integer id. It may lie at most [`crate::mapped::MAX_ID_GAP`] past the next free id.
    pub fn with_id(mut self, id: impl Into<RegistryId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Replaces the lifecycle.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

impl<T: ?Sized> Debug for LoadedEntry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedEntry")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}

/// Identity of a value instance: the address it lives at, metadata stripped.
pub(crate) fn identity<T: ?Sized>(value: &T) -> usize {
    (value as *const T).cast::<()>() as usize
}

/// A uniquely keyed collection of shared `T` values.
///
/// Lookups hand out [`Arc`] clones so that views computed on the fly (see [`crate::tag`]) can
/// implement the same contract as stored ones. Inverse lookups go by instance identity, two equal
/// but distinct values are different entries.
pub trait Registry<T: ?Sized + 'static>: 'static {
    /// The type and location of this registry.
    fn registry_type(&self) -> &RegistryType<T>;

    /// Which storage strategy backs this registry.
    fn kind(&self) -> RegistryKind;

    /// See [`RegistryKind::is_dynamic`].
    fn is_dynamic(&self) -> bool {
        self.kind().is_dynamic()
    }

    /// Number of entries.
    fn len(&self) -> usize;

    /// Checks if there are no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if `key` has an entry.
    fn contains_key(&self, key: &ResourceKey) -> bool {
        self.get(key).is_some()
    }

    /// Looks up a value by key.
    fn get(&self, key: &ResourceKey) -> Option<Arc<T>>;

    /// Looks up a value by key, treating absence as an error.
    fn require(&self, key: &ResourceKey) -> Result<Arc<T>, RegistryError> {
        self.get(key).ok_or_else(|| RegistryError::ValueNotFound {
            registry: self.registry_type().erased().clone(),
            key: key.clone(),
        })
    }

    /// Looks up a value by integer id. Id-free registries fail with [`RegistryError::Unsupported`].
    fn get_by_id(&self, id: RegistryId) -> Result<Option<Arc<T>>, RegistryError>;

    /// Looks up a value by integer id, treating absence as an error.
    fn require_id(&self, id: RegistryId) -> Result<Arc<T>, RegistryError> {
        self.get_by_id(id)?.ok_or_else(|| RegistryError::IdNotFound {
            registry: self.registry_type().erased().clone(),
            id,
        })
    }

    /// Finds the key of this exact value instance.
    fn key_of(&self, value: &T) -> Option<ResourceKey>;

    /// Finds the integer id of this exact value instance.
    /// Id-free registries fail with [`RegistryError::Unsupported`].
    fn id_of(&self, value: &T) -> Result<Option<RegistryId>, RegistryError>;

    /// Best-effort id lookup for legacy callers: an unsupported id is logged and reported as no id.
    fn probe_id(&self, value: &T) -> Option<RegistryId> {
        match self.id_of(value) {
            Ok(id) => id,
            Err(e) => {
                warn!(registry = %self.registry_type(), "Integer id probe degraded to no id: {e}");
                None
            }
        }
    }

    /// Every `(key, value)` pair, in iteration order of the registry.
    fn entries(&self) -> Vec<(ResourceKey, Arc<T>)>;

    /// Every key, in iteration order of the registry.
    fn keys(&self) -> Vec<ResourceKey> {
        self.entries().into_iter().map(|(key, _)| key).collect()
    }

    /// The merged lifecycle of every entry.
    fn lifecycle(&self) -> Lifecycle;

    /// The lifecycle of a single entry.
    fn entry_lifecycle(&self, key: &ResourceKey) -> Option<Lifecycle>;

    /// Registers a new entry, failing if the key is taken.
    /// Returns the stored value, or `None` if this registry kind ignores direct registration.
    fn register(
        &mut self,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<T>>, RegistryError>;

    /// Registers a new entry, or replaces the value of an existing key in place, keeping its id.
    /// An explicit id that differs from the existing one is an error.
    fn register_or_override(
        &mut self,
        id: Option<RegistryId>,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<T>>, RegistryError>;

    /// Upcast for downcasting to the concrete registry type.
    fn as_any(&self) -> &dyn Any;

    /// Upcast for downcasting to the concrete registry type.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A registry with its value type erased, as stored inside root registries.
pub trait AnyRegistry: Any {
    /// Where this registry lives.
    fn registry_location(&self) -> &RegistryLocation;

    /// Which storage strategy backs this registry.
    fn kind(&self) -> RegistryKind;

    /// Name of the stored value type, for diagnostics.
    fn value_type_name(&self) -> &'static str;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Checks if there are no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every key, in iteration order of the registry.
    fn keys(&self) -> Vec<ResourceKey>;

    /// The merged lifecycle of every entry.
    fn lifecycle(&self) -> Lifecycle;

    /// Upcast for downcasting to [`ErasedRegistry`].
    fn as_any(&self) -> &dyn Any;

    /// Upcast for downcasting to [`ErasedRegistry`].
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl<'r> dyn AnyRegistry + 'r {
    /// Recovers the typed registry, or `None` if it stores something other than `T`.
    pub fn typed<T: ?Sized + 'static>(&self) -> Option<&dyn Registry<T>> {
        self.as_any()
            .downcast_ref::<ErasedRegistry<T>>()
            .map(|erased| erased.inner.as_ref())
    }

    /// Recovers the typed registry mutably, or `None` if it stores something other than `T`.
    pub fn typed_mut<T: ?Sized + 'static>(&mut self) -> Option<&mut dyn Registry<T>> {
        self.as_any_mut()
            .downcast_mut::<ErasedRegistry<T>>()
            .map(|erased| erased.inner.as_mut())
    }
}

impl<'r> Debug for dyn AnyRegistry + 'r {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnyRegistry")
            .field("location", self.registry_location())
            .field("kind", &self.kind())
            .field("value", &self.value_type_name())
            .field("len", &self.len())
            .finish()
    }
}

/// Wraps any `Registry<T>` so it can be stored next to registries of other value types.
pub struct ErasedRegistry<T: ?Sized + 'static> {
    inner: Box<dyn Registry<T>>,
}

impl<T: ?Sized + 'static> ErasedRegistry<T> {
    /// Erases a concrete registry.
    pub fn new(registry: impl Registry<T>) -> Self {
        Self::from_boxed(Box::new(registry))
    }

    /// Erases an already boxed registry.
    pub fn from_boxed(inner: Box<dyn Registry<T>>) -> Self {
        Self { inner }
    }

    /// Erases a concrete registry into the shared form used by overlays and roots.
    pub fn shared(registry: impl Registry<T>) -> Arc<dyn AnyRegistry> {
        Arc::new(Self::new(registry))
    }
}

impl<T: ?Sized + 'static> AnyRegistry for ErasedRegistry<T> {
    fn registry_location(&self) -> &RegistryLocation {
        self.inner.registry_type().erased()
    }

    fn kind(&self) -> RegistryKind {
        self.inner.kind()
    }

    fn value_type_name(&self) -> &'static str {
        type_name::<T>()
    }

    fn len(&self) -> usize {
        self.inner.len()
    }

    fn keys(&self) -> Vec<ResourceKey> {
        self.inner.keys()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.inner.lifecycle()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
