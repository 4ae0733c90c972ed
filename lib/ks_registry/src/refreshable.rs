//! Registries whose whole contents can be replaced at runtime.
use std::any::Any;
use std::convert::Infallible;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::{LoaderError, RegistryError};
use crate::key::{RegistryId, RegistryType, ResourceKey};
use crate::lifecycle::Lifecycle;
use crate::mapped::MappedRegistry;
use crate::registry::{EntryListener, LoadedEntry, Registry, RegistryKind};

/// A registry that is repopulated wholesale from a loader.
///
/// Reloads are built into a fresh store which replaces the current one only once the loader has
/// finished without error, so a failing loader leaves the previous contents in place. Value identity
/// is not kept across reloads even for unchanged keys: holders of handles re-resolve by key, or
/// listen for entries and re-link.
///
/// Integer ids are not supported; ids handed to this registry are logged and dropped.
pub struct RefreshableRegistry<T: ?Sized + 'static> {
    store: MappedRegistry<T>,
    listener: Option<EntryListener<T>>,
    generation: u64,
}

impl<T: ?Sized + 'static> RefreshableRegistry<T> {
    /// An empty registry.
    pub fn new(registry_type: RegistryType<T>) -> Self {
        Self {
            store: MappedRegistry::id_free(registry_type),
            listener: None,
            generation: 0,
        }
    }

    /// Installs a listener fired for every registration and for every value a reload inserts.
    pub fn with_listener(mut self, listener: EntryListener<T>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Installs or replaces the listener.
    pub fn set_listener(&mut self, listener: EntryListener<T>) {
        self.listener = Some(listener);
    }

    /// Number of successful reloads so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Iterates over the current contents.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &Arc<T>)> {
        self.store.iter()
    }

    /// Replaces the contents with whatever `loader` yields, returning the new entry count.
    ///
    /// Later duplicates of a key overwrite earlier ones. If the loader yields an error, or an entry
    /// cannot be stored, nothing changes and the error is returned. After a successful swap the
    /// listener hears every insertion in loader order, overwritten duplicates included.
    pub fn reload<I, E>(&mut self, loader: I) -> Result<usize, RegistryError>
    where
        I: IntoIterator<Item = Result<LoadedEntry<T>, E>>,
        E: Into<LoaderError>,
    {
        let registry_type = self.store.registry_type().clone();
        let mut scratch = MappedRegistry::id_free(registry_type.clone());
        let mut inserted = Vec::new();
        for entry in loader {
            let entry = entry.map_err(|e| RegistryError::ReloadFailed {
                registry: registry_type.erased().clone(),
                source: e.into(),
            });
            let stored = entry.and_then(|entry| {
                let (key, value) = (entry.key.clone(), Arc::clone(&entry.value));
                scratch.register_or_override(entry.id, entry.key, entry.value, entry.lifecycle)?;
                inserted.push((key, value));
                Ok(())
            });
            if let Err(e) = stored {
                warn!(registry = %registry_type, "Reload aborted, keeping the previous contents: {e}");
                return Err(e);
            }
        }

        self.store = scratch;
        self.generation += 1;
        if let Some(listener) = self.listener.as_mut() {
            for (key, value) in &inserted {
                listener(key.path(), key, value);
            }
        }
        debug!(
            registry = %registry_type,
            entries = self.store.len(),
            generation = self.generation,
            "Reloaded registry"
        );
        Ok(self.store.len())
    }

    /// [`Self::reload`] for loaders that cannot fail.
    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = LoadedEntry<T>>) -> Result<usize, RegistryError> {
        self.reload(entries.into_iter().map(Ok::<_, Infallible>))
    }

    fn notify(&mut self, stored: &Result<Option<Arc<T>>, RegistryError>, key: &ResourceKey) {
        if let (Ok(Some(value)), Some(listener)) = (stored, self.listener.as_mut()) {
            listener(key.path(), key, value);
        }
    }
}

impl<T: ?Sized + 'static> Registry<T> for RefreshableRegistry<T> {
    fn registry_type(&self) -> &RegistryType<T> {
        self.store.registry_type()
    }

    fn kind(&self) -> RegistryKind {
        RegistryKind::Refreshable
    }

    fn len(&self) -> usize {
        self.store.len()
    }

    fn contains_key(&self, key: &ResourceKey) -> bool {
        self.store.contains_key(key)
    }

    fn get(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.store.get(key)
    }

    fn get_by_id(&self, id: RegistryId) -> Result<Option<Arc<T>>, RegistryError> {
        self.store.get_by_id(id)
    }

    fn key_of(&self, value: &T) -> Option<ResourceKey> {
        self.store.key_of(value)
    }

    fn id_of(&self, value: &T) -> Result<Option<RegistryId>, RegistryError> {
        self.store.id_of(value)
    }

    fn entries(&self) -> Vec<(ResourceKey, Arc<T>)> {
        self.store.entries()
    }

    fn keys(&self) -> Vec<ResourceKey> {
        self.store.keys()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.store.lifecycle()
    }

    fn entry_lifecycle(&self, key: &ResourceKey) -> Option<Lifecycle> {
        self.store.entry_lifecycle(key)
    }

    fn register(
        &mut self,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<T>>, RegistryError> {
        let stored = self.store.register(key.clone(), value, lifecycle);
        self.notify(&stored, &key);
        stored
    }

    fn register_or_override(
        &mut self,
        id: Option<RegistryId>,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<T>>, RegistryError> {
        let stored = self.store.register_or_override(id, key.clone(), value, lifecycle);
        self.notify(&stored, &key);
        stored
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: ?Sized + 'static> Debug for RefreshableRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshableRegistry")
            .field("store", &self.store)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}
