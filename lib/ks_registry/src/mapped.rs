//! The core registry store: a stable mapping between resource keys, dense numerical ids and shared values.
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RegistryError;
use crate::key::{RegistryId, RegistryType, ResourceKey};
use crate::lifecycle::Lifecycle;
use crate::registry::{identity, EntryListener, Registry, RegistryKind};

struct Entry<T: ?Sized> {
    key: ResourceKey,
    value: Arc<T>,
    lifecycle: Lifecycle,
}

/// A registry of up to 2^32-1 keyed values, indexed both ways by key and (optionally) by dense id.
///
/// Entries live in a vector indexed by slot, so id lookups and iteration are plain array accesses.
/// In an id-free registry slots are still assigned internally but never exposed. Ids are handed out
/// by a bump allocator and never reused; explicit ids may leave holes, which iteration skips.
pub struct MappedRegistry<T: ?Sized + 'static> {
    registry_type: RegistryType<T>,
    id_bearing: bool,
    next_free_id: u32,
    slots: Vec<Option<Entry<T>>>,
    key_to_id: HashMap<ResourceKey, RegistryId>,
    identity_to_id: HashMap<usize, RegistryId>,
    lifecycle: Lifecycle,
    listener: Option<EntryListener<T>>,
}

/// How far past the next free id an explicit id may land. Slots are allocated up to the highest id.
pub const MAX_ID_GAP: u32 = 1 << 16;

/// The id assignment of a registry, used to make a second registry agree on ids with the first one.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdSnapshot {
    /// `(id, key)` pairs, sorted by id.
    pub entries: Vec<(RegistryId, ResourceKey)>,
}

impl<T: ?Sized + 'static> MappedRegistry<T> {
    /// An empty registry that assigns integer ids.
    pub fn new(registry_type: RegistryType<T>) -> Self {
        Self::with_id_policy(registry_type, true)
    }

    /// An empty registry without integer ids; id-bearing requests are logged and the id dropped.
    pub fn id_free(registry_type: RegistryType<T>) -> Self {
        Self::with_id_policy(registry_type, false)
    }

    fn with_id_policy(registry_type: RegistryType<T>, id_bearing: bool) -> Self {
        Self {
            registry_type,
            id_bearing,
            next_free_id: 0,
            slots: Vec::new(),
            key_to_id: HashMap::with_capacity(64),
            identity_to_id: HashMap::with_capacity(64),
            lifecycle: Lifecycle::Stable,
            listener: None,
        }
    }

    /// Installs a listener fired after every successful registration.
    pub fn with_listener(mut self, listener: EntryListener<T>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Installs or replaces the registration listener.
    pub fn set_listener(&mut self, listener: EntryListener<T>) {
        self.listener = Some(listener);
    }

    /// Checks if this registry exposes integer ids.
    pub fn is_id_bearing(&self) -> bool {
        self.id_bearing
    }

    /// Registers a stable value under `key` with the next free id.
    pub fn push(&mut self, key: ResourceKey, value: impl Into<Arc<T>>) -> Result<Arc<T>, RegistryError> {
        self.insert_new(None, key, value.into(), Lifecycle::Stable)
    }

    /// Registers a value at an explicit id. Fails if the key or the id is taken, and with
    /// [`RegistryError::NoFreeSpace`] if the id lies more than [`MAX_ID_GAP`] past the next free id.
    pub fn register_with_id(
        &mut self,
        id: RegistryId,
        key: ResourceKey,
        value: impl Into<Arc<T>>,
        lifecycle: Lifecycle,
    ) -> Result<Arc<T>, RegistryError> {
        self.insert_new(Some(id), key, value.into(), lifecycle)
    }

    /// Borrowing lookup by key.
    pub fn get_ref(&self, key: &ResourceKey) -> Option<&Arc<T>> {
        let id = *self.key_to_id.get(key)?;
        self.entry(id).map(|entry| &entry.value)
    }

    /// Iterates over every `(key, value)` pair in id slot order.
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKey, &Arc<T>)> {
        self.slots
            .iter()
            .flatten()
            .map(|entry| (&entry.key, &entry.value))
    }

    /// Mutable access to a stored handle, for the holder's exclusive access to its child registries.
    pub(crate) fn value_mut(&mut self, key: &ResourceKey) -> Option<&mut Arc<T>> {
        let id = *self.key_to_id.get(key)?;
        self.slots
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .map(|entry| &mut entry.value)
    }

    /// Captures the current id assignment.
    pub fn snapshot_ids(&self) -> Result<IdSnapshot, RegistryError> {
        self.ensure_ids("snapshot_ids")?;
        let entries = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| {
                let entry = entry.as_ref()?;
                Some((RegistryId(index as u32), entry.key.clone()))
            })
            .collect();
        Ok(IdSnapshot { entries })
    }

    /// Constructs a new registry sharing this registry's values, laid out with the ids from `snapshot`.
    /// Every snapshot key missing locally is reported at once; local keys absent from the snapshot are left out.
    pub fn clone_with_id_snapshot(&self, snapshot: &IdSnapshot) -> Result<Self, RegistryError> {
        self.ensure_ids("clone_with_id_snapshot")?;
        let mut out = Self::new(self.registry_type.clone());
        out.slots.reserve(snapshot.entries.len());
        let mut missing = Vec::new();
        for (id, key) in &snapshot.entries {
            match self.key_to_id.get(key).and_then(|&old_id| self.entry(old_id)) {
                Some(entry) => {
                    out.insert_new(Some(*id), key.clone(), Arc::clone(&entry.value), entry.lifecycle)?;
                }
                None => missing.push(key.clone()),
            }
        }
        if !missing.is_empty() {
            return Err(RegistryError::MissingEntries {
                registry: self.registry_type.erased().clone(),
                keys: missing,
            });
        }
        Ok(out)
    }

    fn entry(&self, id: RegistryId) -> Option<&Entry<T>> {
        self.slots.get(id.index())?.as_ref()
    }

    fn ensure_ids(&self, operation: &'static str) -> Result<(), RegistryError> {
        if self.id_bearing {
            Ok(())
        } else {
            Err(RegistryError::Unsupported {
                registry: self.registry_type.erased().clone(),
                operation,
            })
        }
    }

    fn discard_id(&self, id: Option<RegistryId>, key: &ResourceKey) {
        if let Some(id) = id {
            warn!(
                registry = %self.registry_type,
                key = %key,
                id = %id,
                "Registry does not use integer ids, discarding the requested id"
            );
        }
    }

    /// Low-level: allocate the next free id. On failure nothing changes.
    fn allocate_id(&mut self) -> Result<RegistryId, RegistryError> {
        let id = self.next_free_id;
        self.next_free_id = id.checked_add(1).ok_or_else(|| RegistryError::NoFreeSpace {
            registry: self.registry_type.erased().clone(),
        })?;
        Ok(RegistryId(id))
    }

    /// Validates and inserts a brand new key. On failure the registry is left untouched.
    fn insert_new(
        &mut self,
        id: Option<RegistryId>,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Arc<T>, RegistryError> {
        if self.key_to_id.contains_key(&key) {
            return Err(RegistryError::DuplicateKey {
                registry: self.registry_type.erased().clone(),
                key,
            });
        }
        self.check_identity_free(&key, &value, None)?;
        let id = match id {
            Some(id) if self.id_bearing => {
                if let Some(existing) = self.entry(id) {
                    return Err(RegistryError::DuplicateId {
                        registry: self.registry_type.erased().clone(),
                        id,
                        existing: existing.key.clone(),
                        key,
                    });
                }
                if id.get().saturating_sub(self.next_free_id) > MAX_ID_GAP {
                    return Err(RegistryError::NoFreeSpace {
                        registry: self.registry_type.erased().clone(),
                    });
                }
                if id.get() >= self.next_free_id {
                    self.next_free_id = id.get().checked_add(1).ok_or_else(|| RegistryError::NoFreeSpace {
                        registry: self.registry_type.erased().clone(),
                    })?;
                }
                id
            }
            id => {
                self.discard_id(id.filter(|_| !self.id_bearing), &key);
                self.allocate_id()?
            }
        };

        let index = id.index();
        if self.slots.len() <= index {
            self.slots.resize_with(index + 1, || None);
        }
        self.key_to_id.insert(key.clone(), id);
        self.identity_to_id.insert(identity(&*value), id);
        self.lifecycle = self.lifecycle.merge(lifecycle);
        self.notify(&key, &value);
        self.slots[index] = Some(Entry {
            key,
            value: Arc::clone(&value),
            lifecycle,
        });
        Ok(value)
    }

    /// The same instance may only be registered once; `allowed` is the slot that may already hold it.
    fn check_identity_free(
        &self,
        key: &ResourceKey,
        value: &Arc<T>,
        allowed: Option<RegistryId>,
    ) -> Result<(), RegistryError> {
        match self.identity_to_id.get(&identity(&**value)) {
            Some(&other) if Some(other) != allowed => Err(RegistryError::DuplicateValue {
                registry: self.registry_type.erased().clone(),
                key: key.clone(),
                existing: self
                    .entry(other)
                    .map(|entry| entry.key.clone())
                    .unwrap_or_else(|| key.clone()),
            }),
            _ => Ok(()),
        }
    }

    fn notify(&mut self, key: &ResourceKey, value: &Arc<T>) {
        if let Some(listener) = self.listener.as_mut() {
            listener(key.path(), key, value);
        }
    }
}

impl<T: ?Sized + 'static> Registry<T> for MappedRegistry<T> {
    fn registry_type(&self) -> &RegistryType<T> {
        &self.registry_type
    }

    fn kind(&self) -> RegistryKind {
        RegistryKind::Mapped
    }

    fn len(&self) -> usize {
        self.key_to_id.len()
    }

    fn contains_key(&self, key: &ResourceKey) -> bool {
        self.key_to_id.contains_key(key)
    }

    fn get(&self, key: &ResourceKey) -> Option<Arc<T>> {
        self.get_ref(key).cloned()
    }

    fn get_by_id(&self, id: RegistryId) -> Result<Option<Arc<T>>, RegistryError> {
        self.ensure_ids("get_by_id")?;
        Ok(self.entry(id).map(|entry| Arc::clone(&entry.value)))
    }

    fn key_of(&self, value: &T) -> Option<ResourceKey> {
        let id = *self.identity_to_id.get(&identity(value))?;
        self.entry(id).map(|entry| entry.key.clone())
    }

    fn id_of(&self, value: &T) -> Result<Option<RegistryId>, RegistryError> {
        self.ensure_ids("id_of")?;
        Ok(self.identity_to_id.get(&identity(value)).copied())
    }

    fn entries(&self) -> Vec<(ResourceKey, Arc<T>)> {
        self.iter()
            .map(|(key, value)| (key.clone(), Arc::clone(value)))
            .collect()
    }

    fn keys(&self) -> Vec<ResourceKey> {
        self.iter().map(|(key, _)| key.clone()).collect()
    }

    fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    fn entry_lifecycle(&self, key: &ResourceKey) -> Option<Lifecycle> {
        let id = *self.key_to_id.get(key)?;
        self.entry(id).map(|entry| entry.lifecycle)
    }

    fn register(
        &mut self,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<T>>, RegistryError> {
        self.insert_new(None, key, value, lifecycle).map(Some)
    }

    fn register_or_override(
        &mut self,
        id: Option<RegistryId>,
        key: ResourceKey,
        value: Arc<T>,
        lifecycle: Lifecycle,
    ) -> Result<Option<Arc<T>>, RegistryError> {
        let Some(&existing) = self.key_to_id.get(&key) else {
            return self.insert_new(id, key, value, lifecycle).map(Some);
        };
        match id {
            Some(requested) if self.id_bearing && requested != existing => {
                return Err(RegistryError::IdMismatch {
                    registry: self.registry_type.erased().clone(),
                    key,
                    existing,
                    requested,
                });
            }
            id => self.discard_id(id.filter(|_| !self.id_bearing), &key),
        }
        self.check_identity_free(&key, &value, Some(existing))?;

        let entry = self.slots[existing.index()]
            .as_mut()
            .expect("key index points at an empty slot");
        self.identity_to_id.remove(&identity(&*entry.value));
        self.identity_to_id.insert(identity(&*value), existing);
        entry.value = Arc::clone(&value);
        entry.lifecycle = lifecycle;
        // The replaced entry's lifecycle no longer counts towards the aggregate.
        self.lifecycle = Lifecycle::merge_all(self.slots.iter().flatten().map(|entry| entry.lifecycle));
        self.notify(&key, &value);
        Ok(Some(value))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<T: ?Sized + 'static> Debug for MappedRegistry<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappedRegistry")
            .field("registry_type", &self.registry_type)
            .field("id_bearing", &self.id_bearing)
            .field("len", &self.key_to_id.len())
            .field("next_free_id", &self.next_free_id)
            .field("lifecycle", &self.lifecycle)
            .finish_non_exhaustive()
    }
}
