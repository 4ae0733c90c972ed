//! The root hierarchy: roots own named registries, each created exactly once.
use std::any::type_name;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;
use smallvec::SmallVec;
use tracing::debug;

use crate::access::RegistryAccess;
use crate::error::RegistryError;
use crate::key::{RegistryId, RegistryLocation, RegistryType, ResourceKey};
use crate::lifecycle::Lifecycle;
use crate::mapped::MappedRegistry;
use crate::refreshable::RefreshableRegistry;
use crate::registry::{AnyRegistry, EntryListener, ErasedRegistry, LoadedEntry, Registry, RegistryKind};
use crate::tag::{Tag, TagIndexHandle, TagRegistry};

/// The root under which all root registries are themselves keyed.
pub const ROOT_REGISTRY_KEY: ResourceKey = ResourceKey::ks_const("root");

/// A registry of registries: every named registry under one root key.
pub struct RootRegistry {
    registries: MappedRegistry<dyn AnyRegistry>,
}

impl RootRegistry {
    fn new(key: ResourceKey) -> Self {
        Self {
            registries: MappedRegistry::new(RegistryType::new(ROOT_REGISTRY_KEY, key)),
        }
    }

    /// The root's key.
    pub fn key(&self) -> &ResourceKey {
        self.registries.registry_type().location()
    }

    /// The registry at `location` under this root.
    pub fn get(&self, location: &ResourceKey) -> Option<&dyn AnyRegistry> {
        self.registries.get_ref(location).map(|registry| &**registry)
    }

    /// Every registry under this root, in creation order.
    pub fn registries(&self) -> impl Iterator<Item = &dyn AnyRegistry> {
        self.registries.iter().map(|(_, registry)| &**registry)
    }

    /// Number of registries under this root.
    pub fn len(&self) -> usize {
        self.registries.len()
    }

    /// Checks if no registry was created under this root yet.
    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    /// The merged lifecycle the child registries had when they were created.
    pub fn lifecycle(&self) -> Lifecycle {
        self.registries.lifecycle()
    }

    fn child_mut<T: ?Sized + 'static>(&mut self, ty: &RegistryType<T>) -> Result<&mut dyn Registry<T>, RegistryError> {
        let handle = self
            .registries
            .value_mut(ty.location())
            .ok_or_else(|| RegistryError::RegistryNotFound {
                registry: ty.erased().clone(),
            })?;
        let erased = Arc::get_mut(handle).ok_or_else(|| RegistryError::RegistryShared {
            registry: ty.erased().clone(),
        })?;
        let actual = erased.value_type_name();
        erased.typed_mut::<T>().ok_or_else(|| RegistryError::TypeMismatch {
            registry: ty.erased().clone(),
            expected: type_name::<T>(),
            actual,
        })
    }

    fn insert<T: ?Sized + 'static>(
        &mut self,
        ty: &RegistryType<T>,
        registry: impl Registry<T>,
    ) -> Result<&mut dyn Registry<T>, RegistryError> {
        let lifecycle = registry.lifecycle();
        debug!(
            registry = %ty,
            kind = ?registry.kind(),
            entries = registry.len(),
            lifecycle = %lifecycle,
            "Created registry"
        );
        let erased: Arc<dyn AnyRegistry> = Arc::new(ErasedRegistry::new(registry));
        self.registries.register(ty.location().clone(), erased, lifecycle)?;
        self.child_mut(ty)
    }
}

impl Debug for RootRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootRegistry")
            .field("key", self.key())
            .field("registries", &self.registries().collect_vec())
            .finish()
    }
}

/// Eagerly or lazily evaluated contents for a new registry.
pub struct InitialData<T: ?Sized> {
    load: Box<dyn FnOnce() -> Vec<LoadedEntry<T>>>,
    ids: HashMap<ResourceKey, RegistryId>,
    lifecycle: Lifecycle,
}

impl<T: ?Sized + 'static> InitialData<T> {
    /// Contents computed only once the registry is actually created.
    pub fn lazy(load: impl FnOnce() -> Vec<LoadedEntry<T>> + 'static) -> Self {
        Self {
            load: Box::new(load),
            ids: HashMap::new(),
            lifecycle: Lifecycle::Stable,
        }
    }

    /// Already materialized contents.
    pub fn from_loaded(entries: Vec<LoadedEntry<T>>) -> Self {
        Self::lazy(move || entries)
    }

    /// Legacy integer ids by key, taking precedence over ids carried by the entries.
    pub fn with_ids(mut self, ids: impl IntoIterator<Item = (ResourceKey, RegistryId)>) -> Self {
        self.ids.extend(ids);
        self
    }

    /// A lifecycle merged into every entry's own.
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    fn load(self) -> Vec<LoadedEntry<T>> {
        let mut entries = (self.load)();
        for entry in &mut entries {
            if let Some(&id) = self.ids.get(&entry.key) {
                entry.id = Some(id);
            }
            entry.lifecycle = entry.lifecycle.merge(self.lifecycle);
        }
        entries
    }
}

/// Options for [`RegistryHolder::create_registry`].
pub struct NewRegistry<T: ?Sized + 'static> {
    initial: Option<InitialData<T>>,
    dynamic: bool,
    on_each_entry: Vec<EntryListener<T>>,
}

impl<T: ?Sized + 'static> NewRegistry<T> {
    /// An empty registry with integer ids.
    pub fn new() -> Self {
        Self {
            initial: None,
            dynamic: false,
            on_each_entry: Vec::new(),
        }
    }

    /// An empty refreshable registry.
    pub fn dynamic() -> Self {
        Self {
            dynamic: true,
            ..Self::new()
        }
    }

    /// Populates the registry on creation.
    pub fn with_initial(mut self, initial: InitialData<T>) -> Self {
        self.initial = Some(initial);
        self
    }

    /// Adds a listener fired for every initial entry and every later registration or reload insertion.
    /// Listeners fire in the order they were added.
    pub fn on_each_entry(mut self, listener: EntryListener<T>) -> Self {
        self.on_each_entry.push(listener);
        self
    }
}

impl<T: ?Sized + 'static> Default for NewRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

fn fan_out<T: ?Sized + 'static>(mut listeners: Vec<EntryListener<T>>) -> Option<EntryListener<T>> {
    match listeners.len() {
        0 => None,
        1 => listeners.pop(),
        _ => Some(Box::new(move |path: &str, key: &ResourceKey, value: &Arc<T>| {
            for listener in &mut listeners {
                listener(path, key, value);
            }
        })),
    }
}

/// Owns every root and, through them, every named registry.
#[derive(Default)]
pub struct RegistryHolder {
    roots: SmallVec<[RootRegistry; 2]>,
}

impl RegistryHolder {
    /// A holder without any roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty root.
    pub fn create_root(&mut self, key: ResourceKey) -> Result<&mut RootRegistry, RegistryError> {
        if self.root(&key).is_some() {
            return Err(RegistryError::DuplicateRoot { root: key });
        }
        debug!(root = %key, "Created root");
        self.roots.push(RootRegistry::new(key));
        Ok(self.roots.last_mut().expect("root was just pushed"))
    }

    /// Looks up a root.
    pub fn root(&self, key: &ResourceKey) -> Option<&RootRegistry> {
        self.roots.iter().find(|root| root.key() == key)
    }

    fn root_mut(&mut self, key: &ResourceKey) -> Result<&mut RootRegistry, RegistryError> {
        self.roots
            .iter_mut()
            .find(|root| root.key() == key)
            .ok_or_else(|| RegistryError::UnknownRoot { root: key.clone() })
    }

    /// Every root, in creation order.
    pub fn roots(&self) -> impl Iterator<Item = &RootRegistry> {
        self.roots.iter()
    }

    /// The root that may receive a registry at `ty`.
    fn vacant_root<T: ?Sized>(&mut self, ty: &RegistryType<T>) -> Result<&mut RootRegistry, RegistryError> {
        let root = self.root_mut(ty.root())?;
        if root.registries.contains_key(ty.location()) {
            return Err(RegistryError::DuplicateRegistry {
                registry: ty.erased().clone(),
            });
        }
        Ok(root)
    }

    /// Creates the registry `ty`, optionally populated from initial data.
    ///
    /// Fails if the root is unknown or already has a registry at the location; in that case the
    /// initial data is not evaluated. Duplicate keys in the initial data are an error for both the
    /// static and the dynamic kind.
    pub fn create_registry<T: ?Sized + 'static>(
        &mut self,
        ty: &RegistryType<T>,
        options: NewRegistry<T>,
    ) -> Result<&mut dyn Registry<T>, RegistryError> {
        let root = self.vacant_root(ty)?;
        let entries = options.initial.map(InitialData::load).unwrap_or_default();
        if let Some(key) = entries.iter().map(|entry| &entry.key).duplicates().next() {
            return Err(RegistryError::DuplicateKey {
                registry: ty.erased().clone(),
                key: key.clone(),
            });
        }

        if options.dynamic {
            let mut registry = RefreshableRegistry::new(ty.clone());
            if let Some(listener) = fan_out(options.on_each_entry) {
                registry.set_listener(listener);
            }
            if !entries.is_empty() {
                registry.replace_all(entries)?;
            }
            root.insert(ty, registry)
        } else {
            let mut registry = MappedRegistry::new(ty.clone());
            for entry in entries {
                registry.register_or_override(entry.id, entry.key, entry.value, entry.lifecycle)?;
            }
            // Listeners only hear about a registry that was fully populated.
            if let Some(mut listener) = fan_out(options.on_each_entry) {
                for (key, value) in registry.iter() {
                    listener(key.path(), key, value);
                }
                registry.set_listener(listener);
            }
            root.insert(ty, registry)
        }
    }

    /// Creates a tag view at `ty` over an externally maintained index.
    pub fn create_tag_registry<T: ?Sized + 'static>(
        &mut self,
        ty: &RegistryType<Tag<T>>,
        index: TagIndexHandle<T>,
    ) -> Result<&mut dyn Registry<Tag<T>>, RegistryError> {
        let root = self.vacant_root(ty)?;
        root.insert(ty, TagRegistry::new(ty.clone(), index))
    }

    /// Mutable access to an existing registry. Fails with [`RegistryError::RegistryShared`] while
    /// another handle to it (e.g. one given to an overlay) is alive.
    pub fn registry_mut<T: ?Sized + 'static>(
        &mut self,
        ty: &RegistryType<T>,
    ) -> Result<&mut dyn Registry<T>, RegistryError> {
        self.root_mut(ty.root())?.child_mut(ty)
    }

    /// Mutable access to an existing refreshable registry, for reloads.
    pub fn refreshable_mut<T: ?Sized + 'static>(
        &mut self,
        ty: &RegistryType<T>,
    ) -> Result<&mut RefreshableRegistry<T>, RegistryError> {
        let registry = self.registry_mut(ty)?;
        let kind = registry.kind();
        match registry.as_any_mut().downcast_mut::<RefreshableRegistry<T>>() {
            Some(refreshable) => Ok(refreshable),
            None => {
                debug_assert_ne!(kind, RegistryKind::Refreshable);
                Err(RegistryError::Unsupported {
                    registry: ty.erased().clone(),
                    operation: "reload",
                })
            }
        }
    }

    /// A shared handle to the registry at `location`, e.g. to serve it from an overlay.
    /// The registry cannot be mutated through the holder while the handle is alive.
    pub fn shared(&self, location: &RegistryLocation) -> Option<Arc<dyn AnyRegistry>> {
        self.root(&location.root)?
            .registries
            .get_ref(&location.location)
            .cloned()
    }
}

impl RegistryAccess for RegistryHolder {
    fn registry_erased(&self, location: &RegistryLocation) -> Option<&dyn AnyRegistry> {
        self.root(&location.root)?.get(&location.location)
    }

    fn all_registries(&self) -> Vec<&dyn AnyRegistry> {
        self.roots.iter().flat_map(RootRegistry::registries).collect()
    }
}

impl Debug for RegistryHolder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.roots.iter()).finish()
    }
}

#[cfg(test)]
mod test {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;
    use crate::access::{ProxiedRegistryAccess, RegistryAccessExt};
    use crate::error::ErrorCategory;
    use crate::tag::TagIndex;

    #[derive(Debug, PartialEq, Eq)]
    struct Color(&'static str);

    const ROOT: ResourceKey = ResourceKey::ks_const("r");
    const COLORS: RegistryType<Color> = RegistryType::new(ROOT, ResourceKey::ks_const("colors"));
    const SHADES: RegistryType<Color> = RegistryType::new(ROOT, ResourceKey::ks_const("shades"));

    fn key(path: &str) -> ResourceKey {
        ResourceKey::ks(path).unwrap()
    }

    fn holder() -> RegistryHolder {
        let mut holder = RegistryHolder::new();
        holder.create_root(ROOT).unwrap();
        holder
    }

    fn red_and_blue() -> InitialData<Color> {
        InitialData::from_loaded(vec![
            LoadedEntry::new(key("red"), Color("red")).with_id(0),
            LoadedEntry::new(key("blue"), Color("blue")).with_id(1),
        ])
    }

    #[test]
    fn colors_scenario() {
        let mut holder = holder();
        let colors = holder
            .create_registry(&COLORS, NewRegistry::new().with_initial(red_and_blue()))
            .unwrap();
        assert_eq!(*colors.get(&key("red")).unwrap(), Color("red"));
        assert_eq!(*colors.require_id(RegistryId(1)).unwrap(), Color("blue"));
        assert_eq!(colors.entries().len(), 2);

        colors
            .register_or_override(None, key("red"), Arc::new(Color("dark_red")), Lifecycle::Stable)
            .unwrap();
        assert_eq!(*colors.require_id(RegistryId(0)).unwrap(), Color("dark_red"));
        assert_eq!(*colors.get(&key("red")).unwrap(), Color("dark_red"));

        let read = holder.registry(&COLORS).unwrap();
        assert_eq!(*read.require(&key("red")).unwrap(), Color("dark_red"));
        assert_eq!(holder.root(&ROOT).unwrap().len(), 1);
    }

    #[test]
    fn registries_are_created_once() {
        let mut holder = holder();
        holder.create_registry(&COLORS, NewRegistry::new()).unwrap();

        let evaluated = Rc::new(Cell::new(false));
        let flag = Rc::clone(&evaluated);
        let err = holder
            .create_registry(
                &COLORS,
                NewRegistry::dynamic().with_initial(InitialData::lazy(move || {
                    flag.set(true);
                    Vec::new()
                })),
            )
            .err().unwrap();
        assert!(matches!(err, RegistryError::DuplicateRegistry { .. }));
        assert_eq!(err.category(), ErrorCategory::Duplicate);
        assert!(!evaluated.get());
        assert_eq!(holder.registry(&COLORS).unwrap().kind(), RegistryKind::Mapped);
    }

    #[test]
    fn roots_must_exist_and_be_unique() {
        let mut holder = holder();
        let elsewhere: RegistryType<Color> =
            RegistryType::new(ResourceKey::ks_const("nowhere"), ResourceKey::ks_const("colors"));
        assert!(matches!(
            holder.create_registry(&elsewhere, NewRegistry::new()),
            Err(RegistryError::UnknownRoot { .. })
        ));
        assert!(matches!(
            holder.create_root(ROOT),
            Err(RegistryError::DuplicateRoot { .. })
        ));
        holder.create_root(ResourceKey::ks_const("nowhere")).unwrap();
        holder.create_registry(&elsewhere, NewRegistry::new()).unwrap();
        assert_eq!(holder.roots().count(), 2);
        assert_eq!(holder.all_registries().len(), 1);
    }

    #[test]
    fn find_and_require() {
        let mut holder = holder();
        assert!(holder.find_registry(&COLORS).is_none());
        assert!(matches!(
            holder.registry(&COLORS),
            Err(RegistryError::RegistryNotFound { .. })
        ));
        holder.create_registry(&COLORS, NewRegistry::new()).unwrap();
        assert!(holder.find_registry(&COLORS).is_some());

        let wrong: RegistryType<u32> = RegistryType::new(ROOT, ResourceKey::ks_const("colors"));
        assert!(holder.find_registry(&wrong).is_none());
        assert!(matches!(
            holder.registry_mut(&wrong),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn duplicate_initial_keys_are_rejected() {
        let mut holder = holder();
        let twice = || {
            InitialData::from_loaded(vec![
                LoadedEntry::new(key("red"), Color("red")),
                LoadedEntry::new(key("red"), Color("red again")),
            ])
        };
        for options in [NewRegistry::new(), NewRegistry::dynamic()] {
            let err = holder
                .create_registry(&COLORS, options.with_initial(twice()))
                .err().unwrap();
            assert!(matches!(err, RegistryError::DuplicateKey { .. }));
        }
        assert!(holder.find_registry(&COLORS).is_none());
    }

    #[test]
    fn ids_come_from_the_side_map() {
        let mut holder = holder();
        let initial = InitialData::from_loaded(vec![
            LoadedEntry::new(key("red"), Color("red")),
            LoadedEntry::new(key("blue"), Color("blue")).with_id(1),
        ])
        .with_ids([(key("red"), RegistryId(4)), (key("blue"), RegistryId(2))])
        .with_lifecycle(Lifecycle::Experimental);
        let colors = holder
            .create_registry(&COLORS, NewRegistry::new().with_initial(initial))
            .unwrap();
        assert_eq!(*colors.require_id(RegistryId(4)).unwrap(), Color("red"));
        assert_eq!(*colors.require_id(RegistryId(2)).unwrap(), Color("blue"));
        assert_eq!(colors.lifecycle(), Lifecycle::Experimental);
        assert_eq!(holder.root(&ROOT).unwrap().lifecycle(), Lifecycle::Experimental);
    }

    #[test]
    fn on_each_entry_sees_initial_and_later_entries() {
        let mut holder = holder();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let colors = holder
            .create_registry(
                &COLORS,
                NewRegistry::new()
                    .with_initial(red_and_blue())
                    .on_each_entry(Box::new(move |path: &str, _key: &ResourceKey, _value: &Arc<Color>| {
                        sink.borrow_mut().push(path.to_owned());
                    })),
            )
            .unwrap();
        colors
            .register(key("green"), Arc::new(Color("green")), Lifecycle::Stable)
            .unwrap();
        assert_eq!(*seen.borrow(), vec!["red", "blue", "green"]);
    }

    #[test]
    fn failed_creation_notifies_nobody() {
        let mut holder = holder();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let clashing = InitialData::from_loaded(vec![
            LoadedEntry::new(key("red"), Color("red")).with_id(0),
            LoadedEntry::new(key("blue"), Color("blue")).with_id(0),
        ]);
        let err = holder
            .create_registry(
                &COLORS,
                NewRegistry::new()
                    .with_initial(clashing)
                    .on_each_entry(Box::new(move |path: &str, _key: &ResourceKey, _value: &Arc<Color>| {
                        sink.borrow_mut().push(path.to_owned());
                    })),
            )
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::DuplicateId { .. }));
        assert!(holder.find_registry(&COLORS).is_none());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn listeners_fire_in_order() {
        let mut holder = holder();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (first, second) = (Rc::clone(&seen), Rc::clone(&seen));
        holder
            .create_registry(
                &SHADES,
                NewRegistry::dynamic()
                    .with_initial(red_and_blue())
                    .on_each_entry(Box::new(move |path: &str, _key: &ResourceKey, _value: &Arc<Color>| {
                        first.borrow_mut().push(format!("1:{path}"));
                    }))
                    .on_each_entry(Box::new(move |path: &str, _key: &ResourceKey, _value: &Arc<Color>| {
                        second.borrow_mut().push(format!("2:{path}"));
                    })),
            )
            .unwrap();
        assert_eq!(*seen.borrow(), vec!["1:red", "2:red", "1:blue", "2:blue"]);
    }

    #[test]
    fn dynamic_registries_reload_through_the_holder() {
        let mut holder = holder();
        holder
            .create_registry(&SHADES, NewRegistry::dynamic().with_initial(red_and_blue()))
            .unwrap();
        let shades = holder.registry(&SHADES).unwrap();
        assert!(shades.is_dynamic());
        assert_eq!(shades.len(), 2);
        assert_eq!(shades.probe_id(&shades.require(&key("red")).unwrap()), None);

        let reloaded = holder
            .refreshable_mut(&SHADES)
            .unwrap()
            .replace_all([LoadedEntry::new(key("teal"), Color("teal"))])
            .unwrap();
        assert_eq!(reloaded, 1);
        assert_eq!(holder.registry(&SHADES).unwrap().keys(), vec![key("teal")]);

        holder.create_registry(&COLORS, NewRegistry::new()).unwrap();
        assert!(matches!(
            holder.refreshable_mut(&COLORS),
            Err(RegistryError::Unsupported { .. })
        ));
    }

    #[test]
    fn references_resolve_once_the_registry_exists() {
        let mut holder = holder();
        let reference = COLORS.key(key("blue")).reference();
        assert!(reference.try_resolve(&holder).is_none());
        assert!(matches!(
            reference.resolve(&holder),
            Err(RegistryError::RegistryNotFound { .. })
        ));
        holder
            .create_registry(&COLORS, NewRegistry::new().with_initial(red_and_blue()))
            .unwrap();
        assert_eq!(*reference.resolve(&holder).unwrap(), Color("blue"));
    }

    #[test]
    fn shared_registries_are_read_only() {
        let mut holder = holder();
        holder
            .create_registry(&COLORS, NewRegistry::new().with_initial(red_and_blue()))
            .unwrap();
        holder.create_registry(&SHADES, NewRegistry::new()).unwrap();

        let colors = holder.shared(COLORS.erased()).unwrap();
        assert!(matches!(
            holder.registry_mut(&COLORS),
            Err(RegistryError::RegistryShared { .. })
        ));
        {
            let mut substitute = MappedRegistry::new(SHADES);
            substitute.push(key("grey"), Color("grey")).unwrap();
            let proxy = ProxiedRegistryAccess::builder(&holder)
                .replace(substitute)
                .unwrap()
                .replace_shared(Arc::clone(&colors))
                .unwrap()
                .build();
            assert_eq!(proxy.all_registries().len(), 2);
            assert_eq!(proxy.registry(&SHADES).unwrap().len(), 1);
            assert_eq!(proxy.registry(&COLORS).unwrap().len(), 2);
        }
        drop(colors);
        assert!(holder.registry_mut(&COLORS).is_ok());
        assert!(holder.registry(&SHADES).unwrap().is_empty());
    }

    #[test]
    fn tag_registries_live_next_to_their_targets() {
        let mut holder = holder();
        holder
            .create_registry(&COLORS, NewRegistry::new().with_initial(red_and_blue()))
            .unwrap();
        let tags_type: RegistryType<Tag<Color>> =
            RegistryType::new(ROOT, ResourceKey::ks_const("tags/colors"));
        let index = TagIndexHandle::new(COLORS);
        holder.create_tag_registry(&tags_type, index.clone()).unwrap();
        assert!(matches!(
            holder.create_tag_registry(&tags_type, index.clone()),
            Err(RegistryError::DuplicateRegistry { .. })
        ));

        let mut builder = TagIndex::builder(COLORS);
        builder.add(key("warm"), [key("red")], Lifecycle::Stable);
        index.publish(builder.build());

        let tags = holder.registry(&tags_type).unwrap();
        let warm = tags.require(&key("warm")).unwrap();
        assert!(warm.contains(&key("red")));
        assert!(!warm.contains(&key("blue")));
        assert_eq!(tags.kind(), RegistryKind::Tag);
    }
}
