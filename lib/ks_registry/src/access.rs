//! Read access to registries by location, and overlays that swap individual registries out.
use std::any::type_name;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use hashbrown::HashMap;

use crate::error::RegistryError;
use crate::key::{RegistryLocation, RegistryType};
use crate::registry::{AnyRegistry, ErasedRegistry, Registry};

/// Something that can find registries by their location.
pub trait RegistryAccess {
    /// The registry at `location`, whatever its value type.
    fn registry_erased(&self, location: &RegistryLocation) -> Option<&dyn AnyRegistry>;

    /// Every reachable registry, each location at most once.
    fn all_registries(&self) -> Vec<&dyn AnyRegistry>;
}

/// Typed lookups on top of any [`RegistryAccess`].
pub trait RegistryAccessExt: RegistryAccess {
    /// The registry of type `ty`, or `None` if there is none or it stores another value type.
    fn find_registry<T: ?Sized + 'static>(&self, ty: &RegistryType<T>) -> Option<&dyn Registry<T>> {
        self.registry_erased(ty.erased())?.typed::<T>()
    }

    /// The registry of type `ty`, treating absence as an error.
    fn registry<T: ?Sized + 'static>(&self, ty: &RegistryType<T>) -> Result<&dyn Registry<T>, RegistryError> {
        let erased = self
            .registry_erased(ty.erased())
            .ok_or_else(|| RegistryError::RegistryNotFound {
                registry: ty.erased().clone(),
            })?;
        erased.typed::<T>().ok_or_else(|| RegistryError::TypeMismatch {
            registry: ty.erased().clone(),
            expected: type_name::<T>(),
            actual: erased.value_type_name(),
        })
    }
}

impl<A: RegistryAccess + ?Sized> RegistryAccessExt for A {}

/// Serves a fixed set of replacement registries, delegating every other location to a base access.
///
/// A replacement hides the base registry at its location completely, contents are never merged.
/// The override set is fixed at construction; build a new overlay to change it.
pub struct ProxiedRegistryAccess<'a> {
    base: &'a dyn RegistryAccess,
    overrides: Vec<Arc<dyn AnyRegistry>>,
    by_location: HashMap<RegistryLocation, usize>,
}

impl<'a> ProxiedRegistryAccess<'a> {
    /// Starts an overlay over `base`.
    pub fn builder(base: &'a dyn RegistryAccess) -> ProxiedRegistryAccessBuilder<'a> {
        ProxiedRegistryAccessBuilder {
            inner: Self {
                base,
                overrides: Vec::new(),
                by_location: HashMap::new(),
            },
        }
    }

    /// Checks if `location` is served by a replacement.
    pub fn is_overridden(&self, location: &RegistryLocation) -> bool {
        self.by_location.contains_key(location)
    }

    /// The access this overlay delegates to.
    pub fn base(&self) -> &'a dyn RegistryAccess {
        self.base
    }
}

impl RegistryAccess for ProxiedRegistryAccess<'_> {
    fn registry_erased(&self, location: &RegistryLocation) -> Option<&dyn AnyRegistry> {
        match self.by_location.get(location) {
            Some(&i) => Some(&*self.overrides[i]),
            None => self.base.registry_erased(location),
        }
    }

    fn all_registries(&self) -> Vec<&dyn AnyRegistry> {
        self.base
            .all_registries()
            .into_iter()
            .filter(|registry| !self.is_overridden(registry.registry_location()))
            .chain(self.overrides.iter().map(|registry| &**registry))
            .collect()
    }
}

impl Debug for ProxiedRegistryAccess<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedRegistryAccess")
            .field("overrides", &self.overrides)
            .finish_non_exhaustive()
    }
}

/// Collects the replacements of a [`ProxiedRegistryAccess`].
pub struct ProxiedRegistryAccessBuilder<'a> {
    inner: ProxiedRegistryAccess<'a>,
}

impl<'a> ProxiedRegistryAccessBuilder<'a> {
    /// Serves `registry` in place of whatever the base has at its location.
    pub fn replace<T: ?Sized + 'static>(self, registry: impl Registry<T>) -> Result<Self, RegistryError> {
        self.replace_shared(ErasedRegistry::shared(registry))
    }

    /// Serves an already shared registry, e.g. one borrowed from a holder, at its location.
    pub fn replace_shared(mut self, registry: Arc<dyn AnyRegistry>) -> Result<Self, RegistryError> {
        let location = registry.registry_location().clone();
        if self.inner.by_location.contains_key(&location) {
            return Err(RegistryError::DuplicateRegistry { registry: location });
        }
        self.inner.by_location.insert(location, self.inner.overrides.len());
        self.inner.overrides.push(registry);
        Ok(self)
    }

    /// Freezes the override set.
    pub fn build(self) -> ProxiedRegistryAccess<'a> {
        self.inner
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::key::ResourceKey;
    use crate::mapped::MappedRegistry;

    /// A bare access over a list of registries.
    struct Fixed(Vec<Arc<dyn AnyRegistry>>);

    impl RegistryAccess for Fixed {
        fn registry_erased(&self, location: &RegistryLocation) -> Option<&dyn AnyRegistry> {
            self.0
                .iter()
                .find(|registry| registry.registry_location() == location)
                .map(|registry| &**registry)
        }

        fn all_registries(&self) -> Vec<&dyn AnyRegistry> {
            self.0.iter().map(|registry| &**registry).collect()
        }
    }

    const ROOT: ResourceKey = ResourceKey::ks_const("r");
    const A: RegistryType<&'static str> = RegistryType::new(ROOT, ResourceKey::ks_const("a"));
    const B: RegistryType<u32> = RegistryType::new(ROOT, ResourceKey::ks_const("b"));

    fn key(path: &str) -> ResourceKey {
        ResourceKey::ks(path).unwrap()
    }

    fn base() -> Fixed {
        let mut a = MappedRegistry::new(A);
        a.push(key("x"), "base x").unwrap();
        a.push(key("y"), "base y").unwrap();
        let mut b = MappedRegistry::new(B);
        b.push(key("one"), 1).unwrap();
        Fixed(vec![ErasedRegistry::shared(a), ErasedRegistry::shared(b)])
    }

    #[test]
    fn overlay_shadows_whole_registry() {
        let base = base();
        let mut replacement = MappedRegistry::new(A);
        replacement.push(key("x"), "modded x").unwrap();
        let proxy = ProxiedRegistryAccess::builder(&base)
            .replace(replacement)
            .unwrap()
            .build();

        let a = proxy.registry(&A).unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(*a.get(&key("x")).unwrap(), "modded x");
        assert!(a.get(&key("y")).is_none());
        assert_eq!(*proxy.registry(&B).unwrap().require(&key("one")).unwrap(), 1);

        let all = proxy.all_registries();
        assert_eq!(all.len(), 2);
        let mut locations: Vec<_> = all.iter().map(|r| r.registry_location().clone()).collect();
        locations.sort();
        assert_eq!(locations, vec![A.erased().clone(), B.erased().clone()]);
        let served_a = all
            .iter()
            .find(|r| r.registry_location() == A.erased())
            .unwrap();
        assert_eq!(served_a.len(), 1);

        assert!(proxy.is_overridden(A.erased()));
        assert!(!proxy.is_overridden(B.erased()));
        // The base is untouched.
        assert_eq!(base.registry(&A).unwrap().len(), 2);
    }

    #[test]
    fn overlay_rejects_two_replacements_for_one_location() {
        let base = base();
        let err = ProxiedRegistryAccess::builder(&base)
            .replace(MappedRegistry::new(A))
            .unwrap()
            .replace(MappedRegistry::new(A))
            .err().unwrap();
        assert!(matches!(err, RegistryError::DuplicateRegistry { .. }));
    }

    #[test]
    fn typed_lookups() {
        let base = base();
        let missing: RegistryType<u32> = RegistryType::new(ROOT, ResourceKey::ks_const("missing"));
        let wrong: RegistryType<u32> = RegistryType::new(ROOT, ResourceKey::ks_const("a"));
        assert!(base.find_registry(&missing).is_none());
        assert!(matches!(
            base.registry(&missing),
            Err(RegistryError::RegistryNotFound { .. })
        ));
        assert!(base.find_registry(&wrong).is_none());
        assert!(matches!(
            base.registry(&wrong),
            Err(RegistryError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn references_resolve_through_overlay() {
        let base = base();
        let reference = A.key(key("x")).reference();
        assert_eq!(*reference.resolve(&base).unwrap(), "base x");

        let mut replacement = MappedRegistry::new(A);
        replacement.push(key("x"), "modded x").unwrap();
        let proxy = ProxiedRegistryAccess::builder(&base)
            .replace(replacement)
            .unwrap()
            .build();
        assert_eq!(*reference.resolve(&proxy).unwrap(), "modded x");
        assert!(A.key(key("y")).reference().try_resolve(&proxy).is_none());
    }
}
