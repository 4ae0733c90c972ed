//! Type-indexed constructor maps: each abstract request type resolves to exactly one supplier or factory.
use std::any::{type_name, Any, TypeId};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use hashbrown::HashMap;
use itertools::Itertools;
use tracing::debug;

use crate::error::ProviderError;

/// A shared zero-argument constructor.
pub type Supplier<B> = Arc<dyn Fn() -> B + Send + Sync>;

struct Slot {
    request: &'static str,
    value: Box<dyn Any + Send + Sync>,
}

/// `TypeId` of the request type -> constructor, write-once per request type.
struct TypeMap {
    provider: &'static str,
    slots: HashMap<TypeId, Slot>,
}

impl TypeMap {
    fn new(provider: &'static str) -> Self {
        Self {
            provider,
            slots: HashMap::new(),
        }
    }

    fn insert<K: ?Sized + 'static>(&mut self, value: impl Any + Send + Sync) -> Result<(), ProviderError> {
        let (provider, request) = (self.provider, type_name::<K>());
        let hashbrown::hash_map::Entry::Vacant(slot) = self.slots.entry(TypeId::of::<K>()) else {
            return Err(ProviderError::DuplicateRegistration { provider, request });
        };
        slot.insert(Slot {
            request,
            value: Box::new(value),
        });
        debug!(provider, request, "Registered constructor");
        Ok(())
    }

    fn get<K: ?Sized + 'static, V: 'static>(&self) -> Result<&V, ProviderError> {
        let slot = self
            .slots
            .get(&TypeId::of::<K>())
            .ok_or_else(|| ProviderError::TypeNotFound {
                provider: self.provider,
                request: type_name::<K>(),
            })?;
        Ok(slot
            .value
            .downcast_ref::<V>()
            .expect("constructor stored under the wrong request type"))
    }

    fn contains<K: ?Sized + 'static>(&self) -> bool {
        self.slots.contains_key(&TypeId::of::<K>())
    }
}

impl Debug for TypeMap {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_set()
            .entries(self.slots.values().map(|slot| slot.request).sorted())
            .finish()
    }
}

/// Zero-argument suppliers, one per built type.
#[derive(Debug)]
pub struct BuilderProvider {
    map: TypeMap,
}

impl BuilderProvider {
    /// An empty provider.
    pub fn new() -> Self {
        Self {
            map: TypeMap::new("builder"),
        }
    }

    /// Registers the supplier for `B`, returning the stored handle.
    pub fn register<B: 'static>(
        &mut self,
        builder: impl Fn() -> B + Send + Sync + 'static,
    ) -> Result<Supplier<B>, ProviderError> {
        let supplier: Supplier<B> = Arc::new(builder);
        self.map.insert::<B>(Arc::clone(&supplier))?;
        Ok(supplier)
    }

    /// The supplier registered for `B`.
    pub fn provide<B: 'static>(&self) -> Result<Supplier<B>, ProviderError> {
        self.map.get::<B, Supplier<B>>().cloned()
    }

    /// Builds a fresh `B` with its registered supplier.
    pub fn build<B: 'static>(&self) -> Result<B, ProviderError> {
        Ok((self.map.get::<B, Supplier<B>>()?)())
    }

    /// Checks if `B` has a supplier.
    pub fn contains<B: 'static>(&self) -> bool {
        self.map.contains::<B>()
    }

    /// Number of registered suppliers.
    pub fn len(&self) -> usize {
        self.map.slots.len()
    }

    /// Checks if no supplier was registered.
    pub fn is_empty(&self) -> bool {
        self.map.slots.is_empty()
    }
}

impl Default for BuilderProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Parameterized factory instances, keyed by their (usually unsized) interface type `F`.
#[derive(Debug)]
pub struct FactoryProvider {
    map: TypeMap,
}

impl FactoryProvider {
    /// An empty provider.
    pub fn new() -> Self {
        Self {
            map: TypeMap::new("factory"),
        }
    }

    /// Registers the factory serving `F`.
    pub fn register<F: ?Sized + Send + Sync + 'static>(&mut self, factory: Arc<F>) -> Result<(), ProviderError> {
        self.map.insert::<F>(factory)
    }

    /// The factory registered for `F`.
    pub fn provide<F: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<F>, ProviderError> {
        self.map.get::<F, Arc<F>>().cloned()
    }

    /// Checks if `F` has a factory.
    pub fn contains<F: ?Sized + 'static>(&self) -> bool {
        self.map.contains::<F>()
    }

    /// Number of registered factories.
    pub fn len(&self) -> usize {
        self.map.slots.len()
    }

    /// Checks if no factory was registered.
    pub fn is_empty(&self) -> bool {
        self.map.slots.is_empty()
    }
}

impl Default for FactoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Settings {
        volume: u8,
    }

    #[derive(Debug, PartialEq)]
    struct Particle {
        size: f32,
        name: String,
    }

    trait ParticleFactory {
        fn create(&self, size: f32, name: &str) -> Particle;
    }

    struct Sparks;

    impl ParticleFactory for Sparks {
        fn create(&self, size: f32, name: &str) -> Particle {
            Particle {
                size: size * 2.0,
                name: format!("spark:{name}"),
            }
        }
    }

    type DynParticleFactory = dyn ParticleFactory + Send + Sync;

    #[test]
    fn builders_register_once() {
        let mut builders = BuilderProvider::new();
        assert!(matches!(
            builders.provide::<Settings>(),
            Err(ProviderError::TypeNotFound { .. })
        ));

        let stored = builders.register(|| Settings { volume: 7 }).unwrap();
        let provided = builders.provide::<Settings>().unwrap();
        assert!(Arc::ptr_eq(&stored, &provided));
        assert_eq!(builders.build::<Settings>().unwrap(), Settings { volume: 7 });

        let err = builders.register(|| Settings { volume: 0 }).err().unwrap();
        assert!(matches!(err, ProviderError::DuplicateRegistration { .. }));
        assert_eq!(builders.build::<Settings>().unwrap().volume, 7);
        assert_eq!(builders.len(), 1);
        assert!(builders.contains::<Settings>());
        assert!(!builders.contains::<Particle>());
    }

    #[test]
    fn factories_by_interface() {
        let mut factories = FactoryProvider::new();
        let sparks: Arc<DynParticleFactory> = Arc::new(Sparks);
        factories.register(Arc::clone(&sparks)).unwrap();

        let provided = factories.provide::<DynParticleFactory>().unwrap();
        assert!(Arc::ptr_eq(&provided, &sparks));
        assert_eq!(
            provided.create(1.5, "fire"),
            Particle {
                size: 3.0,
                name: "spark:fire".to_owned()
            }
        );

        assert!(matches!(
            factories.register::<DynParticleFactory>(Arc::new(Sparks)),
            Err(ProviderError::DuplicateRegistration { .. })
        ));
        assert!(matches!(
            factories.provide::<dyn Fn(u32) -> Particle + Send + Sync>(),
            Err(ProviderError::TypeNotFound { .. })
        ));
    }

    #[test]
    fn errors_name_the_request() {
        let factories = FactoryProvider::new();
        let message = factories.provide::<DynParticleFactory>().err().unwrap().to_string();
        assert!(message.contains("ParticleFactory"), "{message}");
        assert!(message.starts_with("No factory"), "{message}");
    }
}
