//! The process-wide context: every root, registry and provider, built once at startup and passed
//! explicitly to whatever needs it.

use ks_registry::access::{ProxiedRegistryAccess, ProxiedRegistryAccessBuilder};
use ks_registry::error::LoaderError;
use ks_registry::holder::{NewRegistry, RegistryHolder};
use ks_registry::provider::{BuilderProvider, FactoryProvider};
use tracing::info;

use crate::config::RegistryConfig;
use crate::derived::KeyLookupCache;
use crate::prelude::*;

/// Bootstrap phase: roots exist, registries and providers are being filled in.
pub struct HostContextBuilder {
    config: RegistryConfig,
    base_root: ResourceKey,
    extension_root: ResourceKey,
    holder: RegistryHolder,
    builders: BuilderProvider,
    factories: FactoryProvider,
    key_cache: KeyLookupCache,
}

impl HostContextBuilder {
    /// Validates the configuration and creates every configured root.
    pub fn new(config: RegistryConfig) -> Result<Self> {
        config.validate().context("Invalid registry configuration")?;
        let roots = config.root_keys()?;
        let mut holder = RegistryHolder::new();
        for root in &roots {
            holder.create_root(root.clone())?;
        }
        info!(roots = roots.len(), "Registry roots created");
        Ok(Self {
            base_root: roots[0].clone(),
            extension_root: roots[1].clone(),
            config,
            holder,
            builders: BuilderProvider::new(),
            factories: FactoryProvider::new(),
            key_cache: KeyLookupCache::new(),
        })
    }

    /// The configuration the context was built from.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The type of a registry at `location` under the base root.
    pub fn base_type<T: ?Sized>(&self, location: &str) -> Result<RegistryType<T>> {
        Ok(RegistryType::new(self.base_root.clone(), self.config.parse_key(location)?))
    }

    /// The type of a registry at `location` under the extension root.
    pub fn extension_type<T: ?Sized>(&self, location: &str) -> Result<RegistryType<T>> {
        Ok(RegistryType::new(
            self.extension_root.clone(),
            self.config.parse_key(location)?,
        ))
    }

    /// Direct access to the holder, e.g. for tag registries or extra roots.
    pub fn holder_mut(&mut self) -> &mut RegistryHolder {
        &mut self.holder
    }

    /// The builder provider, writable until [`Self::finish`].
    pub fn builders_mut(&mut self) -> &mut BuilderProvider {
        &mut self.builders
    }

    /// The factory provider, writable until [`Self::finish`].
    pub fn factories_mut(&mut self) -> &mut FactoryProvider {
        &mut self.factories
    }

    /// The reverse key index fed by every registry created through [`Self::create_registry`].
    pub fn key_cache(&self) -> &KeyLookupCache {
        &self.key_cache
    }

    /// Creates a registry whose keys are also recorded in the [`KeyLookupCache`].
    pub fn create_registry<T: ?Sized + 'static>(
        &mut self,
        ty: &RegistryType<T>,
        options: NewRegistry<T>,
    ) -> Result<&mut dyn Registry<T>> {
        if self.config.log_registry_creation {
            info!(registry = %ty, "Creating registry");
        }
        let options = options.on_each_entry(self.key_cache.listener());
        self.holder
            .create_registry(ty, options)
            .with_context(|| format!("Could not create registry {ty}"))
    }

    /// Ends bootstrap: providers become read-only and shareable.
    pub fn finish(self) -> HostContext {
        info!(
            builders = self.builders.len(),
            factories = self.factories.len(),
            registries = self.holder.all_registries().len(),
            "Host context ready"
        );
        HostContext {
            config: self.config,
            holder: self.holder,
            builders: Arc::new(self.builders),
            factories: Arc::new(self.factories),
            key_cache: self.key_cache,
        }
    }
}

/// The finished context. Providers are frozen; registries can still be reloaded.
pub struct HostContext {
    config: RegistryConfig,
    holder: RegistryHolder,
    builders: Arc<BuilderProvider>,
    factories: Arc<FactoryProvider>,
    key_cache: KeyLookupCache,
}

static_assertions::assert_not_impl_any!(HostContext: Send, Sync);
static_assertions::assert_impl_all!(BuilderProvider: Send, Sync);
static_assertions::assert_impl_all!(FactoryProvider: Send, Sync);

impl HostContext {
    /// The configuration the context was built from.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Read access to every registry.
    pub fn holder(&self) -> &RegistryHolder {
        &self.holder
    }

    /// Write access for registry mutation after bootstrap.
    pub fn holder_mut(&mut self) -> &mut RegistryHolder {
        &mut self.holder
    }

    /// The frozen builder provider.
    pub fn builders(&self) -> &Arc<BuilderProvider> {
        &self.builders
    }

    /// The frozen factory provider.
    pub fn factories(&self) -> &Arc<FactoryProvider> {
        &self.factories
    }

    /// The reverse key index.
    pub fn key_cache(&self) -> &KeyLookupCache {
        &self.key_cache
    }

    /// Reloads a refreshable registry; on failure its previous contents stay.
    pub fn reload<T, I, E>(&mut self, ty: &RegistryType<T>, loader: I) -> Result<usize>
    where
        T: ?Sized + 'static,
        I: IntoIterator<Item = std::result::Result<LoadedEntry<T>, E>>,
        E: Into<LoaderError>,
    {
        let count = self
            .holder
            .refreshable_mut(ty)?
            .reload(loader)
            .with_context(|| format!("Could not reload registry {ty}"))?;
        info!(registry = %ty, entries = count, "Registry reloaded");
        Ok(count)
    }

    /// Starts an overlay over this context's registries.
    pub fn overlay(&self) -> ProxiedRegistryAccessBuilder<'_> {
        ProxiedRegistryAccess::builder(&self.holder)
    }
}

impl RegistryAccess for HostContext {
    fn registry_erased(
        &self,
        location: &ks_registry::key::RegistryLocation,
    ) -> Option<&dyn ks_registry::registry::AnyRegistry> {
        self.holder.registry_erased(location)
    }

    fn all_registries(&self) -> Vec<&dyn ks_registry::registry::AnyRegistry> {
        self.holder.all_registries()
    }
}
