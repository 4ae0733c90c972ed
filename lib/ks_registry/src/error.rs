//! Error types for key construction, registry operations and providers.
use thiserror::Error;

use crate::key::{RegistryId, RegistryLocation, ResourceKey};

/// The error a registry loader may fail with.
pub type LoaderError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Reasons a [`ResourceKey`] could not be constructed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The namespace or the path is empty.
    #[error("Key `{input}` has an empty namespace or path")]
    Empty {
        /// The rejected input.
        input: String,
    },
    /// More than one `:` in the string form.
    #[error("Key `{input}` has more than one `:` separator")]
    TooManySeparators {
        /// The rejected input.
        input: String,
    },
    /// The namespace contains characters outside `[a-z0-9_.-]`.
    #[error("Namespace `{namespace}` of key `{input}` is not made of `[a-z0-9_.-]`")]
    IllegalNamespace {
        /// The rejected input.
        input: String,
        /// The offending namespace.
        namespace: String,
    },
    /// The path contains characters outside `[a-z0-9_./-]`.
    #[error("Path `{path}` of key `{input}` is not made of `[a-z0-9_./-]`")]
    IllegalPath {
        /// The rejected input.
        input: String,
        /// The offending path.
        path: String,
    },
}

/// Broad classes of [`RegistryError`], for callers that only care about the category.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ErrorCategory {
    /// Something was registered twice.
    Duplicate,
    /// A key, id, root or registry was absent.
    NotFound,
    /// The registry kind does not support the operation.
    Unsupported,
    /// A key could not be constructed.
    MalformedIdentity,
    /// Ids ran out, a shared registry was mutated, or a loader failed.
    State,
}

/// Possible errors from registry and holder operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A key given to the operation was malformed.
    #[error(transparent)]
    IllegalKey(#[from] KeyError),
    /// A key that is already present was prevented from being overwritten.
    #[error("Key {key} already exists in registry {registry}")]
    DuplicateKey {
        /// The registry.
        registry: RegistryLocation,
        /// The conflicting key.
        key: ResourceKey,
    },
    /// The very same value instance is already registered under another key.
    #[error("The value given for {key} is already registered as {existing} in registry {registry}")]
    DuplicateValue {
        /// The registry.
        registry: RegistryLocation,
        /// The key that was being registered.
        key: ResourceKey,
        /// The key the value already has.
        existing: ResourceKey,
    },
    /// A numeric ID that is already taken was prevented from being overwritten.
    #[error("Id {id} already belongs to {existing} when trying to register {key} in registry {registry}")]
    DuplicateId {
        /// The registry.
        registry: RegistryLocation,
        /// The ID already present.
        id: RegistryId,
        /// The key of the entry holding the ID.
        existing: ResourceKey,
        /// The key that was being registered.
        key: ResourceKey,
    },
    /// An override named an explicit id different from the one the key already has.
    #[error("Key {key} has id {existing} in registry {registry}, but id {requested} was requested")]
    IdMismatch {
        /// The registry.
        registry: RegistryLocation,
        /// The overridden key.
        key: ResourceKey,
        /// The id the key already has.
        existing: RegistryId,
        /// The id that was asked for.
        requested: RegistryId,
    },
    /// A registry already exists at the location.
    #[error("A registry already exists at {registry}")]
    DuplicateRegistry {
        /// The taken location.
        registry: RegistryLocation,
    },
    /// A root registry with this key already exists.
    #[error("Root {root} already exists")]
    DuplicateRoot {
        /// The taken root key.
        root: ResourceKey,
    },
    /// No root registry with this key exists.
    #[error("Unknown root {root}")]
    UnknownRoot {
        /// The missing root key.
        root: ResourceKey,
    },
    /// No registry exists at the location.
    #[error("No registry at {registry}")]
    RegistryNotFound {
        /// The missing location.
        registry: RegistryLocation,
    },
    /// The key has no entry.
    #[error("No value for {key} in registry {registry}")]
    ValueNotFound {
        /// The registry.
        registry: RegistryLocation,
        /// The missing key.
        key: ResourceKey,
    },
    /// The id has no entry.
    #[error("No value with id {id} in registry {registry}")]
    IdNotFound {
        /// The registry.
        registry: RegistryLocation,
        /// The missing id.
        id: RegistryId,
    },
    /// The registry kind does not support the operation, e.g. integer ids on a dynamic registry.
    #[error("Registry {registry} does not support {operation}")]
    Unsupported {
        /// The registry.
        registry: RegistryLocation,
        /// The rejected operation.
        operation: &'static str,
    },
    /// The registry at the location stores a different value type.
    #[error("Registry {registry} stores {actual}, not {expected}")]
    TypeMismatch {
        /// The registry.
        registry: RegistryLocation,
        /// The requested value type.
        expected: &'static str,
        /// The stored value type.
        actual: &'static str,
    },
    /// The registry is shared (e.g. with an overlay) and cannot be mutated right now.
    #[error("Registry {registry} is shared and cannot be mutated")]
    RegistryShared {
        /// The registry.
        registry: RegistryLocation,
    },
    /// No more unallocated ids in the registry. The allocator is a simple bump allocator.
    #[error("No free ids left in registry {registry}")]
    NoFreeSpace {
        /// The registry.
        registry: RegistryLocation,
    },
    /// The loader failed part way; the registry kept its previous contents.
    #[error("Reloading registry {registry} failed: {source}")]
    ReloadFailed {
        /// The registry.
        registry: RegistryLocation,
        /// What the loader reported.
        #[source]
        source: LoaderError,
    },
    /// Some entries of an id snapshot are missing in the local registry.
    #[error("Registry {registry} is missing the following keys: {keys:?}")]
    MissingEntries {
        /// The registry.
        registry: RegistryLocation,
        /// Every missing key, in snapshot order.
        keys: Vec<ResourceKey>,
    },
}

impl RegistryError {
    /// Classifies the error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::IllegalKey(_) => ErrorCategory::MalformedIdentity,
            Self::DuplicateKey { .. }
            | Self::DuplicateValue { .. }
            | Self::DuplicateId { .. }
            | Self::IdMismatch { .. }
            | Self::DuplicateRegistry { .. }
            | Self::DuplicateRoot { .. } => ErrorCategory::Duplicate,
            Self::UnknownRoot { .. }
            | Self::RegistryNotFound { .. }
            | Self::ValueNotFound { .. }
            | Self::IdNotFound { .. }
            | Self::MissingEntries { .. } => ErrorCategory::NotFound,
            Self::Unsupported { .. } | Self::TypeMismatch { .. } => ErrorCategory::Unsupported,
            Self::RegistryShared { .. } | Self::NoFreeSpace { .. } | Self::ReloadFailed { .. } => {
                ErrorCategory::State
            }
        }
    }
}

/// Errors from [`crate::provider::BuilderProvider`] and [`crate::provider::FactoryProvider`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The request type already has a constructor.
    #[error("A {provider} is already registered for `{request}`")]
    DuplicateRegistration {
        /// Which provider map rejected it.
        provider: &'static str,
        /// Name of the request type.
        request: &'static str,
    },
    /// The request type has no constructor.
    #[error("No {provider} is registered for `{request}`")]
    TypeNotFound {
        /// Which provider map was asked.
        provider: &'static str,
        /// Name of the request type.
        request: &'static str,
    },
}
