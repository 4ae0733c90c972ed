//! Identity atoms: namespaced resource keys, numeric ids, and typed references to registries and
//! the values inside them.
use std::fmt::{Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use kstring::KString;
use serde::{Deserialize, Serialize};

use crate::access::{RegistryAccess, RegistryAccessExt};
use crate::error::{KeyError, RegistryError};

/// Default namespace for Keystone's own objects (as a `const` for compile-time functions)
pub const KS_REGISTRY_DOMAIN_CONST: &str = "ks";
/// Default namespace for Keystone's own objects
pub static KS_REGISTRY_DOMAIN: &str = KS_REGISTRY_DOMAIN_CONST;
/// Default namespace for Keystone's own objects, as a [`KString`] for convenience
pub static KS_REGISTRY_DOMAIN_KS: KString = KString::from_static(KS_REGISTRY_DOMAIN_CONST);

/// Checks if the given string is a valid key namespace (`[a-z0-9_.-]+`).
pub const fn is_valid_namespace(namespace: &str) -> bool {
    is_valid_segment(namespace, false)
}

/// Checks if the given string is a valid key path (`[a-z0-9_./-]+`).
pub const fn is_valid_path(path: &str) -> bool {
    is_valid_segment(path, true)
}

const fn is_valid_segment(segment: &str, allow_slash: bool) -> bool {
    if segment.is_empty() {
        return false;
    }
    let bytes = segment.as_bytes();
    // const-fn safe for loop
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' | b'a'..=b'z' | b'_' | b'.' | b'-' => {}
            b'/' if allow_slash => {}
            _ => return false,
        }
        i += 1;
    }
    true
}

/// A namespaced identity for a registry entry, written `namespace:path`.
///
/// Construction always validates; a `ResourceKey` that exists is canonical.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceKey {
    namespace: KString,
    path: KString,
}

impl ResourceKey {
    /// Constructs a key out of the given namespace and path, lowercasing both.
    pub fn new(namespace: &str, path: &str) -> Result<Self, KeyError> {
        let input = || format!("{namespace}:{path}");
        if namespace.is_empty() || path.is_empty() {
            return Err(KeyError::Empty { input: input() });
        }
        let namespace_lc = namespace.to_ascii_lowercase();
        let path_lc = path.to_ascii_lowercase();
        if !is_valid_namespace(&namespace_lc) {
            return Err(KeyError::IllegalNamespace {
                input: input(),
                namespace: namespace.to_owned(),
            });
        }
        if !is_valid_path(&path_lc) {
            return Err(KeyError::IllegalPath {
                input: input(),
                path: path.to_owned(),
            });
        }
        Ok(Self {
            namespace: KString::from_string(namespace_lc),
            path: KString::from_string(path_lc),
        })
    }

    /// Constructs a `ks:`-namespaced key.
    pub fn ks(path: &str) -> Result<Self, KeyError> {
        Self::new(KS_REGISTRY_DOMAIN, path)
    }

    /// A compile time constructor for keys, fails const evaluation on an invalid literal.
    pub const fn new_const(namespace: &'static str, path: &'static str) -> Self {
        assert!(is_valid_namespace(namespace), "invalid resource key namespace");
        assert!(is_valid_path(path), "invalid resource key path");
        Self {
            namespace: KString::from_static(namespace),
            path: KString::from_static(path),
        }
    }

    /// A compile time constructor for `ks:`-namespaced keys.
    pub const fn ks_const(path: &'static str) -> Self {
        Self::new_const(KS_REGISTRY_DOMAIN_CONST, path)
    }

    /// Parses `namespace:path`, or a bare `path` that resolves against `default_namespace`.
    pub fn parse(input: &str, default_namespace: &str) -> Result<Self, KeyError> {
        let mut parts = input.split(':');
        let first = parts.next().unwrap_or_default();
        let (namespace, path) = match (parts.next(), parts.next()) {
            (None, _) => (default_namespace, first),
            (Some(path), None) => (first, path),
            (Some(_), Some(_)) => {
                return Err(KeyError::TooManySeparators {
                    input: input.to_owned(),
                })
            }
        };
        if namespace.is_empty() || path.is_empty() {
            return Err(KeyError::Empty {
                input: input.to_owned(),
            });
        }
        Self::new(namespace, path)
    }

    /// The namespace, e.g. `ks` in `ks:stone`.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The unqualified path, e.g. `stone` in `ks:stone`.
    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Display for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl Debug for ResourceKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "ResourceKey({self})")
    }
}

impl FromStr for ResourceKey {
    type Err = KeyError;

    /// Bare paths resolve to the `ks` namespace.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, KS_REGISTRY_DOMAIN)
    }
}

impl TryFrom<String> for ResourceKey {
    type Error = KeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceKey> for String {
    fn from(value: ResourceKey) -> Self {
        value.to_string()
    }
}

/// Newtype wrapper around a dense u32 registry ID.
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Ord, PartialOrd, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RegistryId(pub u32);

impl RegistryId {
    /// The raw numeric value.
    pub const fn get(self) -> u32 {
        self.0
    }

    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl Display for RegistryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<u32> for RegistryId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Untyped address of a registry: the root it lives under and its location within that root.
#[derive(Clone, Ord, PartialOrd, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct RegistryLocation {
    /// Key of the owning root registry.
    pub root: ResourceKey,
    /// Location of the registry inside the root.
    pub location: ResourceKey,
}

impl RegistryLocation {
    /// Constructs a location out of a root key and a location key.
    pub const fn new(root: ResourceKey, location: ResourceKey) -> Self {
        Self { root, location }
    }
}

impl Display for RegistryLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.root, self.location)
    }
}

/// Identifies which registry holds values of type `T`, independent of any value.
pub struct RegistryType<T: ?Sized> {
    location: RegistryLocation,
    _marker: PhantomData<fn() -> Arc<T>>,
}

impl<T: ?Sized> RegistryType<T> {
    /// Constructs a registry type for the given root and location.
    pub const fn new(root: ResourceKey, location: ResourceKey) -> Self {
        Self::from_erased(RegistryLocation::new(root, location))
    }

    /// Attaches a value type to an untyped location.
    pub const fn from_erased(location: RegistryLocation) -> Self {
        Self {
            location,
            _marker: PhantomData,
        }
    }

    /// Key of the root this registry lives under.
    pub fn root(&self) -> &ResourceKey {
        &self.location.root
    }

    /// Location of this registry inside its root.
    pub fn location(&self) -> &ResourceKey {
        &self.location.location
    }

    /// The untyped `(root, location)` pair.
    pub fn erased(&self) -> &RegistryLocation {
        &self.location
    }

    /// Builds a key addressing a value inside this registry.
    pub fn key(&self, key: ResourceKey) -> RegistryKey<T> {
        RegistryKey::new(self.clone(), key)
    }
}

impl<T: ?Sized> Clone for RegistryType<T> {
    fn clone(&self) -> Self {
        Self::from_erased(self.location.clone())
    }
}

impl<T: ?Sized> PartialEq for RegistryType<T> {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location
    }
}

impl<T: ?Sized> Eq for RegistryType<T> {}

impl<T: ?Sized> Hash for RegistryType<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.location.hash(state);
    }
}

impl<T: ?Sized> Debug for RegistryType<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryType")
            .field("root", self.root())
            .field("location", self.location())
            .field("value", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: ?Sized> Display for RegistryType<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.location, f)
    }
}

/// Identifies a single value inside a specific registry.
pub struct RegistryKey<T: ?Sized> {
    registry: RegistryType<T>,
    key: ResourceKey,
}

impl<T: ?Sized> RegistryKey<T> {
    /// Constructs a key for `key` inside `registry`.
    pub const fn new(registry: RegistryType<T>, key: ResourceKey) -> Self {
        Self { registry, key }
    }

    /// The registry this key points into.
    pub fn registry(&self) -> &RegistryType<T> {
        &self.registry
    }

    /// The key of the value inside the registry.
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    /// Turns this key into a forward reference, resolved against whatever access is supplied later.
    pub fn reference(&self) -> RegistryReference<T> {
        RegistryReference { key: self.clone() }
    }
}

impl<T: ?Sized> Clone for RegistryKey<T> {
    fn clone(&self) -> Self {
        Self::new(self.registry.clone(), self.key.clone())
    }
}

impl<T: ?Sized> PartialEq for RegistryKey<T> {
    fn eq(&self, other: &Self) -> bool {
        self.registry == other.registry && self.key == other.key
    }
}

impl<T: ?Sized> Eq for RegistryKey<T> {}

impl<T: ?Sized> Hash for RegistryKey<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.registry.hash(state);
        self.key.hash(state);
    }
}

impl<T: ?Sized> Debug for RegistryKey<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RegistryKey[{} / {}]", self.registry, self.key)
    }
}

impl<T: ?Sized> Display for RegistryKey<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[{}]", self.registry, self.key)
    }
}

/// A lazily resolved reference to a registry value.
/// Holds no handle, so it may be created before the target registry exists and survives reloads.
pub struct RegistryReference<T: ?Sized> {
    key: RegistryKey<T>,
}

impl<T: ?Sized + 'static> RegistryReference<T> {
    /// The key this reference resolves.
    pub fn key(&self) -> &RegistryKey<T> {
        &self.key
    }

    /// Resolves against `access`, treating a missing registry or value as an error.
    pub fn resolve<A: RegistryAccess + ?Sized>(&self, access: &A) -> Result<Arc<T>, RegistryError> {
        access.registry(self.key.registry())?.require(self.key.key())
    }

    /// Resolves against `access`, returning `None` if the registry or the value is absent.
    pub fn try_resolve<A: RegistryAccess + ?Sized>(&self, access: &A) -> Option<Arc<T>> {
        access.find_registry(self.key.registry())?.get(self.key.key())
    }
}

impl<T: ?Sized> Clone for RegistryReference<T> {
    fn clone(&self) -> Self {
        Self { key: self.key.clone() }
    }
}

impl<T: ?Sized> Debug for RegistryReference<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RegistryReference").field(&self.key).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_forms() {
        let full = ResourceKey::parse("mod:red_wool", "ks").unwrap();
        assert_eq!(full.namespace(), "mod");
        assert_eq!(full.path(), "red_wool");

        let bare = ResourceKey::parse("blocks/stone", "ks").unwrap();
        assert_eq!(bare, ResourceKey::ks_const("blocks/stone"));
        assert_eq!(bare.to_string(), "ks:blocks/stone");

        let upper: ResourceKey = "Mod:Red_Wool".parse().unwrap();
        assert_eq!(upper, full);
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(matches!(ResourceKey::parse(":stone", "ks"), Err(KeyError::Empty { .. })));
        assert!(matches!(ResourceKey::parse("ks:", "ks"), Err(KeyError::Empty { .. })));
        assert!(matches!(ResourceKey::parse("", "ks"), Err(KeyError::Empty { .. })));
        assert!(matches!(
            ResourceKey::parse("a:b:c", "ks"),
            Err(KeyError::TooManySeparators { .. })
        ));
        assert!(matches!(
            ResourceKey::parse("my mod:stone", "ks"),
            Err(KeyError::IllegalNamespace { .. })
        ));
        assert!(matches!(
            ResourceKey::parse("ks/sub:stone", "ks"),
            Err(KeyError::IllegalNamespace { .. })
        ));
        assert!(matches!(
            ResourceKey::parse("ks:stone!", "ks"),
            Err(KeyError::IllegalPath { .. })
        ));
        assert!(matches!(ResourceKey::new("ks", "stône"), Err(KeyError::IllegalPath { .. })));
    }

    #[test]
    fn ordering_is_namespace_then_path() {
        let mut keys = vec![
            ResourceKey::new_const("zeta", "a"),
            ResourceKey::ks_const("b"),
            ResourceKey::ks_const("a"),
        ];
        keys.sort();
        let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["ks:a", "ks:b", "zeta:a"]);
    }

    #[test]
    fn typed_keys_compare_structurally() {
        let colors: RegistryType<u32> = RegistryType::new(ResourceKey::ks_const("base"), ResourceKey::ks_const("colors"));
        let a = colors.key(ResourceKey::ks_const("red"));
        let b = RegistryKey::new(colors.clone(), ResourceKey::ks_const("red"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "ks:base/ks:colors[ks:red]");
        assert_ne!(a, colors.key(ResourceKey::ks_const("blue")));
    }

    #[test]
    fn serde_goes_through_validation() {
        let key = ResourceKey::try_from(String::from("ks:stone")).unwrap();
        assert_eq!(String::from(key), "ks:stone");
        assert!(ResourceKey::try_from(String::from("ks:Not Valid")).is_err());
    }
}
