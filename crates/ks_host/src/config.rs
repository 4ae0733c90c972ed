//! Registry configuration handling

use ks_registry::error::KeyError;
use ks_registry::key::{is_valid_namespace, ResourceKey};
use smart_default::SmartDefault;

use crate::prelude::*;

/// Which roots exist and how bare keys are resolved.
#[derive(Clone, Eq, PartialEq, Debug, SmartDefault)]
pub struct RegistryConfig {
    /// Namespace for keys written without one.
    #[default = "ks"]
    pub default_namespace: String,
    /// Root holding the built-in registries.
    #[default = "ks:base"]
    pub base_root: String,
    /// Root holding registries added by extensions.
    #[default = "ks:extension"]
    pub extension_root: String,
    /// Further roots, created after the two above.
    pub extra_roots: Vec<String>,
    /// Log every registry created through the host context at info level.
    #[default = true]
    pub log_registry_creation: bool,
}

impl RegistryConfig {
    /// Parses a key, using [`Self::default_namespace`] when the input has none.
    pub fn parse_key(&self, input: &str) -> Result<ResourceKey, KeyError> {
        ResourceKey::parse(input, &self.default_namespace)
    }

    /// Every configured root key: base, extension, then the extras.
    pub fn root_keys(&self) -> Result<Vec<ResourceKey>> {
        [&self.base_root, &self.extension_root]
            .into_iter()
            .chain(&self.extra_roots)
            .map(|root| {
                self.parse_key(root)
                    .with_context(|| format!("Invalid root key `{root}`"))
            })
            .collect()
    }

    /// Checks that every configured key is well formed and that no root is configured twice.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            is_valid_namespace(&self.default_namespace),
            "Invalid default namespace `{}`",
            self.default_namespace
        );
        let mut seen = HashSet::new();
        for root in self.root_keys()? {
            if !seen.insert(root.clone()) {
                bail!("Root {root} is configured more than once");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use quickcheck_macros::quickcheck;

    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RegistryConfig::default();
        config.validate().unwrap();
        assert_eq!(
            config.root_keys().unwrap(),
            vec![ResourceKey::ks_const("base"), ResourceKey::ks_const("extension")]
        );
        assert!(config.log_registry_creation);
    }

    #[test]
    fn rejects_bad_and_repeated_roots() {
        let config = RegistryConfig {
            extra_roots: vec!["Mods:Bad Root".to_owned()],
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RegistryConfig {
            extra_roots: vec!["base".to_owned()],
            ..Default::default()
        };
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("more than once"), "{message}");

        let config = RegistryConfig {
            default_namespace: "Not Valid".to_owned(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[quickcheck]
    fn bare_keys_use_the_default_namespace(path: Vec<u8>) -> bool {
        let path: String = path
            .into_iter()
            .map(|b| char::from(b'a' + b % 26))
            .collect();
        let config = RegistryConfig {
            default_namespace: "mymod".to_owned(),
            ..Default::default()
        };
        match config.parse_key(&path) {
            Ok(key) => key.namespace() == "mymod" && key.path() == path,
            Err(_) => path.is_empty(),
        }
    }
}
