use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::error::{CertflowError, Result};
use crate::traits::{ChallengeSolver, Deployer, Notifier};
use crate::types::ConfigMap;

/// Inputs handed to a provider factory.
#[derive(Debug, Clone, Default)]
pub struct ProviderFactoryOptions {
    /// Credential fields of the referenced access record.
    pub access_config: ConfigMap,
    /// Provider-specific fields of the node config.
    pub provider_config: ConfigMap,
}

impl ProviderFactoryOptions {
    pub fn new(access_config: ConfigMap, provider_config: ConfigMap) -> Self {
        Self {
            access_config,
            provider_config,
        }
    }
}

/// Constructor for a capability object of family `C`.
pub type ProviderFactory<C> =
    Arc<dyn Fn(&ProviderFactoryOptions) -> Result<Box<C>> + Send + Sync + 'static>;

/// Key type of a registry. Each provider family has its own key type.
pub trait ProviderKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {
    fn as_str(&self) -> &str;
}

macro_rules! provider_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Cow<'static, str>);

        impl $name {
            pub const fn from_static(s: &'static str) -> Self {
                Self(Cow::Borrowed(s))
            }

            pub fn new(s: impl Into<String>) -> Self {
                Self(Cow::Owned(s.into()))
            }
        }

        impl ProviderKey for $name {
            fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self::new(s)
            }
        }
    };
}

provider_key!(
    /// Provider type of an ACME DNS-01 challenge solver.
    ChallengeProviderType
);
provider_key!(
    /// Provider type of a deployment target.
    DeploymentProviderType
);
provider_key!(
    /// Provider type of a notification channel.
    NotificationProviderType
);

/// Name-to-factory map for one capability family.
pub struct ProviderRegistry<K, C: ?Sized + 'static> {
    factories: HashMap<K, ProviderFactory<C>>,
}

impl<K: ProviderKey, C: ?Sized + 'static> ProviderRegistry<K, C> {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory. Fails if the type is already taken.
    pub fn register<F>(&mut self, provider_type: K, factory: F) -> Result<()>
    where
        F: Fn(&ProviderFactoryOptions) -> Result<Box<C>> + Send + Sync + 'static,
    {
        if self.factories.contains_key(&provider_type) {
            return Err(CertflowError::AlreadyRegistered(provider_type.to_string()));
        }
        self.factories.insert(provider_type, Arc::new(factory));
        Ok(())
    }

    /// Bind `alias` to the factory already registered under `target`.
    pub fn register_alias(&mut self, alias: K, target: &K) -> Result<()> {
        let factory = self
            .factories
            .get(target)
            .cloned()
            .ok_or_else(|| CertflowError::NotRegistered(target.to_string()))?;
        if self.factories.contains_key(&alias) {
            return Err(CertflowError::AlreadyRegistered(alias.to_string()));
        }
        self.factories.insert(alias, factory);
        Ok(())
    }

    /// Look up the factory for a provider type.
    pub fn get(&self, provider_type: &K) -> Result<ProviderFactory<C>> {
        self.factories
            .get(provider_type)
            .cloned()
            .ok_or_else(|| CertflowError::NotRegistered(provider_type.to_string()))
    }

    /// Resolve and invoke the factory in one step.
    pub fn create(&self, provider_type: &K, options: &ProviderFactoryOptions) -> Result<Box<C>> {
        let factory = self.get(provider_type)?;
        factory(options)
    }

    pub fn contains(&self, provider_type: &K) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// All registered types (aliases included), sorted.
    pub fn provider_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().map(|k| k.to_string()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

impl<K: ProviderKey, C: ?Sized + 'static> Default for ProviderRegistry<K, C> {
    fn default() -> Self {
        Self::new()
    }
}

pub type ChallengeSolverRegistry = ProviderRegistry<ChallengeProviderType, dyn ChallengeSolver>;
pub type DeployerRegistry = ProviderRegistry<DeploymentProviderType, dyn Deployer>;
pub type NotifierRegistry = ProviderRegistry<NotificationProviderType, dyn Notifier>;

/// The three registries, populated once at startup and shared read-only.
#[derive(Default)]
pub struct Registries {
    pub challenge_solvers: ChallengeSolverRegistry,
    pub deployers: DeployerRegistry,
    pub notifiers: NotifierRegistry,
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Greeter: Send + Sync {
        fn greet(&self) -> String;
    }

    struct Hello(String);

    impl Greeter for Hello {
        fn greet(&self) -> String {
            format!("hello {}", self.0)
        }
    }

    provider_key!(GreeterType);

    fn hello_factory(opts: &ProviderFactoryOptions) -> Result<Box<dyn Greeter>> {
        let who = opts
            .provider_config
            .get("who")
            .and_then(|v| v.as_str())
            .unwrap_or("world")
            .to_string();
        Ok(Box::new(Hello(who)))
    }

    #[test]
    fn test_register_and_get() {
        let mut reg: ProviderRegistry<GreeterType, dyn Greeter> = ProviderRegistry::new();
        reg.register(GreeterType::from_static("hello"), hello_factory).unwrap();
        let g = reg
            .create(&GreeterType::from_static("hello"), &ProviderFactoryOptions::default())
            .unwrap();
        assert_eq!(g.greet(), "hello world");
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut reg: ProviderRegistry<GreeterType, dyn Greeter> = ProviderRegistry::new();
        reg.register("hello".into(), hello_factory).unwrap();
        let err = reg.register("hello".into(), hello_factory).unwrap_err();
        assert!(matches!(err, CertflowError::AlreadyRegistered(ref t) if t == "hello"));
    }

    #[test]
    fn test_missing_provider() {
        let reg: ProviderRegistry<GreeterType, dyn Greeter> = ProviderRegistry::new();
        assert!(matches!(
            reg.get(&"ftp".into()),
            Err(CertflowError::NotRegistered(ref t)) if t == "ftp"
        ));
    }

    #[test]
    fn test_alias_shares_factory() {
        let mut reg: ProviderRegistry<GreeterType, dyn Greeter> = ProviderRegistry::new();
        reg.register("local".into(), hello_factory).unwrap();
        reg.register_alias("local.file".into(), &"local".into()).unwrap();

        let a = reg.get(&"local".into()).unwrap();
        let b = reg.get(&"local.file".into()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.provider_types(), vec!["local", "local.file"]);
    }

    #[test]
    fn test_alias_to_missing_target_fails() {
        let mut reg: ProviderRegistry<GreeterType, dyn Greeter> = ProviderRegistry::new();
        let err = reg.register_alias("b".into(), &"a".into()).unwrap_err();
        assert!(matches!(err, CertflowError::NotRegistered(_)));
        assert!(!reg.contains(&"b".into()));
    }

    #[test]
    fn test_alias_cannot_overwrite() {
        let mut reg: ProviderRegistry<GreeterType, dyn Greeter> = ProviderRegistry::new();
        reg.register("a".into(), hello_factory).unwrap();
        reg.register("b".into(), hello_factory).unwrap();
        assert!(matches!(
            reg.register_alias("b".into(), &"a".into()),
            Err(CertflowError::AlreadyRegistered(_))
        ));
    }
}
