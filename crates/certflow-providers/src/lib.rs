pub mod acme;
pub mod challenges;
pub mod deployers;
pub mod inspector;
pub mod notifiers;
pub mod probe;
pub mod util;

use certflow_core::error::Result;
use certflow_core::registry::{
    ChallengeProviderType, ChallengeSolverRegistry, DeployerRegistry, DeploymentProviderType,
    NotificationProviderType, NotifierRegistry, Registries,
};
use certflow_core::traits::{ChallengeSolver, Deployer, Notifier};

pub use acme::{AcmeClient, AcmeSettings};
pub use inspector::X509Inspector;
pub use probe::TlsProbe;
pub use util::HttpSettings;

pub const CHALLENGE_HTTPREQ: ChallengeProviderType = ChallengeProviderType::from_static("httpreq");
pub const DEPLOYMENT_WEBHOOK: DeploymentProviderType =
    DeploymentProviderType::from_static("webhook");
pub const DEPLOYMENT_LOCAL: DeploymentProviderType = DeploymentProviderType::from_static("local");
/// Former name of the local deployer, kept resolvable.
pub const DEPLOYMENT_LOCAL_FILE: DeploymentProviderType =
    DeploymentProviderType::from_static("local.file");
pub const NOTIFICATION_WEBHOOK: NotificationProviderType =
    NotificationProviderType::from_static("webhook");

pub fn register_builtin_challenge_solvers(
    registry: &mut ChallengeSolverRegistry,
    http: &HttpSettings,
) -> Result<()> {
    let http = http.clone();
    registry.register(CHALLENGE_HTTPREQ, move |options| {
        Ok(Box::new(challenges::HttpReqSolver::new(options, &http)?) as Box<dyn ChallengeSolver>)
    })?;
    Ok(())
}

pub fn register_builtin_deployers(
    registry: &mut DeployerRegistry,
    http: &HttpSettings,
) -> Result<()> {
    let http = http.clone();
    registry.register(DEPLOYMENT_WEBHOOK, move |options| {
        Ok(Box::new(deployers::WebhookDeployer::new(options, http.clone())?) as Box<dyn Deployer>)
    })?;
    registry.register(DEPLOYMENT_LOCAL, |options| {
        Ok(Box::new(deployers::LocalDeployer::new(options)?) as Box<dyn Deployer>)
    })?;
    registry.register_alias(DEPLOYMENT_LOCAL_FILE, &DEPLOYMENT_LOCAL)?;
    Ok(())
}

pub fn register_builtin_notifiers(
    registry: &mut NotifierRegistry,
    http: &HttpSettings,
) -> Result<()> {
    let http = http.clone();
    registry.register(NOTIFICATION_WEBHOOK, move |options| {
        Ok(Box::new(notifiers::WebhookNotifier::new(options, http.clone())?) as Box<dyn Notifier>)
    })?;
    Ok(())
}

/// Populate all three registries with the built-in providers.
pub fn register_builtins(registries: &mut Registries, http: &HttpSettings) -> Result<()> {
    register_builtin_challenge_solvers(&mut registries.challenge_solvers, http)?;
    register_builtin_deployers(&mut registries.deployers, http)?;
    register_builtin_notifiers(&mut registries.notifiers, http)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use certflow_core::CertflowError;

    #[test]
    fn test_builtins_registered() {
        let mut registries = Registries::default();
        register_builtins(&mut registries, &HttpSettings::default()).unwrap();
        assert_eq!(registries.deployers.provider_types(), vec!["local", "local.file", "webhook"]);
        assert_eq!(registries.notifiers.provider_types(), vec!["webhook"]);
        assert_eq!(registries.challenge_solvers.provider_types(), vec!["httpreq"]);
    }

    #[test]
    fn test_double_registration_is_rejected() {
        let mut registries = Registries::default();
        register_builtins(&mut registries, &HttpSettings::default()).unwrap();
        let err = register_builtin_notifiers(&mut registries.notifiers, &HttpSettings::default())
            .unwrap_err();
        assert!(matches!(err, CertflowError::AlreadyRegistered(_)));
    }

    #[test]
    fn test_local_alias_shares_factory() {
        let mut registry = DeployerRegistry::new();
        register_builtin_deployers(&mut registry, &HttpSettings::default()).unwrap();
        let a = registry.get(&DEPLOYMENT_LOCAL).unwrap();
        let b = registry.get(&DEPLOYMENT_LOCAL_FILE).unwrap();
        assert!(std::sync::Arc::ptr_eq(&a, &b));
    }
}
