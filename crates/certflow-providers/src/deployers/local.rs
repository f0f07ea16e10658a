use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use tracing::info;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::config_str;
use certflow_core::registry::ProviderFactoryOptions;
use certflow_core::traits::{CertificateMaterial, DeployReceipt, Deployer};

/// Writes certificate and key PEM files on the local host.
///
/// Provider config: `certPath`, `keyPath` (required), `chainPath` (optional,
/// receives the issuer certificate).
#[derive(Debug)]
pub struct LocalDeployer {
    cert_path: PathBuf,
    key_path: PathBuf,
    chain_path: Option<PathBuf>,
}

impl LocalDeployer {
    pub fn new(options: &ProviderFactoryOptions) -> Result<Self> {
        let cfg = &options.provider_config;
        let format = config_str(cfg, "format");
        if !format.is_empty() && !format.eq_ignore_ascii_case("pem") {
            return Err(CertflowError::Config(format!(
                "local: unsupported output format '{format}'"
            )));
        }
        let required = |key: &str| {
            let value = config_str(cfg, key);
            if value.is_empty() {
                Err(CertflowError::Config(format!("local: '{key}' is required")))
            } else {
                Ok(PathBuf::from(value))
            }
        };
        let chain = config_str(cfg, "chainPath");
        Ok(Self {
            cert_path: required("certPath")?,
            key_path: required("keyPath")?,
            chain_path: (!chain.is_empty()).then(|| PathBuf::from(chain)),
        })
    }
}

async fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    Ok(())
}

impl Deployer for LocalDeployer {
    fn deploy<'a>(
        &'a self,
        material: &'a CertificateMaterial,
    ) -> BoxFuture<'a, Result<DeployReceipt>> {
        Box::pin(async move {
            write_file(&self.cert_path, &material.certificate)
                .await
                .map_err(|e| CertflowError::provider("local", e))?;
            write_file(&self.key_path, &material.private_key)
                .await
                .map_err(|e| CertflowError::provider("local", e))?;
            if let Some(chain) = &self.chain_path {
                write_file(chain, &material.issuer_certificate)
                    .await
                    .map_err(|e| CertflowError::provider("local", e))?;
            }

            info!(
                cert = %self.cert_path.display(),
                key = %self.key_path.display(),
                "Certificate written to local files"
            );
            Ok(DeployReceipt {
                summary: format!("wrote {}", self.cert_path.display()),
                detail: None,
            })
        })
    }
}
