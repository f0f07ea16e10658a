use std::net::SocketAddr;

use futures::future::BoxFuture;
use tracing::debug;

use certflow_core::error::{CertflowError, Result};
use certflow_core::traits::{MonitorProbe, MonitorTarget, ProbeObservation};

use crate::inspector::X509Inspector;
use crate::util::HttpSettings;

/// Connects to `host:port` with `domain` as the server name and reports the
/// leaf certificate the server presents. Certificate verification is off so
/// expired or self-signed certificates are still observed.
pub struct TlsProbe {
    http: HttpSettings,
}

impl TlsProbe {
    pub fn new(http: HttpSettings) -> Self {
        Self { http }
    }

    async fn resolve(target: &MonitorTarget) -> Result<SocketAddr> {
        tokio::net::lookup_host((target.host.as_str(), target.port))
            .await
            .map_err(|e| {
                CertflowError::provider("monitor", format!("cannot resolve '{}': {e}", target.host))
            })?
            .next()
            .ok_or_else(|| {
                CertflowError::provider("monitor", format!("no address for '{}'", target.host))
            })
    }
}

pub(crate) fn probe_url(target: &MonitorTarget) -> String {
    let path = target.path.trim();
    let path = if path.is_empty() || path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    format!("https://{}:{}{}", target.domain, target.port, path)
}

impl MonitorProbe for TlsProbe {
    fn probe<'a>(&'a self, target: &'a MonitorTarget) -> BoxFuture<'a, Result<ProbeObservation>> {
        Box::pin(async move {
            let addr = Self::resolve(target).await?;
            let client = reqwest::Client::builder()
                .timeout(self.http.timeout)
                .user_agent(&self.http.user_agent)
                .danger_accept_invalid_certs(true)
                .tls_info(true)
                .resolve(&target.domain, addr)
                .build()
                .map_err(|e| CertflowError::Http(format!("Failed to create HTTP client: {}", e)))?;

            let url = probe_url(target);
            debug!(url = %url, addr = %addr, "Probing TLS endpoint");

            let response = client
                .head(&url)
                .send()
                .await
                .map_err(|e| {
                    CertflowError::provider("monitor", format!("request to {url} failed: {e}"))
                })?;

            let der = response
                .extensions()
                .get::<reqwest::tls::TlsInfo>()
                .and_then(|info| info.peer_certificate())
                .map(|der| der.to_vec());

            let certificate = match der {
                Some(der) => Some(X509Inspector::inspect_der(&der)?),
                None => None,
            };
            Ok(ProbeObservation { certificate })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_url() {
        let mut target = MonitorTarget {
            host: "10.0.0.1".into(),
            port: 8443,
            domain: "example.com".into(),
            path: String::new(),
        };
        assert_eq!(probe_url(&target), "https://example.com:8443");
        target.path = "health".into();
        assert_eq!(probe_url(&target), "https://example.com:8443/health");
        target.path = "/status?x=1".into();
        assert_eq!(probe_url(&target), "https://example.com:8443/status?x=1");
    }
}
