use std::time::Duration;

use futures::future::BoxFuture;
use serde::Serialize;
use tracing::debug;

use certflow_core::error::{CertflowError, Result};
use certflow_core::node::{config_i64, config_str};
use certflow_core::registry::ProviderFactoryOptions;
use certflow_core::traits::{ChallengeSolver, Dns01Challenge};

use crate::util::HttpSettings;

const DEFAULT_TTL: i64 = 60;
const DEFAULT_PROPAGATION_TIMEOUT: i64 = 120;

/// DNS-01 solver that delegates record management to an HTTP endpoint
/// (`<endpoint>/present`, `<endpoint>/cleanup`).
///
/// Access config: `endpoint` (required), `mode` (`RAW` sends the domain and
/// key authorization instead of fqdn/value), `username`, `password`.
pub struct HttpReqSolver {
    client: reqwest::Client,
    endpoint: String,
    raw_mode: bool,
    username: String,
    password: String,
    ttl: i64,
    propagation_timeout: Duration,
}

#[derive(Serialize)]
struct RecordRequest<'a> {
    fqdn: &'a str,
    value: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RawRequest<'a> {
    domain: &'a str,
    key_auth: &'a str,
}

impl HttpReqSolver {
    pub fn new(options: &ProviderFactoryOptions, http: &HttpSettings) -> Result<Self> {
        let access = &options.access_config;
        let endpoint = config_str(access, "endpoint").trim_end_matches('/').to_string();
        if endpoint.is_empty() {
            return Err(CertflowError::Config("httpreq: 'endpoint' is required".into()));
        }
        let ttl = config_i64(&options.provider_config, "dnsTTL")
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_TTL);
        let propagation_timeout = config_i64(&options.provider_config, "dnsPropagationTimeout")
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_PROPAGATION_TIMEOUT);

        Ok(Self {
            client: http.client(None, false)?,
            endpoint,
            raw_mode: config_str(access, "mode").eq_ignore_ascii_case("raw"),
            username: config_str(access, "username"),
            password: config_str(access, "password"),
            ttl,
            propagation_timeout: Duration::from_secs(propagation_timeout as u64),
        })
    }

    async fn call(&self, action: &str, challenge: &Dns01Challenge) -> Result<()> {
        let url = format!("{}/{}", self.endpoint, action);
        debug!(url = %url, fqdn = %challenge.fqdn, ttl = self.ttl, "httpreq challenge request");

        let mut request = self.client.post(&url);
        request = if self.raw_mode {
            request.json(&RawRequest {
                domain: &challenge.domain,
                key_auth: &challenge.value,
            })
        } else {
            request.json(&RecordRequest {
                fqdn: &challenge.fqdn,
                value: &challenge.value,
            })
        };
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request
            .send()
            .await
            .map_err(|e| {
                CertflowError::provider("httpreq", format!("{action} request failed: {e}"))
            })?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CertflowError::provider(
                "httpreq",
                format!("{action} returned HTTP {} - {}", status.as_u16(), body),
            ));
        }
        Ok(())
    }
}

impl ChallengeSolver for HttpReqSolver {
    fn present<'a>(&'a self, challenge: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call("present", challenge))
    }

    fn cleanup<'a>(&'a self, challenge: &'a Dns01Challenge) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.call("cleanup", challenge))
    }

    fn propagation_timeout(&self) -> Option<Duration> {
        Some(self.propagation_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_requires_endpoint() {
        let err = HttpReqSolver::new(&ProviderFactoryOptions::default(), &HttpSettings::default())
            .err()
            .unwrap();
        assert!(matches!(err, CertflowError::Config(_)));
    }

    #[test]
    fn test_ttl_and_timeout_from_provider_config() {
        let options = ProviderFactoryOptions {
            access_config: json!({"endpoint": "https://dns.example.com/"})
                .as_object()
                .cloned()
                .unwrap(),
            provider_config: json!({"dnsTTL": "300", "dnsPropagationTimeout": 30})
                .as_object()
                .cloned()
                .unwrap(),
        };
        let solver = HttpReqSolver::new(&options, &HttpSettings::default()).unwrap();
        assert_eq!(solver.ttl, 300);
        assert_eq!(solver.propagation_timeout(), Some(Duration::from_secs(30)));
        assert_eq!(solver.endpoint, "https://dns.example.com");
    }
}
