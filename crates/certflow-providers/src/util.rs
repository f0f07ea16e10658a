use std::collections::BTreeMap;
use std::time::Duration;

use certflow_core::config::HttpConfig;
use certflow_core::error::{CertflowError, Result};
use certflow_core::node::{config_bool, config_i64, config_str};
use certflow_core::types::ConfigMap;

/// HTTP client settings shared by every built-in provider.
#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

impl From<&HttpConfig> for HttpSettings {
    fn from(c: &HttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(c.timeout_secs),
            user_agent: c.user_agent.clone(),
        }
    }
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self::from(&HttpConfig::default())
    }
}

impl HttpSettings {
    /// Build a client, optionally overriding the timeout and accepting
    /// self-signed endpoints.
    pub fn client(
        &self,
        timeout_secs: Option<i64>,
        allow_insecure: bool,
    ) -> Result<reqwest::Client> {
        let timeout = timeout_secs
            .filter(|t| *t > 0)
            .map(|t| Duration::from_secs(t as u64))
            .unwrap_or(self.timeout);
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(&self.user_agent)
            .danger_accept_invalid_certs(allow_insecure)
            .build()
            .map_err(|e| CertflowError::Http(format!("Failed to create HTTP client: {}", e)))
    }
}

/// Parse `Key: Value` lines into a header map with canonical key casing.
pub fn parse_headers(raw: &str) -> Result<BTreeMap<String, String>> {
    let mut headers = BTreeMap::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| CertflowError::Config(format!("invalid header line '{line}'")))?;
        let key = canonical_header_key(key.trim());
        if key.is_empty() {
            return Err(CertflowError::Config(format!("invalid header line '{line}'")));
        }
        headers.insert(key, value.trim().to_string());
    }
    Ok(headers)
}

fn canonical_header_key(key: &str) -> String {
    key.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Replace `${NAME}` placeholders. When `json_escape` is set, values are
/// escaped for embedding inside a JSON string literal.
pub fn render_template(template: &str, vars: &[(&str, &str)], json_escape: bool) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        let replacement = if json_escape {
            let quoted = serde_json::Value::String(value.to_string()).to_string();
            quoted[1..quoted.len() - 1].to_string()
        } else {
            value.to_string()
        };
        out = out.replace(&format!("${{{name}}}"), &replacement);
    }
    out
}

/// Webhook endpoint settings merged from an access record and a node's
/// provider config. Node values take precedence.
#[derive(Debug, Clone)]
pub struct WebhookSettings {
    pub url: String,
    pub method: reqwest::Method,
    pub headers: BTreeMap<String, String>,
    /// Body template; empty means the provider's default JSON body.
    pub data: String,
    pub timeout_secs: Option<i64>,
    pub allow_insecure: bool,
}

impl WebhookSettings {
    pub fn merge(provider: &str, access: &ConfigMap, extended: &ConfigMap) -> Result<Self> {
        let url = config_str(access, "url");
        if url.is_empty() {
            return Err(CertflowError::Config(format!("{provider}: webhook url is required")));
        }
        let method_raw = config_str(access, "method");
        let method = if method_raw.is_empty() {
            reqwest::Method::POST
        } else {
            method_raw
                .to_ascii_uppercase()
                .parse()
                .map_err(|_| {
                    CertflowError::Config(format!("{provider}: invalid method '{method_raw}'"))
                })?
        };

        let mut headers = parse_headers(&config_str(access, "headers"))?;
        headers.extend(parse_headers(&config_str(extended, "headers"))?);

        let extended_data = config_str(extended, "webhookData");
        let data = if extended_data.is_empty() {
            config_str(access, "data")
        } else {
            extended_data
        };

        Ok(Self {
            url,
            method,
            headers,
            data,
            timeout_secs: config_i64(extended, "timeout"),
            allow_insecure: config_bool(access, "allowInsecureConnections"),
        })
    }

    fn content_type(&self) -> String {
        self.headers
            .get("Content-Type")
            .cloned()
            .unwrap_or_else(|| "application/json".to_string())
    }

    /// Send `vars` either through the body template or as a JSON object.
    pub async fn send(
        &self,
        provider: &str,
        http: &HttpSettings,
        vars: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let client = http.client(self.timeout_secs, self.allow_insecure)?;
        let content_type = self.content_type();
        let is_json = content_type.contains("json");

        let mut request = client
            .request(self.method.clone(), &self.url)
            .header("Content-Type", content_type);
        for (k, v) in self.headers.iter().filter(|(k, _)| k.as_str() != "Content-Type") {
            request = request.header(k.as_str(), v.as_str());
        }

        let body = if self.data.is_empty() {
            let object: serde_json::Map<String, serde_json::Value> = vars
                .iter()
                .map(|(k, v)| (default_field_name(k), serde_json::Value::String(v.to_string())))
                .collect();
            serde_json::Value::Object(object).to_string()
        } else {
            render_template(&self.data, vars, is_json)
        };

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|e| CertflowError::provider(provider, format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CertflowError::provider(
                provider,
                format!("webhook returned HTTP {} - {}", status.as_u16(), text),
            ));
        }
        Ok(response)
    }
}

/// `PRIVATE_KEY` -> `privateKey`
fn default_field_name(placeholder: &str) -> String {
    let mut out = String::new();
    for (i, part) in placeholder.split('_').enumerate() {
        let lower = part.to_ascii_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.push(first.to_ascii_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: serde_json::Value) -> ConfigMap {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_parse_headers_canonicalises() {
        let h = parse_headers("content-type: text/plain\n\nx-api-KEY:  abc \n").unwrap();
        assert_eq!(h.get("Content-Type").map(String::as_str), Some("text/plain"));
        assert_eq!(h.get("X-Api-Key").map(String::as_str), Some("abc"));
        assert!(parse_headers("no colon here").is_err());
    }

    #[test]
    fn test_render_template_escapes_for_json() {
        let out = render_template(
            r#"{"cert":"${CERTIFICATE}"}"#,
            &[("CERTIFICATE", "a\nb\"c")],
            true,
        );
        assert_eq!(out, r#"{"cert":"a\nb\"c"}"#);
        let raw = render_template("cert=${CERTIFICATE}", &[("CERTIFICATE", "a\nb")], false);
        assert_eq!(raw, "cert=a\nb");
    }

    #[test]
    fn test_merge_prefers_node_values() {
        let access = map(json!({
            "url": "https://hooks.example.com",
            "method": "put",
            "headers": "Authorization: Bearer a\nX-Env: prod",
            "data": "{}"
        }));
        let extended = map(json!({
            "headers": "x-env: staging",
            "webhookData": "node",
            "timeout": 5
        }));
        let s = WebhookSettings::merge("webhook", &access, &extended).unwrap();
        assert_eq!(s.method, reqwest::Method::PUT);
        assert_eq!(s.headers["X-Env"], "staging");
        assert_eq!(s.headers["Authorization"], "Bearer a");
        assert_eq!(s.data, "node");
        assert_eq!(s.timeout_secs, Some(5));
    }

    #[test]
    fn test_merge_requires_url() {
        let err =
            WebhookSettings::merge("webhook", &ConfigMap::new(), &ConfigMap::new()).unwrap_err();
        assert!(matches!(err, CertflowError::Config(_)));
    }

    #[test]
    fn test_default_field_name() {
        assert_eq!(default_field_name("PRIVATE_KEY"), "privateKey");
        assert_eq!(default_field_name("SUBJECT"), "subject");
    }
}
