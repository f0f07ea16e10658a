use chrono::{DateTime, Utc};
use x509_parser::prelude::*;
use x509_parser::public_key::PublicKey;

use certflow_core::error::{CertflowError, Result};
use certflow_core::traits::{CertificateInfo, CertificateInspector};

/// Reads certificate facts from PEM using `pem` + `x509-parser`.
#[derive(Debug, Default, Clone, Copy)]
pub struct X509Inspector;

impl X509Inspector {
    /// Parse DER bytes of a single certificate.
    pub fn inspect_der(der: &[u8]) -> Result<CertificateInfo> {
        let (_, cert) = parse_x509_certificate(der)
            .map_err(|e| CertflowError::Config(format!("Invalid X509 certificate: {e}")))?;

        let mut sans = Vec::new();
        if let Ok(Some(ext)) = cert.subject_alternative_name() {
            for name in &ext.value.general_names {
                match name {
                    GeneralName::DNSName(dns) => sans.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            sans.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }
        if sans.is_empty() {
            let common_name = cert.subject().iter_common_name().next();
            if let Some(cn) = common_name.and_then(|cn| cn.as_str().ok()) {
                sans.push(cn.to_string());
            }
        }

        let issuer_org = cert
            .issuer()
            .iter_organization()
            .next()
            .and_then(|o| o.as_str().ok())
            .unwrap_or_default()
            .to_string();

        let key_algorithm = match cert.public_key().parsed() {
            Ok(PublicKey::RSA(rsa)) => format!("RSA{}", rsa.key_size()),
            Ok(PublicKey::EC(ec)) => format!("EC{}", ec.key_size()),
            _ => cert.public_key().algorithm.algorithm.to_id_string(),
        };

        Ok(CertificateInfo {
            subject_alt_names: sans,
            serial_number: cert.raw_serial_as_string().replace(':', "").to_ascii_uppercase(),
            issuer_org,
            key_algorithm,
            valid_from: DateTime::<Utc>::from_timestamp(cert.validity().not_before.timestamp(), 0),
            valid_to: DateTime::<Utc>::from_timestamp(cert.validity().not_after.timestamp(), 0),
        })
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(std::net::Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(std::net::Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

impl CertificateInspector for X509Inspector {
    /// Inspect the first `CERTIFICATE` block of a PEM bundle.
    fn inspect(&self, pem_text: &str) -> Result<CertificateInfo> {
        let blocks = pem::parse_many(pem_text)
            .map_err(|e| CertflowError::Config(format!("Failed to parse certificate: {e}")))?;
        let leaf = blocks
            .iter()
            .find(|b| b.tag() == "CERTIFICATE")
            .ok_or_else(|| CertflowError::Config("no CERTIFICATE block in PEM".into()))?;
        Self::inspect_der(leaf.contents())
    }

    /// Accept PKCS#8, PKCS#1 (`RSA`) and SEC1 (`EC`) private key blocks.
    fn validate_private_key(&self, pem_text: &str) -> Result<()> {
        let blocks = pem::parse_many(pem_text)
            .map_err(|e| CertflowError::Config(format!("Failed to parse private key: {e}")))?;
        match blocks.iter().find(|b| b.tag().ends_with("PRIVATE KEY")) {
            Some(key) if !key.contents().is_empty() => Ok(()),
            Some(_) => Err(CertflowError::Config("empty PRIVATE KEY block".into())),
            None => Err(CertflowError::Config("no PRIVATE KEY block in PEM".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use certflow_test_utils::fixtures;
    use chrono::TimeZone;

    #[test]
    fn test_inspect_fixture() {
        let info = X509Inspector.inspect(fixtures::EXAMPLE_CERT_PEM).unwrap();
        assert_eq!(info.subject_alt_names, vec!["example.com", "www.example.com"]);
        assert_eq!(info.serial_number, "1A2B3C");
        assert_eq!(info.issuer_org, "Certflow Test CA");
        assert_eq!(info.key_algorithm, "EC256");
        assert_eq!(info.valid_from, Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        assert_eq!(info.valid_to, Some(Utc.with_ymd_and_hms(2124, 1, 1, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_inspect_expired_fixture() {
        let info = X509Inspector.inspect(fixtures::EXPIRED_CERT_PEM).unwrap();
        assert!(info.valid_to.unwrap() < Utc::now());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(X509Inspector.inspect("PEM_A").is_err());
        assert!(X509Inspector.inspect(fixtures::EXAMPLE_KEY_PEM).is_err());
    }

    #[test]
    fn test_private_key_validation() {
        assert!(X509Inspector.validate_private_key(fixtures::EXAMPLE_KEY_PEM).is_ok());
        assert!(X509Inspector.validate_private_key(fixtures::EXAMPLE_CERT_PEM).is_err());
        assert!(X509Inspector.validate_private_key("KEY_A").is_err());
    }
}
