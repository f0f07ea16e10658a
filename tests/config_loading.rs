use std::io::Write;
use std::path::PathBuf;

use certflow_core::config::AppConfig;
use certflow_core::CertflowError;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
workspace = "/tmp/certflow-test"
database = "runs.db"
max_concurrent_runs = 2

[log]
enabled = false
log_dir = "/var/log/certflow"
level = 3

[acme]
directory_url = "https://acme-staging-v02.api.letsencrypt.org/directory"
contact_email = "ops@example.com"

[scheduler]
enabled = false
tick_secs = 15

[http]
timeout_secs = 5
user_agent = "certflow-test"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_concurrent_runs, 2);
    assert_eq!(config.database_path(), PathBuf::from("/tmp/certflow-test/runs.db"));
    assert!(!config.log.enabled);
    assert_eq!(config.log.level, 3);
    assert_eq!(config.log_dir(), PathBuf::from("/var/log/certflow"));
    assert!(config.acme.directory_url.contains("staging"));
    assert_eq!(config.acme.contact_email.as_deref(), Some("ops@example.com"));
    assert!(!config.scheduler.enabled);
    assert_eq!(config.scheduler.tick_secs, 15);
    assert_eq!(config.http.timeout_secs, 5);
    assert_eq!(config.http.user_agent, "certflow-test");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("CERTFLOW_TEST_CONTACT", "certs@example.org");

    let toml_content = r#"
[acme]
contact_email = "${CERTFLOW_TEST_CONTACT}"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.acme.contact_email.as_deref(), Some("certs@example.org"));

    std::env::remove_var("CERTFLOW_TEST_CONTACT");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine]\nworkspace = \"/srv/certflow\"\n").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_concurrent_runs, 4);
    assert_eq!(config.database_path(), PathBuf::from("/srv/certflow/certflow.db"));
    assert!(config.log.enabled);
    assert_eq!(config.log.level, 2);
    assert_eq!(config.log_dir(), PathBuf::from("/srv/certflow/logs"));
    assert!(config.scheduler.enabled);
    assert_eq!(config.scheduler.tick_secs, 60);
    assert_eq!(config.http.timeout_secs, 30);
}

#[test]
fn test_missing_file_is_reported() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let err = AppConfig::load(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, CertflowError::ConfigNotFound(_)));
}
