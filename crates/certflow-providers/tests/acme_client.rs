use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use certflow_core::error::CertflowError;
use certflow_core::registry::{
    ChallengeProviderType, ChallengeSolverRegistry, ProviderFactoryOptions,
};
use certflow_core::traits::{AcmeIssuer, ChallengeSolver, IssuanceRequest};
use certflow_providers::{AcmeClient, AcmeSettings};
use certflow_test_utils::SolverRecorder;

fn solver(recorder: &SolverRecorder) -> Box<dyn ChallengeSolver> {
    let mut registry = ChallengeSolverRegistry::default();
    recorder.register(&mut registry, "recorded");
    registry
        .create(&ChallengeProviderType::new("recorded"), &ProviderFactoryOptions::default())
        .unwrap()
}

fn request() -> IssuanceRequest {
    IssuanceRequest {
        domains: vec!["example.com".into()],
        challenge_type: "dns-01".into(),
        key_algorithm: "EC256".into(),
        ..Default::default()
    }
}

#[tokio::test]
async fn unreachable_directory_fails_before_presenting_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/directory"))
        .respond_with(ResponseTemplate::new(500).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = AcmeClient::new(AcmeSettings {
        directory_url: format!("{}/directory", server.uri()),
        contact_email: Some("certs@example.org".into()),
        accounts_dir: Some(dir.path().to_path_buf()),
    });
    let recorder = SolverRecorder::new();
    let solver = solver(&recorder);

    let err = client.obtain(&request(), &*solver).await.unwrap_err();
    assert!(matches!(err, CertflowError::Provider { .. }), "{err}");
    assert!(recorder.presented().is_empty());
    assert!(recorder.cleaned().is_empty());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn request_is_checked_before_contacting_the_ca() {
    let server = MockServer::start().await;
    let client = AcmeClient::new(AcmeSettings {
        directory_url: format!("{}/directory", server.uri()),
        contact_email: None,
        accounts_dir: None,
    });
    let recorder = SolverRecorder::new();
    let solver = solver(&recorder);

    let mut http01 = request();
    http01.challenge_type = "http-01".into();
    let err = client.obtain(&http01, &*solver).await.unwrap_err();
    assert!(err.to_string().contains("http-01"));

    let mut ed25519 = request();
    ed25519.key_algorithm = "ED25519".into();
    assert!(matches!(
        client.obtain(&ed25519, &*solver).await,
        Err(CertflowError::Config(_))
    ));

    assert!(server.received_requests().await.unwrap_or_default().is_empty());
}
