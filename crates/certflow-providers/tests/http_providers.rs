use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use certflow_core::registry::{ProviderFactoryOptions, Registries};
use certflow_core::traits::{CertificateMaterial, Dns01Challenge};
use certflow_core::types::ConfigMap;
use certflow_providers::{
    register_builtins, HttpSettings, CHALLENGE_HTTPREQ, DEPLOYMENT_WEBHOOK, NOTIFICATION_WEBHOOK,
};

fn map(v: serde_json::Value) -> ConfigMap {
    v.as_object().cloned().unwrap()
}

fn registries() -> Registries {
    let mut registries = Registries::default();
    register_builtins(&mut registries, &HttpSettings::default()).unwrap();
    registries
}

fn material() -> CertificateMaterial {
    CertificateMaterial {
        certificate_id: "c1".into(),
        subject_alt_names: vec!["example.com".into(), "www.example.com".into()],
        certificate: "PEM_A".into(),
        issuer_certificate: String::new(),
        private_key: "KEY_A".into(),
        valid_to: None,
    }
}

#[tokio::test]
async fn webhook_deployer_posts_default_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/deploy"))
        .and(header("X-Token", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let options = ProviderFactoryOptions::new(
        map(json!({"url": format!("{}/deploy", server.uri()), "headers": "x-token: secret"})),
        ConfigMap::new(),
    );
    let deployer = registries().deployers.create(&DEPLOYMENT_WEBHOOK, &options).unwrap();
    let receipt = deployer.deploy(&material()).await.unwrap();
    assert!(receipt.summary.contains("200"));

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["certificate"], "PEM_A");
    assert_eq!(body["privateKey"], "KEY_A");
    assert_eq!(body["domains"], "example.com;www.example.com");
}

#[tokio::test]
async fn webhook_deployer_renders_template() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(body_json(json!({"cert": "PEM_A", "key": "KEY_A", "host": "example.com"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let options = ProviderFactoryOptions::new(
        map(json!({"url": server.uri(), "method": "PUT"})),
        map(json!({
            "webhookData": concat!(
                r#"{"cert": "${CERTIFICATE}", "key": "${PRIVATE_KEY}", "#,
                r#""host": "${DOMAIN}"}"#
            )
        })),
    );
    let deployer = registries().deployers.create(&DEPLOYMENT_WEBHOOK, &options).unwrap();
    deployer.deploy(&material()).await.unwrap();
}

#[tokio::test]
async fn webhook_deployer_reports_http_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let options = ProviderFactoryOptions::new(map(json!({"url": server.uri()})), ConfigMap::new());
    let deployer = registries().deployers.create(&DEPLOYMENT_WEBHOOK, &options).unwrap();
    let err = deployer.deploy(&material()).await.unwrap_err();
    assert!(err.to_string().contains("502"));
}

#[tokio::test]
async fn webhook_notifier_sends_subject_and_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_json(json!({"subject": "Renewed", "message": "example.com renewed"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let options = ProviderFactoryOptions::new(map(json!({"url": server.uri()})), ConfigMap::new());
    let notifier = registries().notifiers.create(&NOTIFICATION_WEBHOOK, &options).unwrap();
    notifier.notify("Renewed", "example.com renewed").await.unwrap();
}

#[tokio::test]
async fn httpreq_solver_presents_and_cleans_up() {
    let server = MockServer::start().await;
    let expected = json!({"fqdn": "_acme-challenge.example.com.", "value": "token-digest"});
    Mock::given(method("POST"))
        .and(path("/present"))
        .and(body_json(expected.clone()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/cleanup"))
        .and(body_json(expected))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let options =
        ProviderFactoryOptions::new(map(json!({"endpoint": server.uri()})), ConfigMap::new());
    let solver = registries()
        .challenge_solvers
        .create(&CHALLENGE_HTTPREQ, &options)
        .unwrap();
    let challenge = Dns01Challenge::new("example.com", "token-digest");
    solver.present(&challenge).await.unwrap();
    solver.cleanup(&challenge).await.unwrap();
}
