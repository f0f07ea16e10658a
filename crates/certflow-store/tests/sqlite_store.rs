use chrono::{Duration, Utc};
use serde_json::json;

use certflow_core::traits::{
    AccessRepository, CertificateRepository, WorkflowOutputRepository, WorkflowRepository,
    WorkflowRunRepository,
};
use certflow_core::types::*;
use certflow_core::{CertflowError, WorkflowGraph};
use certflow_store::SqliteStore;

fn graph() -> WorkflowGraph {
    serde_json::from_value(json!({
        "nodes": [
            {"id": "s", "type": "start", "data": {"name": "Start"}},
            {
                "id": "u",
                "type": "bizUpload",
                "data": {"name": "Upload", "config": {"source": "form"}}
            },
            {"id": "e", "type": "end", "data": {"name": "End"}}
        ]
    }))
    .unwrap()
}

fn certificate(workflow_id: &str, run_id: &str, node_id: &str) -> Certificate {
    let now = Utc::now();
    Certificate {
        id: new_id(),
        source: CertificateSource::Upload,
        subject_alt_names: vec!["example.com".into(), "www.example.com".into()],
        certificate: "PEM_A".into(),
        issuer_certificate: String::new(),
        private_key: "KEY_A".into(),
        key_algorithm: "RSA2048".into(),
        serial_number: "01".into(),
        issuer_org: "Test CA".into(),
        valid_from: Some(now - Duration::days(1)),
        valid_to: Some(now + Duration::days(60)),
        acme_account_url: String::new(),
        acme_certificate_url: String::new(),
        renewed_from_id: None,
        workflow_id: workflow_id.into(),
        workflow_run_id: run_id.into(),
        workflow_node_id: node_id.into(),
        created_at: now,
    }
}

#[tokio::test]
async fn workflow_round_trip_and_scheduled_listing() {
    let store = SqliteStore::in_memory().unwrap();

    let mut scheduled = Workflow::new("nightly", WorkflowTriggerType::Scheduled);
    scheduled.trigger_cron = "0 0 3 * * *".into();
    scheduled.set_draft(graph());
    scheduled.publish().unwrap();

    let mut draft_only = Workflow::new("draft", WorkflowTriggerType::Scheduled);
    draft_only.set_draft(graph());

    let manual = Workflow::new("manual", WorkflowTriggerType::Manual);

    for wf in [&scheduled, &draft_only, &manual] {
        WorkflowRepository::save(&store, wf).await.unwrap();
    }

    let loaded = WorkflowRepository::get(&store, &scheduled.id).await.unwrap();
    assert_eq!(loaded.name, "nightly");
    assert_eq!(loaded.graph_content, Some(graph()));

    let listed = store.list_scheduled().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, scheduled.id);
    assert_eq!(store.list().await.unwrap().len(), 3);

    let missing = WorkflowRepository::get(&store, "nope").await.unwrap_err();
    assert!(matches!(missing, CertflowError::NotFound(_)));
}

#[tokio::test]
async fn run_and_logs_round_trip() {
    let store = SqliteStore::in_memory().unwrap();
    let mut run = WorkflowRun::new("wf", WorkflowTriggerType::Manual, graph());
    WorkflowRunRepository::save(&store, &run).await.unwrap();

    run.transition(WorkflowRunStatus::Processing).unwrap();
    run.fail(&CertflowError::provider("webhook", "boom").in_node("u", "Upload"))
        .unwrap();
    WorkflowRunRepository::save(&store, &run).await.unwrap();

    let loaded = WorkflowRunRepository::get(&store, &run.id).await.unwrap();
    assert_eq!(loaded.status, WorkflowRunStatus::Failed);
    assert_eq!(loaded.error.unwrap().node_id.as_deref(), Some("u"));
    assert!(loaded.ended_at.is_some());

    for (i, msg) in ["start", "middle", "finish"].iter().enumerate() {
        store
            .append_log(&WorkflowLog {
                run_id: run.id.clone(),
                node_id: format!("n{i}"),
                node_name: "Node".into(),
                level: LogLevel::Info,
                message: msg.to_string(),
                detail: (i == 1).then(|| json!({"k": "v"})),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
    }
    let logs = store.list_logs(&run.id).await.unwrap();
    let messages: Vec<_> = logs.iter().map(|l| l.message.as_str()).collect();
    assert_eq!(messages, vec!["start", "middle", "finish"]);
    assert_eq!(logs[1].detail, Some(json!({"k": "v"})));

    let runs = store.list_by_workflow("wf", 10).await.unwrap();
    assert_eq!(runs.len(), 1);
}

#[tokio::test]
async fn output_with_certificate_is_atomic_unit() {
    let store = SqliteStore::in_memory().unwrap();
    let cert = certificate("wf", "run-1", "u");
    let mut output = WorkflowOutput::new("wf", "run-1", "u", json!({"source": "form"}));
    output.outputs.push(OutputEntry::certificate_ref(&cert.id));

    store.save_with_certificate(&output, &cert).await.unwrap();

    let loaded = WorkflowOutputRepository::get(&store, "run-1", "u")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.certificate_id(), Some(cert.id.as_str()));
    assert_eq!(loaded.node_config, json!({"source": "form"}));

    let loaded_cert = CertificateRepository::get(&store, &cert.id).await.unwrap();
    assert_eq!(loaded_cert.source, CertificateSource::Upload);
    assert_eq!(loaded_cert.subject_alt_names, cert.subject_alt_names);
    assert_eq!(loaded_cert.private_key, "KEY_A");

    // Same certificate id again violates the primary key; the output must not change.
    let mut second = WorkflowOutput::new("wf", "run-2", "u", json!({}));
    second.outputs.push(OutputEntry::certificate_ref(&cert.id));
    assert!(store.save_with_certificate(&second, &cert).await.is_err());
    assert!(WorkflowOutputRepository::get(&store, "run-2", "u")
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn latest_terminal_output_ignores_skipped() {
    let store = SqliteStore::in_memory().unwrap();

    let mut first = WorkflowOutput::new("wf", "run-1", "d", json!({"provider": "webhook"}));
    first.created_at = Utc::now() - Duration::minutes(10);
    WorkflowOutputRepository::save(&store, &first).await.unwrap();

    let mut skipped = WorkflowOutput::new("wf", "run-2", "d", json!({"provider": "webhook"}));
    skipped.skipped = true;
    WorkflowOutputRepository::save(&store, &skipped).await.unwrap();

    let latest = store.get_latest_terminal("wf", "d").await.unwrap().unwrap();
    assert_eq!(latest.run_id, "run-1");
    assert!(store.get_latest_terminal("wf", "other").await.unwrap().is_none());
}

#[tokio::test]
async fn latest_certificate_by_node() {
    let store = SqliteStore::in_memory().unwrap();
    let mut older = certificate("wf", "run-1", "apply");
    older.created_at = Utc::now() - Duration::days(30);
    let newer = certificate("wf", "run-2", "apply");
    CertificateRepository::save(&store, &older).await.unwrap();
    CertificateRepository::save(&store, &newer).await.unwrap();

    let latest = store
        .get_latest_by_workflow_node("wf", "apply")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.id, newer.id);
}

#[tokio::test]
async fn access_round_trip() {
    let store = SqliteStore::in_memory().unwrap();
    let mut config = ConfigMap::new();
    config.insert("url".into(), json!("https://hooks.example.com"));
    let access = Access {
        id: "acc-1".into(),
        name: "hook".into(),
        provider: "webhook".into(),
        config,
    };
    AccessRepository::save(&store, &access).await.unwrap();
    let loaded = AccessRepository::get(&store, "acc-1").await.unwrap();
    assert_eq!(loaded.provider, "webhook");
    assert_eq!(loaded.config["url"], json!("https://hooks.example.com"));
}

#[tokio::test]
async fn file_backed_store_persists() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("certflow.db");
    {
        let store = SqliteStore::open(&path).unwrap();
        let wf = Workflow::new("persisted", WorkflowTriggerType::Manual);
        WorkflowRepository::save(&store, &wf).await.unwrap();
    }
    let store = SqliteStore::open(&path).unwrap();
    assert_eq!(store.list().await.unwrap()[0].name, "persisted");
}
