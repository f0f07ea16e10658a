use certflow_core::node::{NodeKind, NodeType};
use certflow_core::WorkflowGraph;

fn demo_graph() -> WorkflowGraph {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/demos/renew-and-deploy.json");
    let text = std::fs::read_to_string(path).expect("read demo");
    let definition: serde_json::Value = serde_json::from_str(&text).expect("parse demo");
    serde_json::from_value(definition["graph"].clone()).expect("parse graph")
}

#[test]
fn test_demo_graph_is_publishable() {
    let graph = demo_graph();
    graph.verify().expect("demo graph verifies");
    assert_eq!(graph.start_trigger_cron().as_deref(), Some("0 3 * * *"));
}

#[test]
fn test_demo_nodes_project_typed_configs() {
    let graph = demo_graph();

    let NodeKind::BizApply(apply) = &graph.get_node("apply").unwrap().kind else {
        panic!("apply is not bizApply");
    };
    assert_eq!(apply.domains, vec!["example.com", "www.example.com"]);
    assert_eq!(apply.skip_before_expiry_days, 30);

    let install = graph.get_node("install").unwrap();
    assert_eq!(install.node_type(), NodeType::BizDeploy);
    let NodeKind::BizDeploy(deploy) = &install.kind else {
        panic!("install is not bizDeploy");
    };
    assert_eq!(deploy.certificate_output_node_id, "apply");
    assert!(deploy.skip_on_last_succeeded);

    let biz: Vec<&str> = graph
        .walk()
        .into_iter()
        .filter(|n| n.node_type().is_biz())
        .map(|n| n.id.as_str())
        .collect();
    assert_eq!(biz, vec!["apply", "install", "alert", "announce"]);
}
