use serde_json::{json, Value};

use certflow_core::graph::WorkflowGraph;
use certflow_core::node::{NodeType, WorkflowNode};
use certflow_core::types::ConfigMap;

/// Self-signed EC P-256 certificate for `example.com` and `www.example.com`,
/// serial `1A2B3C`, valid 2024-01-01 to 2124-01-01.
pub const EXAMPLE_CERT_PEM: &str = include_str!("../fixtures/example.cert.pem");
pub const EXAMPLE_KEY_PEM: &str = include_str!("../fixtures/example.key.pem");

/// Certificate for `old.example.com` that expired on 2021-01-01.
pub const EXPIRED_CERT_PEM: &str = include_str!("../fixtures/expired.cert.pem");
pub const EXPIRED_KEY_PEM: &str = include_str!("../fixtures/expired.key.pem");

fn config(value: Value) -> ConfigMap {
    match value {
        Value::Object(map) => map,
        _ => ConfigMap::new(),
    }
}

/// A node with the given config object (anything else means empty config).
pub fn node(id: &str, node_type: NodeType, config_value: Value) -> WorkflowNode {
    WorkflowNode::new(id, node_type, id, config(config_value))
}

pub fn disabled(mut node: WorkflowNode) -> WorkflowNode {
    node.disabled = true;
    node
}

pub fn start() -> WorkflowNode {
    node("start", NodeType::Start, Value::Null)
}

pub fn end() -> WorkflowNode {
    node("end", NodeType::End, Value::Null)
}

/// Wrap `body` between a start and an end node.
pub fn graph(body: Vec<WorkflowNode>) -> WorkflowGraph {
    let mut nodes = vec![start()];
    nodes.extend(body);
    nodes.push(end());
    WorkflowGraph::new(nodes)
}

pub fn delay(id: &str, wait: u64) -> WorkflowNode {
    node(id, NodeType::Delay, json!({ "wait": wait }))
}

pub fn upload_form(id: &str, certificate: &str, private_key: &str) -> WorkflowNode {
    node(
        id,
        NodeType::BizUpload,
        json!({ "source": "form", "certificate": certificate, "privateKey": private_key }),
    )
}

pub fn deploy(id: &str, source_node: &str, provider: &str) -> WorkflowNode {
    node(
        id,
        NodeType::BizDeploy,
        json!({ "certificateOutputNodeId": source_node, "provider": provider }),
    )
}

pub fn notify(id: &str, provider: &str, subject: &str, message: &str) -> WorkflowNode {
    node(
        id,
        NodeType::BizNotify,
        json!({ "provider": provider, "subject": subject, "message": message }),
    )
}

pub fn apply(
    id: &str,
    domains: &str,
    provider: &str,
    skip_before_expiry_days: i64,
) -> WorkflowNode {
    node(
        id,
        NodeType::BizApply,
        json!({
            "domains": domains,
            "contactEmail": "ops@example.com",
            "provider": provider,
            "skipBeforeExpiryDays": skip_before_expiry_days,
        }),
    )
}

/// tryCatch with the given try and catch sequences.
pub fn try_catch(
    id: &str,
    try_body: Vec<WorkflowNode>,
    catch_body: Vec<WorkflowNode>,
) -> WorkflowNode {
    node(id, NodeType::TryCatch, Value::Null).with_blocks(vec![
        node(&format!("{id}-try"), NodeType::TryBlock, Value::Null).with_blocks(try_body),
        node(&format!("{id}-catch"), NodeType::CatchBlock, Value::Null).with_blocks(catch_body),
    ])
}

/// Branch with an optional guard expression.
pub fn branch(id: &str, expression: Option<Value>, body: Vec<WorkflowNode>) -> WorkflowNode {
    let cfg = match expression {
        Some(expr) => json!({ "expression": expr }),
        None => Value::Null,
    };
    node(id, NodeType::BranchBlock, cfg).with_blocks(body)
}

pub fn condition(id: &str, branches: Vec<WorkflowNode>) -> WorkflowNode {
    node(id, NodeType::Condition, Value::Null).with_blocks(branches)
}
