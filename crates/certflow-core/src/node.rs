use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::ConfigMap;

/// Node type tag as written by the graph editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeType {
    Start,
    End,
    Condition,
    BranchBlock,
    TryCatch,
    TryBlock,
    CatchBlock,
    Delay,
    BizApply,
    BizUpload,
    BizMonitor,
    BizDeploy,
    BizNotify,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::End => "end",
            Self::Condition => "condition",
            Self::BranchBlock => "branchBlock",
            Self::TryCatch => "tryCatch",
            Self::TryBlock => "tryBlock",
            Self::CatchBlock => "catchBlock",
            Self::Delay => "delay",
            Self::BizApply => "bizApply",
            Self::BizUpload => "bizUpload",
            Self::BizMonitor => "bizMonitor",
            Self::BizDeploy => "bizDeploy",
            Self::BizNotify => "bizNotify",
        }
    }

    /// Leaf nodes that call providers and record outputs.
    pub fn is_biz(self) -> bool {
        matches!(
            self,
            Self::BizApply | Self::BizUpload | Self::BizMonitor | Self::BizDeploy | Self::BizNotify
        )
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// --- Loosely-typed accessors over the persisted config map ---

/// String value of `key`; numbers and booleans are rendered, anything else is empty.
pub fn config_str(config: &ConfigMap, key: &str) -> String {
    match config.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

pub fn config_str_or(config: &ConfigMap, key: &str, default: &str) -> String {
    let value = config_str(config, key);
    if value.is_empty() {
        default.to_string()
    } else {
        value
    }
}

/// Integer value of `key`, accepting numbers and numeric strings.
pub fn config_i64(config: &ConfigMap, key: &str) -> Option<i64> {
    match config.get(key)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Boolean value of `key`, accepting booleans and `"true"`/`"false"` strings.
pub fn config_bool(config: &ConfigMap, key: &str) -> bool {
    match config.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.trim().eq_ignore_ascii_case("true") || s.trim() == "1",
        Some(Value::Number(n)) => n.as_i64().is_some_and(|i| i != 0),
        _ => false,
    }
}

/// Nested map at `key`; non-object values resolve to an empty map.
pub fn config_map(config: &ConfigMap, key: &str) -> ConfigMap {
    match config.get(key) {
        Some(Value::Object(m)) => m.clone(),
        _ => ConfigMap::new(),
    }
}

/// `;`-separated list at `key` with empty segments removed.
pub fn config_list(config: &ConfigMap, key: &str) -> Vec<String> {
    config_str(config, key)
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// --- Typed projections ---

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DelayConfig {
    /// Seconds to wait.
    pub wait: u64,
}

impl DelayConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            wait: config_i64(config, "wait").unwrap_or(0).max(0) as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BranchBlockConfig {
    /// Guard expression; `None` means the branch always runs.
    pub expression: Option<Value>,
}

impl BranchBlockConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            expression: config
                .get("expression")
                .filter(|v| match v {
                    Value::Null => false,
                    Value::String(s) => !s.trim().is_empty(),
                    _ => true,
                })
                .cloned(),
        }
    }
}

pub const DEFAULT_KEY_ALGORITHM: &str = "RSA2048";
pub const DEFAULT_CHALLENGE_TYPE: &str = "dns-01";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ApplyConfig {
    pub domains: Vec<String>,
    pub contact_email: String,
    pub challenge_type: String,
    pub provider: String,
    pub provider_access_id: String,
    pub provider_config: ConfigMap,
    pub key_algorithm: String,
    pub ca_provider: String,
    pub ca_provider_access_id: String,
    pub ca_provider_config: ConfigMap,
    /// Requested lifetime such as `30d` or `6h`.
    pub validity_lifetime: String,
    pub acme_profile: String,
    pub nameservers: Vec<String>,
    pub dns_propagation_wait: i64,
    pub dns_propagation_timeout: i64,
    pub dns_ttl: i64,
    pub http_delay_wait: i64,
    pub disable_follow_cname: bool,
    pub disable_ari: bool,
    /// Skip renewal while the last certificate has more than this many days left.
    pub skip_before_expiry_days: i64,
}

impl ApplyConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            domains: config_list(config, "domains"),
            contact_email: config_str(config, "contactEmail"),
            challenge_type: config_str_or(config, "challengeType", DEFAULT_CHALLENGE_TYPE),
            provider: config_str(config, "provider"),
            provider_access_id: config_str(config, "providerAccessId"),
            provider_config: config_map(config, "providerConfig"),
            key_algorithm: config_str_or(config, "keyAlgorithm", DEFAULT_KEY_ALGORITHM),
            ca_provider: config_str(config, "caProvider"),
            ca_provider_access_id: config_str(config, "caProviderAccessId"),
            ca_provider_config: config_map(config, "caProviderConfig"),
            validity_lifetime: config_str(config, "validityLifetime"),
            acme_profile: config_str(config, "acmeProfile"),
            nameservers: config_list(config, "nameservers"),
            dns_propagation_wait: config_i64(config, "dnsPropagationWait").unwrap_or(0),
            dns_propagation_timeout: config_i64(config, "dnsPropagationTimeout").unwrap_or(0),
            dns_ttl: config_i64(config, "dnsTTL").unwrap_or(0),
            http_delay_wait: config_i64(config, "httpDelayWait").unwrap_or(0),
            disable_follow_cname: config_bool(config, "disableFollowCNAME"),
            disable_ari: config_bool(config, "disableARI"),
            skip_before_expiry_days: config_i64(config, "skipBeforeExpiryDays").unwrap_or(0),
        }
    }
}

/// Where a bizUpload node reads its PEM material from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadSource {
    /// Inline PEM in the node config.
    Form,
    /// Paths on the local filesystem.
    Local,
    /// URLs fetched over HTTP.
    Url,
}

impl UploadSource {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "form" => Some(Self::Form),
            "local" => Some(Self::Local),
            "url" => Some(Self::Url),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UploadConfig {
    pub source: String,
    pub certificate: String,
    pub private_key: String,
}

impl UploadConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            source: config_str_or(config, "source", "form"),
            certificate: config_str(config, "certificate"),
            private_key: config_str(config, "privateKey"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MonitorConfig {
    pub host: String,
    pub port: u16,
    pub domain: String,
    pub path: String,
}

impl MonitorConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        let host = config_str(config, "host");
        let port = config_i64(config, "port")
            .filter(|p| *p > 0)
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(443);
        Self {
            domain: config_str_or(config, "domain", &host),
            host,
            port,
            path: config_str(config, "path"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeployConfig {
    pub certificate_output_node_id: String,
    pub provider: String,
    pub provider_access_id: String,
    pub provider_config: ConfigMap,
    pub skip_on_last_succeeded: bool,
}

impl DeployConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            certificate_output_node_id: config_str(config, "certificateOutputNodeId"),
            provider: config_str(config, "provider"),
            provider_access_id: config_str(config, "providerAccessId"),
            provider_config: config_map(config, "providerConfig"),
            skip_on_last_succeeded: config_bool(config, "skipOnLastSucceeded"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NotifyConfig {
    pub provider: String,
    pub provider_access_id: String,
    pub provider_config: ConfigMap,
    pub subject: String,
    pub message: String,
    pub skip_on_all_prev_skipped: bool,
}

impl NotifyConfig {
    pub fn from_config(config: &ConfigMap) -> Self {
        Self {
            provider: config_str(config, "provider"),
            provider_access_id: config_str(config, "providerAccessId"),
            provider_config: config_map(config, "providerConfig"),
            subject: config_str(config, "subject"),
            message: config_str(config, "message"),
            skip_on_all_prev_skipped: config_bool(config, "skipOnAllPrevSkipped"),
        }
    }
}

/// A node's type together with its typed configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Start,
    End,
    Condition,
    BranchBlock(BranchBlockConfig),
    TryCatch,
    TryBlock,
    CatchBlock,
    Delay(DelayConfig),
    BizApply(Box<ApplyConfig>),
    BizUpload(UploadConfig),
    BizMonitor(MonitorConfig),
    BizDeploy(DeployConfig),
    BizNotify(NotifyConfig),
}

impl NodeKind {
    /// Project the persisted config map for a node of type `node_type`.
    pub fn project(node_type: NodeType, config: &ConfigMap) -> Self {
        match node_type {
            NodeType::Start => Self::Start,
            NodeType::End => Self::End,
            NodeType::Condition => Self::Condition,
            NodeType::BranchBlock => Self::BranchBlock(BranchBlockConfig::from_config(config)),
            NodeType::TryCatch => Self::TryCatch,
            NodeType::TryBlock => Self::TryBlock,
            NodeType::CatchBlock => Self::CatchBlock,
            NodeType::Delay => Self::Delay(DelayConfig::from_config(config)),
            NodeType::BizApply => Self::BizApply(Box::new(ApplyConfig::from_config(config))),
            NodeType::BizUpload => Self::BizUpload(UploadConfig::from_config(config)),
            NodeType::BizMonitor => Self::BizMonitor(MonitorConfig::from_config(config)),
            NodeType::BizDeploy => Self::BizDeploy(DeployConfig::from_config(config)),
            NodeType::BizNotify => Self::BizNotify(NotifyConfig::from_config(config)),
        }
    }

    pub fn node_type(&self) -> NodeType {
        match self {
            Self::Start => NodeType::Start,
            Self::End => NodeType::End,
            Self::Condition => NodeType::Condition,
            Self::BranchBlock(_) => NodeType::BranchBlock,
            Self::TryCatch => NodeType::TryCatch,
            Self::TryBlock => NodeType::TryBlock,
            Self::CatchBlock => NodeType::CatchBlock,
            Self::Delay(_) => NodeType::Delay,
            Self::BizApply(_) => NodeType::BizApply,
            Self::BizUpload(_) => NodeType::BizUpload,
            Self::BizMonitor(_) => NodeType::BizMonitor,
            Self::BizDeploy(_) => NodeType::BizDeploy,
            Self::BizNotify(_) => NodeType::BizNotify,
        }
    }
}

/// One node of a workflow graph.
///
/// The persisted config map is kept alongside the typed projection so that
/// output snapshots and round trips preserve keys the projection ignores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawWorkflowNode", into = "RawWorkflowNode")]
pub struct WorkflowNode {
    pub id: String,
    pub name: String,
    pub disabled: bool,
    pub config: ConfigMap,
    pub kind: NodeKind,
    pub blocks: Vec<WorkflowNode>,
}

impl WorkflowNode {
    pub fn new(
        id: impl Into<String>,
        node_type: NodeType,
        name: impl Into<String>,
        config: ConfigMap,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            disabled: false,
            kind: NodeKind::project(node_type, &config),
            config,
            blocks: vec![],
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<WorkflowNode>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn node_type(&self) -> NodeType {
        self.kind.node_type()
    }

    /// Depth-first search of this node and its nested blocks.
    pub fn find(&self, id: &str) -> Option<&WorkflowNode> {
        if self.id == id {
            return Some(self);
        }
        self.blocks.iter().find_map(|child| child.find(id))
    }

    /// Direct children of the given type, in declaration order.
    pub fn blocks_of(&self, node_type: NodeType) -> impl Iterator<Item = &WorkflowNode> {
        self.blocks.iter().filter(move |b| b.node_type() == node_type)
    }

    /// Config snapshot recorded with this node's outputs.
    pub fn config_snapshot(&self) -> Value {
        Value::Object(self.config.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawNodeData {
    #[serde(default)]
    name: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    disabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    config: Option<ConfigMap>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawWorkflowNode {
    id: String,
    #[serde(rename = "type")]
    node_type: NodeType,
    #[serde(default = "empty_data")]
    data: RawNodeData,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    blocks: Vec<WorkflowNode>,
}

fn empty_data() -> RawNodeData {
    RawNodeData {
        name: String::new(),
        disabled: false,
        config: None,
    }
}

impl From<RawWorkflowNode> for WorkflowNode {
    fn from(raw: RawWorkflowNode) -> Self {
        let config = raw.data.config.unwrap_or_default();
        Self {
            id: raw.id,
            name: raw.data.name,
            disabled: raw.data.disabled,
            kind: NodeKind::project(raw.node_type, &config),
            config,
            blocks: raw.blocks,
        }
    }
}

impl From<WorkflowNode> for RawWorkflowNode {
    fn from(node: WorkflowNode) -> Self {
        Self {
            node_type: node.kind.node_type(),
            id: node.id,
            data: RawNodeData {
                name: node.name,
                disabled: node.disabled,
                config: (!node.config.is_empty()).then_some(node.config),
            },
            blocks: node.blocks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(v: Value) -> ConfigMap {
        match v {
            Value::Object(m) => m,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_apply_defaults_and_lists() {
        let cfg = ApplyConfig::from_config(&map(json!({
            "domains": "example.com;;*.example.com;",
            "nameservers": "",
            "skipBeforeExpiryDays": "30",
        })));
        assert_eq!(cfg.domains, vec!["example.com", "*.example.com"]);
        assert!(cfg.nameservers.is_empty());
        assert_eq!(cfg.key_algorithm, "RSA2048");
        assert_eq!(cfg.challenge_type, "dns-01");
        assert_eq!(cfg.skip_before_expiry_days, 30);
        assert!(cfg.provider_config.is_empty());
    }

    #[test]
    fn test_monitor_defaults() {
        let cfg = MonitorConfig::from_config(&map(json!({"host": "10.0.0.1"})));
        assert_eq!(cfg.port, 443);
        assert_eq!(cfg.domain, "10.0.0.1");

        let raw = map(json!({"host": "h", "port": "8443", "domain": "a.example"}));
        let cfg = MonitorConfig::from_config(&raw);
        assert_eq!(cfg.port, 8443);
        assert_eq!(cfg.domain, "a.example");

        let cfg = MonitorConfig::from_config(&map(json!({"host": "h", "port": [1]})));
        assert_eq!(cfg.port, 443);
    }

    #[test]
    fn test_upload_and_delay_defaults() {
        assert_eq!(UploadConfig::from_config(&ConfigMap::new()).source, "form");
        assert_eq!(DelayConfig::from_config(&ConfigMap::new()).wait, 0);
        assert_eq!(DelayConfig::from_config(&map(json!({"wait": 2}))).wait, 2);
        assert_eq!(DelayConfig::from_config(&map(json!({"wait": "oops"}))).wait, 0);
    }

    #[test]
    fn test_scalar_accessors_accept_renderings() {
        let c = map(json!({"a": "true", "b": true, "c": 1, "d": {"x": 1}, "e": "nope"}));
        assert!(config_bool(&c, "a"));
        assert!(config_bool(&c, "b"));
        assert!(config_bool(&c, "c"));
        assert!(!config_bool(&c, "d"));
        assert!(!config_bool(&c, "e"));
        assert!(!config_bool(&c, "missing"));
        assert_eq!(config_str(&c, "c"), "1");
        assert_eq!(config_str(&c, "d"), "");
    }

    #[test]
    fn test_branch_guard_absent_or_null() {
        assert!(BranchBlockConfig::from_config(&ConfigMap::new()).expression.is_none());
        let null_guard = map(json!({"expression": null}));
        assert!(BranchBlockConfig::from_config(&null_guard).expression.is_none());
    }

    #[test]
    fn test_node_round_trip_preserves_config() {
        let raw = json!({
            "id": "d1",
            "type": "bizDeploy",
            "data": {
                "name": "Deploy",
                "config": {"provider": "webhook", "certificateOutputNodeId": "a1", "extra": 7}
            }
        });
        let node: WorkflowNode = serde_json::from_value(raw.clone()).unwrap();
        match &node.kind {
            NodeKind::BizDeploy(cfg) => {
                assert_eq!(cfg.provider, "webhook");
                assert_eq!(cfg.certificate_output_node_id, "a1");
                assert!(!cfg.skip_on_last_succeeded);
            }
            other => panic!("unexpected kind {other:?}"),
        }
        assert_eq!(serde_json::to_value(&node).unwrap(), raw);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let raw = json!({"id": "x", "type": "bizTeleport", "data": {"name": "?"}});
        assert!(serde_json::from_value::<WorkflowNode>(raw).is_err());
    }
}
