use serde::{Deserialize, Serialize};

use crate::error::{CertflowError, Result};
use crate::node::{NodeType, WorkflowNode};

/// An ordered, recursively nested node sequence: one version of a workflow.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowGraph {
    #[serde(default)]
    pub nodes: Vec<WorkflowNode>,
}

impl WorkflowGraph {
    pub fn new(nodes: Vec<WorkflowNode>) -> Self {
        Self { nodes }
    }

    /// Structural validation: at least two nodes, starting with `start` and
    /// ending with `end`.
    pub fn verify(&self) -> Result<()> {
        if self.nodes.len() < 2 {
            return Err(CertflowError::GraphIntegrity(
                "graph must contain at least a start and an end node".into(),
            ));
        }
        if self.nodes[0].node_type() != NodeType::Start {
            return Err(CertflowError::GraphIntegrity(
                "first node must be of type 'start'".into(),
            ));
        }
        if self.nodes[self.nodes.len() - 1].node_type() != NodeType::End {
            return Err(CertflowError::GraphIntegrity(
                "last node must be of type 'end'".into(),
            ));
        }
        Ok(())
    }

    /// Find a node by id, depth-first over the top-level sequence and every
    /// nested block. The first match wins.
    pub fn find_node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find_map(|n| n.find(id))
    }

    pub fn get_node(&self, id: &str) -> Result<&WorkflowNode> {
        self.find_node(id)
            .ok_or_else(|| CertflowError::NotFound(format!("node '{id}'")))
    }

    /// Visit every node in depth-first pre-order.
    pub fn walk(&self) -> Vec<&WorkflowNode> {
        fn visit<'a>(nodes: &'a [WorkflowNode], out: &mut Vec<&'a WorkflowNode>) {
            for n in nodes {
                out.push(n);
                visit(&n.blocks, out);
            }
        }
        let mut out = Vec::new();
        visit(&self.nodes, &mut out);
        out
    }

    /// Scheduled-trigger cron expression from the start node, if any.
    pub fn start_trigger_cron(&self) -> Option<String> {
        let start = self.nodes.first().filter(|n| n.node_type() == NodeType::Start)?;
        let cron = crate::node::config_str(&start.config, "triggerCron");
        (!cron.is_empty()).then_some(cron)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn graph(v: serde_json::Value) -> WorkflowGraph {
        serde_json::from_value(v).unwrap()
    }

    fn node(id: &str, ty: &str) -> serde_json::Value {
        json!({"id": id, "type": ty, "data": {"name": id}})
    }

    #[test]
    fn test_verify_rules() {
        assert!(graph(json!({"nodes": []})).verify().is_err());
        assert!(graph(json!({"nodes": [node("s", "start")]})).verify().is_err());
        assert!(graph(json!({"nodes": [node("e", "end"), node("s", "start")]})).verify().is_err());
        let no_end = graph(json!({"nodes": [node("s", "start"), node("d", "delay")]}));
        assert!(no_end.verify().is_err());
        assert!(graph(json!({"nodes": [node("s", "start"), node("e", "end")]})).verify().is_ok());
        assert!(graph(json!({"nodes": [node("s", "start"), node("d", "delay"), node("e", "end")]}))
            .verify()
            .is_ok());
    }

    #[test]
    fn test_verify_error_kind() {
        let err = graph(json!({"nodes": [node("s", "start")]})).verify().unwrap_err();
        assert!(matches!(err, CertflowError::GraphIntegrity(_)));
    }

    #[test]
    fn test_find_nested() {
        let g = graph(json!({"nodes": [
            node("s", "start"),
            {"id": "c", "type": "condition", "data": {"name": "c"}, "blocks": [
                {"id": "b1", "type": "branchBlock", "data": {"name": "b1"}, "blocks": [
                    {"id": "tc", "type": "tryCatch", "data": {"name": "tc"}, "blocks": [
                        {
                            "id": "t",
                            "type": "tryBlock",
                            "data": {"name": "t"},
                            "blocks": [node("deep", "bizNotify")]
                        }
                    ]}
                ]},
                {"id": "b2", "type": "branchBlock", "data": {"name": "b2"}}
            ]},
            node("e", "end")
        ]}));
        assert_eq!(g.find_node("deep").unwrap().node_type(), NodeType::BizNotify);
        assert_eq!(g.find_node("b2").unwrap().name, "b2");
        assert!(g.find_node("missing").is_none());
        assert!(matches!(g.get_node("missing"), Err(CertflowError::NotFound(_))));
        assert_eq!(g.walk().len(), 8);
    }

    #[test]
    fn test_first_match_wins() {
        let g = graph(json!({"nodes": [
            node("s", "start"),
            {"id": "c", "type": "condition", "data": {"name": "c"}, "blocks": [
                {"id": "dup", "type": "branchBlock", "data": {"name": "first"}}
            ]},
            {"id": "dup", "type": "delay", "data": {"name": "second"}},
            node("e", "end")
        ]}));
        assert_eq!(g.find_node("dup").unwrap().name, "first");
    }

    #[test]
    fn test_start_trigger_cron() {
        let g = graph(json!({"nodes": [
            {"id": "s", "type": "start", "data": {
                "name": "s",
                "config": {"trigger": "scheduled", "triggerCron": "0 0 3 * * *"}
            }},
            node("e", "end")
        ]}));
        assert_eq!(g.start_trigger_cron().as_deref(), Some("0 0 3 * * *"));
    }
}
